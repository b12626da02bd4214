mod source;

pub mod app;
pub mod config;
pub mod frame;
pub mod labels;
pub mod model_service;
pub mod ort_service;
pub mod pipeline;
pub mod preprocess;

pub use app::start_app;
