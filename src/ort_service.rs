use crate::config::ModelSettings;
use crate::model_service::{InferenceError, InputTensor, ModelService, OutputTensor};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StartupError {
    #[error("failed to initialize onnx runtime: {0}")]
    Ort(#[from] ort::Error),
}

/// Adapter over one ONNX session. The session is loaded once at startup
/// and never replaced; all inference goes through it sequentially.
pub struct OrtModelService {
    session: Mutex<Session>,
    output_name: String,
}

impl OrtModelService {
    pub fn new(model_settings: &ModelSettings) -> Result<Self, StartupError> {
        ort::init().commit()?;

        let model_path = model_settings.get_model_path();
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(&model_path)?;

        let output_name = session.outputs[0].name.clone();
        tracing::info!(
            model = %model_path.display(),
            output = %output_name,
            "loaded emotion model"
        );

        Ok(Self {
            session: Mutex::new(session),
            output_name,
        })
    }
}

impl ModelService for OrtModelService {
    fn infer(&self, input: &InputTensor) -> Result<OutputTensor, InferenceError> {
        let mut session = self
            .session
            .lock()
            .map_err(|e| InferenceError::SessionLost(format!("session mutex poisoned: {}", e)))?;

        let tensor = TensorRef::from_array_view(input.view())?;
        let outputs = session.run(ort::inputs![tensor])?;

        let (_, scores) = outputs[self.output_name.as_str()].try_extract_tensor::<f32>()?;
        Ok(OutputTensor::new(scores.to_vec()))
    }
}
