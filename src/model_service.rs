use ndarray::{Array, ArrayView, Ix4};
use thiserror::Error;

pub const MODEL_INPUT_WIDTH: usize = 48;
pub const MODEL_INPUT_HEIGHT: usize = 48;
pub const MODEL_INPUT_LEN: usize = MODEL_INPUT_WIDTH * MODEL_INPUT_HEIGHT;

/// Normalized grayscale model input, shape (1, 48, 48, 1), row-major.
///
/// Construction is the only way to obtain one, so every `InputTensor`
/// holds exactly `MODEL_INPUT_LEN` values.
#[derive(Debug)]
pub struct InputTensor(Array<f32, Ix4>);

impl InputTensor {
    pub fn from_pixels(pixels: Vec<f32>) -> Self {
        assert_eq!(
            pixels.len(),
            MODEL_INPUT_LEN,
            "input tensor must hold exactly {} values",
            MODEL_INPUT_LEN
        );
        let array = Array::from_shape_vec((1, MODEL_INPUT_HEIGHT, MODEL_INPUT_WIDTH, 1), pixels)
            .expect("length checked above");
        Self(array)
    }

    pub fn view(&self) -> ArrayView<'_, f32, Ix4> {
        self.0.view()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Raw class scores as returned by the model, in fixed class order.
/// No softmax guarantee; a well-formed output has one score per class.
#[derive(Debug, Clone)]
pub struct OutputTensor(Vec<f32>);

impl OutputTensor {
    pub fn new(scores: Vec<f32>) -> Self {
        Self(scores)
    }

    pub fn scores(&self) -> &[f32] {
        &self.0
    }
}

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("model execution failed: {0}")]
    Session(#[from] ort::Error),
    #[error("inference session lost: {0}")]
    SessionLost(String),
}

impl InferenceError {
    /// Session-lost faults mean the engine state is gone; the worker stops
    /// and surfaces the fault instead of accepting further frames.
    pub fn is_fatal(&self) -> bool {
        matches!(self, InferenceError::SessionLost(_))
    }
}

pub trait ModelService: Send + Sync + 'static {
    fn infer(&self, input: &InputTensor) -> Result<OutputTensor, InferenceError>;
}
