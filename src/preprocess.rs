use crate::frame::RawFrame;
use crate::model_service::{InputTensor, MODEL_INPUT_HEIGHT, MODEL_INPUT_LEN, MODEL_INPUT_WIDTH};
use image::{imageops::FilterType, GenericImageView};
use thiserror::Error;

// ITU-R BT.601 luma coefficients, matching the model's training data.
pub const LUMA_RED: f32 = 0.2989;
pub const LUMA_GREEN: f32 = 0.5870;
pub const LUMA_BLUE: f32 = 0.1140;

const PIXEL_SCALE: f32 = 255.0;

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("failed to decode frame: {0}")]
    Decode(#[from] image::ImageError),
    #[error("frame decoded to an empty {width}x{height} image")]
    EmptyFrame { width: u32, height: u32 },
}

/// Decodes the frame buffer, squashes it to 48x48 (aspect ratio is not
/// preserved) and converts to normalized grayscale in [0, 1].
pub fn preprocess(frame: &RawFrame) -> Result<InputTensor, PreprocessError> {
    let reader = image::ImageReader::new(std::io::Cursor::new(frame.data()))
        .with_guessed_format()
        .map_err(image::ImageError::IoError)?;
    let decoded = reader.decode()?;

    let (width, height) = decoded.dimensions();
    if width == 0 || height == 0 {
        return Err(PreprocessError::EmptyFrame { width, height });
    }

    let resized = decoded
        .resize_exact(
            MODEL_INPUT_WIDTH as u32,
            MODEL_INPUT_HEIGHT as u32,
            FilterType::Triangle,
        )
        .to_rgb8();

    let mut pixels = Vec::with_capacity(MODEL_INPUT_LEN);
    for pixel in resized.pixels() {
        let [r, g, b] = pixel.0;
        let gray = LUMA_RED * r as f32 + LUMA_GREEN * g as f32 + LUMA_BLUE * b as f32;
        pixels.push(gray / PIXEL_SCALE);
    }

    Ok(InputTensor::from_pixels(pixels))
}
