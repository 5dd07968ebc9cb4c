//! Deterministic image-to-tensor transform.
//!
//! The resize + scale + per-channel normalization here must bit-match the
//! transform used when the classifiers were trained (torchvision's
//! `Resize((224, 224))` + `ToTensor` + ImageNet `Normalize`). These values
//! are a contract with the offline training pipeline, not free parameters:
//! drift here makes every confidence value downstream meaningless.

use std::path::Path;

use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array3;

use super::types::{ImageSample, InputTensor, Modality, INPUT_SIZE};
use super::AnalysisError;

/// Per-channel mean the backbone was trained with (ImageNet statistics).
pub const CHANNEL_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// Per-channel standard deviation the backbone was trained with.
pub const CHANNEL_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Maximum input image size (in bytes) before rejecting.
/// Prevents OOM on corrupt/adversarial files.
const MAX_IMAGE_BYTES: usize = 50 * 1024 * 1024; // 50 MB

/// Minimum valid image size in bytes (smallest valid PNG is ~67 bytes).
const MIN_IMAGE_BYTES: usize = 67;

/// Decode raw upload bytes into an [`ImageSample`].
pub fn decode_sample(
    bytes: &[u8],
    source: &Path,
    modality: Modality,
) -> Result<ImageSample, AnalysisError> {
    validate_image_bytes(bytes)?;

    let decoded = image::load_from_memory(bytes)
        .map_err(|e| AnalysisError::ImageProcessing(format!("Failed to decode image: {e}")))?;

    Ok(ImageSample::new(decoded.to_rgb8(), source, modality))
}

/// Validate image bytes before decoding.
/// Returns an early error for clearly invalid input, saving decode time.
pub fn validate_image_bytes(bytes: &[u8]) -> Result<(), AnalysisError> {
    if bytes.len() < MIN_IMAGE_BYTES {
        return Err(AnalysisError::ImageProcessing(
            "Image data too small to be valid".into(),
        ));
    }
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(AnalysisError::ImageProcessing(format!(
            "Image data exceeds {}MB limit",
            MAX_IMAGE_BYTES / (1024 * 1024)
        )));
    }
    Ok(())
}

/// Resize to 224x224 and normalize into a CHW float tensor.
///
/// Total function: any decoded RGB image produces a tensor. The resize is
/// exact (both axes forced to 224, aspect ratio NOT preserved) with
/// bilinear filtering, matching the training transform.
pub fn prepare(sample: &ImageSample) -> InputTensor {
    let resized = resize_for_model(&sample.pixels);

    let mut tensor = Array3::<f32>::zeros((3, INPUT_SIZE, INPUT_SIZE));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            let scaled = pixel.0[c] as f32 / 255.0;
            tensor[[c, y as usize, x as usize]] = (scaled - CHANNEL_MEAN[c]) / CHANNEL_STD[c];
        }
    }

    InputTensor(tensor)
}

fn resize_for_model(pixels: &RgbImage) -> RgbImage {
    if pixels.width() as usize == INPUT_SIZE && pixels.height() as usize == INPUT_SIZE {
        return pixels.clone();
    }
    image::imageops::resize(
        pixels,
        INPUT_SIZE as u32,
        INPUT_SIZE as u32,
        FilterType::Triangle,
    )
}
