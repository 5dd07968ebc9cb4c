//! Inference-and-explanation pipeline for image-based medical triage.
//!
//! Data flows one-directionally: raw image bytes → validated image → tensor
//! → logits + captured activations → Grad-CAM saliency map → composed
//! clinical report. Each stage is a separate module; the orchestrator
//! sequences them.

pub mod classify;
pub mod heatmap;
pub mod knowledge;
pub mod orchestrator;
pub mod preprocess;
pub mod report;
pub mod saliency;
pub mod symptoms;
pub mod types;
pub mod validate;

use thiserror::Error;

use types::Modality;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Validation gate rejected the input. User-correctable; the message
    /// names the specific metric that failed.
    #[error("Invalid image: {reason}")]
    InvalidImage { reason: String },

    /// Weights artifact missing or unloadable. Operator-correctable.
    #[error("{modality} model unavailable: {reason}")]
    ModelUnavailable { modality: Modality, reason: String },

    #[error("Image processing error: {0}")]
    ImageProcessing(String),

    /// ONNX session or tensor-shape failure during the forward pass.
    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Malformed weights artifact: {0}")]
    WeightsFormat(String),
}

impl AnalysisError {
    pub fn invalid_image(reason: impl Into<String>) -> Self {
        Self::InvalidImage {
            reason: reason.into(),
        }
    }

    pub fn model_unavailable(modality: Modality, reason: impl Into<String>) -> Self {
        Self::ModelUnavailable {
            modality,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_image_carries_reason() {
        let err = AnalysisError::invalid_image("high color saturation (61.2)");
        assert!(err.to_string().contains("high color saturation"));
    }

    #[test]
    fn model_unavailable_names_modality() {
        let err = AnalysisError::model_unavailable(Modality::Ecg, "backbone.onnx not found");
        let msg = err.to_string();
        assert!(msg.contains("ECG"));
        assert!(msg.contains("backbone.onnx"));
    }
}
