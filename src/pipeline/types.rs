use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use image::RgbImage;
use ndarray::{Array1, Array2, Array3};
use serde::{Deserialize, Serialize};

use super::AnalysisError;

/// Model input resolution. Fixed by the training pipeline; both backbones
/// were trained on 224x224 crops.
pub const INPUT_SIZE: usize = 224;

/// Spatial resolution of the captured activation grid (last conv block of a
/// 224-input ResNet18).
pub const ACTIVATION_SIZE: usize = 7;

/// Imaging modality. Selects the label set, knowledge base, and validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Modality {
    Xray,
    Ecg,
}

impl Modality {
    /// Class labels in logit order. Index positions are a contract with the
    /// offline training pipeline.
    pub fn labels(&self) -> &'static [&'static str] {
        match self {
            Modality::Xray => &["NORMAL", "PNEUMONIA"],
            Modality::Ecg => &[
                "Normal",
                "Supraventricular",
                "Ventricular",
                "Fusion",
                "Unknown",
            ],
        }
    }

    pub fn num_classes(&self) -> usize {
        self.labels().len()
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Modality::Xray => write!(f, "X-Ray"),
            Modality::Ecg => write!(f, "ECG"),
        }
    }
}

/// A decoded input image. Immutable once validated: every downstream stage
/// reads from this, none mutates it.
#[derive(Debug, Clone)]
pub struct ImageSample {
    pub pixels: RgbImage,
    pub source: PathBuf,
    pub modality: Modality,
}

impl ImageSample {
    pub fn new(pixels: RgbImage, source: impl Into<PathBuf>, modality: Modality) -> Self {
        Self {
            pixels,
            source: source.into(),
            modality,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.pixels.width(), self.pixels.height())
    }
}

/// Normalized float tensor in CHW layout, shape (3, 224, 224). Owned by
/// exactly one inference call, never shared.
#[derive(Debug, Clone)]
pub struct InputTensor(pub Array3<f32>);

impl InputTensor {
    pub fn shape(&self) -> &[usize] {
        self.0.shape()
    }
}

/// One (label, probability) pair of the softmax output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelProbability {
    pub label: String,
    pub probability: f32,
}

/// Softmax output paired with the argmax label and its probability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassScores {
    pub scores: Vec<LabelProbability>,
    pub predicted_index: usize,
    pub predicted_label: String,
    pub primary_confidence: f32,
}

impl ClassScores {
    /// Stable softmax over raw logits. Probabilities are non-negative and
    /// sum to 1 within floating tolerance; the predicted label is the argmax.
    pub fn from_logits(modality: Modality, logits: &Array1<f32>) -> Self {
        let labels = modality.labels();
        debug_assert_eq!(logits.len(), labels.len());

        let max_logit = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let exps: Vec<f32> = logits.iter().map(|&l| (l - max_logit).exp()).collect();
        let sum: f32 = exps.iter().sum();

        let mut predicted_index = 0;
        let mut best = f32::NEG_INFINITY;
        let scores: Vec<LabelProbability> = exps
            .iter()
            .enumerate()
            .map(|(i, &e)| {
                let probability = e / sum;
                if probability > best {
                    best = probability;
                    predicted_index = i;
                }
                LabelProbability {
                    label: labels[i].to_string(),
                    probability,
                }
            })
            .collect();

        Self {
            predicted_label: scores[predicted_index].label.clone(),
            primary_confidence: scores[predicted_index].probability,
            scores,
            predicted_index,
        }
    }

    pub fn probability(&self, index: usize) -> f32 {
        self.scores[index].probability
    }
}

/// Class-discriminative spatial importance map, 224x224, values in [0, 1].
///
/// The all-zero map is the explicit degenerate state. It means gradient
/// capture failed, not that the model attended to nothing. Callers must
/// treat it as "no explanation available", never as an error.
#[derive(Debug, Clone)]
pub struct SaliencyMap {
    pub values: Array2<f32>,
}

impl SaliencyMap {
    pub fn new(values: Array2<f32>) -> Self {
        Self { values }
    }

    /// The explicit invalid state: all zeros at full output resolution.
    pub fn degenerate() -> Self {
        Self {
            values: Array2::zeros((INPUT_SIZE, INPUT_SIZE)),
        }
    }

    pub fn is_degenerate(&self) -> bool {
        self.values.iter().all(|&v| v == 0.0)
    }

    pub fn max(&self) -> f32 {
        self.values.iter().cloned().fold(0.0, f32::max)
    }
}

/// Symptom risk bucket derived from the additive keyword score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskCategory {
    Minimal,
    Low,
    Moderate,
    High,
    /// No symptom text was supplied. Distinct from "text scored zero".
    Unknown,
}

impl fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskCategory::Minimal => "Minimal",
            RiskCategory::Low => "Low",
            RiskCategory::Moderate => "Moderate",
            RiskCategory::High => "High",
            RiskCategory::Unknown => "Unknown",
        };
        write!(f, "{s}")
    }
}

/// Result of the rule-based symptom scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymptomAssessment {
    /// Additive keyword score, clamped to [0, 1].
    pub risk_score: f32,
    pub risk_category: RiskCategory,
    /// Matched category tags. Each category appears at most once.
    pub matched_symptoms: Vec<String>,
    /// Empty in the `Unknown` (no text) state.
    pub advisory: String,
}

/// Terminal artifact of one inference call. Created once, never mutated;
/// ownership passes to the caller, which is responsible for persisting or
/// serving the heatmap file referenced here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClinicalReport {
    pub modality: Modality,
    pub prediction: String,
    /// Primary confidence as a percentage, rounded to 2 decimals.
    pub confidence: f32,
    /// Full softmax output (raw probabilities, unrounded).
    pub class_scores: ClassScores,
    /// 1 - |P(class0) - P(class1)| as a percentage. Binary models only.
    pub uncertainty: Option<f32>,

    pub primary_finding: String,
    pub description: String,
    pub detailed_findings: Vec<String>,
    pub recommendations: Vec<String>,

    pub severity: String,
    pub urgency: String,
    pub risk_level: String,

    /// Rendered heatmap location. `None` when the write failed; the verdict
    /// above never depends on it. A degenerate saliency map still renders
    /// (as solid black), so degeneracy alone does not clear this.
    pub heatmap_path: Option<PathBuf>,
    pub symptom_analysis: Option<SymptomAssessment>,

    pub model_version: String,
    pub generated_at: DateTime<Utc>,
}

/// One forward pass worth of classifier output.
///
/// The activation capture is call-scoped by construction: this value is
/// owned by a single inference invocation, so concurrent requests can never
/// observe each other's gradients. (The hosting service may still dispatch
/// calls concurrently; no lock is required for correctness here.)
#[derive(Debug)]
pub struct ForwardPass {
    pub logits: Array1<f32>,
    /// Activations at the last convolutional block, shape (C, 7, 7).
    /// `None` when the backbone did not capture them.
    pub activations: Option<Array3<f32>>,
}

/// Convolutional feature extractor: everything up to (and including) the
/// last convolutional block. Abstracted so tests run without ONNX binaries.
pub trait FeatureBackbone: Send + Sync {
    /// Extract activations of shape (channels, 7, 7) from the input tensor.
    fn features(&self, input: &InputTensor) -> Result<Array3<f32>, AnalysisError>;
}

/// Full classifier seam: forward pass plus the class-discriminative
/// backward pass needed for saliency.
pub trait VisionClassifier: Send + Sync {
    fn modality(&self) -> Modality;

    fn forward(&self, input: &InputTensor) -> Result<ForwardPass, AnalysisError>;

    /// Gradient of the given class logit with respect to the captured
    /// activations, shape (C, 7, 7). `None` when activations were not
    /// captured; downstream saliency degrades to the all-zero map.
    fn backward(&self, class_index: usize, pass: &ForwardPass) -> Option<Array3<f32>>;
}
