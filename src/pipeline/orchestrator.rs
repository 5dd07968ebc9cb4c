//! End-to-end triage pipeline.
//!
//! Sequences validation → preprocessing → forward pass → class-discriminative
//! backward pass → saliency → heatmap rendering → symptom scoring → report
//! composition, and maps every failure to a typed [`AnalysisError`] so the
//! hosting service can translate rejections, operator faults, and internal
//! errors to distinct caller-visible outcomes.
//!
//! Model handles are constructed up front and held read-only; a missing
//! handle is a first-class `ModelUnavailable`, never a lazy load retry.
//! Saliency degeneracy and heatmap write failures are absorbed: the
//! clinical verdict never depends on the explanation side output.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::heatmap;
use super::preprocess;
use super::report;
use super::saliency;
use super::symptoms;
use super::types::{
    ClassScores, ClinicalReport, ImageSample, Modality, SaliencyMap, VisionClassifier,
};
use super::validate;
use super::AnalysisError;

pub struct TriagePipeline {
    xray: Option<Box<dyn VisionClassifier>>,
    ecg: Option<Box<dyn VisionClassifier>>,
    heatmap_dir: PathBuf,
}

impl TriagePipeline {
    /// A pipeline with no models attached. Every analysis call will fail
    /// with `ModelUnavailable` until classifiers are added.
    pub fn new(heatmap_dir: impl Into<PathBuf>) -> Self {
        Self {
            xray: None,
            ecg: None,
            heatmap_dir: heatmap_dir.into(),
        }
    }

    pub fn with_xray(mut self, classifier: Box<dyn VisionClassifier>) -> Self {
        debug_assert_eq!(classifier.modality(), Modality::Xray);
        self.xray = Some(classifier);
        self
    }

    pub fn with_ecg(mut self, classifier: Box<dyn VisionClassifier>) -> Self {
        debug_assert_eq!(classifier.modality(), Modality::Ecg);
        self.ecg = Some(classifier);
        self
    }

    /// Production construction from the standard artifact directories.
    ///
    /// The X-ray model is required: without it the service has no purpose.
    /// The ECG model is optional at startup (it ships later in the rollout);
    /// its absence is logged and surfaces per call as `ModelUnavailable`.
    #[cfg(feature = "onnx-backbone")]
    pub fn load_default() -> Result<Self, AnalysisError> {
        use super::classify::ResNetClassifier;
        use crate::config;

        let xray = ResNetClassifier::load(Modality::Xray, &config::xray_model_dir())?;

        let ecg = match ResNetClassifier::load(Modality::Ecg, &config::ecg_model_dir()) {
            Ok(classifier) => Some(Box::new(classifier) as Box<dyn VisionClassifier>),
            Err(e) => {
                warn!("ECG model not loaded: {e}");
                None
            }
        };

        Ok(Self {
            xray: Some(Box::new(xray)),
            ecg,
            heatmap_dir: config::heatmap_dir(),
        })
    }

    /// Analyze a chest X-ray, optionally fusing free-text symptoms into the
    /// final risk rating.
    pub fn analyze_xray(
        &self,
        image_path: &Path,
        symptoms_text: Option<&str>,
    ) -> Result<ClinicalReport, AnalysisError> {
        info!(image = %image_path.display(), "Starting X-ray analysis");

        let sample = self.load_sample(image_path, Modality::Xray)?;

        // The validation gate runs before any model work: rejections are
        // user-correctable and must not depend on model availability.
        validate::validate(&sample)?;

        let classifier = self.classifier_for(Modality::Xray)?;
        let (scores, saliency) = run_inference(classifier, &sample)?;
        let heatmap_path = self.write_heatmap(&saliency, &sample, "heatmap");

        let symptom_analysis = symptoms_text
            .filter(|t| !t.is_empty())
            .map(|t| symptoms::score(Some(t)));

        let report = report::compose_xray(scores, heatmap_path, symptom_analysis);
        info!(
            prediction = %report.prediction,
            confidence = report.confidence,
            risk = %report.risk_level,
            "X-ray analysis complete"
        );
        Ok(report)
    }

    /// Analyze an ECG waveform image. No validation gate and no symptom
    /// channel exist for this modality.
    pub fn analyze_ecg(&self, image_path: &Path) -> Result<ClinicalReport, AnalysisError> {
        info!(image = %image_path.display(), "Starting ECG analysis");

        let sample = self.load_sample(image_path, Modality::Ecg)?;
        let classifier = self.classifier_for(Modality::Ecg)?;
        let (scores, saliency) = run_inference(classifier, &sample)?;
        let heatmap_path = self.write_heatmap(&saliency, &sample, "heatmap_ecg");

        let report = report::compose_ecg(scores, heatmap_path);
        info!(
            prediction = %report.prediction,
            confidence = report.confidence,
            risk = %report.risk_level,
            "ECG analysis complete"
        );
        Ok(report)
    }

    fn load_sample(
        &self,
        image_path: &Path,
        modality: Modality,
    ) -> Result<ImageSample, AnalysisError> {
        let bytes = fs::read(image_path)?;
        preprocess::decode_sample(&bytes, image_path, modality)
    }

    fn classifier_for(&self, modality: Modality) -> Result<&dyn VisionClassifier, AnalysisError> {
        let slot = match modality {
            Modality::Xray => &self.xray,
            Modality::Ecg => &self.ecg,
        };
        slot.as_deref()
            .ok_or_else(|| AnalysisError::model_unavailable(modality, "no model loaded"))
    }

    /// Best effort: a failed render or write downgrades to "no heatmap".
    fn write_heatmap(
        &self,
        saliency: &SaliencyMap,
        sample: &ImageSample,
        prefix: &str,
    ) -> Option<PathBuf> {
        match heatmap::write_heatmap(saliency, &sample.source, &self.heatmap_dir, prefix) {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("heatmap not written: {e}");
                None
            }
        }
    }
}

/// Forward pass, softmax, and saliency for one sample. The forward pass
/// owns its activation capture, so this function is safe to run from
/// concurrent requests sharing one classifier.
fn run_inference(
    classifier: &dyn VisionClassifier,
    sample: &ImageSample,
) -> Result<(ClassScores, SaliencyMap), AnalysisError> {
    let tensor = preprocess::prepare(sample);
    let pass = classifier.forward(&tensor)?;
    let scores = ClassScores::from_logits(sample.modality, &pass.logits);

    let saliency = match (
        pass.activations.as_ref(),
        classifier.backward(scores.predicted_index, &pass),
    ) {
        (Some(activations), Some(gradients)) => saliency::compute_cam(activations, &gradients),
        _ => {
            debug!("gradient capture unavailable; yielding degenerate saliency map");
            SaliencyMap::degenerate()
        }
    };

    Ok((scores, saliency))
}
