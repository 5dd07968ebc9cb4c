//! Fuses classifier confidence, saliency output, and symptom risk into the
//! terminal `ClinicalReport`.
//!
//! The X-ray fusion policy is evaluated in strict precedence order: a high
//! symptom-risk score overrides a confident model, which overrides the
//! baseline pathological rating. The thresholds are hand-tuned against the
//! deployed product and are part of its clinical contract.

use std::path::PathBuf;

use chrono::Utc;
use tracing::debug;

use super::knowledge;
use super::types::{ClassScores, ClinicalReport, Modality, SymptomAssessment};
use crate::config;

/// X-ray label indices, fixed by training label order.
const XRAY_PNEUMONIA: usize = 1;

/// ECG label index for ventricular ectopic beats.
const ECG_VENTRICULAR: usize = 2;

/// Model confidence at or above this upgrades a pneumonia call on its own.
const HIGH_CONFIDENCE: f32 = 0.85;

/// Symptom risk at or above this dominates the X-ray fusion policy.
const HIGH_SYMPTOM_RISK: f32 = 0.7;

/// Symptom risk at or above this elevates an otherwise-normal X-ray.
const ELEVATED_SYMPTOM_RISK: f32 = 0.5;

/// Ventricular confidence above this escalates the ECG risk rating.
const ECG_ESCALATION_CONFIDENCE: f32 = 0.8;

/// Compose the X-ray report. Severity and overall risk come from the fusion
/// policy; urgency always comes from the knowledge base.
pub fn compose_xray(
    scores: ClassScores,
    heatmap_path: Option<PathBuf>,
    symptom_analysis: Option<SymptomAssessment>,
) -> ClinicalReport {
    let entry = knowledge::lookup(Modality::Xray, scores.predicted_index);
    let symptom_risk = symptom_analysis
        .as_ref()
        .map(|s| s.risk_score)
        .unwrap_or(0.0);

    let (severity, risk_level) = if scores.predicted_index == XRAY_PNEUMONIA {
        if symptom_risk >= HIGH_SYMPTOM_RISK {
            ("High", "Critical")
        } else if scores.primary_confidence >= HIGH_CONFIDENCE {
            ("Moderate-High", "High")
        } else {
            ("Moderate", "Moderate")
        }
    } else if symptom_risk >= ELEVATED_SYMPTOM_RISK {
        ("Low-Moderate", "Moderate")
    } else {
        ("None", "Low")
    };

    // Only meaningful for a binary head: 0 = fully confident,
    // 100 = maximally ambiguous.
    let uncertainty = 1.0 - (scores.probability(0) - scores.probability(1)).abs();

    debug!(
        prediction = %scores.predicted_label,
        confidence = scores.primary_confidence,
        symptom_risk,
        severity,
        risk_level,
        "X-ray report composed"
    );

    ClinicalReport {
        modality: Modality::Xray,
        prediction: scores.predicted_label.clone(),
        confidence: as_percent(scores.primary_confidence),
        uncertainty: Some(as_percent(uncertainty)),
        class_scores: scores,
        primary_finding: entry.primary.to_string(),
        description: entry.description.to_string(),
        detailed_findings: to_strings(entry.findings),
        recommendations: to_strings(entry.recommendations),
        severity: severity.to_string(),
        urgency: entry.urgency.to_string(),
        risk_level: risk_level.to_string(),
        heatmap_path,
        symptom_analysis,
        model_version: config::MODEL_VERSION.to_string(),
        generated_at: Utc::now(),
    }
}

/// Compose the ECG report. Per-label fixed risk, escalated for confident
/// ventricular calls; no symptom channel exists for this modality.
pub fn compose_ecg(scores: ClassScores, heatmap_path: Option<PathBuf>) -> ClinicalReport {
    let entry = knowledge::lookup(Modality::Ecg, scores.predicted_index);

    let risk_level = if scores.predicted_index == 0 {
        "Low"
    } else if scores.predicted_index == ECG_VENTRICULAR
        && scores.primary_confidence > ECG_ESCALATION_CONFIDENCE
    {
        "High"
    } else {
        "Moderate"
    };

    debug!(
        prediction = %scores.predicted_label,
        confidence = scores.primary_confidence,
        risk_level,
        "ECG report composed"
    );

    ClinicalReport {
        modality: Modality::Ecg,
        prediction: scores.predicted_label.clone(),
        confidence: as_percent(scores.primary_confidence),
        uncertainty: None,
        class_scores: scores,
        primary_finding: entry.primary.to_string(),
        description: entry.description.to_string(),
        detailed_findings: to_strings(entry.findings),
        recommendations: to_strings(entry.recommendations),
        severity: entry.severity.to_string(),
        urgency: entry.urgency.to_string(),
        risk_level: risk_level.to_string(),
        heatmap_path,
        symptom_analysis: None,
        model_version: config::MODEL_VERSION.to_string(),
        generated_at: Utc::now(),
    }
}

/// Probability to a percentage rounded to 2 decimals, matching the wire
/// format the review UI expects.
fn as_percent(p: f32) -> f32 {
    (p * 10_000.0).round() / 100.0
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
