//! Static clinical knowledge base.
//!
//! One immutable entry per (modality, label), complete by construction:
//! the lookup is over fixed arrays aligned with [`Modality::labels`], so a
//! label without findings/recommendations text cannot exist. Entry text is
//! the reviewed wording of the deployed triage product; treat edits as
//! clinical-content changes, not refactors.

use super::types::Modality;

#[derive(Debug)]
pub struct KnowledgeEntry {
    pub primary: &'static str,
    pub description: &'static str,
    pub findings: &'static [&'static str],
    pub recommendations: &'static [&'static str],
    /// Baseline ratings before the composer's fusion policy runs.
    pub severity: &'static str,
    pub urgency: &'static str,
    pub risk_level: &'static str,
}

/// Entry for a predicted label, in logit order per [`Modality::labels`].
pub fn lookup(modality: Modality, label_index: usize) -> &'static KnowledgeEntry {
    let entries: &[KnowledgeEntry] = match modality {
        Modality::Xray => &XRAY_ENTRIES,
        Modality::Ecg => &ECG_ENTRIES,
    };
    debug_assert!(label_index < entries.len());
    &entries[label_index]
}

static XRAY_ENTRIES: [KnowledgeEntry; 2] = [
    KnowledgeEntry {
        primary: "Normal Chest X-Ray",
        description: "The chest X-ray shows clear lung fields with no signs of pneumonia, \
                      consolidation, or other abnormalities. The cardiac silhouette appears \
                      normal in size and shape. No pleural effusion or pneumothorax detected.",
        findings: &[
            "Clear bilateral lung fields",
            "Normal cardiac silhouette",
            "No pleural effusion detected",
            "No signs of consolidation or infiltrates",
            "Normal pulmonary vasculature",
            "No evidence of pneumothorax",
        ],
        recommendations: &[
            "No immediate medical intervention required",
            "Continue routine health monitoring",
            "Maintain healthy lifestyle practices",
            "Follow up as per routine schedule",
        ],
        severity: "None",
        urgency: "Routine",
        risk_level: "Low",
    },
    KnowledgeEntry {
        primary: "Pneumonia Detected",
        description: "The chest X-ray shows radiographic evidence consistent with pneumonia. \
                      Areas of consolidation or infiltrates are visible in the lung fields, \
                      indicating possible bacterial or viral infection. Immediate medical \
                      attention is recommended.",
        findings: &[
            "Consolidation in lung fields detected",
            "Infiltrates present in affected areas",
            "Increased opacity indicating infection",
            "Air bronchograms may be visible",
            "Possible pleural involvement",
            "Abnormal lung parenchyma density",
        ],
        recommendations: &[
            "Immediate medical consultation required",
            "Clinical correlation with symptoms essential",
            "Consider antibiotic therapy if bacterial origin",
            "Follow-up chest X-ray recommended in 4-6 weeks",
            "Monitor for complications (pleural effusion, abscess)",
            "Supportive care and rest advised",
        ],
        severity: "Moderate to High",
        urgency: "Urgent",
        risk_level: "High",
    },
];

static ECG_ENTRIES: [KnowledgeEntry; 5] = [
    KnowledgeEntry {
        primary: "Normal Beat Detected",
        description: "Normal Sinus Rhythm. The ECG shows a regular rhythm with normal \
                      intervals and wave morphology.",
        findings: &[
            "Regular rhythm with consistent R-R intervals",
            "Normal P wave, QRS complex, and T wave morphology",
        ],
        recommendations: &["Routine checkup advised."],
        severity: "None",
        urgency: "Routine",
        risk_level: "Low",
    },
    KnowledgeEntry {
        primary: "Supraventricular Beat Detected",
        description: "Supraventricular Ectopic Beat detected. This impulse originates above \
                      the ventricles and may indicate atrial premature beats or paroxysmal \
                      tachycardia.",
        findings: &[
            "Premature beat with narrow QRS complex",
            "Abnormal or absent P wave preceding the ectopic beat",
        ],
        recommendations: &["Consult a cardiologist for further evaluation."],
        severity: "Low",
        urgency: "Follow-up",
        risk_level: "Moderate",
    },
    KnowledgeEntry {
        primary: "Ventricular Beat Detected",
        description: "Ventricular Ectopic Beat detected. This suggests a premature \
                      ventricular contraction (PVC). Only significant if frequent.",
        findings: &[
            "Premature beat with wide, bizarre QRS complex",
            "No preceding P wave",
            "Compensatory pause after the ectopic beat",
        ],
        recommendations: &["Consult a cardiologist for further evaluation."],
        severity: "Moderate",
        urgency: "Follow-up",
        risk_level: "Moderate",
    },
    KnowledgeEntry {
        primary: "Fusion Beat Detected",
        description: "Fusion Beat detected. A merging of a normal sinus beat and a \
                      ventricular beat.",
        findings: &[
            "Hybrid QRS morphology between sinus and ventricular beats",
            "Intermediate QRS duration",
        ],
        recommendations: &["Consult a cardiologist for further evaluation."],
        severity: "Low",
        urgency: "Follow-up",
        risk_level: "Moderate",
    },
    KnowledgeEntry {
        primary: "Unknown Beat Detected",
        description: "Unclassifiable pattern detected. Requires manual review.",
        findings: &["Waveform does not match known beat morphologies"],
        recommendations: &["Consult a cardiologist for further evaluation."],
        severity: "Undetermined",
        urgency: "Follow-up",
        risk_level: "Moderate",
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_label_has_a_complete_entry() {
        for modality in [Modality::Xray, Modality::Ecg] {
            for (i, label) in modality.labels().iter().enumerate() {
                let entry = lookup(modality, i);
                assert!(!entry.primary.is_empty(), "{modality} {label}: primary");
                assert!(!entry.description.is_empty(), "{modality} {label}: description");
                assert!(!entry.findings.is_empty(), "{modality} {label}: findings");
                assert!(
                    !entry.recommendations.is_empty(),
                    "{modality} {label}: recommendations"
                );
                assert!(!entry.severity.is_empty());
                assert!(!entry.urgency.is_empty());
                assert!(!entry.risk_level.is_empty());
            }
        }
    }

    #[test]
    fn pneumonia_entry_is_urgent_high_risk() {
        let entry = lookup(Modality::Xray, 1);
        assert_eq!(entry.primary, "Pneumonia Detected");
        assert_eq!(entry.urgency, "Urgent");
        assert_eq!(entry.risk_level, "High");
    }

    #[test]
    fn normal_xray_entry_is_routine() {
        let entry = lookup(Modality::Xray, 0);
        assert_eq!(entry.severity, "None");
        assert_eq!(entry.urgency, "Routine");
        assert_eq!(entry.risk_level, "Low");
    }

    #[test]
    fn non_normal_ecg_labels_refer_to_cardiologist() {
        for i in 1..Modality::Ecg.num_classes() {
            let entry = lookup(Modality::Ecg, i);
            assert_eq!(
                entry.recommendations,
                &["Consult a cardiologist for further evaluation."]
            );
        }
    }
}
