//! Rule-based symptom risk scoring over free-text descriptions.
//!
//! A fixed category → keyword → weight table is scanned with lower-cased
//! substring matching. Within one category the first keyword hit wins and
//! the category is counted once; across categories, overlapping keywords
//! compound on purpose ("severe pain" scores emergency, severe, and pain).
//! The additive score is capped at 1.0; this is a hand-tuned triage
//! heuristic, not a probabilistic combination.

use super::types::{RiskCategory, SymptomAssessment};

struct SymptomCategory {
    name: &'static str,
    keywords: &'static [&'static str],
    weight: f32,
}

/// Scan order is fixed so matched-category lists are deterministic.
const CATEGORIES: &[SymptomCategory] = &[
    SymptomCategory {
        name: "emergency",
        keywords: &["blood", "hemoptysis", "confusion", "unconscious", "severe pain"],
        weight: 0.4,
    },
    SymptomCategory {
        name: "severe",
        keywords: &["severe", "intense", "extreme", "unbearable", "acute"],
        weight: 0.3,
    },
    SymptomCategory {
        name: "respiratory",
        keywords: &["cough", "breath", "breathing", "shortness", "wheez", "dyspnea"],
        weight: 0.2,
    },
    SymptomCategory {
        name: "fever",
        keywords: &["fever", "temperature", "hot", "chills", "sweating"],
        weight: 0.2,
    },
    SymptomCategory {
        name: "pain",
        keywords: &["pain", "chest pain", "ache", "discomfort", "hurt"],
        weight: 0.2,
    },
    SymptomCategory {
        name: "fatigue",
        keywords: &["tired", "fatigue", "weak", "exhausted", "lethargy"],
        weight: 0.1,
    },
    SymptomCategory {
        name: "mucus",
        keywords: &["mucus", "phlegm", "sputum", "discharge"],
        weight: 0.1,
    },
];

const HIGH_RISK_ADVISORY: &str = "Seek immediate medical attention";
const DEFAULT_ADVISORY: &str = "Monitor symptoms closely";

/// Pure function: same text always yields the same assessment, independent
/// of call order. Absent or empty text is a distinct `Unknown` state with
/// no advisory; text that merely scores zero still gets the default one.
pub fn score(text: Option<&str>) -> SymptomAssessment {
    let text = match text {
        Some(t) if !t.is_empty() => t.to_lowercase(),
        _ => {
            return SymptomAssessment {
                risk_score: 0.0,
                risk_category: RiskCategory::Unknown,
                matched_symptoms: Vec::new(),
                advisory: String::new(),
            }
        }
    };

    let mut matched = Vec::new();
    let mut risk_score = 0.0f32;

    for category in CATEGORIES {
        if category.keywords.iter().any(|k| text.contains(k)) {
            matched.push(category.name.to_string());
            risk_score += category.weight;
        }
    }

    let risk_score = risk_score.min(1.0);

    let advisory = if risk_score >= 0.7 {
        HIGH_RISK_ADVISORY
    } else {
        DEFAULT_ADVISORY
    };

    SymptomAssessment {
        risk_score,
        risk_category: category_for(risk_score),
        matched_symptoms: matched,
        advisory: advisory.to_string(),
    }
}

fn category_for(score: f32) -> RiskCategory {
    if score >= 0.7 {
        RiskCategory::High
    } else if score >= 0.4 {
        RiskCategory::Moderate
    } else if score >= 0.1 {
        RiskCategory::Low
    } else {
        RiskCategory::Minimal
    }
}
