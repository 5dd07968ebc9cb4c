pub mod config;
pub mod pipeline;

pub use pipeline::orchestrator::TriagePipeline;
pub use pipeline::types::{
    ClassScores, ClinicalReport, ImageSample, InputTensor, Modality, RiskCategory, SaliencyMap,
    SymptomAssessment,
};
pub use pipeline::AnalysisError;

use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber for binaries embedding this crate.
/// Respects `RUST_LOG` when set, otherwise falls back to the crate default.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);
}
