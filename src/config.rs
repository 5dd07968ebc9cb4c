use std::path::PathBuf;

/// Application-level constants
pub const APP_NAME: &str = "Triascan";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version string stamped into every report. Identifies the weights
/// lineage, not the crate version. Bump when the artifact is retrained.
pub const MODEL_VERSION: &str = "ResNet18_TransferLearning_v1.0";

/// Default log filter for the tracing subscriber.
pub fn default_log_filter() -> String {
    "info,triascan=debug".to_string()
}

/// Get the application data directory
/// ~/Triascan/ on all platforms (user-visible, kept flat on purpose)
pub fn app_data_dir() -> PathBuf {
    let home = dirs::home_dir().expect("Cannot determine home directory");
    home.join("Triascan")
}

/// Get the models directory (ONNX backbones + head weights)
pub fn models_dir() -> PathBuf {
    app_data_dir().join("models")
}

/// Directory holding the chest X-ray pneumonia model artifacts
/// (`backbone.onnx` + `head.json`).
pub fn xray_model_dir() -> PathBuf {
    models_dir().join("xray-pneumonia")
}

/// Directory holding the ECG beat-classification model artifacts.
pub fn ecg_model_dir() -> PathBuf {
    models_dir().join("ecg-beats")
}

/// Default output directory for rendered saliency heatmaps.
/// The hosting service may override this per request.
pub fn heatmap_dir() -> PathBuf {
    app_data_dir().join("heatmaps")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_data_dir_under_home() {
        let dir = app_data_dir();
        let home = dirs::home_dir().unwrap();
        assert!(dir.starts_with(home));
        assert!(dir.ends_with("Triascan"));
    }

    #[test]
    fn model_dirs_under_app_data() {
        let app = app_data_dir();
        assert!(xray_model_dir().starts_with(&app));
        assert!(ecg_model_dir().starts_with(&app));
        assert!(xray_model_dir().ends_with("models/xray-pneumonia"));
        assert!(ecg_model_dir().ends_with("models/ecg-beats"));
    }

    #[test]
    fn heatmap_dir_under_app_data() {
        assert!(heatmap_dir().starts_with(app_data_dir()));
        assert!(heatmap_dir().ends_with("heatmaps"));
    }

    #[test]
    fn app_name_is_triascan() {
        assert_eq!(APP_NAME, "Triascan");
    }

    #[test]
    fn log_filter_scopes_crate_to_debug() {
        assert!(default_log_filter().contains("triascan=debug"));
    }
}
