//! Convolutional classifier wrapper.
//!
//! The trained artifact is split in two at the exact point where saliency
//! needs gradients:
//!
//! - `backbone.onnx`: a ResNet18 trunk truncated after the last
//!   convolutional block, run through ONNX Runtime. Output shape
//!   `(1, C, 7, 7)` for a 224 input. Frozen, read-only, shared.
//! - `head.json`: the replacement classification head
//!   (dropout → linear C→H → ReLU → dropout → linear H→classes) as plain
//!   weight matrices, run in `ndarray`. Dropout is identity at inference.
//!
//! Running the head outside the ONNX graph is what makes the backward pass
//! exact with an inference-only runtime: the gradient of a class logit with
//! respect to the captured activations only traverses global average
//! pooling and the head, so it has a closed form. Activations are returned
//! inside the call-owned [`ForwardPass`]; there is no module-global hook
//! state, so concurrent requests cannot leak gradients into each other.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use ndarray::{Array1, Array2, Array3, Axis};
use serde::{Deserialize, Serialize};

use super::types::{
    FeatureBackbone, ForwardPass, InputTensor, Modality, VisionClassifier, ACTIVATION_SIZE,
};
use super::AnalysisError;

/// Backbone artifact file name inside a model directory.
pub const BACKBONE_FILE: &str = "backbone.onnx";

/// Head weights artifact file name inside a model directory.
pub const HEAD_FILE: &str = "head.json";

// ═══════════════════════════════════════════════════════════
// Dense head
// ═══════════════════════════════════════════════════════════

/// Serialized head weights, exported by the offline training pipeline.
/// Matrices are row-major: `w1` is `hidden x channels`, `w2` is
/// `classes x hidden`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadWeights {
    pub channels: usize,
    pub hidden: usize,
    pub classes: usize,
    pub w1: Vec<f32>,
    pub b1: Vec<f32>,
    pub w2: Vec<f32>,
    pub b2: Vec<f32>,
}

/// The feed-forward classification head, evaluated in `ndarray`.
#[derive(Debug, Clone)]
pub struct DenseHead {
    w1: Array2<f32>,
    b1: Array1<f32>,
    w2: Array2<f32>,
    b2: Array1<f32>,
}

impl DenseHead {
    pub fn new(
        w1: Array2<f32>,
        b1: Array1<f32>,
        w2: Array2<f32>,
        b2: Array1<f32>,
    ) -> Result<Self, AnalysisError> {
        if w1.nrows() != b1.len() || w2.ncols() != w1.nrows() || w2.nrows() != b2.len() {
            return Err(AnalysisError::WeightsFormat(format!(
                "inconsistent head shapes: w1 {:?}, b1 {}, w2 {:?}, b2 {}",
                w1.dim(),
                b1.len(),
                w2.dim(),
                b2.len()
            )));
        }
        Ok(Self { w1, b1, w2, b2 })
    }

    pub fn from_weights(weights: HeadWeights) -> Result<Self, AnalysisError> {
        let HeadWeights {
            channels,
            hidden,
            classes,
            w1,
            b1,
            w2,
            b2,
        } = weights;

        let w1 = Array2::from_shape_vec((hidden, channels), w1)
            .map_err(|e| AnalysisError::WeightsFormat(format!("w1: {e}")))?;
        let w2 = Array2::from_shape_vec((classes, hidden), w2)
            .map_err(|e| AnalysisError::WeightsFormat(format!("w2: {e}")))?;
        if b1.len() != hidden || b2.len() != classes {
            return Err(AnalysisError::WeightsFormat(format!(
                "bias lengths {}/{} do not match hidden {hidden} / classes {classes}",
                b1.len(),
                b2.len()
            )));
        }

        Self::new(w1, Array1::from(b1), w2, Array1::from(b2))
    }

    pub fn from_file(path: &Path) -> Result<Self, AnalysisError> {
        let file = File::open(path)?;
        let weights: HeadWeights = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| AnalysisError::WeightsFormat(format!("{}: {e}", path.display())))?;
        Self::from_weights(weights)
    }

    /// Number of activation channels this head consumes.
    pub fn channels(&self) -> usize {
        self.w1.ncols()
    }

    pub fn classes(&self) -> usize {
        self.w2.nrows()
    }

    /// Forward pass over the pooled feature vector. Dropout layers are
    /// identity in eval mode, so they do not appear here.
    pub fn forward(&self, pooled: &Array1<f32>) -> Array1<f32> {
        let hidden_pre = self.w1.dot(pooled) + &self.b1;
        let hidden = hidden_pre.mapv(|v| v.max(0.0));
        self.w2.dot(&hidden) + &self.b2
    }

    /// Gradient of `logits[class_index]` with respect to the pooled feature
    /// vector: `g = W1ᵀ (relu'(h) ⊙ W2[c])`. The ReLU mask comes from
    /// re-evaluating the first layer, which is cheap and keeps
    /// [`ForwardPass`] free of head internals.
    pub fn pooled_gradient(&self, class_index: usize, pooled: &Array1<f32>) -> Array1<f32> {
        let hidden_pre = self.w1.dot(pooled) + &self.b1;
        let class_row = self.w2.row(class_index);
        let masked: Array1<f32> = hidden_pre
            .iter()
            .zip(class_row.iter())
            .map(|(&h, &w)| if h > 0.0 { w } else { 0.0 })
            .collect();
        self.w1.t().dot(&masked)
    }
}

/// Spatial mean over each activation channel: `(C, H, W)` → `(C,)`.
pub fn global_average_pool(activations: &Array3<f32>) -> Array1<f32> {
    activations
        .mean_axis(Axis(2))
        .and_then(|a| a.mean_axis(Axis(1)))
        .unwrap_or_else(|| Array1::zeros(activations.shape()[0]))
}

// ═══════════════════════════════════════════════════════════
// Classifier
// ═══════════════════════════════════════════════════════════

/// ResNet18-style classifier: ONNX feature trunk + ndarray head.
pub struct ResNetClassifier {
    modality: Modality,
    backbone: Box<dyn FeatureBackbone>,
    head: DenseHead,
}

impl std::fmt::Debug for ResNetClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResNetClassifier")
            .field("modality", &self.modality)
            .field("head", &self.head)
            .finish_non_exhaustive()
    }
}

impl ResNetClassifier {
    pub fn from_parts(
        modality: Modality,
        backbone: Box<dyn FeatureBackbone>,
        head: DenseHead,
    ) -> Result<Self, AnalysisError> {
        if head.classes() != modality.num_classes() {
            return Err(AnalysisError::WeightsFormat(format!(
                "head has {} classes but {modality} expects {}",
                head.classes(),
                modality.num_classes()
            )));
        }
        Ok(Self {
            modality,
            backbone,
            head,
        })
    }

    /// Load both artifacts from a model directory. Fails with a first-class
    /// `ModelUnavailable` when either file is absent. Availability is a
    /// constructor-time fact, not a runtime surprise.
    #[cfg(feature = "onnx-backbone")]
    pub fn load(modality: Modality, dir: &Path) -> Result<Self, AnalysisError> {
        let backbone_path = dir.join(BACKBONE_FILE);
        let head_path = dir.join(HEAD_FILE);

        if !backbone_path.exists() {
            return Err(AnalysisError::model_unavailable(
                modality,
                format!("{} not found", backbone_path.display()),
            ));
        }
        if !head_path.exists() {
            return Err(AnalysisError::model_unavailable(
                modality,
                format!("{} not found", head_path.display()),
            ));
        }

        let backbone = OnnxBackbone::load(&backbone_path, modality)?;
        let head = DenseHead::from_file(&head_path)?;

        tracing::info!(%modality, dir = %dir.display(), "classifier loaded");
        Self::from_parts(modality, Box::new(backbone), head)
    }
}

impl VisionClassifier for ResNetClassifier {
    fn modality(&self) -> Modality {
        self.modality
    }

    fn forward(&self, input: &InputTensor) -> Result<ForwardPass, AnalysisError> {
        let activations = self.backbone.features(input)?;

        let channels = activations.shape()[0];
        if channels != self.head.channels() {
            return Err(AnalysisError::Inference(format!(
                "backbone produced {channels} channels, head expects {}",
                self.head.channels()
            )));
        }

        let pooled = global_average_pool(&activations);
        let logits = self.head.forward(&pooled);

        Ok(ForwardPass {
            logits,
            activations: Some(activations),
        })
    }

    fn backward(&self, class_index: usize, pass: &ForwardPass) -> Option<Array3<f32>> {
        let activations = pass.activations.as_ref()?;
        if class_index >= self.head.classes() {
            return None;
        }

        let (c, h, w) = activations.dim();
        let pooled = global_average_pool(activations);
        let pooled_grad = self.head.pooled_gradient(class_index, &pooled);

        // Average pooling distributes the gradient uniformly over the
        // spatial grid: d logit / d A[k, i, j] = g[k] / (h * w).
        let scale = 1.0 / (h * w) as f32;
        let mut grad = Array3::<f32>::zeros((c, h, w));
        for (k, mut channel) in grad.axis_iter_mut(Axis(0)).enumerate() {
            channel.fill(pooled_grad[k] * scale);
        }
        Some(grad)
    }
}

// ═══════════════════════════════════════════════════════════
// ONNX backbone (behind the `onnx-backbone` feature)
// ═══════════════════════════════════════════════════════════

#[cfg(feature = "onnx-backbone")]
mod onnx {
    use std::path::Path;
    use std::sync::Mutex;

    use ndarray::{Array3, Array4};
    use ort::session::Session;

    use super::super::types::{
        FeatureBackbone, InputTensor, Modality, ACTIVATION_SIZE, INPUT_SIZE,
    };
    use super::super::AnalysisError;

    /// ONNX Runtime feature trunk.
    ///
    /// Uses interior mutability (Mutex) because `ort::Session::run` requires
    /// `&mut self` but `FeatureBackbone` exposes `&self` for shared usage.
    /// The lock serializes only the ONNX run; activations are returned to
    /// the caller by value, so no request-scoped state lives here.
    pub struct OnnxBackbone {
        session: Mutex<Session>,
        modality: Modality,
    }

    impl OnnxBackbone {
        pub fn load(model_path: &Path, modality: Modality) -> Result<Self, AnalysisError> {
            let session = Session::builder()
                .map_err(|e: ort::Error| {
                    AnalysisError::model_unavailable(modality, e.to_string())
                })?
                .with_intra_threads(2)
                .map_err(|e: ort::Error| {
                    AnalysisError::model_unavailable(modality, e.to_string())
                })?
                .commit_from_file(model_path)
                .map_err(|e: ort::Error| {
                    AnalysisError::model_unavailable(modality, format!("ONNX load failed: {e}"))
                })?;

            tracing::info!(%modality, path = %model_path.display(), "ONNX backbone loaded");

            Ok(Self {
                session: Mutex::new(session),
                modality,
            })
        }
    }

    impl FeatureBackbone for OnnxBackbone {
        fn features(&self, input: &InputTensor) -> Result<Array3<f32>, AnalysisError> {
            use ort::value::TensorRef;

            let batched: Array4<f32> = input
                .0
                .clone()
                .insert_axis(ndarray::Axis(0))
                .into_dimensionality()
                .map_err(|e| AnalysisError::Inference(e.to_string()))?;

            let tensor = TensorRef::from_array_view(&batched)
                .map_err(|e| AnalysisError::Inference(e.to_string()))?;

            let mut session = self
                .session
                .lock()
                .map_err(|_| AnalysisError::Inference("Session lock poisoned".to_string()))?;

            let outputs = session
                .run(ort::inputs![tensor])
                .map_err(|e| AnalysisError::Inference(format!("ONNX inference failed: {e}")))?;

            let (shape, data) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| AnalysisError::Inference(format!("Output extraction: {e}")))?;

            // Expect [1, C, 7, 7] for a 224 input.
            if shape.len() != 4
                || shape[0] != 1
                || shape[2] as usize != ACTIVATION_SIZE
                || shape[3] as usize != ACTIVATION_SIZE
            {
                return Err(AnalysisError::Inference(format!(
                    "Unexpected activation shape {shape:?}, expected [1, C, {ACTIVATION_SIZE}, {ACTIVATION_SIZE}] for {} input",
                    INPUT_SIZE
                )));
            }

            let channels = shape[1] as usize;
            Array3::from_shape_vec(
                (channels, ACTIVATION_SIZE, ACTIVATION_SIZE),
                data.to_vec(),
            )
            .map_err(|e| AnalysisError::Inference(e.to_string()))
        }
    }
}

#[cfg(feature = "onnx-backbone")]
pub use onnx::OnnxBackbone;

// ═══════════════════════════════════════════════════════════
// Mock backbone (testing and ONNX-less builds)
// ═══════════════════════════════════════════════════════════

/// Deterministic stand-in for the convolutional trunk. Produces spatially
/// varying activations derived from block averages of the input tensor, so
/// saliency maps computed from it are stable across calls.
pub struct MockBackbone {
    channels: usize,
}

impl MockBackbone {
    pub fn new(channels: usize) -> Self {
        Self { channels }
    }
}

impl FeatureBackbone for MockBackbone {
    fn features(&self, input: &InputTensor) -> Result<Array3<f32>, AnalysisError> {
        let grid = ACTIVATION_SIZE;
        let cell = input.0.shape()[1] / grid;
        let mut activations = Array3::<f32>::zeros((self.channels, grid, grid));

        for k in 0..self.channels {
            let source_channel = k % 3;
            let gain = (k + 1) as f32 / self.channels as f32;
            for gy in 0..grid {
                for gx in 0..grid {
                    let mut sum = 0.0f32;
                    for y in 0..cell {
                        for x in 0..cell {
                            sum += input.0[[source_channel, gy * cell + y, gx * cell + x]];
                        }
                    }
                    activations[[k, gy, gx]] = gain * sum / (cell * cell) as f32;
                }
            }
        }

        Ok(activations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::preprocess;
    use crate::pipeline::types::ImageSample;
    use image::{Rgb, RgbImage};
    use ndarray::array;

    fn tiny_head() -> DenseHead {
        // 2 channels -> 2 hidden -> 2 classes, hand-checkable numbers.
        DenseHead::new(
            array![[1.0, 0.0], [0.0, 1.0]],
            array![0.0, -1.0],
            array![[1.0, 1.0], [1.0, -1.0]],
            array![0.1, 0.2],
        )
        .unwrap()
    }

    fn tensor_of(color: [u8; 3]) -> InputTensor {
        let sample = ImageSample::new(
            RgbImage::from_pixel(224, 224, Rgb(color)),
            "t.png",
            Modality::Xray,
        );
        preprocess::prepare(&sample)
    }

    #[test]
    fn head_forward_matches_hand_computation() {
        let head = tiny_head();
        // hidden_pre = [2.0, 3.0 - 1.0] = [2.0, 2.0]; relu unchanged
        // logits = [2 + 2 + 0.1, 2 - 2 + 0.2] = [4.1, 0.2]
        let logits = head.forward(&array![2.0, 3.0]);
        assert!((logits[0] - 4.1).abs() < 1e-6);
        assert!((logits[1] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn head_forward_applies_relu_mask() {
        let head = tiny_head();
        // hidden_pre = [-1.0, -1.0] -> relu zeros both -> logits = biases
        let logits = head.forward(&array![-1.0, 0.0]);
        assert!((logits[0] - 0.1).abs() < 1e-6);
        assert!((logits[1] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn pooled_gradient_matches_finite_differences() {
        let head = DenseHead::new(
            array![[0.4, -0.3, 0.9], [0.7, 0.2, -0.5]],
            array![0.05, -0.1],
            array![[0.6, -0.8], [-0.2, 0.3]],
            array![0.0, 0.0],
        )
        .unwrap();

        let pooled = array![0.8, -0.4, 0.6];
        let eps = 1e-3f32;

        for class in 0..2 {
            let analytic = head.pooled_gradient(class, &pooled);
            for k in 0..pooled.len() {
                let mut plus = pooled.clone();
                plus[k] += eps;
                let mut minus = pooled.clone();
                minus[k] -= eps;
                let numeric =
                    (head.forward(&plus)[class] - head.forward(&minus)[class]) / (2.0 * eps);
                assert!(
                    (analytic[k] - numeric).abs() < 1e-2,
                    "class {class} channel {k}: analytic {} vs numeric {numeric}",
                    analytic[k]
                );
            }
        }
    }

    #[test]
    fn backward_gradient_is_uniform_and_pool_scaled() {
        let classifier = ResNetClassifier::from_parts(
            Modality::Xray,
            Box::new(MockBackbone::new(2)),
            tiny_head(),
        )
        .unwrap();

        let pass = classifier.forward(&tensor_of([200, 120, 60])).unwrap();
        let grad = classifier.backward(pass_argmax(&pass), &pass).unwrap();

        assert_eq!(grad.dim(), (2, ACTIVATION_SIZE, ACTIVATION_SIZE));
        for k in 0..2 {
            let first = grad[[k, 0, 0]];
            assert!(grad
                .index_axis(Axis(0), k)
                .iter()
                .all(|&v| (v - first).abs() < 1e-7));
        }

        // Uniform spatial gradient times (h*w) must equal the pooled gradient.
        let activations = pass.activations.as_ref().unwrap();
        let pooled = global_average_pool(activations);
        let pooled_grad = classifier.head.pooled_gradient(pass_argmax(&pass), &pooled);
        let hw = (ACTIVATION_SIZE * ACTIVATION_SIZE) as f32;
        for k in 0..2 {
            assert!((grad[[k, 3, 3]] * hw - pooled_grad[k]).abs() < 1e-5);
        }
    }

    fn pass_argmax(pass: &ForwardPass) -> usize {
        pass.logits
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap()
    }

    #[test]
    fn backward_without_capture_returns_none() {
        let classifier = ResNetClassifier::from_parts(
            Modality::Xray,
            Box::new(MockBackbone::new(2)),
            tiny_head(),
        )
        .unwrap();

        let pass = ForwardPass {
            logits: array![0.2, 0.8],
            activations: None,
        };
        assert!(classifier.backward(1, &pass).is_none());
    }

    #[test]
    fn mock_backbone_is_deterministic() {
        let backbone = MockBackbone::new(4);
        let tensor = tensor_of([90, 150, 30]);
        let a = backbone.features(&tensor).unwrap();
        let b = backbone.features(&tensor).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.dim(), (4, ACTIVATION_SIZE, ACTIVATION_SIZE));
    }

    #[test]
    fn forward_rejects_channel_mismatch() {
        let classifier = ResNetClassifier::from_parts(
            Modality::Xray,
            Box::new(MockBackbone::new(5)),
            tiny_head(), // expects 2 channels
        )
        .unwrap();

        let err = classifier.forward(&tensor_of([10, 10, 10])).unwrap_err();
        assert!(matches!(err, AnalysisError::Inference(_)));
    }

    #[test]
    fn from_parts_rejects_wrong_class_count() {
        // X-ray expects 2 classes; this head has 2, ECG expects 5.
        let err = ResNetClassifier::from_parts(
            Modality::Ecg,
            Box::new(MockBackbone::new(2)),
            tiny_head(),
        )
        .unwrap_err();
        assert!(matches!(err, AnalysisError::WeightsFormat(_)));
    }

    #[test]
    fn head_weights_json_roundtrip() {
        let weights = HeadWeights {
            channels: 2,
            hidden: 2,
            classes: 2,
            w1: vec![1.0, 0.0, 0.0, 1.0],
            b1: vec![0.0, 0.0],
            w2: vec![1.0, 1.0, 1.0, -1.0],
            b2: vec![0.0, 0.0],
        };
        let json = serde_json::to_string(&weights).unwrap();
        let parsed: HeadWeights = serde_json::from_str(&json).unwrap();
        let head = DenseHead::from_weights(parsed).unwrap();
        assert_eq!(head.channels(), 2);
        assert_eq!(head.classes(), 2);
    }

    #[test]
    fn malformed_weights_rejected() {
        let weights = HeadWeights {
            channels: 3,
            hidden: 2,
            classes: 2,
            w1: vec![1.0; 5], // should be 6
            b1: vec![0.0; 2],
            w2: vec![1.0; 4],
            b2: vec![0.0; 2],
        };
        assert!(matches!(
            DenseHead::from_weights(weights),
            Err(AnalysisError::WeightsFormat(_))
        ));
    }

    #[test]
    fn global_average_pool_means_each_channel() {
        let mut acts = Array3::<f32>::zeros((2, 2, 2));
        acts[[0, 0, 0]] = 4.0;
        acts[[1, 0, 0]] = 1.0;
        acts[[1, 0, 1]] = 1.0;
        acts[[1, 1, 0]] = 1.0;
        acts[[1, 1, 1]] = 1.0;
        let pooled = global_average_pool(&acts);
        assert!((pooled[0] - 1.0).abs() < 1e-6);
        assert!((pooled[1] - 1.0).abs() < 1e-6);
    }
}
