//! Gradient-weighted class activation mapping.
//!
//! Given the activations captured at the last convolutional block and the
//! gradient of the predicted-class logit with respect to them, each channel
//! is weighted by the spatial mean of its gradient, channels are summed,
//! negative (inhibitory) contributions are clipped, and the 7x7 grid is
//! upsampled to the model input resolution and normalized to a peak of 1.
//!
//! Every numeric edge case degrades to the explicit all-zero map instead of
//! failing: missing capture, flat activations, a fully inhibitory
//! combination, or a zero maximum. Nothing in this module can raise: an
//! explainability chart is nice-to-have, never load-bearing.

use ndarray::{Array2, Array3, Axis};
use tracing::debug;

use super::classify::global_average_pool;
use super::types::{SaliencyMap, INPUT_SIZE};

/// Combine activations and gradients into a normalized saliency map.
pub fn compute_cam(activations: &Array3<f32>, gradients: &Array3<f32>) -> SaliencyMap {
    if activations.dim() != gradients.dim() {
        debug!(
            activations = ?activations.dim(),
            gradients = ?gradients.dim(),
            "activation/gradient shape mismatch; yielding degenerate map"
        );
        return SaliencyMap::degenerate();
    }

    let (_, h, w) = activations.dim();
    let weights = global_average_pool(gradients);

    // Weighted channel sum with inhibitory contributions clipped (ReLU).
    let mut cam = Array2::<f32>::zeros((h, w));
    for (k, channel) in activations.axis_iter(Axis(0)).enumerate() {
        cam.scaled_add(weights[k], &channel);
    }
    cam.mapv_inplace(|v| v.max(0.0));

    let upsampled = bilinear_resize(&cam, INPUT_SIZE, INPUT_SIZE);

    let max = upsampled.iter().cloned().fold(0.0f32, f32::max);
    if max == 0.0 {
        // Degenerate: do not divide, do not produce NaN.
        return SaliencyMap::new(upsampled);
    }

    SaliencyMap::new(upsampled.mapv(|v| v / max))
}

/// Bilinear upsampling with half-pixel centers (the convention used by the
/// training pipeline's resize). Edges clamp.
pub fn bilinear_resize(src: &Array2<f32>, out_h: usize, out_w: usize) -> Array2<f32> {
    let (src_h, src_w) = src.dim();
    if src_h == 0 || src_w == 0 {
        return Array2::zeros((out_h, out_w));
    }

    let scale_y = src_h as f32 / out_h as f32;
    let scale_x = src_w as f32 / out_w as f32;

    Array2::from_shape_fn((out_h, out_w), |(y, x)| {
        let sy = ((y as f32 + 0.5) * scale_y - 0.5).clamp(0.0, (src_h - 1) as f32);
        let sx = ((x as f32 + 0.5) * scale_x - 0.5).clamp(0.0, (src_w - 1) as f32);

        let y0 = sy.floor() as usize;
        let x0 = sx.floor() as usize;
        let y1 = (y0 + 1).min(src_h - 1);
        let x1 = (x0 + 1).min(src_w - 1);
        let fy = sy - y0 as f32;
        let fx = sx - x0 as f32;

        let top = src[[y0, x0]] * (1.0 - fx) + src[[y0, x1]] * fx;
        let bottom = src[[y1, x0]] * (1.0 - fx) + src[[y1, x1]] * fx;
        top * (1.0 - fy) + bottom * fy
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::ACTIVATION_SIZE;
    use ndarray::Array3;

    fn grid3(channels: usize, fill: f32) -> Array3<f32> {
        Array3::from_elem((channels, ACTIVATION_SIZE, ACTIVATION_SIZE), fill)
    }

    #[test]
    fn valid_map_peaks_at_exactly_one() {
        let mut activations = grid3(2, 0.0);
        activations[[0, 3, 3]] = 5.0;
        activations[[1, 1, 1]] = 2.0;
        let gradients = grid3(2, 0.5);

        let map = compute_cam(&activations, &gradients);
        assert!(!map.is_degenerate());
        assert_eq!(map.max(), 1.0);
        assert!(map.values.iter().all(|&v| (0.0..=1.0).contains(&v)));
        assert_eq!(map.values.shape(), &[INPUT_SIZE, INPUT_SIZE]);
    }

    #[test]
    fn zero_gradients_yield_degenerate_map() {
        let activations = grid3(2, 1.0);
        let gradients = grid3(2, 0.0);
        let map = compute_cam(&activations, &gradients);
        assert!(map.is_degenerate());
    }

    #[test]
    fn fully_inhibitory_combination_yields_degenerate_map() {
        // Positive activations, negative gradients: ReLU clips everything.
        let activations = grid3(2, 1.0);
        let gradients = grid3(2, -0.5);
        let map = compute_cam(&activations, &gradients);
        assert!(map.is_degenerate());
        assert!(map.values.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn shape_mismatch_yields_degenerate_map() {
        let activations = grid3(2, 1.0);
        let gradients = grid3(3, 1.0);
        assert!(compute_cam(&activations, &gradients).is_degenerate());
    }

    #[test]
    fn hot_cell_dominates_the_upsampled_map() {
        let mut activations = grid3(1, 0.0);
        activations[[0, 0, 0]] = 1.0;
        let gradients = grid3(1, 1.0);

        let map = compute_cam(&activations, &gradients);
        // The 7x7 cell (0,0) covers roughly the top-left 32x32 block.
        assert!(map.values[[5, 5]] > 0.9);
        assert!(map.values[[220, 220]] < 0.05);
    }

    #[test]
    fn resize_preserves_constant_field() {
        let src = Array2::from_elem((ACTIVATION_SIZE, ACTIVATION_SIZE), 0.7f32);
        let out = bilinear_resize(&src, INPUT_SIZE, INPUT_SIZE);
        assert!(out.iter().all(|&v| (v - 0.7).abs() < 1e-6));
    }

    #[test]
    fn resize_interpolates_between_samples() {
        let mut src = Array2::zeros((2, 2));
        src[[0, 1]] = 1.0;
        src[[1, 1]] = 1.0;
        // Upsample 2x2 -> 4x4: interior columns blend the two source columns.
        let out = bilinear_resize(&src, 4, 4);
        assert!(out[[0, 0]] < 0.01);
        assert!(out[[0, 3]] > 0.99);
        assert!(out[[0, 1]] > 0.2 && out[[0, 1]] < 0.5);
        assert!(out[[0, 2]] > 0.5 && out[[0, 2]] < 0.8);
    }

    #[test]
    fn resize_of_empty_source_is_zero() {
        let src = Array2::<f32>::zeros((0, 0));
        let out = bilinear_resize(&src, 8, 8);
        assert!(out.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn compute_cam_is_deterministic() {
        let mut activations = grid3(3, 0.2);
        activations[[2, 4, 6]] = 3.0;
        let mut gradients = grid3(3, 0.1);
        gradients[[1, 2, 2]] = -0.4;

        let a = compute_cam(&activations, &gradients);
        let b = compute_cam(&activations, &gradients);
        assert_eq!(a.values, b.values);
    }
}
