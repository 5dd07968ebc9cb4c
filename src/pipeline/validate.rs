//! Modality-specific input sanity gates.
//!
//! X-ray inputs are checked for grayscale-ness (mean HSV saturation) and
//! contrast (brightness standard deviation) before any model work happens.
//! ECG inputs are accepted as-is: they are synthetically rendered waveform
//! plots produced upstream, hence trusted. The asymmetry is intentional and
//! must not be silently "fixed" here.

use image::RgbImage;
use tracing::debug;

use super::types::{ImageSample, Modality};
use super::AnalysisError;

/// Mean HSV saturation above this (0-255 scale) rejects the image as a
/// color photograph misfiled as an X-ray.
const MAX_MEAN_SATURATION: f32 = 45.0;

/// Brightness-channel standard deviation below this rejects blank or
/// corrupt scans.
const MIN_BRIGHTNESS_STDDEV: f32 = 10.0;

/// Pure check, no side effects. Failures are user-correctable rejections,
/// not faults; the orchestrator surfaces them with the failing metric.
pub fn validate(sample: &ImageSample) -> Result<(), AnalysisError> {
    match sample.modality {
        Modality::Xray => validate_xray(&sample.pixels),
        // No gate for ECG in the current design (see module docs).
        Modality::Ecg => Ok(()),
    }
}

fn validate_xray(pixels: &RgbImage) -> Result<(), AnalysisError> {
    let saturation = mean_saturation(pixels);
    if saturation > MAX_MEAN_SATURATION {
        return Err(AnalysisError::invalid_image(format!(
            "high color saturation ({saturation:.1}); expected a grayscale chest X-ray scan"
        )));
    }

    let brightness_stddev = brightness_stddev(pixels);
    if brightness_stddev < MIN_BRIGHTNESS_STDDEV {
        return Err(AnalysisError::invalid_image(format!(
            "image is too flat or blank (brightness stddev {brightness_stddev:.1})"
        )));
    }

    debug!(saturation, brightness_stddev, "X-ray passed validation gate");
    Ok(())
}

/// Mean saturation over all pixels, on the 0-255 scale used by PIL's HSV
/// mode: S = (max - min) * 255 / max, or 0 for black pixels. The threshold
/// above was tuned against this exact formula.
pub fn mean_saturation(pixels: &RgbImage) -> f32 {
    let count = (pixels.width() as u64) * (pixels.height() as u64);
    if count == 0 {
        return 0.0;
    }

    let mut sum = 0.0f64;
    for p in pixels.pixels() {
        let max = p.0.iter().copied().max().unwrap_or(0) as f64;
        let min = p.0.iter().copied().min().unwrap_or(0) as f64;
        if max > 0.0 {
            sum += (max - min) * 255.0 / max;
        }
    }
    (sum / count as f64) as f32
}

/// Standard deviation of the HSV value channel (per-pixel max of R, G, B).
pub fn brightness_stddev(pixels: &RgbImage) -> f32 {
    let count = (pixels.width() as u64) * (pixels.height() as u64);
    if count == 0 {
        return 0.0;
    }

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    for p in pixels.pixels() {
        let v = p.0.iter().copied().max().unwrap_or(0) as f64;
        sum += v;
        sum_sq += v * v;
    }

    let mean = sum / count as f64;
    let variance = (sum_sq / count as f64) - (mean * mean);
    variance.max(0.0).sqrt() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn sample(pixels: RgbImage, modality: Modality) -> ImageSample {
        ImageSample::new(pixels, "test.png", modality)
    }

    /// Half black, half white: zero saturation, high brightness spread.
    fn checkerboard(size: u32) -> RgbImage {
        RgbImage::from_fn(size, size, |x, y| {
            if (x + y) % 2 == 0 {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        })
    }

    #[test]
    fn saturated_color_photo_rejected_citing_saturation() {
        let red = RgbImage::from_pixel(64, 64, Rgb([255, 0, 0]));
        let err = validate(&sample(red, Modality::Xray)).unwrap_err();
        assert!(err.to_string().contains("saturation"), "got: {err}");
    }

    #[test]
    fn flat_gray_image_rejected_as_blank() {
        let flat = RgbImage::from_pixel(64, 64, Rgb([128, 128, 128]));
        let err = validate(&sample(flat, Modality::Xray)).unwrap_err();
        assert!(err.to_string().contains("flat or blank"), "got: {err}");
    }

    #[test]
    fn grayscale_scan_with_contrast_passes() {
        let scan = checkerboard(64);
        assert!(validate(&sample(scan, Modality::Xray)).is_ok());
    }

    #[test]
    fn ecg_accepts_any_image() {
        let red = RgbImage::from_pixel(64, 64, Rgb([255, 0, 0]));
        assert!(validate(&sample(red, Modality::Ecg)).is_ok());
    }

    #[test]
    fn pure_red_saturation_is_full_scale() {
        let red = RgbImage::from_pixel(8, 8, Rgb([255, 0, 0]));
        assert!((mean_saturation(&red) - 255.0).abs() < 0.5);
    }

    #[test]
    fn grayscale_saturation_is_zero() {
        let gray = RgbImage::from_pixel(8, 8, Rgb([77, 77, 77]));
        assert_eq!(mean_saturation(&gray), 0.0);
    }

    #[test]
    fn checkerboard_brightness_stddev_is_half_range() {
        let stddev = brightness_stddev(&checkerboard(8));
        assert!((stddev - 127.5).abs() < 1.0, "got {stddev}");
    }

    #[test]
    fn uniform_brightness_stddev_is_zero() {
        let flat = RgbImage::from_pixel(8, 8, Rgb([200, 200, 200]));
        assert_eq!(brightness_stddev(&flat), 0.0);
    }
}
