//! False-color rendering of saliency maps.
//!
//! Presentation only: nothing here feeds back into the clinical verdict.
//! The palette is a black → red → yellow → white heat ramp whose luminance
//! increases monotonically with the saliency value, so visual intensity is
//! a faithful proxy for model attention. (Rainbow palettes like jet are
//! not luminance-monotonic and can invert perceived importance.)

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};

use super::types::SaliencyMap;
use super::AnalysisError;

/// Map one saliency value in [0, 1] to a heat color.
///
/// Piecewise linear: red ramps in over the first third, green over the
/// second, blue over the last. Each channel is non-decreasing in `v`, so
/// luminance is strictly monotonic.
pub fn heat_color(v: f32) -> [u8; 3] {
    let v = v.clamp(0.0, 1.0);
    let ramp = |x: f32| (x.clamp(0.0, 1.0) * 255.0).round() as u8;
    [ramp(3.0 * v), ramp(3.0 * v - 1.0), ramp(3.0 * v - 2.0)]
}

/// Render a saliency map to an RGB image at the map's own resolution.
/// The degenerate (all-zero) map renders as solid black.
pub fn render(map: &SaliencyMap) -> RgbImage {
    let (h, w) = map.values.dim();
    RgbImage::from_fn(w as u32, h as u32, |x, y| {
        Rgb(heat_color(map.values[[y as usize, x as usize]]))
    })
}

/// Encode an RGB image as PNG bytes.
/// Uses default compression; heatmaps are transient, not archived.
pub fn encode_png(img: &RgbImage) -> Result<Vec<u8>, AnalysisError> {
    let dynamic = DynamicImage::ImageRgb8(img.clone());
    let mut cursor = Cursor::new(Vec::new());
    dynamic
        .write_to(&mut cursor, ImageOutputFormat::Png)
        .map_err(|e| AnalysisError::ImageProcessing(format!("PNG encoding failed: {e}")))?;
    Ok(cursor.into_inner())
}

/// Render and write the heatmap next to other artifacts for this source.
///
/// Output name is `<prefix>_<source stem>.png` under `out_dir`, which is
/// created if missing. Callers treat failure as "no heatmap", never as a
/// failed request.
pub fn write_heatmap(
    map: &SaliencyMap,
    source: &Path,
    out_dir: &Path,
    prefix: &str,
) -> Result<PathBuf, AnalysisError> {
    let stem = source
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("image");
    let out_path = out_dir.join(format!("{prefix}_{stem}.png"));

    fs::create_dir_all(out_dir)?;
    let png = encode_png(&render(map))?;
    fs::write(&out_path, png)?;

    Ok(out_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::INPUT_SIZE;
    use ndarray::Array2;

    fn luminance(rgb: [u8; 3]) -> f32 {
        0.299 * rgb[0] as f32 + 0.587 * rgb[1] as f32 + 0.114 * rgb[2] as f32
    }

    #[test]
    fn palette_endpoints() {
        assert_eq!(heat_color(0.0), [0, 0, 0]);
        assert_eq!(heat_color(1.0), [255, 255, 255]);
        assert_eq!(heat_color(1.0 / 3.0), [255, 0, 0]);
        assert_eq!(heat_color(2.0 / 3.0), [255, 255, 0]);
    }

    #[test]
    fn palette_luminance_is_monotonic() {
        let mut prev = -1.0f32;
        for step in 0..=100 {
            let v = step as f32 / 100.0;
            let lum = luminance(heat_color(v));
            assert!(lum >= prev, "luminance dropped at v={v}: {lum} < {prev}");
            prev = lum;
        }
    }

    #[test]
    fn palette_clamps_out_of_range_input() {
        assert_eq!(heat_color(-0.5), heat_color(0.0));
        assert_eq!(heat_color(1.5), heat_color(1.0));
    }

    #[test]
    fn degenerate_map_renders_black() {
        let img = render(&SaliencyMap::degenerate());
        assert_eq!(img.dimensions(), (INPUT_SIZE as u32, INPUT_SIZE as u32));
        assert!(img.pixels().all(|p| p.0 == [0, 0, 0]));
    }

    #[test]
    fn hot_pixel_renders_bright() {
        let mut values = Array2::zeros((INPUT_SIZE, INPUT_SIZE));
        values[[10, 20]] = 1.0;
        let img = render(&SaliencyMap::new(values));
        assert_eq!(img.get_pixel(20, 10).0, [255, 255, 255]);
        assert_eq!(img.get_pixel(0, 0).0, [0, 0, 0]);
    }

    #[test]
    fn write_heatmap_creates_named_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_heatmap(
            &SaliencyMap::degenerate(),
            Path::new("/uploads/scan_042.jpeg"),
            dir.path(),
            "heatmap",
        )
        .unwrap();

        assert!(path.ends_with("heatmap_scan_042.png"));
        let bytes = fs::read(&path).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (INPUT_SIZE as u32, INPUT_SIZE as u32));
    }
}
