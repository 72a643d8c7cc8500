//! Heatmap compositing onto the original image.

use cxr_core::{AnalysisError, Result};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use crate::colormap::jet;
use crate::raw_image::RawImage;

/// Blending options for [`composite`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverlayOptions {
    /// Weight of the colored heatmap in blended pixels, in `[0, 1]`.
    pub alpha: f32,
    /// Saliency values at or below this are left untouched.
    pub threshold: f32,
}

impl Default for OverlayOptions {
    fn default() -> Self {
        Self {
            alpha: 0.4,
            threshold: 0.2,
        }
    }
}

impl OverlayOptions {
    /// Create options with explicit values.
    #[must_use]
    pub const fn new(alpha: f32, threshold: f32) -> Self {
        Self { alpha, threshold }
    }

    /// Set alpha.
    #[must_use]
    pub const fn with_alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha;
        self
    }

    /// Set the display threshold.
    #[must_use]
    pub const fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Check that alpha is in `[0, 1]` and the threshold is finite.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(AnalysisError::InvalidConfig(format!(
                "overlay alpha must be in [0, 1], got {}",
                self.alpha
            )));
        }
        if !self.threshold.is_finite() {
            return Err(AnalysisError::InvalidConfig(format!(
                "overlay threshold must be finite, got {}",
                self.threshold
            )));
        }
        Ok(())
    }
}

fn check_map(saliency: &ArrayView2<'_, f32>) -> Result<(u32, u32)> {
    let (h, w) = saliency.dim();
    if h == 0 || w == 0 {
        return Err(AnalysisError::InvalidShape {
            expected: "non-empty saliency map".to_string(),
            got: format!("{h}x{w}"),
        });
    }
    Ok((w as u32, h as u32))
}

/// Color a saliency map with the jet ramp.
pub fn render_heatmap(saliency: ArrayView2<'_, f32>) -> Result<RgbImage> {
    let (w, h) = check_map(&saliency)?;
    Ok(RgbImage::from_fn(w, h, |x, y| {
        jet(saliency[[y as usize, x as usize]])
    }))
}

/// Blend a saliency map onto the original image.
///
/// The original is broadcast to RGB and, if its size differs from the map,
/// resized to the map. Pixels whose saliency exceeds `threshold` become
/// `original * (1 - alpha) + jet(saliency) * alpha`; all other pixels keep
/// their original value exactly.
pub fn composite(
    original: &RawImage,
    saliency: ArrayView2<'_, f32>,
    options: &OverlayOptions,
) -> Result<RgbImage> {
    options.validate()?;
    let (w, h) = check_map(&saliency)?;

    let mut overlay = original.to_rgb_image();
    if overlay.dimensions() != (w, h) {
        tracing::debug!(
            from = ?overlay.dimensions(),
            to = ?(w, h),
            "Resizing original image to the saliency map"
        );
        overlay = imageops::resize(&overlay, w, h, FilterType::Triangle);
    }

    let alpha = options.alpha;
    let mut blended = 0usize;
    for (x, y, pixel) in overlay.enumerate_pixels_mut() {
        let value = saliency[[y as usize, x as usize]];
        if value > options.threshold {
            let Rgb(color) = jet(value);
            for (o, c) in pixel.0.iter_mut().zip(color) {
                let mixed = f32::from(*o) * (1.0 - alpha) + f32::from(c) * alpha;
                *o = mixed.round().clamp(0.0, 255.0) as u8;
            }
            blended += 1;
        }
    }
    tracing::debug!(blended, total = (w * h) as usize, "Composited heatmap");

    Ok(overlay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn gradient_image(height: usize, width: usize) -> RawImage {
        let data: Vec<u8> = (0..height * width).map(|i| (i % 251) as u8).collect();
        RawImage::from_raw(&[height, width], data).unwrap()
    }

    fn ramp_map(height: usize, width: usize) -> Array2<f32> {
        Array2::from_shape_fn((height, width), |(y, x)| {
            (y * width + x) as f32 / (height * width - 1) as f32
        })
    }

    #[test]
    fn test_threshold_above_range_is_identity() {
        let image = gradient_image(16, 12);
        let map = ramp_map(16, 12);
        let options = OverlayOptions::default().with_threshold(1.1);

        let overlay = composite(&image, map.view(), &options).unwrap();
        assert_eq!(overlay, image.to_rgb_image());
    }

    #[test]
    fn test_zero_alpha_is_identity() {
        let image = gradient_image(9, 20);
        let map = Array2::from_elem((9, 20), 1.0f32);
        let options = OverlayOptions::default().with_alpha(0.0);

        let overlay = composite(&image, map.view(), &options).unwrap();
        assert_eq!(overlay, image.to_rgb_image());
    }

    #[test]
    fn test_selective_blending() {
        let image = RawImage::from_raw(&[1, 2], vec![100u8, 100]).unwrap();
        let map = Array2::from_shape_vec((1, 2), vec![0.1f32, 1.0]).unwrap();

        let overlay = composite(&image, map.view(), &OverlayOptions::default()).unwrap();
        // Below threshold: untouched.
        assert_eq!(overlay.get_pixel(0, 0).0, [100, 100, 100]);
        // jet(1.0) = [128, 0, 0]; 100 * 0.6 + c * 0.4
        assert_eq!(overlay.get_pixel(1, 0).0, [111, 60, 60]);
    }

    #[test]
    fn test_threshold_is_strict() {
        let image = RawImage::from_raw(&[1, 1], vec![50u8]).unwrap();
        let map = Array2::from_elem((1, 1), 0.2f32);
        let overlay = composite(&image, map.view(), &OverlayOptions::default()).unwrap();
        assert_eq!(overlay.get_pixel(0, 0).0, [50, 50, 50]);
    }

    #[test]
    fn test_image_resized_to_map() {
        let image = gradient_image(40, 30);
        let map = Array2::zeros((20, 15));
        let overlay = composite(&image, map.view(), &OverlayOptions::default()).unwrap();
        assert_eq!(overlay.dimensions(), (15, 20));
    }

    #[test]
    fn test_zero_map_leaves_image_unchanged() {
        let image = gradient_image(8, 8);
        let map = Array2::zeros((8, 8));
        let overlay = composite(&image, map.view(), &OverlayOptions::default()).unwrap();
        assert_eq!(overlay, image.to_rgb_image());
    }

    #[test]
    fn test_invalid_options() {
        let image = gradient_image(2, 2);
        let map = Array2::zeros((2, 2));
        assert!(composite(&image, map.view(), &OverlayOptions::new(1.5, 0.2)).is_err());
        assert!(composite(&image, map.view(), &OverlayOptions::new(0.4, f32::NAN)).is_err());
    }

    #[test]
    fn test_empty_map_rejected() {
        let image = gradient_image(2, 2);
        let map = Array2::<f32>::zeros((0, 2));
        assert!(matches!(
            composite(&image, map.view(), &OverlayOptions::default()),
            Err(AnalysisError::InvalidShape { .. })
        ));
    }

    #[test]
    fn test_render_heatmap() {
        let map = ramp_map(3, 4);
        let heatmap = render_heatmap(map.view()).unwrap();
        assert_eq!(heatmap.dimensions(), (4, 3));
        assert_eq!(*heatmap.get_pixel(0, 0), jet(0.0));
        assert_eq!(*heatmap.get_pixel(3, 2), jet(1.0));
    }
}
