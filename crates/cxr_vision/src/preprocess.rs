//! Conversion of decoded images into classifier input tensors.
//!
//! The backbone was pretrained on ImageNet, so inputs are resized to
//! 224x224, scaled to `[0, 1]` and normalized with the ImageNet channel
//! statistics.

use burn::prelude::*;
use cxr_core::{AnalysisError, ImageTensor, Result, INPUT_CHANNELS, INPUT_SIZE};
use image::imageops::{self, FilterType};
use serde::{Deserialize, Serialize};

use crate::raw_image::RawImage;

/// ImageNet per-channel mean (RGB).
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// ImageNet per-channel standard deviation (RGB).
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Configuration for [`Preprocessor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessConfig {
    /// Per-channel mean subtracted after scaling to `[0, 1]`.
    pub mean: [f32; 3],
    /// Per-channel standard deviation divided out after the mean.
    pub std: [f32; 3],
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
        }
    }
}

impl PreprocessConfig {
    /// Set the per-channel statistics.
    #[must_use]
    pub fn with_stats(mut self, mean: [f32; 3], std: [f32; 3]) -> Self {
        self.mean = mean;
        self.std = std;
        self
    }

    /// Check that every standard deviation is finite and positive.
    pub fn validate(&self) -> Result<()> {
        if self.std.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(AnalysisError::InvalidConfig(format!(
                "normalization std must be positive, got {:?}",
                self.std
            )));
        }
        if self.mean.iter().any(|m| !m.is_finite()) {
            return Err(AnalysisError::InvalidConfig(format!(
                "normalization mean must be finite, got {:?}",
                self.mean
            )));
        }
        Ok(())
    }
}

/// Turns a [`RawImage`] into a normalized `(1, 3, 224, 224)` [`ImageTensor`].
///
/// Pure and deterministic: the same image always yields bit-identical
/// tensors, so one preprocessor can be shared across threads.
#[derive(Debug, Clone, Default)]
pub struct Preprocessor {
    config: PreprocessConfig,
}

impl Preprocessor {
    /// Preprocessor with ImageNet statistics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create from config.
    pub fn from_config(config: PreprocessConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    /// Normalized samples in `(C, H, W)` order, ready to become a tensor.
    ///
    /// Grayscale images are broadcast to three identical channels before
    /// resizing.
    #[must_use]
    pub fn to_chw(&self, image: &RawImage) -> Vec<f32> {
        let rgb = image.to_rgb_image();
        let size = INPUT_SIZE as u32;
        let resized = if rgb.dimensions() == (size, size) {
            rgb
        } else {
            imageops::resize(&rgb, size, size, FilterType::Triangle)
        };

        let plane = INPUT_SIZE * INPUT_SIZE;
        let mut data = vec![0.0f32; INPUT_CHANNELS * plane];
        for (x, y, pixel) in resized.enumerate_pixels() {
            let offset = y as usize * INPUT_SIZE + x as usize;
            for c in 0..INPUT_CHANNELS {
                let scaled = f32::from(pixel.0[c]) / 255.0;
                data[c * plane + offset] = (scaled - self.config.mean[c]) / self.config.std[c];
            }
        }
        data
    }

    /// Build the model input on `device`.
    ///
    /// The resulting tensor remembers the native image size for attribution.
    pub fn preprocess<B: Backend>(
        &self,
        image: &RawImage,
        device: &B::Device,
    ) -> Result<ImageTensor<B>> {
        let data = self.to_chw(image);
        let tensor = Tensor::<B, 1>::from_floats(data.as_slice(), device).reshape([
            1,
            INPUT_CHANNELS,
            INPUT_SIZE,
            INPUT_SIZE,
        ]);
        tracing::trace!(
            height = image.height(),
            width = image.width(),
            grayscale = image.is_grayscale(),
            "Preprocessed image"
        );
        ImageTensor::new(tensor, (image.height(), image.width()))
    }
}

/// Preprocess with ImageNet statistics.
pub fn preprocess<B: Backend>(image: &RawImage, device: &B::Device) -> Result<ImageTensor<B>> {
    Preprocessor::new().preprocess(image, device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cxr_core::backend::NdArray;
    use ndarray::Array2;

    type TestBackend = NdArray;

    fn uniform_gray(height: usize, width: usize, value: u8) -> RawImage {
        RawImage::from_array(Array2::from_elem((height, width), value).into_dyn()).unwrap()
    }

    #[test]
    fn test_grayscale_output_shape() {
        let device = Default::default();
        let image = uniform_gray(512, 300, 128);
        let input = preprocess::<TestBackend>(&image, &device).unwrap();

        assert_eq!(input.inner().dims(), [1, 3, 224, 224]);
        assert_eq!(input.source_size(), (512, 300));
    }

    #[test]
    fn test_uniform_intensity_matches_normalization() {
        let value = 200u8;
        let data = Preprocessor::new().to_chw(&uniform_gray(97, 131, value));
        let plane = INPUT_SIZE * INPUT_SIZE;

        for c in 0..3 {
            let expected = (f32::from(value) / 255.0 - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
            let channel = &data[c * plane..(c + 1) * plane];
            let mean = channel.iter().sum::<f32>() / plane as f32;
            let var = channel.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / plane as f32;

            assert!((mean - expected).abs() < 1e-4, "channel {c}: {mean} vs {expected}");
            assert!(var < 1e-8);
        }
    }

    #[test]
    fn test_preprocessing_is_deterministic() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(7);
        let data: Vec<u8> = (0..120 * 80 * 3).map(|_| rng.gen()).collect();
        let image = RawImage::from_raw(&[120, 80, 3], data).unwrap();

        let preprocessor = Preprocessor::new();
        let first = preprocessor.to_chw(&image);
        let second = preprocessor.to_chw(&image);
        assert!(first
            .iter()
            .zip(&second)
            .all(|(a, b)| a.to_bits() == b.to_bits()));
    }

    #[test]
    fn test_rgb_channels_are_independent() {
        // Solid red image: only channel 0 is above its mean.
        let mut data = Vec::with_capacity(224 * 224 * 3);
        for _ in 0..224 * 224 {
            data.extend_from_slice(&[255u8, 0, 0]);
        }
        let image = RawImage::from_raw(&[224, 224, 3], data).unwrap();
        let chw = Preprocessor::new().to_chw(&image);
        let plane = INPUT_SIZE * INPUT_SIZE;

        assert!((chw[0] - (1.0 - 0.485) / 0.229).abs() < 1e-5);
        assert!((chw[plane] - (-0.456 / 0.224)).abs() < 1e-5);
        assert!((chw[2 * plane] - (-0.406 / 0.225)).abs() < 1e-5);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = PreprocessConfig::default().with_stats([0.5; 3], [0.2, 0.0, 0.2]);
        assert!(matches!(
            Preprocessor::from_config(config),
            Err(AnalysisError::InvalidConfig(_))
        ));
    }
}
