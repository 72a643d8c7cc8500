//! Decoded pixel arrays as handed over by image acquisition.

use std::path::Path;

use cxr_core::{AnalysisError, ImageShape, Result};
use image::{DynamicImage, RgbImage};
use ndarray::{Array3, ArrayD, IxDyn};
use num_traits::PrimInt;

/// An 8-bit image in `(H, W, C)` layout with `C` either 1 or 3.
///
/// This is the image at its native resolution: the preprocessor derives the
/// model input from it and the compositor draws the overlay on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImage {
    pixels: Array3<u8>,
}

impl RawImage {
    /// Build an image from an integer pixel array.
    ///
    /// Accepts `(H, W)` grayscale or `(H, W, C)` arrays where `C` is 1
    /// (grayscale), 3 (RGB) or 4 (RGBA, alpha is dropped). Samples are mapped
    /// to 8 bits in two steps:
    ///
    /// 1. if any sample is negative (signed DICOM data), all samples are
    ///    shifted up by the minimum so the darkest sample becomes 0;
    /// 2. if the largest sample is then above 255 (e.g. 12 or 16-bit
    ///    radiographs), all samples are rescaled as `value / max * 255`.
    ///
    /// Arrays already in `0..=255` pass through untouched.
    ///
    /// # Errors
    ///
    /// [`AnalysisError::InvalidImageFormat`] for any other rank, an empty
    /// dimension, an unsupported channel count or a sample outside the `i64`
    /// range.
    pub fn from_array<T: PrimInt>(pixels: ArrayD<T>) -> Result<Self> {
        let shape = ImageShape::from_dims(pixels.shape())?;
        let keep_channels = match shape.channels() {
            1 => 1,
            3 | 4 => 3,
            n => {
                return Err(AnalysisError::InvalidImageFormat(format!(
                    "unsupported channel count {n}, expected 1, 3 or 4"
                )))
            }
        };

        let samples = pixels.mapv(|v| v.to_i64());
        if samples.iter().any(Option::is_none) {
            return Err(AnalysisError::InvalidImageFormat(
                "pixel value does not fit in 64 bits".to_string(),
            ));
        }
        let samples = samples.mapv(|v| v.unwrap_or_default());

        let min = samples.iter().copied().min().unwrap_or(0);
        let offset = min.min(0);
        let max = samples.iter().copied().max().unwrap_or(0) - offset;
        if offset < 0 {
            tracing::debug!(min, "Shifting signed pixel values to start at zero");
        }
        if max > 255 {
            tracing::debug!(max, "Rescaling high bit-depth image to 8 bits");
        }
        let to_u8 = |v: i64| -> u8 {
            let v = v - offset;
            if max > 255 {
                (v as f64 / max as f64 * 255.0) as u8
            } else {
                v as u8
            }
        };

        let rank2 = samples.ndim() == 2;
        let out = Array3::from_shape_fn(
            (shape.height(), shape.width(), keep_channels),
            |(y, x, c)| {
                let value = if rank2 {
                    samples[IxDyn(&[y, x])]
                } else {
                    samples[IxDyn(&[y, x, c])]
                };
                to_u8(value)
            },
        );
        Ok(Self { pixels: out })
    }

    /// Build an image from a flat row-major buffer and its dimensions.
    ///
    /// # Errors
    ///
    /// [`AnalysisError::InvalidImageFormat`] if the buffer length does not
    /// match the dimensions, or for the cases listed in [`Self::from_array`].
    pub fn from_raw<T: PrimInt>(dims: &[usize], data: Vec<T>) -> Result<Self> {
        let len = data.len();
        let array = ArrayD::from_shape_vec(IxDyn(dims), data).map_err(|e| {
            AnalysisError::InvalidImageFormat(format!(
                "{len} samples do not fit dimensions {dims:?}: {e}"
            ))
        })?;
        Self::from_array(array)
    }

    /// Convert a decoded image.
    ///
    /// Grayscale images stay single-channel; 16-bit and float images go
    /// through the high bit-depth path of [`Self::from_array`].
    pub fn from_dynamic(image: &DynamicImage) -> Result<Self> {
        let (h, w) = (image.height() as usize, image.width() as usize);
        let color = image.color();
        let wide = color.bytes_per_pixel() / color.channel_count() > 1;

        match (color.has_color(), wide) {
            (false, false) => Self::from_raw(&[h, w], image.to_luma8().into_raw()),
            (false, true) => Self::from_raw(&[h, w], image.to_luma16().into_raw()),
            (true, false) => Self::from_raw(&[h, w, 3], image.to_rgb8().into_raw()),
            (true, true) => Self::from_raw(&[h, w, 3], image.to_rgb16().into_raw()),
        }
    }

    /// Decode an encoded image (PNG, JPEG) from memory.
    ///
    /// # Errors
    ///
    /// [`AnalysisError::InvalidImageFormat`] if the bytes cannot be decoded.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| AnalysisError::InvalidImageFormat(e.to_string()))?;
        Self::from_dynamic(&image)
    }

    /// Open and decode an image file.
    ///
    /// # Errors
    ///
    /// [`AnalysisError::Io`] if the file cannot be read,
    /// [`AnalysisError::InvalidImageFormat`] if it cannot be decoded.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::decode(&bytes)
    }

    /// Shape metadata.
    #[must_use]
    pub fn shape(&self) -> ImageShape {
        let (h, w, c) = self.pixels.dim();
        ImageShape::new(h, w, c)
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> usize {
        self.pixels.dim().0
    }

    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> usize {
        self.pixels.dim().1
    }

    /// Whether the image has a single channel.
    #[must_use]
    pub fn is_grayscale(&self) -> bool {
        self.pixels.dim().2 == 1
    }

    /// The `(H, W, C)` samples.
    #[must_use]
    pub fn pixels(&self) -> &Array3<u8> {
        &self.pixels
    }

    /// RGB view of the image; grayscale is replicated into three equal channels.
    #[must_use]
    pub fn to_rgb_image(&self) -> RgbImage {
        let (h, w, c) = self.pixels.dim();
        RgbImage::from_fn(w as u32, h as u32, |x, y| {
            let (x, y) = (x as usize, y as usize);
            if c == 1 {
                let v = self.pixels[[y, x, 0]];
                image::Rgb([v, v, v])
            } else {
                image::Rgb([
                    self.pixels[[y, x, 0]],
                    self.pixels[[y, x, 1]],
                    self.pixels[[y, x, 2]],
                ])
            }
        })
    }
}
