//! Image shape metadata.

use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, Result};

/// Shape metadata for a decoded image, `(H, W, C)`.
///
/// - `H`: height in pixels
/// - `W`: width in pixels
/// - `C`: channels (1 for grayscale, 3 for RGB)
///
/// # Example
///
/// ```rust
/// use cxr_core::ImageShape;
///
/// let shape = ImageShape::new(512, 300, 1);
/// assert_eq!(shape.height(), 512);
/// assert_eq!(shape.width(), 300);
/// assert!(shape.is_grayscale());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageShape {
    height: usize,
    width: usize,
    channels: usize,
}

impl ImageShape {
    /// Create a new shape with the specified dimensions.
    #[must_use]
    pub const fn new(height: usize, width: usize, channels: usize) -> Self {
        Self {
            height,
            width,
            channels,
        }
    }

    /// Create a shape from the dimensions of a pixel array.
    ///
    /// Two dimensions are read as a grayscale `(H, W)` image, three as
    /// `(H, W, C)`.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::InvalidImageFormat`] for any other rank or
    /// when a dimension is zero.
    ///
    /// # Example
    ///
    /// ```rust
    /// use cxr_core::ImageShape;
    ///
    /// let shape = ImageShape::from_dims(&[64, 48]).unwrap();
    /// assert_eq!(shape.channels(), 1);
    /// assert!(ImageShape::from_dims(&[1, 64, 48, 3]).is_err());
    /// ```
    pub fn from_dims(dims: &[usize]) -> Result<Self> {
        let shape = match *dims {
            [height, width] => Self::new(height, width, 1),
            [height, width, channels] => Self::new(height, width, channels),
            _ => {
                return Err(AnalysisError::InvalidImageFormat(format!(
                    "expected a 2D (H, W) or 3D (H, W, C) pixel array, got {} dimensions",
                    dims.len()
                )))
            }
        };
        if shape.is_empty() {
            return Err(AnalysisError::InvalidImageFormat(format!(
                "pixel array has an empty dimension: {shape}"
            )));
        }
        Ok(shape)
    }

    /// Get the height.
    #[must_use]
    pub const fn height(&self) -> usize {
        self.height
    }

    /// Get the width.
    #[must_use]
    pub const fn width(&self) -> usize {
        self.width
    }

    /// Get the number of channels.
    #[must_use]
    pub const fn channels(&self) -> usize {
        self.channels
    }

    /// Whether the image has a single channel.
    #[must_use]
    pub const fn is_grayscale(&self) -> bool {
        self.channels == 1
    }

    /// Check if any dimension is zero.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.height == 0 || self.width == 0 || self.channels == 0
    }

    /// Total number of samples.
    #[must_use]
    pub const fn numel(&self) -> usize {
        self.height * self.width * self.channels
    }

    /// Spatial size as `(height, width)`.
    #[must_use]
    pub const fn size(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    /// Same spatial size with a different channel count.
    #[must_use]
    pub const fn with_channels(&self, channels: usize) -> Self {
        Self {
            height: self.height,
            width: self.width,
            channels,
        }
    }
}

impl std::fmt::Display for ImageShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(H={}, W={}, C={})", self.height, self.width, self.channels)
    }
}

impl From<(usize, usize, usize)> for ImageShape {
    fn from((height, width, channels): (usize, usize, usize)) -> Self {
        Self::new(height, width, channels)
    }
}
