//! Model input tensor type.

use std::fmt::Debug;

use burn::prelude::*;

use crate::error::{AnalysisError, Result};

/// Spatial size of the classifier input (both height and width).
pub const INPUT_SIZE: usize = 224;

/// Number of channels of the classifier input.
pub const INPUT_CHANNELS: usize = 3;

/// A normalized classifier input with the native size of the image it came from.
///
/// Wraps a Burn tensor of shape `(1, 3, 224, 224)`. The batch dimension is
/// always 1: every analysis explains exactly one image. The source size is
/// kept so attribution maps can be resized back to the image the user sees.
///
/// # Example
///
/// ```rust,ignore
/// use cxr_core::ImageTensor;
///
/// let tensor = Tensor::<NdArray, 4>::ones([1, 3, 224, 224], &device);
/// let input = ImageTensor::new(tensor, (512, 300))?;
/// assert_eq!(input.source_size(), (512, 300));
/// ```
#[derive(Debug, Clone)]
pub struct ImageTensor<B: Backend> {
    inner: Tensor<B, 4>,
    source_size: (usize, usize),
}

impl<B: Backend> ImageTensor<B> {
    /// Create a new input from a Burn tensor and the source `(height, width)`.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::InvalidShape`] unless the tensor is
    /// `(1, 3, 224, 224)` and the source size is non-empty.
    pub fn new(tensor: Tensor<B, 4>, source_size: (usize, usize)) -> Result<Self> {
        let dims = tensor.dims();
        if dims != Self::expected_dims() {
            return Err(AnalysisError::InvalidShape {
                expected: format!("{:?}", Self::expected_dims()),
                got: format!("{dims:?}"),
            });
        }
        if source_size.0 == 0 || source_size.1 == 0 {
            return Err(AnalysisError::InvalidShape {
                expected: "non-empty source image".to_string(),
                got: format!("{}x{}", source_size.0, source_size.1),
            });
        }
        Ok(Self {
            inner: tensor,
            source_size,
        })
    }

    /// The only accepted tensor shape.
    #[must_use]
    pub const fn expected_dims() -> [usize; 4] {
        [1, INPUT_CHANNELS, INPUT_SIZE, INPUT_SIZE]
    }

    /// `(height, width)` of the image before resizing.
    #[must_use]
    pub const fn source_size(&self) -> (usize, usize) {
        self.source_size
    }

    /// Get a reference to the underlying Burn tensor.
    #[must_use]
    pub const fn inner(&self) -> &Tensor<B, 4> {
        &self.inner
    }

    /// Consume self and return the underlying Burn tensor.
    #[must_use]
    pub fn into_inner(self) -> Tensor<B, 4> {
        self.inner
    }

    /// Get the device the tensor is on.
    pub fn device(&self) -> B::Device {
        self.inner.device()
    }
}

/// Copy a tensor to the host as `f32` samples in row-major order.
///
/// # Errors
///
/// [`AnalysisError::InferenceFailure`] if the backend data cannot be read.
pub fn to_host_vec<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| AnalysisError::InferenceFailure(format!("Failed to read tensor data: {e:?}")))
}

/// Fail with [`AnalysisError::DeviceMismatch`] unless both devices are equal.
///
/// Placement is a configuration decision of the caller; tensors are never
/// moved implicitly.
pub fn ensure_same_device<D: PartialEq + Debug>(classifier: &D, tensor: &D) -> Result<()> {
    if classifier == tensor {
        Ok(())
    } else {
        Err(AnalysisError::DeviceMismatch {
            expected: format!("{classifier:?}"),
            got: format!("{tensor:?}"),
        })
    }
}
