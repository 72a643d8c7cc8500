//! # cxr_core
//!
//! Core types and traits for chest X-ray classification and attribution.
//!
//! This crate provides:
//! - [`ImageShape`] for decoded image metadata
//! - [`ImageTensor`] wrapper for the normalized model input
//! - [`AttributableClassifier`] trait for classifiers that can be explained
//! - [`AnalysisError`] taxonomy shared by every pipeline stage
//!
//! ## Shape Convention
//!
//! Model inputs follow the convention `(B, C, H, W)` with `B = 1`, `C = 3`
//! and `H = W = 224`. Decoded images follow `(H, W, C)`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use cxr_core::{ImageShape, ImageTensor};
//!
//! let shape = ImageShape::new(512, 300, 1);
//! let input = ImageTensor::new(tensor, shape.size())?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod model_trait;
mod shape;
mod tensor;

pub use error::{AnalysisError, Result};
pub use model_trait::{AttributableClassifier, LayerInfo};
pub use shape::ImageShape;
pub use tensor::{ensure_same_device, to_host_vec, ImageTensor, INPUT_CHANNELS, INPUT_SIZE};

/// Backend type aliases for convenience
pub mod backend {
    pub use burn_autodiff::Autodiff;

    #[cfg(feature = "backend-ndarray")]
    pub use burn_ndarray::NdArray;

    #[cfg(feature = "backend-wgpu")]
    pub use burn_wgpu::Wgpu;

    /// CPU backend with gradient tracking, used for attribution.
    #[cfg(feature = "backend-ndarray")]
    pub type CpuAutodiff = Autodiff<NdArray>;
}
