//! Error taxonomy shared by every stage of the analysis pipeline.

use thiserror::Error;

/// Result type alias using [`AnalysisError`].
pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Errors surfaced by preprocessing, inference, attribution and compositing.
///
/// None of these are recovered inside the core: attribution is deterministic
/// for a fixed model and input, so a failed request is reported, never retried.
#[derive(Error, Debug)]
pub enum AnalysisError {
    /// The pixel array cannot be turned into a model input.
    #[error("Invalid image format: {0}")]
    InvalidImageFormat(String),

    /// The requested layer cannot anchor a class activation map.
    #[error("Target layer `{layer}` is incompatible with attribution: {reason}")]
    TargetLayerIncompatible {
        /// Requested layer name.
        layer: String,
        /// Why the layer was rejected.
        reason: String,
    },

    /// Class index outside `0..num_classes`.
    #[error("Invalid target class {class}: classifier has {num_classes} classes")]
    InvalidTargetClass {
        /// Requested class index.
        class: usize,
        /// Number of classes the classifier produces.
        num_classes: usize,
    },

    /// The forward or backward pass produced no usable result.
    #[error("Inference failure: {0}")]
    InferenceFailure(String),

    /// Input tensor and classifier live on different devices.
    #[error("Device mismatch: classifier on {expected}, tensor on {got}")]
    DeviceMismatch {
        /// Device holding the classifier parameters.
        expected: String,
        /// Device holding the input tensor.
        got: String,
    },

    /// Invalid tensor shape provided.
    #[error("Invalid shape: expected {expected}, got {got}")]
    InvalidShape {
        /// Expected shape description.
        expected: String,
        /// Actual shape description.
        got: String,
    },

    /// Out-of-range option or malformed configuration file.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Model parameters could not be loaded or saved.
    #[error("Model load error: {0}")]
    ModelLoad(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AnalysisError {
    /// Shorthand for [`AnalysisError::TargetLayerIncompatible`].
    pub fn incompatible_layer(layer: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TargetLayerIncompatible {
            layer: layer.into(),
            reason: reason.into(),
        }
    }

    /// Whether the analysis could not run because of the caller's input,
    /// as opposed to a model or runtime problem.
    #[must_use]
    pub const fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidImageFormat(_)
                | Self::InvalidTargetClass { .. }
                | Self::InvalidShape { .. }
                | Self::InvalidConfig(_)
        )
    }
}
