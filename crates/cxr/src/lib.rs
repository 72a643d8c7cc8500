//! # cxr
//!
//! Chest X-ray classification with Grad-CAM explanations.
//!
//! - **Vision**: image acquisition, preprocessing and heatmap compositing
//! - **Models**: ResNet-18 style classifier, labels and checkpoints
//! - **Explainability**: activation capture and Grad-CAM saliency maps
//! - **Pipeline**: [`Analyzer`] running all of the above on one image
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cxr::prelude::*;
//!
//! let device = Default::default();
//! let (model, metadata) = load_classifier::<CpuAutodiff>("weights/cxr", &device)?;
//! let analyzer = Analyzer::new(model, AnalysisConfig::default().with_labels(metadata.labels))?;
//!
//! let report = analyzer.analyze(&RawImage::open("scan.png")?, None)?;
//! report.save_overlay("scan_overlay.png")?;
//! ```
//!
//! ## Feature Flags
//!
//! - `backend-ndarray` (default): CPU backend using ndarray
//! - `backend-wgpu`: GPU backend using WGPU (Metal on macOS, Vulkan on Linux/Windows)

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod config;
mod pipeline;

pub use config::AnalysisConfig;
pub use pipeline::{AnalysisReport, Analyzer};

// Re-export all crates
pub use cxr_core as core;
pub use cxr_explain as explain;
pub use cxr_models as models;
pub use cxr_vision as vision;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use cxr::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{AnalysisConfig, AnalysisReport, Analyzer};

    // Core types
    pub use cxr_core::backend::*;
    pub use cxr_core::{AnalysisError, AttributableClassifier, ImageTensor, LayerInfo, Result};

    // Vision
    pub use cxr_vision::{
        composite, is_dicom_path, preprocess, render_heatmap, DicomMetadata, OverlayOptions,
        RawImage,
    };

    // Models
    pub use cxr_models::{
        default_labels, load_classifier, predict, save_classifier, ChestXRayNet,
        CheckpointMetadata, ClassifierConfig, Diagnosis, Prediction,
    };

    // Explain
    pub use cxr_explain::{CaptureExt, GradCam, SaliencyMap};
}
