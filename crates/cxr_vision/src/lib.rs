//! # cxr_vision
//!
//! Image handling around the classifier: acquisition types, model-input
//! preprocessing and heatmap compositing.
//!
//! This crate provides:
//! - [`RawImage`] for decoded grayscale or RGB pixel arrays, including
//!   DICOM files with their [`DicomMetadata`]
//! - [`Preprocessor`] producing normalized `(1, 3, 224, 224)` tensors
//! - [`composite`] and [`render_heatmap`] for displaying saliency maps
//!
//! Everything here is pure and stateless; it can run on any thread.
//!
//! ## Example
//!
//! ```rust,ignore
//! use cxr_vision::{composite, OverlayOptions, Preprocessor, RawImage};
//!
//! let image = RawImage::open("chest.png")?;
//! let input = Preprocessor::new().preprocess::<B>(&image, &device)?;
//! // ... run attribution ...
//! let overlay = composite(&image, saliency.view(), &OverlayOptions::default())?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod colormap;
pub mod composite;
pub mod dicom;
pub mod preprocess;
pub mod raw_image;

pub use colormap::jet;
pub use composite::{composite, render_heatmap, OverlayOptions};
pub use dicom::{is_dicom_path, DicomMetadata};
pub use preprocess::{preprocess, PreprocessConfig, Preprocessor, IMAGENET_MEAN, IMAGENET_STD};
pub use raw_image::RawImage;
