//! # cxr_models
//!
//! Chest X-ray classifier for the analysis pipeline.
//!
//! - [`ChestXRayNet`] - ResNet-18 style backbone with a two-layer head,
//!   implementing [`cxr_core::AttributableClassifier`]
//! - [`Diagnosis`] - default class set (`Normal`, `Pneumonia`, `COVID-19`)
//! - [`predict`] - softmax-argmax classification of one input
//! - [`checkpoint`] - parameter files with a JSON metadata sidecar

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checkpoint;
pub mod inference;
pub mod labels;
pub mod resnet;

pub use checkpoint::{
    load_classifier, save_classifier, CheckpointError, CheckpointMetadata, ARCH,
};
pub use inference::{predict, Prediction};
pub use labels::{default_labels, Diagnosis};
pub use resnet::{
    BasicBlock, ChestXRayNet, ClassifierConfig, ResidualStage, DEFAULT_TARGET_LAYER,
    SPATIAL_LAYERS,
};
