//! Classifier checkpointing.
//!
//! A checkpoint is a pair of files sharing one stem:
//!
//! - `<stem>.mpk`: parameters, written with Burn's `NamedMpkFileRecorder`
//! - `<stem>.json`: [`CheckpointMetadata`] with the architecture config and labels
//!
//! # Example
//!
//! ```rust,ignore
//! use cxr_models::checkpoint::{load_classifier, save_classifier, CheckpointMetadata};
//! use cxr_models::{default_labels, ClassifierConfig};
//!
//! let config = ClassifierConfig::default();
//! let model = config.init::<NdArray>(&device);
//! let metadata = CheckpointMetadata::new(config, default_labels());
//!
//! save_classifier(&model, &metadata, "weights/cxr")?;
//! let (model, metadata) = load_classifier::<NdArray>("weights/cxr", &device)?;
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use burn::module::{Module, ModuleVisitor, ParamId};
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use cxr_core::AnalysisError;
use serde::{Deserialize, Serialize};

use crate::resnet::{ChestXRayNet, ClassifierConfig};

/// Architecture identifier written into metadata.
pub const ARCH: &str = "chest_xray_resnet18";

/// Result type for checkpoint operations.
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Checkpoint-related errors.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Error saving checkpoint.
    #[error("Failed to save checkpoint: {0}")]
    Save(String),

    /// Error loading checkpoint.
    #[error("Failed to load checkpoint: {0}")]
    Load(String),

    /// Parameters do not fit the architecture described by the metadata.
    #[error("Checkpoint does not match architecture: {0}")]
    ArchitectureMismatch(String),
}

impl From<CheckpointError> for AnalysisError {
    fn from(err: CheckpointError) -> Self {
        AnalysisError::ModelLoad(err.to_string())
    }
}

/// Model checkpoint metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Model architecture name.
    pub arch: String,
    /// Architecture configuration.
    pub config: ClassifierConfig,
    /// One label per output class.
    pub labels: Vec<String>,
    /// Additional metadata.
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

impl CheckpointMetadata {
    /// Create new metadata for a classifier.
    pub fn new(config: ClassifierConfig, labels: Vec<String>) -> Self {
        Self {
            arch: ARCH.to_string(),
            config,
            labels,
            extra: HashMap::new(),
        }
    }

    /// Add extra metadata.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Check the metadata describes a model this crate can build.
    pub fn validate(&self) -> Result<()> {
        if self.arch != ARCH {
            return Err(CheckpointError::Load(format!(
                "unsupported architecture `{}`, expected `{ARCH}`",
                self.arch
            )));
        }
        self.config
            .validate()
            .map_err(|e| CheckpointError::Load(e.to_string()))?;
        if self.labels.len() != self.config.n_classes {
            return Err(CheckpointError::Load(format!(
                "{} labels for {} classes",
                self.labels.len(),
                self.config.n_classes
            )));
        }
        Ok(())
    }

    /// Save metadata to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| CheckpointError::Save(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| CheckpointError::Save(e.to_string()))?;
        Ok(())
    }

    /// Load metadata from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json =
            std::fs::read_to_string(path).map_err(|e| CheckpointError::Load(e.to_string()))?;
        serde_json::from_str(&json).map_err(|e| CheckpointError::Load(e.to_string()))
    }
}

/// Collects the dims of every tensor of a module in visiting order.
#[derive(Default)]
struct ParamShapes {
    shapes: Vec<Vec<usize>>,
}

impl<B: Backend> ModuleVisitor<B> for ParamShapes {
    fn visit_float<const D: usize>(&mut self, _id: ParamId, tensor: &Tensor<B, D>) {
        self.shapes.push(tensor.dims().to_vec());
    }
}

fn param_shapes<B: Backend>(model: &ChestXRayNet<B>) -> Vec<Vec<usize>> {
    let mut visitor = ParamShapes::default();
    model.visit(&mut visitor);
    visitor.shapes
}

/// Fail unless both shape lists agree tensor by tensor.
fn check_shapes(expected: &[Vec<usize>], found: &[Vec<usize>]) -> Result<()> {
    if expected.len() != found.len() {
        return Err(CheckpointError::ArchitectureMismatch(format!(
            "expected {} tensors, found {}",
            expected.len(),
            found.len()
        )));
    }
    match expected.iter().zip(found).position(|(e, f)| e != f) {
        Some(i) => Err(CheckpointError::ArchitectureMismatch(format!(
            "tensor {i} has shape {:?}, expected {:?}",
            found[i], expected[i]
        ))),
        None => Ok(()),
    }
}

/// Parameter and metadata file paths for a checkpoint stem.
pub fn checkpoint_paths(stem: impl AsRef<Path>) -> (PathBuf, PathBuf) {
    let stem = stem.as_ref();
    (stem.with_extension("mpk"), stem.with_extension("json"))
}

/// Save a classifier and its metadata.
///
/// # Arguments
///
/// * `model` - The model to save
/// * `metadata` - Config and labels the model was built from
/// * `stem` - Output path without extension
pub fn save_classifier<B: Backend>(
    model: &ChestXRayNet<B>,
    metadata: &CheckpointMetadata,
    stem: impl AsRef<Path>,
) -> Result<()> {
    metadata.validate()?;
    let (weights, meta) = checkpoint_paths(stem);

    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    model
        .clone()
        .save_file(weights.clone(), &recorder)
        .map_err(|e| CheckpointError::Save(e.to_string()))?;
    metadata.save(&meta)?;

    tracing::info!(weights = %weights.display(), metadata = %meta.display(), "Saved checkpoint");
    Ok(())
}

/// Load a classifier from a checkpoint written by [`save_classifier`].
///
/// The architecture is rebuilt from the metadata. Every loaded tensor must
/// have exactly the shape the architecture gives it, otherwise loading fails
/// with [`CheckpointError::ArchitectureMismatch`].
pub fn load_classifier<B: Backend>(
    stem: impl AsRef<Path>,
    device: &B::Device,
) -> Result<(ChestXRayNet<B>, CheckpointMetadata)> {
    let (weights, meta) = checkpoint_paths(stem);
    let metadata = CheckpointMetadata::load(&meta)?;
    metadata.validate()?;

    let model: ChestXRayNet<B> = metadata.config.init(device);
    let expected = param_shapes(&model);

    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    let model = model
        .load_file(weights.clone(), &recorder, device)
        .map_err(|e| CheckpointError::Load(e.to_string()))?;

    check_shapes(&expected, &param_shapes(&model))?;

    tracing::info!(
        weights = %weights.display(),
        classes = metadata.config.n_classes,
        params = model.num_params(),
        "Loaded classifier"
    );
    Ok((model, metadata))
}
