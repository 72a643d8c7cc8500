//! Classifier contract required by attribution.
//!
//! Defines the trait a convolutional classifier implements so gradients and
//! activations can be observed at a named layer without hooks.

use burn::module::AutodiffModule;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, Result};

/// Description of an addressable layer of a classifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayerInfo {
    /// Layer name, e.g. `layer4`.
    pub name: String,
    /// Rank of the layer output including the batch dimension.
    pub output_rank: usize,
}

impl LayerInfo {
    /// A layer producing `(batch, channels, height, width)` feature maps.
    pub fn spatial(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            output_rank: 4,
        }
    }

    /// A layer producing `(batch, features)` vectors.
    pub fn flat(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            output_rank: 2,
        }
    }

    /// Whether the output keeps spatial structure.
    #[must_use]
    pub const fn is_spatial(&self) -> bool {
        self.output_rank == 4
    }
}

/// Trait for image classifiers that can be explained with class activation maps.
///
/// `forward_to` and `forward_from` split the network at a named layer;
/// composing them must give the same logits as [`forward`](Self::forward).
/// Implementations are inference-only: normalization layers use running
/// statistics and no stochastic layer is active, so repeated passes on the
/// same input are identical.
pub trait AttributableClassifier<B: AutodiffBackend>: AutodiffModule<B> + Send {
    /// Number of output classes.
    fn num_classes(&self) -> usize;

    /// All addressable layers in forward order.
    fn layers(&self) -> Vec<LayerInfo>;

    /// Layer used when the caller does not name one.
    fn default_target_layer(&self) -> &str;

    /// Device holding the classifier parameters.
    fn device(&self) -> B::Device;

    /// Forward pass returning logits.
    ///
    /// # Arguments
    ///
    /// * `x` - Input tensor of shape (batch, 3, height, width)
    ///
    /// # Returns
    ///
    /// Logits tensor of shape (batch, n_classes)
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2>;

    /// Run the network up to and including `layer`.
    ///
    /// # Errors
    ///
    /// [`AnalysisError::TargetLayerIncompatible`] if the layer is unknown or
    /// not spatial.
    fn forward_to(&self, x: Tensor<B, 4>, layer: &str) -> Result<Tensor<B, 4>>;

    /// Run the rest of the network from the output of `layer` to the logits.
    ///
    /// # Errors
    ///
    /// [`AnalysisError::TargetLayerIncompatible`] if the layer is unknown or
    /// not spatial.
    fn forward_from(&self, activation: Tensor<B, 4>, layer: &str) -> Result<Tensor<B, 2>>;

    /// Forward pass returning probabilities.
    fn forward_probs(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let logits = AttributableClassifier::forward(self, x);
        burn::tensor::activation::softmax(logits, 1)
    }

    /// Look up a layer that can anchor an attribution.
    ///
    /// # Errors
    ///
    /// [`AnalysisError::TargetLayerIncompatible`] if no layer has this name
    /// or its output is not 4D.
    fn attribution_layer(&self, name: &str) -> Result<LayerInfo> {
        let info = self
            .layers()
            .into_iter()
            .find(|info| info.name == name)
            .ok_or_else(|| AnalysisError::incompatible_layer(name, "no such layer"))?;

        if !info.is_spatial() {
            return Err(AnalysisError::incompatible_layer(
                name,
                format!(
                    "output has rank {}, expected (batch, channels, height, width)",
                    info.output_rank
                ),
            ));
        }
        Ok(info)
    }
}
