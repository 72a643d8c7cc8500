//! Activation and gradient capture at a named layer.
//!
//! A [`CaptureSession`] splits the classifier at the target layer and turns
//! the layer output into a gradient leaf. One forward pass and one backward
//! pass make a pair; a new forward pass discards the previous pair.

use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use cxr_core::{to_host_vec, AnalysisError, AttributableClassifier, LayerInfo, Result};

/// Scoped capture of one forward/backward pair at a target layer.
pub struct CaptureSession<'m, B: AutodiffBackend, M: AttributableClassifier<B>> {
    model: &'m M,
    layer: LayerInfo,
    activation: Option<Tensor<B, 4>>,
    logits: Option<Tensor<B, 2>>,
    gradient: Option<Tensor<B::InnerBackend, 4>>,
}

impl<'m, B, M> CaptureSession<'m, B, M>
where
    B: AutodiffBackend,
    M: AttributableClassifier<B>,
{
    /// Open a session on `layer`.
    ///
    /// # Errors
    ///
    /// [`AnalysisError::TargetLayerIncompatible`] if the layer is unknown or
    /// not spatial.
    pub fn new(model: &'m M, layer: &str) -> Result<Self> {
        let layer = model.attribution_layer(layer)?;
        Ok(Self {
            model,
            layer,
            activation: None,
            logits: None,
            gradient: None,
        })
    }

    /// The observed layer.
    pub fn layer(&self) -> &LayerInfo {
        &self.layer
    }

    /// Run the classifier, capturing the target layer output.
    ///
    /// Clears any gradient from an earlier pass.
    ///
    /// # Returns
    ///
    /// Logits of the single input, one per class.
    ///
    /// # Errors
    ///
    /// [`AnalysisError::InferenceFailure`] if a logit is not finite.
    pub fn forward(&mut self, x: Tensor<B, 4>) -> Result<Vec<f32>> {
        self.gradient = None;
        self.activation = None;
        self.logits = None;

        let activation = self.model.forward_to(x, &self.layer.name)?;
        let [_, channels, height, width] = activation.dims();
        if channels == 0 || height == 0 || width == 0 {
            return Err(AnalysisError::incompatible_layer(
                self.layer.name.as_str(),
                format!("output {:?} has no spatial extent", activation.dims()),
            ));
        }
        let activation = activation.detach().require_grad();
        let logits = self
            .model
            .forward_from(activation.clone(), &self.layer.name)?;

        let values = to_host_vec(logits.clone().inner())?;
        if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
            return Err(AnalysisError::InferenceFailure(format!(
                "non-finite logit {bad}"
            )));
        }

        tracing::trace!(
            layer = %self.layer.name,
            activation = ?activation.dims(),
            "Captured activation"
        );
        self.activation = Some(activation);
        self.logits = Some(logits);
        Ok(values)
    }

    /// Backpropagate the logit of `class` to the target layer.
    ///
    /// Each forward pass supports one backward pass. An out-of-range class
    /// is rejected without using up the forward pass.
    ///
    /// # Errors
    ///
    /// [`AnalysisError::InvalidTargetClass`] for an out-of-range class,
    /// [`AnalysisError::InferenceFailure`] without a preceding forward pass
    /// or if no gradient reaches the layer.
    pub fn backward(&mut self, class: usize) -> Result<()> {
        let [_, num_classes] = self
            .logits
            .as_ref()
            .ok_or_else(|| {
                AnalysisError::InferenceFailure(
                    "backward requires a fresh forward pass".to_string(),
                )
            })?
            .dims();
        if class >= num_classes {
            return Err(AnalysisError::InvalidTargetClass { class, num_classes });
        }

        let activation = self.activation.as_ref().ok_or_else(|| {
            AnalysisError::InferenceFailure("no activation was captured".to_string())
        })?;
        let logits = self.logits.take().ok_or_else(|| {
            AnalysisError::InferenceFailure("backward requires a fresh forward pass".to_string())
        })?;

        let score = logits.slice([0..1, class..class + 1]).sum();
        let grads = score.backward();
        let gradient = activation.grad(&grads).ok_or_else(|| {
            AnalysisError::InferenceFailure(format!(
                "no gradient reached layer `{}`",
                self.layer.name
            ))
        })?;

        tracing::trace!(class, gradient = ?gradient.dims(), "Captured gradient");
        self.gradient = Some(gradient);
        Ok(())
    }

    /// Target layer output of the last forward pass.
    pub fn activation(&self) -> Option<Tensor<B::InnerBackend, 4>> {
        self.activation.as_ref().map(|a| a.clone().inner())
    }

    /// Gradient of the last backward pass, matching [`activation`](Self::activation).
    pub fn gradient(&self) -> Option<Tensor<B::InnerBackend, 4>> {
        self.gradient.clone()
    }

    /// Take the captured activation and gradient, ending the session.
    ///
    /// # Errors
    ///
    /// [`AnalysisError::InferenceFailure`] unless both passes have run.
    pub fn into_pair(self) -> Result<(Tensor<B::InnerBackend, 4>, Tensor<B::InnerBackend, 4>)> {
        match (self.activation, self.gradient) {
            (Some(activation), Some(gradient)) => Ok((activation.inner(), gradient)),
            _ => Err(AnalysisError::InferenceFailure(
                "capture session has no complete forward/backward pair".to_string(),
            )),
        }
    }
}

/// Open capture sessions directly on a classifier.
pub trait CaptureExt<B: AutodiffBackend>: AttributableClassifier<B> + Sized {
    /// Start capturing at `layer`.
    ///
    /// # Errors
    ///
    /// [`AnalysisError::TargetLayerIncompatible`] if the layer cannot anchor
    /// an attribution.
    fn capture_on(&self, layer: &str) -> Result<CaptureSession<'_, B, Self>> {
        CaptureSession::new(self, layer)
    }
}

impl<B: AutodiffBackend, M: AttributableClassifier<B>> CaptureExt<B> for M {}
