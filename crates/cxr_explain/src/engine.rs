//! Grad-CAM attribution engine.

use std::marker::PhantomData;
use std::sync::Arc;

use burn::module::Module;
use burn::tensor::backend::AutodiffBackend;
use cxr_core::{
    ensure_same_device, AnalysisError, AttributableClassifier, ImageTensor, LayerInfo, Result,
};
use parking_lot::Mutex;

use crate::attribution::{grad_cam, SaliencyMap};
use crate::capture::CaptureExt;

/// Grad-CAM engine owning a shared classifier.
///
/// The classifier sits behind one lock that is held for the whole forward,
/// backward and capture sequence, so concurrent requests never observe each
/// other's activations. Clones share the classifier.
///
/// # Example
///
/// ```rust,ignore
/// use cxr_explain::GradCam;
///
/// let engine = GradCam::new(model).with_target_layer("layer3")?;
/// let map = engine.attribute(&input, None)?;
/// assert_eq!(map.size(), input.source_size());
/// ```
pub struct GradCam<B: AutodiffBackend, M> {
    model: Arc<Mutex<M>>,
    target_layer: String,
    _backend: PhantomData<B>,
}

impl<B: AutodiffBackend, M> Clone for GradCam<B, M> {
    fn clone(&self) -> Self {
        Self {
            model: Arc::clone(&self.model),
            target_layer: self.target_layer.clone(),
            _backend: PhantomData,
        }
    }
}

impl<B, M> GradCam<B, M>
where
    B: AutodiffBackend,
    M: AttributableClassifier<B>,
{
    /// Take ownership of a classifier, targeting its default layer.
    ///
    /// Parameters are frozen: attribution differentiates with respect to
    /// activations only.
    pub fn new(model: M) -> Self {
        let target_layer = model.default_target_layer().to_string();
        Self {
            model: Arc::new(Mutex::new(model.no_grad())),
            target_layer,
            _backend: PhantomData,
        }
    }

    /// A handle on the same classifier targeting another layer.
    ///
    /// # Errors
    ///
    /// [`AnalysisError::TargetLayerIncompatible`] if the layer is unknown or
    /// not spatial.
    pub fn with_target_layer(&self, layer: &str) -> Result<Self> {
        self.model.lock().attribution_layer(layer)?;
        Ok(Self {
            target_layer: layer.to_string(),
            ..self.clone()
        })
    }

    /// Layer the engine attributes at.
    pub fn target_layer(&self) -> &str {
        &self.target_layer
    }

    /// Number of classes of the classifier.
    pub fn num_classes(&self) -> usize {
        self.model.lock().num_classes()
    }

    /// Addressable layers of the classifier.
    pub fn layers(&self) -> Vec<LayerInfo> {
        self.model.lock().layers()
    }

    /// Device holding the classifier.
    pub fn device(&self) -> B::Device {
        self.model.lock().device()
    }

    /// Run `f` with exclusive access to the classifier.
    pub fn with_model<R>(&self, f: impl FnOnce(&M) -> R) -> R {
        f(&self.model.lock())
    }

    /// Compute a saliency map for one input.
    ///
    /// # Arguments
    ///
    /// * `input` - Preprocessed image on the classifier's device
    /// * `target_class` - Class to explain; the predicted class when `None`
    ///
    /// # Returns
    ///
    /// Map at the input's source resolution with values in `[0, 1]`.
    ///
    /// # Errors
    ///
    /// - [`AnalysisError::InvalidTargetClass`] before any pass runs
    /// - [`AnalysisError::DeviceMismatch`] if the input is on another device
    /// - [`AnalysisError::TargetLayerIncompatible`] for a non-spatial layer
    /// - [`AnalysisError::InferenceFailure`] for non-finite logits or maps
    pub fn attribute(
        &self,
        input: &ImageTensor<B>,
        target_class: Option<usize>,
    ) -> Result<SaliencyMap> {
        let model = self.model.lock();

        let num_classes = model.num_classes();
        if let Some(class) = target_class.filter(|&c| c >= num_classes) {
            return Err(AnalysisError::InvalidTargetClass { class, num_classes });
        }
        ensure_same_device(&model.device(), &input.device())?;

        let mut session = model.capture_on(&self.target_layer)?;
        let logits = session.forward(input.inner().clone())?;
        let class = target_class.unwrap_or_else(|| argmax(&logits));
        session.backward(class)?;
        let (activation, gradient) = session.into_pair()?;
        drop(model);

        tracing::debug!(
            layer = %self.target_layer,
            class,
            activation = ?activation.dims(),
            "Computing Grad-CAM"
        );
        let cam = grad_cam(activation, gradient)?;
        let map = SaliencyMap::from_tensor(cam, class, self.target_layer.as_str())?
            .resized(input.source_size())?;

        if map.is_degenerate() {
            tracing::warn!(
                layer = %self.target_layer,
                class,
                "Saliency map is all zero: no positive evidence for this class"
            );
        }
        Ok(map)
    }
}

fn argmax(values: &[f32]) -> usize {
    values
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map_or(0, |(i, _)| i)
}
