//! End-to-end analysis: image in, prediction and overlay out.

use std::path::Path;

use burn::tensor::backend::AutodiffBackend;
use cxr_core::{AnalysisError, AttributableClassifier, ImageTensor, Result};
use cxr_explain::{GradCam, SaliencyMap};
use cxr_models::{predict, Prediction};
use cxr_vision::{composite, render_heatmap, Preprocessor, RawImage};
use image::RgbImage;

use crate::config::AnalysisConfig;

/// Result of analyzing one image.
#[derive(Debug, Clone)]
pub struct AnalysisReport {
    /// Predicted class.
    pub prediction: Prediction,
    /// Saliency for the explained class, at the source resolution.
    pub saliency: SaliencyMap,
    /// Source image with the heatmap blended in.
    pub overlay: RgbImage,
}

impl AnalysisReport {
    /// The colored heatmap without the source image.
    pub fn heatmap(&self) -> Result<RgbImage> {
        render_heatmap(self.saliency.view())
    }

    /// Write the overlay as an image file; the format follows the extension.
    pub fn save_overlay(&self, path: impl AsRef<Path>) -> Result<()> {
        save_image(&self.overlay, path.as_ref())
    }

    /// Write the bare heatmap as an image file.
    pub fn save_heatmap(&self, path: impl AsRef<Path>) -> Result<()> {
        save_image(&self.heatmap()?, path.as_ref())
    }
}

fn save_image(image: &RgbImage, path: &Path) -> Result<()> {
    image
        .save(path)
        .map_err(|e| AnalysisError::Io(std::io::Error::other(e)))
}

/// Preprocessor, classifier and attribution engine wired together.
///
/// # Example
///
/// ```rust,ignore
/// use cxr::prelude::*;
///
/// let (model, metadata) = load_classifier::<CpuAutodiff>("weights/cxr", &device)?;
/// let config = AnalysisConfig::default().with_labels(metadata.labels);
/// let analyzer = Analyzer::new(model, config)?;
///
/// let report = analyzer.analyze(&RawImage::open("scan.png")?, None)?;
/// println!("{} ({:.1}%)", report.prediction.label, report.prediction.confidence * 100.0);
/// report.save_overlay("scan_overlay.png")?;
/// ```
pub struct Analyzer<B: AutodiffBackend, M> {
    engine: GradCam<B, M>,
    preprocessor: Preprocessor,
    config: AnalysisConfig,
}

impl<B, M> Analyzer<B, M>
where
    B: AutodiffBackend,
    M: AttributableClassifier<B>,
{
    /// Build an analyzer around a classifier.
    ///
    /// # Errors
    ///
    /// [`AnalysisError::InvalidConfig`] for invalid settings or a label count
    /// that differs from the classifier's classes, and
    /// [`AnalysisError::TargetLayerIncompatible`] for an unusable layer.
    pub fn new(model: M, config: AnalysisConfig) -> Result<Self> {
        config.validate()?;
        if config.labels.len() != model.num_classes() {
            return Err(AnalysisError::InvalidConfig(format!(
                "{} labels configured for a classifier with {} classes",
                config.labels.len(),
                model.num_classes()
            )));
        }

        let engine = GradCam::new(model).with_target_layer(&config.target_layer)?;
        let preprocessor = Preprocessor::from_config(config.preprocess.clone())?;
        Ok(Self {
            engine,
            preprocessor,
            config,
        })
    }

    /// The attribution engine; clones share the classifier.
    pub fn engine(&self) -> &GradCam<B, M> {
        &self.engine
    }

    /// Active configuration.
    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Turn an image into a model input on the classifier's device.
    pub fn preprocess(&self, image: &RawImage) -> Result<ImageTensor<B>> {
        self.preprocessor.preprocess(image, &self.engine.device())
    }

    /// Classify a preprocessed input.
    pub fn predict(&self, input: &ImageTensor<B>) -> Result<Prediction> {
        self.engine
            .with_model(|model| predict(model, input, &self.config.labels))
    }

    /// Classify an image and explain a class.
    ///
    /// # Arguments
    ///
    /// * `image` - Source image at native resolution
    /// * `target_class` - Class to explain; the predicted class when `None`
    ///
    /// # Errors
    ///
    /// [`AnalysisError::InvalidTargetClass`] is returned before the image is
    /// processed; any stage failure is returned as is.
    pub fn analyze(&self, image: &RawImage, target_class: Option<usize>) -> Result<AnalysisReport> {
        let num_classes = self.config.labels.len();
        if let Some(class) = target_class.filter(|&c| c >= num_classes) {
            return Err(AnalysisError::InvalidTargetClass { class, num_classes });
        }

        let input = self.preprocess(image)?;
        let prediction = self.predict(&input)?;
        let class = target_class.unwrap_or(prediction.class_index);

        let saliency = self.engine.attribute(&input, Some(class))?;
        let overlay = composite(image, saliency.view(), &self.config.overlay)?;

        tracing::info!(
            label = %prediction.label,
            confidence = prediction.confidence,
            explained = class,
            layer = %self.engine.target_layer(),
            peak = saliency.max(),
            "Analysis complete"
        );
        Ok(AnalysisReport {
            prediction,
            saliency,
            overlay,
        })
    }
}
