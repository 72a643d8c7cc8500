//! Pipeline configuration.

use std::path::Path;

use cxr_core::{AnalysisError, Result};
use cxr_models::{default_labels, DEFAULT_TARGET_LAYER};
use cxr_vision::{OverlayOptions, PreprocessConfig};
use serde::{Deserialize, Serialize};

/// Settings for one [`Analyzer`](crate::Analyzer).
///
/// Stored as JSON:
///
/// ```json
/// {
///   "target_layer": "layer4",
///   "overlay": { "alpha": 0.4, "threshold": 0.2 },
///   "labels": ["Normal", "Pneumonia", "COVID-19"],
///   "preprocess": { "mean": [0.485, 0.456, 0.406], "std": [0.229, 0.224, 0.225] }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Layer the saliency map is computed at.
    pub target_layer: String,
    /// Heatmap blending.
    pub overlay: OverlayOptions,
    /// One label per classifier output.
    pub labels: Vec<String>,
    /// Input normalization.
    pub preprocess: PreprocessConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            target_layer: DEFAULT_TARGET_LAYER.to_string(),
            overlay: OverlayOptions::default(),
            labels: default_labels(),
            preprocess: PreprocessConfig::default(),
        }
    }
}

impl AnalysisConfig {
    /// Set the target layer.
    #[must_use]
    pub fn with_target_layer(mut self, layer: impl Into<String>) -> Self {
        self.target_layer = layer.into();
        self
    }

    /// Set the overlay alpha.
    #[must_use]
    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.overlay.alpha = alpha;
        self
    }

    /// Set the overlay threshold.
    #[must_use]
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.overlay.threshold = threshold;
        self
    }

    /// Set the class labels.
    #[must_use]
    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    /// Check every section.
    ///
    /// # Errors
    ///
    /// [`AnalysisError::InvalidConfig`] on the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.target_layer.is_empty() {
            return Err(AnalysisError::InvalidConfig(
                "target layer must not be empty".to_string(),
            ));
        }
        if self.labels.is_empty() {
            return Err(AnalysisError::InvalidConfig(
                "at least one class label is required".to_string(),
            ));
        }
        self.overlay.validate()?;
        self.preprocess.validate()
    }

    /// Load a config from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)
            .map_err(|e| AnalysisError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save the config as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| AnalysisError::InvalidConfig(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
