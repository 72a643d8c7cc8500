//! Class prediction from classifier logits.

use burn::tensor::backend::AutodiffBackend;
use cxr_core::{
    ensure_same_device, to_host_vec, AnalysisError, AttributableClassifier, ImageTensor, Result,
};
use serde::{Deserialize, Serialize};

/// Predicted class with its softmax confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Index of the most probable class.
    pub class_index: usize,
    /// Label of the most probable class.
    pub label: String,
    /// Probability of the predicted class.
    pub confidence: f32,
    /// Probability of every class, in logit order.
    pub probabilities: Vec<f32>,
}

impl Prediction {
    /// Build a prediction from a probability vector.
    ///
    /// # Arguments
    ///
    /// * `probabilities` - Softmax output, one value per class
    /// * `labels` - Class labels, same length as `probabilities`
    ///
    /// # Errors
    ///
    /// [`AnalysisError::InferenceFailure`] if the vector is empty or holds a
    /// non-finite value, [`AnalysisError::InvalidConfig`] if the label count
    /// differs from the class count.
    pub fn from_probabilities(probabilities: Vec<f32>, labels: &[String]) -> Result<Self> {
        if probabilities.is_empty() {
            return Err(AnalysisError::InferenceFailure(
                "classifier produced no outputs".to_string(),
            ));
        }
        if labels.len() != probabilities.len() {
            return Err(AnalysisError::InvalidConfig(format!(
                "{} class labels for a classifier with {} classes",
                labels.len(),
                probabilities.len()
            )));
        }
        if let Some(bad) = probabilities.iter().find(|p| !p.is_finite()) {
            return Err(AnalysisError::InferenceFailure(format!(
                "non-finite class probability {bad}"
            )));
        }

        let (class_index, confidence) = probabilities
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |best, (i, p)| {
                if p > best.1 {
                    (i, p)
                } else {
                    best
                }
            });

        Ok(Self {
            class_index,
            label: labels[class_index].clone(),
            confidence,
            probabilities,
        })
    }

    /// Probabilities paired with their labels, most probable first.
    pub fn ranked<'a>(&'a self, labels: &'a [String]) -> Vec<(&'a str, f32)> {
        let mut ranked: Vec<_> = labels
            .iter()
            .map(String::as_str)
            .zip(self.probabilities.iter().copied())
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
    }
}

/// Classify one input.
///
/// # Arguments
///
/// * `model` - Classifier on the same device as `input`
/// * `input` - Preprocessed image
/// * `labels` - One label per classifier output
///
/// # Errors
///
/// [`AnalysisError::DeviceMismatch`] if the input lives elsewhere,
/// [`AnalysisError::InferenceFailure`] on non-finite outputs and
/// [`AnalysisError::InvalidConfig`] if the labels do not match the classes.
pub fn predict<B, M>(model: &M, input: &ImageTensor<B>, labels: &[String]) -> Result<Prediction>
where
    B: AutodiffBackend,
    M: AttributableClassifier<B>,
{
    ensure_same_device(&model.device(), &input.device())?;

    let probabilities = to_host_vec(model.forward_probs(input.inner().clone()))?;
    let prediction = Prediction::from_probabilities(probabilities, labels)?;

    tracing::debug!(
        class = prediction.class_index,
        label = %prediction.label,
        confidence = prediction.confidence,
        "Prediction"
    );
    Ok(prediction)
}
