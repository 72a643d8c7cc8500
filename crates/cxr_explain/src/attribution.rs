//! Grad-CAM saliency maps.

use burn::prelude::*;
use cxr_core::{to_host_vec, AnalysisError, Result};
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma};
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

/// Compute a normalized Grad-CAM map.
///
/// # Arguments
///
/// * `activations` - Target layer output (1, channels, height, width)
/// * `gradients` - Gradient of the class score w.r.t. `activations`
///
/// # Returns
///
/// Map of shape (1, 1, height, width) with values in `[0, 1]`. The map is
/// divided by its maximum only when that maximum is positive, so an
/// all-zero map stays all-zero.
///
/// # Errors
///
/// [`AnalysisError::InvalidShape`] if the shapes differ,
/// [`AnalysisError::InferenceFailure`] if the map is not finite.
pub fn grad_cam<B: Backend>(
    activations: Tensor<B, 4>,
    gradients: Tensor<B, 4>,
) -> Result<Tensor<B, 4>> {
    if activations.dims() != gradients.dims() {
        return Err(AnalysisError::InvalidShape {
            expected: format!("gradient of shape {:?}", activations.dims()),
            got: format!("{:?}", gradients.dims()),
        });
    }

    // Global average pool the gradients: (1, C, H, W) -> (1, C, 1, 1)
    let weights = gradients.mean_dim(3).mean_dim(2);

    // Weighted sum over channels: (1, C, H, W) -> (1, 1, H, W)
    let cam = (activations * weights).sum_dim(1);

    // ReLU
    let cam = cam.clamp_min(0.0);

    let max: f32 = cam.clone().max().into_scalar().elem();
    if !max.is_finite() {
        return Err(AnalysisError::InferenceFailure(format!(
            "class activation map is not finite (max = {max})"
        )));
    }

    tracing::debug!(max, "Raw class activation map");
    Ok(if max > 0.0 { cam / max } else { cam })
}

/// Resize a map to `(height, width)` with a triangle (bilinear) filter.
///
/// Runs on the host. Output values are clamped to `[0, 1]`; a map that
/// already has the requested size is copied unchanged.
///
/// # Errors
///
/// [`AnalysisError::InvalidShape`] if the map or the requested size is empty.
pub fn resize_map(map: ArrayView2<'_, f32>, size: (usize, usize)) -> Result<Array2<f32>> {
    let (h, w) = map.dim();
    if h == 0 || w == 0 || size.0 == 0 || size.1 == 0 {
        return Err(AnalysisError::InvalidShape {
            expected: "non-empty map and target size".to_string(),
            got: format!("{h}x{w} -> {}x{}", size.0, size.1),
        });
    }
    if (h, w) == size {
        return Ok(map.to_owned());
    }

    let source: ImageBuffer<Luma<f32>, Vec<f32>> =
        ImageBuffer::from_raw(w as u32, h as u32, map.iter().copied().collect()).ok_or_else(
            || AnalysisError::InvalidShape {
                expected: format!("{h}x{w} samples"),
                got: format!("{} samples", map.len()),
            },
        )?;
    let resized = imageops::resize(&source, size.1 as u32, size.0 as u32, FilterType::Triangle);

    let values = Array2::from_shape_vec(size, resized.into_raw()).map_err(|e| {
        AnalysisError::InvalidShape {
            expected: format!("{}x{} map", size.0, size.1),
            got: e.to_string(),
        }
    })?;
    Ok(values.mapv_into(|v| v.clamp(0.0, 1.0)))
}

/// A single-channel saliency map with values in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaliencyMap {
    values: Array2<f32>,
    target_class: usize,
    layer: String,
}

impl SaliencyMap {
    /// Wrap host values.
    pub fn new(values: Array2<f32>, target_class: usize, layer: impl Into<String>) -> Self {
        Self {
            values,
            target_class,
            layer: layer.into(),
        }
    }

    /// Copy a (1, 1, height, width) map to the host.
    ///
    /// # Errors
    ///
    /// [`AnalysisError::InvalidShape`] for any other shape.
    pub fn from_tensor<B: Backend>(
        map: Tensor<B, 4>,
        target_class: usize,
        layer: impl Into<String>,
    ) -> Result<Self> {
        let [batch, channels, height, width] = map.dims();
        if batch != 1 || channels != 1 {
            return Err(AnalysisError::InvalidShape {
                expected: "(1, 1, height, width)".to_string(),
                got: format!("{:?}", map.dims()),
            });
        }
        let values = Array2::from_shape_vec((height, width), to_host_vec(map)?).map_err(|e| {
            AnalysisError::InvalidShape {
                expected: format!("{height}x{width} map"),
                got: e.to_string(),
            }
        })?;
        Ok(Self::new(values, target_class, layer))
    }

    /// The same map resized to `(height, width)`, see [`resize_map`].
    pub fn resized(self, size: (usize, usize)) -> Result<Self> {
        let values = resize_map(self.values.view(), size)?;
        Ok(Self { values, ..self })
    }

    /// Map values, indexed `[row, column]`.
    pub fn view(&self) -> ArrayView2<'_, f32> {
        self.values.view()
    }

    /// Consume the map and return its values.
    pub fn into_values(self) -> Array2<f32> {
        self.values
    }

    /// `(height, width)` of the map.
    pub fn size(&self) -> (usize, usize) {
        self.values.dim()
    }

    /// Class the map explains.
    pub fn target_class(&self) -> usize {
        self.target_class
    }

    /// Layer the map was computed at.
    pub fn layer(&self) -> &str {
        &self.layer
    }

    /// Largest value, 0 for an empty map.
    pub fn max(&self) -> f32 {
        self.values.iter().copied().fold(0.0, f32::max)
    }

    /// True when no pixel carries positive evidence.
    pub fn is_degenerate(&self) -> bool {
        self.values.iter().all(|&v| v <= 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cxr_core::backend::NdArray;

    type TestBackend = NdArray;

    fn tensor(values: &[f32], dims: [usize; 4]) -> Tensor<TestBackend, 4> {
        Tensor::<TestBackend, 1>::from_floats(values, &Default::default()).reshape(dims)
    }

    #[test]
    fn test_grad_cam_uniform() {
        let device = Default::default();
        let activations = Tensor::<TestBackend, 4>::ones([1, 16, 7, 7], &device);
        let gradients = Tensor::<TestBackend, 4>::ones([1, 16, 7, 7], &device);

        let cam = grad_cam(activations, gradients).unwrap();
        assert_eq!(cam.dims(), [1, 1, 7, 7]);
        let values = to_host_vec(cam).unwrap();
        assert!(values.iter().all(|v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_grad_cam_normalizes_to_max() {
        // One channel, positive weight: map is the activation scaled to max 1.
        let activations = tensor(&[0.0, 1.0, 2.0, 4.0], [1, 1, 2, 2]);
        let gradients = tensor(&[0.5; 4], [1, 1, 2, 2]);

        let values = to_host_vec(grad_cam(activations, gradients).unwrap()).unwrap();
        let expected = [0.0, 0.25, 0.5, 1.0];
        for (v, e) in values.iter().zip(expected) {
            assert!((v - e).abs() < 1e-6);
        }
    }

    #[test]
    fn test_grad_cam_negative_evidence_is_zero() {
        let activations = tensor(&[1.0, 2.0, 3.0, 4.0], [1, 1, 2, 2]);
        let gradients = tensor(&[-1.0; 4], [1, 1, 2, 2]);

        let values = to_host_vec(grad_cam(activations, gradients).unwrap()).unwrap();
        assert!(values.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_grad_cam_channel_weighting() {
        // Channel 0 votes for the left column, channel 1 against the right.
        let activations = tensor(&[1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 1.0], [1, 2, 2, 2]);
        let gradients = tensor(&[1.0, 1.0, 1.0, 1.0, -1.0, -1.0, -1.0, -1.0], [1, 2, 2, 2]);

        let values = to_host_vec(grad_cam(activations, gradients).unwrap()).unwrap();
        assert_eq!(values, vec![1.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_grad_cam_shape_mismatch() {
        let device = Default::default();
        let activations = Tensor::<TestBackend, 4>::ones([1, 4, 7, 7], &device);
        let gradients = Tensor::<TestBackend, 4>::ones([1, 4, 14, 14], &device);
        assert!(matches!(
            grad_cam(activations, gradients),
            Err(AnalysisError::InvalidShape { .. })
        ));
    }

    fn random_map(side: usize, seed: u64) -> Array2<f32> {
        use rand::{Rng, SeedableRng};
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(seed);
        Array2::from_shape_fn((side, side), |_| rng.gen::<f32>())
    }

    #[test]
    fn test_resize_map_to_source() {
        let resized = resize_map(random_map(7, 1).view(), (512, 300)).unwrap();
        assert_eq!(resized.dim(), (512, 300));
        assert!(resized.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_resize_map_awkward_sizes() {
        let cases: [(usize, &[usize]); 2] = [
            (7, &[1, 2, 188, 274, 276, 280, 513, 1031]),
            (14, &[3, 86, 100, 156, 999]),
        ];
        for (side, heights) in cases {
            let map = random_map(side, side as u64);
            for &height in heights {
                for width in [1, 3, 188, 300] {
                    let resized = resize_map(map.view(), (height, width)).unwrap();
                    assert_eq!(resized.dim(), (height, width), "{side}x{side} -> {height}x{width}");
                    assert!(resized.iter().all(|v| (0.0..=1.0).contains(v)));
                }
            }
        }
    }

    #[test]
    fn test_resize_map_keeps_uniform_values() {
        let map = Array2::from_elem((7, 7), 0.5f32);
        let resized = resize_map(map.view(), (188, 61)).unwrap();
        assert!(resized.iter().all(|v| (v - 0.5).abs() < 1e-5));
    }

    #[test]
    fn test_resize_map_same_size_is_copy() {
        let map = random_map(7, 3);
        assert_eq!(resize_map(map.view(), (7, 7)).unwrap(), map);
    }

    #[test]
    fn test_resize_map_rejects_empty() {
        let map = Array2::<f32>::zeros((7, 7));
        assert!(matches!(
            resize_map(map.view(), (0, 10)),
            Err(AnalysisError::InvalidShape { .. })
        ));
    }

    #[test]
    fn test_saliency_map_resized_keeps_metadata() {
        let saliency = SaliencyMap::new(random_map(7, 4), 1, "layer4")
            .resized((276, 90))
            .unwrap();
        assert_eq!(saliency.size(), (276, 90));
        assert_eq!(saliency.target_class(), 1);
        assert_eq!(saliency.layer(), "layer4");
    }

    #[test]
    fn test_saliency_map_from_tensor() {
        let map = tensor(&[0.0, 0.5, 1.0, 0.25, 0.0, 0.0], [1, 1, 2, 3]);
        let saliency = SaliencyMap::from_tensor(map, 2, "layer4").unwrap();

        assert_eq!(saliency.size(), (2, 3));
        assert_eq!(saliency.view()[[1, 0]], 0.25);
        assert_eq!(saliency.target_class(), 2);
        assert_eq!(saliency.layer(), "layer4");
        assert_eq!(saliency.max(), 1.0);
        assert!(!saliency.is_degenerate());
    }

    #[test]
    fn test_saliency_map_degenerate() {
        let saliency = SaliencyMap::new(Array2::zeros((4, 4)), 0, "layer4");
        assert!(saliency.is_degenerate());
        assert_eq!(saliency.max(), 0.0);
    }

    #[test]
    fn test_saliency_map_rejects_channels() {
        let map = tensor(&[0.0; 8], [1, 2, 2, 2]);
        assert!(SaliencyMap::from_tensor(map, 0, "layer4").is_err());
    }
}
