//! Small classifiers with known attribution behavior.

use burn::module::Param;
use burn::nn::{
    conv::{Conv2d, Conv2dConfig},
    pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
    Linear, LinearConfig, Relu,
};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use cxr_core::backend::{Autodiff, NdArray};
use cxr_core::{AttributableClassifier, LayerInfo, Result};

pub type TestAutodiffBackend = Autodiff<NdArray>;

/// Three-class classifier whose `features` layer is `(1, 512, 7, 7)`.
#[derive(Module, Debug)]
pub struct ConvClassifier<B: Backend> {
    features: Conv2d<B>,
    pool: AdaptiveAvgPool2d,
    fc: Linear<B>,
}

impl<B: Backend> ConvClassifier<B> {
    pub fn new(device: &B::Device) -> Self {
        Self {
            features: Conv2dConfig::new([3, 512], [32, 32])
                .with_stride([32, 32])
                .init(device),
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc: LinearConfig::new(512, 3).init(device),
        }
    }

    fn features(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        Relu::new().forward(self.features.forward(x))
    }

    fn head(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let pooled = self.pool.forward(x);
        let [batch, channels, _, _] = pooled.dims();
        self.fc.forward(pooled.reshape([batch, channels]))
    }
}

impl<B: AutodiffBackend> AttributableClassifier<B> for ConvClassifier<B> {
    fn num_classes(&self) -> usize {
        3
    }

    fn layers(&self) -> Vec<LayerInfo> {
        vec![LayerInfo::spatial("features"), LayerInfo::flat("fc")]
    }

    fn default_target_layer(&self) -> &str {
        "features"
    }

    fn device(&self) -> B::Device {
        self.fc.weight.val().device()
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        self.head(self.features(x))
    }

    fn forward_to(&self, x: Tensor<B, 4>, layer: &str) -> Result<Tensor<B, 4>> {
        self.attribution_layer(layer)?;
        Ok(self.features(x))
    }

    fn forward_from(&self, activation: Tensor<B, 4>, layer: &str) -> Result<Tensor<B, 2>> {
        self.attribution_layer(layer)?;
        Ok(self.head(activation))
    }
}

/// Logits are `[s, -s, 0]` where `s` sums the pooled input.
///
/// Class 0 sees only positive evidence, class 1 only negative evidence and
/// class 2 none. With `tripwire` set, any forward pass panics.
#[derive(Module, Debug)]
pub struct SignClassifier<B: Backend> {
    pool: AdaptiveAvgPool2d,
    sign: Param<Tensor<B, 1>>,
    tripwire: bool,
}

impl<B: Backend> SignClassifier<B> {
    pub fn new(device: &B::Device) -> Self {
        Self {
            pool: AdaptiveAvgPool2dConfig::new([7, 7]).init(),
            sign: Param::from_tensor(Tensor::from_floats([1.0, -1.0, 0.0], device)),
            tripwire: false,
        }
    }

    pub fn armed(device: &B::Device) -> Self {
        Self {
            tripwire: true,
            ..Self::new(device)
        }
    }
}

impl<B: AutodiffBackend> AttributableClassifier<B> for SignClassifier<B> {
    fn num_classes(&self) -> usize {
        3
    }

    fn layers(&self) -> Vec<LayerInfo> {
        vec![LayerInfo::spatial("pooled"), LayerInfo::flat("logits")]
    }

    fn default_target_layer(&self) -> &str {
        "pooled"
    }

    fn device(&self) -> B::Device {
        self.sign.val().device()
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let pooled = self.pool.forward(x);
        let total = pooled.sum_dim(1).sum_dim(2).sum_dim(3).reshape([1, 1]);
        total * self.sign.val().reshape([1, 3])
    }

    fn forward_to(&self, x: Tensor<B, 4>, layer: &str) -> Result<Tensor<B, 4>> {
        assert!(!self.tripwire, "forward pass must not run");
        self.attribution_layer(layer)?;
        Ok(self.pool.forward(x))
    }

    fn forward_from(&self, activation: Tensor<B, 4>, layer: &str) -> Result<Tensor<B, 2>> {
        assert!(!self.tripwire, "forward pass must not run");
        self.attribution_layer(layer)?;
        let total = activation.sum_dim(1).sum_dim(2).sum_dim(3).reshape([1, 1]);
        Ok(total * self.sign.val().reshape([1, 3]))
    }
}

/// Declares a spatial layer whose output has no height or width.
#[derive(Module, Debug)]
pub struct CollapsedClassifier<B: Backend> {
    fc: Linear<B>,
}

impl<B: Backend> CollapsedClassifier<B> {
    pub fn new(device: &B::Device) -> Self {
        Self {
            fc: LinearConfig::new(3, 3).init(device),
        }
    }
}

impl<B: AutodiffBackend> AttributableClassifier<B> for CollapsedClassifier<B> {
    fn num_classes(&self) -> usize {
        3
    }

    fn layers(&self) -> Vec<LayerInfo> {
        vec![LayerInfo::spatial("collapsed")]
    }

    fn default_target_layer(&self) -> &str {
        "collapsed"
    }

    fn device(&self) -> B::Device {
        self.fc.weight.val().device()
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let pooled = x.mean_dim(3).mean_dim(2).reshape([1, 3]);
        self.fc.forward(pooled)
    }

    fn forward_to(&self, x: Tensor<B, 4>, layer: &str) -> Result<Tensor<B, 4>> {
        self.attribution_layer(layer)?;
        Ok(Tensor::zeros([1, 3, 0, 0], &x.device()))
    }

    fn forward_from(&self, _activation: Tensor<B, 4>, _layer: &str) -> Result<Tensor<B, 2>> {
        panic!("no head runs after an empty activation");
    }
}
