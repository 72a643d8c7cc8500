//! ResNet-18 style classifier for chest radiographs.
//!
//! A 7×7 stem with max pooling, four residual stages of basic blocks and a
//! global average pool, followed by a two-layer classification head. The
//! residual stages are addressable by name so attribution can observe them.

use burn::module::AutodiffModule;
use burn::nn::{
    conv::{Conv2d, Conv2dConfig},
    pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
    BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use cxr_core::{AnalysisError, AttributableClassifier, LayerInfo, Result};
use serde::{Deserialize, Serialize};

/// Names of the spatial stages, in forward order.
pub const SPATIAL_LAYERS: [&str; 5] = ["conv1", "layer1", "layer2", "layer3", "layer4"];

/// Layer used for attribution when none is configured.
pub const DEFAULT_TARGET_LAYER: &str = "layer4";

/// Configuration for [`ChestXRayNet`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Number of output classes.
    pub n_classes: usize,
    /// Number of input channels.
    pub in_channels: usize,
    /// Channels of the stem and the first stage; doubled at each later stage.
    pub base_width: usize,
    /// Basic blocks per residual stage.
    pub blocks_per_stage: [usize; 4],
    /// Width of the hidden layer in the classification head.
    pub hidden_dim: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            n_classes: 3,
            in_channels: 3,
            base_width: 64,
            blocks_per_stage: [2, 2, 2, 2],
            hidden_dim: 256,
        }
    }
}

impl ClassifierConfig {
    /// Create a new config with the default ResNet-18 backbone.
    pub fn new(n_classes: usize) -> Self {
        Self {
            n_classes,
            ..Default::default()
        }
    }

    /// Set the stem width.
    #[must_use]
    pub fn with_base_width(mut self, base_width: usize) -> Self {
        self.base_width = base_width;
        self
    }

    /// Set the number of blocks in each stage.
    #[must_use]
    pub fn with_blocks_per_stage(mut self, blocks: [usize; 4]) -> Self {
        self.blocks_per_stage = blocks;
        self
    }

    /// Set the hidden width of the head.
    #[must_use]
    pub fn with_hidden_dim(mut self, hidden_dim: usize) -> Self {
        self.hidden_dim = hidden_dim;
        self
    }

    /// Channels produced by the last residual stage.
    #[must_use]
    pub fn feature_channels(&self) -> usize {
        self.base_width * 8
    }

    /// Reject configurations that cannot build a network.
    ///
    /// # Errors
    ///
    /// [`AnalysisError::InvalidConfig`] if any width or count is zero.
    pub fn validate(&self) -> Result<()> {
        if self.n_classes == 0 {
            return Err(AnalysisError::InvalidConfig(
                "classifier needs at least one class".to_string(),
            ));
        }
        if self.in_channels == 0 || self.base_width == 0 || self.hidden_dim == 0 {
            return Err(AnalysisError::InvalidConfig(format!(
                "classifier widths must be positive, got in_channels={}, base_width={}, hidden_dim={}",
                self.in_channels, self.base_width, self.hidden_dim
            )));
        }
        if self.blocks_per_stage.contains(&0) {
            return Err(AnalysisError::InvalidConfig(format!(
                "every stage needs at least one block, got {:?}",
                self.blocks_per_stage
            )));
        }
        Ok(())
    }

    /// Initialize the model.
    pub fn init<B: Backend>(&self, device: &B::Device) -> ChestXRayNet<B> {
        ChestXRayNet::new(self.clone(), device)
    }
}

/// Batch normalization with running statistics.
///
/// Burn's `BatchNorm` switches to batch statistics on autodiff backends, and
/// attribution always runs on one. A single image would then be normalized
/// against itself, so the inference form is applied explicitly.
fn batch_norm_eval<B: Backend>(bn: &BatchNorm<B, 2>, x: Tensor<B, 4>) -> Tensor<B, 4> {
    let channels = x.dims()[1];
    let shape = [1, channels, 1, 1];

    let mean = bn.running_mean.value().reshape(shape);
    let var = bn.running_var.value().reshape(shape);
    let gamma = bn.gamma.val().reshape(shape);
    let beta = bn.beta.val().reshape(shape);

    (x - mean) / (var + bn.epsilon).sqrt() * gamma + beta
}

fn conv3x3<B: Backend>(
    in_channels: usize,
    out_channels: usize,
    stride: usize,
    device: &B::Device,
) -> Conv2d<B> {
    Conv2dConfig::new([in_channels, out_channels], [3, 3])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .with_bias(false)
        .init(device)
}

/// Projection shortcut used when a block changes width or resolution.
#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
}

impl<B: Backend> Downsample<B> {
    fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        Self {
            conv: Conv2dConfig::new([in_channels, out_channels], [1, 1])
                .with_stride([stride, stride])
                .with_bias(false)
                .init(device),
            bn: BatchNormConfig::new(out_channels).init(device),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        batch_norm_eval(&self.bn, self.conv.forward(x))
    }
}

/// Two 3×3 convolutions with an identity or projection shortcut.
#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B, 2>,
    downsample: Option<Downsample<B>>,
}

impl<B: Backend> BasicBlock<B> {
    /// Create a new basic block.
    pub fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        let downsample = (stride != 1 || in_channels != out_channels)
            .then(|| Downsample::new(in_channels, out_channels, stride, device));

        Self {
            conv1: conv3x3(in_channels, out_channels, stride, device),
            bn1: BatchNormConfig::new(out_channels).init(device),
            conv2: conv3x3(out_channels, out_channels, 1, device),
            bn2: BatchNormConfig::new(out_channels).init(device),
            downsample,
        }
    }

    /// Forward pass.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let relu = Relu::new();

        let out = batch_norm_eval(&self.bn1, self.conv1.forward(x.clone()));
        let out = relu.forward(out);
        let out = batch_norm_eval(&self.bn2, self.conv2.forward(out));

        let shortcut = match &self.downsample {
            Some(downsample) => downsample.forward(x),
            None => x,
        };

        relu.forward(out + shortcut)
    }
}

/// A sequence of basic blocks at one resolution.
#[derive(Module, Debug)]
pub struct ResidualStage<B: Backend> {
    blocks: Vec<BasicBlock<B>>,
}

impl<B: Backend> ResidualStage<B> {
    fn new(
        in_channels: usize,
        out_channels: usize,
        n_blocks: usize,
        stride: usize,
        device: &B::Device,
    ) -> Self {
        let blocks = (0..n_blocks)
            .map(|i| {
                if i == 0 {
                    BasicBlock::new(in_channels, out_channels, stride, device)
                } else {
                    BasicBlock::new(out_channels, out_channels, 1, device)
                }
            })
            .collect();
        Self { blocks }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.blocks.iter().fold(x, |out, block| block.forward(out))
    }
}

/// ResNet-18 style chest X-ray classifier.
///
/// Layer names and output shapes for a 224×224 input with the default width:
///
/// | layer     | output              |
/// |-----------|---------------------|
/// | `conv1`   | `(1, 64, 56, 56)`   |
/// | `layer1`  | `(1, 64, 56, 56)`   |
/// | `layer2`  | `(1, 128, 28, 28)`  |
/// | `layer3`  | `(1, 256, 14, 14)`  |
/// | `layer4`  | `(1, 512, 7, 7)`    |
/// | `avgpool` | `(1, 512)`          |
/// | `fc`      | `(1, n_classes)`    |
///
/// `conv1` covers the whole stem: convolution, normalization, ReLU and max pool.
#[derive(Module, Debug)]
pub struct ChestXRayNet<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    maxpool: MaxPool2d,
    layer1: ResidualStage<B>,
    layer2: ResidualStage<B>,
    layer3: ResidualStage<B>,
    layer4: ResidualStage<B>,
    avgpool: AdaptiveAvgPool2d,
    fc1: Linear<B>,
    fc2: Linear<B>,
    n_classes: usize,
}

impl<B: Backend> ChestXRayNet<B> {
    /// Create a new model.
    pub fn new(config: ClassifierConfig, device: &B::Device) -> Self {
        let w = config.base_width;
        let [b1, b2, b3, b4] = config.blocks_per_stage;

        let conv1 = Conv2dConfig::new([config.in_channels, w], [7, 7])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(3, 3))
            .with_bias(false)
            .init(device);
        let maxpool = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        Self {
            conv1,
            bn1: BatchNormConfig::new(w).init(device),
            maxpool,
            layer1: ResidualStage::new(w, w, b1, 1, device),
            layer2: ResidualStage::new(w, w * 2, b2, 2, device),
            layer3: ResidualStage::new(w * 2, w * 4, b3, 2, device),
            layer4: ResidualStage::new(w * 4, w * 8, b4, 2, device),
            avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc1: LinearConfig::new(config.feature_channels(), config.hidden_dim).init(device),
            fc2: LinearConfig::new(config.hidden_dim, config.n_classes).init(device),
            n_classes: config.n_classes,
        }
    }

    fn stem(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let out = batch_norm_eval(&self.bn1, self.conv1.forward(x));
        let out = Relu::new().forward(out);
        self.maxpool.forward(out)
    }

    fn stage(&self, index: usize, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match index {
            0 => self.stem(x),
            1 => self.layer1.forward(x),
            2 => self.layer2.forward(x),
            3 => self.layer3.forward(x),
            _ => self.layer4.forward(x),
        }
    }

    fn head(&self, features: Tensor<B, 4>) -> Tensor<B, 2> {
        let pooled = self.avgpool.forward(features);
        let [batch, channels, _, _] = pooled.dims();
        let out = pooled.reshape([batch, channels]);
        let out = Relu::new().forward(self.fc1.forward(out));
        self.fc2.forward(out)
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// * `x` - Input tensor of shape (batch, channels, height, width)
    ///
    /// # Returns
    ///
    /// Logits tensor of shape (batch, n_classes)
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let features = (0..SPATIAL_LAYERS.len()).fold(x, |out, i| self.stage(i, out));
        self.head(features)
    }

    /// Number of output classes.
    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    fn stage_index(layer: &str) -> Result<usize> {
        SPATIAL_LAYERS
            .iter()
            .position(|name| *name == layer)
            .ok_or_else(|| AnalysisError::incompatible_layer(layer, "not a spatial stage"))
    }
}

impl<B: AutodiffBackend> AttributableClassifier<B> for ChestXRayNet<B>
where
    ChestXRayNet<B>: AutodiffModule<B>,
{
    fn num_classes(&self) -> usize {
        self.n_classes
    }

    fn layers(&self) -> Vec<LayerInfo> {
        SPATIAL_LAYERS
            .iter()
            .map(|name| LayerInfo::spatial(*name))
            .chain([LayerInfo::flat("avgpool"), LayerInfo::flat("fc")])
            .collect()
    }

    fn default_target_layer(&self) -> &str {
        DEFAULT_TARGET_LAYER
    }

    fn device(&self) -> B::Device {
        self.fc2.weight.val().device()
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        ChestXRayNet::forward(self, x)
    }

    fn forward_to(&self, x: Tensor<B, 4>, layer: &str) -> Result<Tensor<B, 4>> {
        self.attribution_layer(layer)?;
        let last = Self::stage_index(layer)?;
        Ok((0..=last).fold(x, |out, i| self.stage(i, out)))
    }

    fn forward_from(&self, activation: Tensor<B, 4>, layer: &str) -> Result<Tensor<B, 2>> {
        self.attribution_layer(layer)?;
        let first = Self::stage_index(layer)? + 1;
        let features =
            (first..SPATIAL_LAYERS.len()).fold(activation, |out, i| self.stage(i, out));
        Ok(self.head(features))
    }
}
