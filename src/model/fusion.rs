//! Two-branch fusion network
//!
//! Architecture:
//! - Image encoder: `conv_blocks` x (Conv 3x3, BatchNorm, ReLU, MaxPool 2x2),
//!   filters doubling from `base_filters`, global average pool, dropout,
//!   projection to `image_embedding` dims
//! - Feature encoder: dense layer over the 7 engineered features to
//!   `feature_embedding` dims, dropout
//! - Fused head: concat, dense `fused_hidden`, dropout, then two
//!   single-unit heads (authenticity logit, sigmoid confidence)

use std::path::Path;

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
        Relu,
    },
    record::{BinBytesRecorder, CompactRecorder, FullPrecisionSettings, Recorder},
    tensor::{activation::sigmoid, backend::Backend, Tensor},
};

use crate::model::config::FusionConfig;
use crate::utils::error::{AuthenticityError, Result as CrateResult};

/// Shape of the fusion network. Stored next to the weights so a saved
/// network can be rebuilt before its record is loaded.
#[derive(Config, Debug, PartialEq)]
pub struct FusionNetworkConfig {
    /// Length of the engineered feature vector
    #[config(default = "7")]
    pub num_features: usize,

    #[config(default = "16")]
    pub base_filters: usize,

    #[config(default = "4")]
    pub conv_blocks: usize,

    #[config(default = "128")]
    pub image_embedding: usize,

    #[config(default = "32")]
    pub feature_embedding: usize,

    #[config(default = "64")]
    pub fused_hidden: usize,

    #[config(default = "0.3")]
    pub image_dropout: f64,

    #[config(default = "0.2")]
    pub feature_dropout: f64,

    #[config(default = "0.3")]
    pub head_dropout: f64,
}

impl FusionNetworkConfig {
    pub fn from_fusion_config(config: &FusionConfig, num_features: usize) -> Self {
        Self::new()
            .with_num_features(num_features)
            .with_base_filters(config.base_filters)
            .with_conv_blocks(config.conv_blocks)
            .with_image_embedding(config.image_embedding)
            .with_feature_embedding(config.feature_embedding)
            .with_fused_hidden(config.fused_hidden)
            .with_image_dropout(config.image_dropout)
            .with_feature_dropout(config.feature_dropout)
            .with_head_dropout(config.head_dropout)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> FusionNetwork<B> {
        FusionNetwork::new(self, device)
    }
}

/// Conv2d, BatchNorm, ReLU, MaxPool
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B>,
    pub relu: Relu,
    pub pool: MaxPool2d,
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Same)
            .init(device);

        Self {
            conv,
            bn: BatchNormConfig::new(out_channels).init(device),
            relu: Relu::new(),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.bn.forward(x);
        let x = self.relu.forward(x);
        self.pool.forward(x)
    }
}

/// Convolutional image branch
#[derive(Module, Debug)]
pub struct ImageEncoder<B: Backend> {
    pub blocks: Vec<ConvBlock<B>>,
    pub global_pool: AdaptiveAvgPool2d,
    pub dropout: Dropout,
    pub projection: Linear<B>,
}

impl<B: Backend> ImageEncoder<B> {
    pub fn new(config: &FusionNetworkConfig, device: &B::Device) -> Self {
        let mut blocks = Vec::with_capacity(config.conv_blocks);
        let mut in_channels = 3;
        let mut out_channels = config.base_filters;
        for _ in 0..config.conv_blocks {
            blocks.push(ConvBlock::new(in_channels, out_channels, device));
            in_channels = out_channels;
            out_channels *= 2;
        }

        Self {
            blocks,
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            dropout: DropoutConfig::new(config.image_dropout).init(),
            projection: LinearConfig::new(in_channels, config.image_embedding).init(device),
        }
    }

    /// [batch, 3, H, W] -> [batch, image_embedding]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = x;
        for block in &self.blocks {
            x = block.forward(x);
        }

        let x = self.global_pool.forward(x);
        let [batch_size, channels, _, _] = x.dims();
        let x = x.reshape([batch_size, channels]);

        let x = self.dropout.forward(x);
        Relu::new().forward(self.projection.forward(x))
    }
}

/// Dense branch over the engineered features
#[derive(Module, Debug)]
pub struct FeatureEncoder<B: Backend> {
    pub linear: Linear<B>,
    pub dropout: Dropout,
}

impl<B: Backend> FeatureEncoder<B> {
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = Relu::new().forward(self.linear.forward(x));
        self.dropout.forward(x)
    }
}

/// Raw outputs of a forward pass
#[derive(Debug, Clone)]
pub struct FusionOutput<B: Backend> {
    /// [batch], pre-sigmoid authenticity score
    pub authenticity_logits: Tensor<B, 1>,
    /// [batch], already in (0, 1)
    pub confidence: Tensor<B, 1>,
}

/// Image + feature fusion network with two heads
#[derive(Module, Debug)]
pub struct FusionNetwork<B: Backend> {
    pub image_encoder: ImageEncoder<B>,
    pub feature_encoder: FeatureEncoder<B>,
    pub fused: Linear<B>,
    pub fused_dropout: Dropout,
    pub authenticity_head: Linear<B>,
    pub confidence_head: Linear<B>,
}

impl<B: Backend> FusionNetwork<B> {
    pub fn new(config: &FusionNetworkConfig, device: &B::Device) -> Self {
        let fused_in = config.image_embedding + config.feature_embedding;

        Self {
            image_encoder: ImageEncoder::new(config, device),
            feature_encoder: FeatureEncoder {
                linear: LinearConfig::new(config.num_features, config.feature_embedding).init(device),
                dropout: DropoutConfig::new(config.feature_dropout).init(),
            },
            fused: LinearConfig::new(fused_in, config.fused_hidden).init(device),
            fused_dropout: DropoutConfig::new(config.head_dropout).init(),
            authenticity_head: LinearConfig::new(config.fused_hidden, 1).init(device),
            confidence_head: LinearConfig::new(config.fused_hidden, 1).init(device),
        }
    }

    /// # Arguments
    /// * `images` - [batch, 3, H, W], pixels in 0-1
    /// * `features` - [batch, num_features], standardised
    pub fn forward(&self, images: Tensor<B, 4>, features: Tensor<B, 2>) -> FusionOutput<B> {
        let image_embedding = self.image_encoder.forward(images);
        let feature_embedding = self.feature_encoder.forward(features);

        let x = Tensor::cat(vec![image_embedding, feature_embedding], 1);
        let x = Relu::new().forward(self.fused.forward(x));
        let x = self.fused_dropout.forward(x);

        let [batch_size, _] = x.dims();
        let authenticity_logits = self.authenticity_head.forward(x.clone()).reshape([batch_size]);
        let confidence = sigmoid(self.confidence_head.forward(x)).reshape([batch_size]);

        FusionOutput {
            authenticity_logits,
            confidence,
        }
    }

    /// Authenticity probability and confidence-head output per sample
    pub fn forward_probabilities(&self, images: Tensor<B, 4>, features: Tensor<B, 2>) -> (Tensor<B, 1>, Tensor<B, 1>) {
        let output = self.forward(images, features);
        (sigmoid(output.authenticity_logits), output.confidence)
    }

    /// Stop gradients for every conv block except the last `trainable`
    pub fn freeze_early_blocks(mut self, trainable: usize) -> Self {
        let frozen = self.image_encoder.blocks.len().saturating_sub(trainable);
        self.image_encoder.blocks = self
            .image_encoder
            .blocks
            .into_iter()
            .enumerate()
            .map(|(i, block)| if i < frozen { block.no_grad() } else { block })
            .collect();
        self
    }

    /// Replace the image encoder with a pretrained one saved by Burn's
    /// `CompactRecorder`
    pub fn with_pretrained_encoder(mut self, path: &Path, device: &B::Device) -> CrateResult<Self> {
        self.image_encoder = self
            .image_encoder
            .load_file(path, &CompactRecorder::new(), device)
            .map_err(|e| AuthenticityError::model_load(path, format!("{:?}", e)))?;
        Ok(self)
    }

    pub fn num_conv_blocks(&self) -> usize {
        self.image_encoder.blocks.len()
    }
}

/// Serialize a network's weights at full precision
pub fn network_to_bytes<B: Backend>(network: &FusionNetwork<B>) -> CrateResult<Vec<u8>> {
    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    <BinBytesRecorder<FullPrecisionSettings> as Recorder<B>>::record(&recorder, network.clone().into_record(), ())
        .map_err(|e| AuthenticityError::Serialization(format!("{:?}", e)))
}

/// Rebuild a network from `config` and load weights written by [`network_to_bytes`]
pub fn network_from_bytes<B: Backend>(
    config: &FusionNetworkConfig,
    bytes: &[u8],
    device: &B::Device,
) -> CrateResult<FusionNetwork<B>> {
    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    let record: FusionNetworkRecord<B> =
        <BinBytesRecorder<FullPrecisionSettings> as Recorder<B>>::load(&recorder, bytes.to_vec(), device)
            .map_err(|e| AuthenticityError::Serialization(format!("{:?}", e)))?;
    Ok(config.init::<B>(device).load_record(record))
}
