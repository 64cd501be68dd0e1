//! # `QResNet` Core Model
//!
//! [`QResNet`] is the core quantized `ResNet` module.
//!
//! [`ResNetDepth`] names the five standard depths.
//!
//! [`QResNetOptions`] carries the user-facing knobs: classes, bit-widths,
//! strategy, and whether the stem and head are quantized.
//!
//! [`QResNetAbstractConfig`] implements [`Config`], and provides
//! a high-level configuration interface.
//! It provides [`QResNetAbstractConfig::to_structure`] to convert
//! to a [`QResNetConfig`].
//!
//! [`QResNetConfig`] implements [`Config`], and provides
//! [`QResNetConfig::init`] to initialize a [`QResNet`].
//!
//! [`QResNet`] implements [`Module`], and provides
//! [`QResNet::forward`].

use crate::layers::blocks::conv_norm::{QConvNorm2d, QConvNorm2dConfig, QConvNorm2dMeta};
use crate::layers::quant::qlinear::{QLinear, QLinearConfig, QLinearMeta};
use crate::layers::quant::strategy::{
    DEFAULT_ACTIVATION_CLIP, FULL_PRECISION_BITS, QuantConfig, QuantStrategy,
};
use crate::models::qresnet::layer_block::{LayerBlock, LayerBlockConfig, LayerBlockMeta};
use crate::models::qresnet::residual_block::block_expansion;
use crate::models::qresnet::util::qconv_norm;
use anyhow::bail;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::nn::LinearConfig;
use burn::nn::PaddingConfig2d;
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig};
use burn::prelude::{Backend, Config, Module, Tensor};
use burn::tensor::activation::relu;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// ResNet-18 block depths.
pub const RESNET18_BLOCKS: [usize; 4] = [2, 2, 2, 2];
/// ResNet-34 block depths.
pub const RESNET34_BLOCKS: [usize; 4] = [3, 4, 6, 3];
/// ResNet-50 block depths.
pub const RESNET50_BLOCKS: [usize; 4] = [3, 4, 6, 3];
/// ResNet-101 block depths.
pub const RESNET101_BLOCKS: [usize; 4] = [3, 4, 23, 3];
/// ResNet-152 block depths.
pub const RESNET152_BLOCKS: [usize; 4] = [3, 8, 36, 3];

/// Stem output width.
pub const STEM_PLANES: usize = 64;

/// Inner widths of the four stages.
pub const STAGE_PLANES: [usize; 4] = [64, 128, 256, 512];

/// Strides of the four stages.
pub const STAGE_STRIDES: [usize; 4] = [1, 2, 2, 2];

/// Weight bit-width of the stem and head when they are quantized.
pub const FIRST_LAST_BITS_WEIGHTS: usize = 8;

/// Activation bit-width of the head when it is quantized.
///
/// The stem keeps full precision activations; its input is the image.
pub const LAST_BITS_ACTIVATIONS: usize = 8;

/// Standard `ResNet` depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResNetDepth {
    /// ResNet-18.
    D18,
    /// ResNet-34.
    D34,
    /// ResNet-50.
    D50,
    /// ResNet-101.
    D101,
    /// ResNet-152.
    D152,
}

impl ResNetDepth {
    /// All standard depths.
    pub const ALL: [ResNetDepth; 5] = [
        ResNetDepth::D18,
        ResNetDepth::D34,
        ResNetDepth::D50,
        ResNetDepth::D101,
        ResNetDepth::D152,
    ];

    /// The numeric depth.
    pub fn depth(&self) -> usize {
        match self {
            Self::D18 => 18,
            Self::D34 => 34,
            Self::D50 => 50,
            Self::D101 => 101,
            Self::D152 => 152,
        }
    }

    /// Blocks per stage.
    pub fn layers(&self) -> [usize; 4] {
        match self {
            Self::D18 => RESNET18_BLOCKS,
            Self::D34 => RESNET34_BLOCKS,
            Self::D50 => RESNET50_BLOCKS,
            Self::D101 => RESNET101_BLOCKS,
            Self::D152 => RESNET152_BLOCKS,
        }
    }

    /// Does this depth use bottleneck blocks?
    pub fn bottleneck(&self) -> bool {
        self.depth() >= 50
    }

    /// Block output width multiplier.
    pub fn expansion(&self) -> usize {
        block_expansion(self.bottleneck())
    }

    /// Architecture name, e.g. ``"resnet18"``.
    pub fn name(&self) -> &'static str {
        match self {
            Self::D18 => "resnet18",
            Self::D34 => "resnet34",
            Self::D50 => "resnet50",
            Self::D101 => "resnet101",
            Self::D152 => "resnet152",
        }
    }
}

impl Display for ResNetDepth {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<usize> for ResNetDepth {
    type Error = anyhow::Error;

    fn try_from(depth: usize) -> Result<Self, Self::Error> {
        match Self::ALL.iter().find(|d| d.depth() == depth) {
            Some(d) => Ok(*d),
            None => bail!(
                "unsupported ResNet depth: {}; expected one of {:?}",
                depth,
                Self::ALL.iter().map(|d| d.depth()).collect::<Vec<_>>()
            ),
        }
    }
}

impl FromStr for ResNetDepth {
    type Err = anyhow::Error;

    /// Accepts ``"18"`` or ``"resnet18"`` (case-insensitive).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        let digits = needle.strip_prefix("resnet").unwrap_or(&needle);
        match digits.parse::<usize>() {
            Ok(depth) => Self::try_from(depth),
            Err(_) => bail!("unrecognized ResNet depth: {:?}", s),
        }
    }
}

/// User-facing `QResNet` options.
#[derive(Config, Debug)]
pub struct QResNetOptions {
    /// Number of classification classes.
    #[config(default = 1000)]
    pub num_classes: usize,

    /// Weight bit-width of the body convs.
    #[config(default = 32)]
    pub bits_weights: usize,

    /// Activation bit-width of the body convs.
    #[config(default = 32)]
    pub bits_activations: usize,

    /// Quantize the stem conv and the classifier.
    ///
    /// When set, the stem uses 8-bit weights and full precision activations,
    /// and the classifier uses 8-bit weights and activations.
    #[config(default = false)]
    pub quantize_first_last: bool,

    /// Quantization strategy.
    #[config(default = "QuantStrategy::Liq")]
    pub quan_type: QuantStrategy,

    /// Initial clip for learned activation intervals.
    #[config(default = "DEFAULT_ACTIVATION_CLIP")]
    pub activation_clip: f64,
}

impl Default for QResNetOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl QResNetOptions {
    fn quant_at(
        &self,
        bits_weights: usize,
        bits_activations: usize,
    ) -> QuantConfig {
        self.quan_type
            .quant_config(bits_weights, bits_activations)
            .with_activation_clip(self.activation_clip)
    }

    /// Quantization of the residual body.
    pub fn quant(&self) -> QuantConfig {
        self.quant_at(self.bits_weights, self.bits_activations)
    }

    /// Quantization of the stem conv.
    pub fn stem_quant(&self) -> QuantConfig {
        if self.quantize_first_last {
            self.quant_at(FIRST_LAST_BITS_WEIGHTS, FULL_PRECISION_BITS)
        } else {
            QuantConfig::full_precision().with_strategy(self.quan_type)
        }
    }

    /// Quantization of the classifier.
    pub fn head_quant(&self) -> QuantConfig {
        if self.quantize_first_last {
            self.quant_at(FIRST_LAST_BITS_WEIGHTS, LAST_BITS_ACTIVATIONS)
        } else {
            QuantConfig::full_precision().with_strategy(self.quan_type)
        }
    }
}

/// High-level `QResNet` model configuration.
#[derive(Config, Debug)]
pub struct QResNetAbstractConfig {
    /// Layer block depths.
    pub layers: [usize; 4],

    /// Use bottleneck blocks.
    #[config(default = false)]
    pub bottleneck: bool,

    /// Classes and quantization options.
    #[config(default = "QResNetOptions::new()")]
    pub options: QResNetOptions,
}

impl From<ResNetDepth> for QResNetAbstractConfig {
    fn from(depth: ResNetDepth) -> Self {
        Self::for_depth(depth)
    }
}

impl QResNetAbstractConfig {
    /// The standard config for a [`ResNetDepth`].
    pub fn for_depth(depth: ResNetDepth) -> Self {
        Self::new(depth.layers()).with_bottleneck(depth.bottleneck())
    }

    /// Block output width multiplier.
    pub fn expansion(&self) -> usize {
        block_expansion(self.bottleneck)
    }

    /// Convert to a [`QResNetConfig`].
    pub fn to_structure(self) -> QResNetConfig {
        let options = &self.options;
        let quant = options.quant();
        let expansion = self.expansion();

        tracing::debug!(
            layers = ?self.layers,
            bottleneck = self.bottleneck,
            num_classes = options.num_classes,
            bits_weights = options.bits_weights,
            bits_activations = options.bits_activations,
            quantize_first_last = options.quantize_first_last,
            strategy = %options.quan_type,
            "building QResNet structure"
        );

        let mut in_planes = STEM_PLANES;
        let mut layers = Vec::with_capacity(self.layers.len());
        for (idx, num_blocks) in self.layers.iter().enumerate() {
            let planes = STAGE_PLANES[idx];
            layers.push(LayerBlockConfig::build(
                *num_blocks,
                in_planes,
                planes,
                STAGE_STRIDES[idx],
                self.bottleneck,
                &quant,
            ));
            in_planes = planes * expansion;
        }

        QResNetConfig::new(
            qconv_norm(3, STEM_PLANES, 7, 2, &options.stem_quant()),
            layers,
            options
                .head_quant()
                .linear(LinearConfig::new(in_planes, options.num_classes)),
        )
    }
}

/// [`QResNet`] Meta API.
pub trait QResNetMeta {
    /// Input image channels.
    fn in_channels(&self) -> usize;

    /// Feature width entering the classifier.
    fn head_planes(&self) -> usize;

    /// Number of classification classes.
    fn num_classes(&self) -> usize;

    /// Total spatial reduction from the input to the final feature map.
    fn stride(&self) -> usize;
}

/// [`QResNet`] Structure Config.
///
/// This config defines the structure of a converted `QResNet` model;
/// [`QResNetConfig::try_validate`] checks that the widths chain.
#[derive(Config, Debug)]
pub struct QResNetConfig {
    /// The input conv/norm; followed by a `ReLU` and a max pool.
    pub input_conv_norm: QConvNorm2dConfig,

    /// The inner layers configuration.
    pub layers: Vec<LayerBlockConfig>,

    /// The classifier.
    pub output_fc: QLinearConfig,
}

impl QResNetMeta for QResNetConfig {
    fn in_channels(&self) -> usize {
        self.input_conv_norm.in_channels()
    }

    fn head_planes(&self) -> usize {
        self.output_fc.d_input()
    }

    fn num_classes(&self) -> usize {
        self.output_fc.d_output()
    }

    fn stride(&self) -> usize {
        // stem conv and max pool are both stride 2.
        self.layers
            .iter()
            .fold(self.input_conv_norm.stride()[0] * 2, |acc, layer| {
                acc * layer.stride()
            })
    }
}

impl QResNetConfig {
    /// Check if the config is valid.
    ///
    /// # Returns
    ///
    /// A `Result<(), String>`
    pub fn try_validate(&self) -> Result<(), String> {
        if self.layers.is_empty() {
            return Err("layers is empty".to_string());
        }

        let mut planes = self.input_conv_norm.out_channels();
        for (idx, layer) in self.layers.iter().enumerate() {
            layer
                .try_validate()
                .map_err(|err| format!("layer[{idx}]: {err}"))?;
            if layer.in_planes() != planes {
                return Err(format!(
                    "layer[{}].in_planes({}) != incoming planes({})",
                    idx,
                    layer.in_planes(),
                    planes,
                ));
            }
            planes = layer.out_planes();
        }

        if self.output_fc.d_input() != planes {
            return Err(format!(
                "output_fc.d_input({}) != layer[{}].out_planes({})",
                self.output_fc.d_input(),
                self.layers.len() - 1,
                planes,
            ));
        }
        Ok(())
    }

    /// Panic if `try_validate` returns an error.
    pub fn expect_valid(&self) {
        if let Err(err) = self.try_validate() {
            panic!("{}", err);
        }
    }

    /// Initialize a [`QResNet`] model.
    ///
    /// # Panics
    ///
    /// If the config is not valid.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> QResNet<B> {
        self.expect_valid();

        tracing::debug!(
            stages = self.layers.len(),
            blocks = self.layers.iter().map(|layer| layer.len()).sum::<usize>(),
            num_classes = self.num_classes(),
            "initializing QResNet"
        );

        QResNet {
            input_conv_norm: self.input_conv_norm.init(device),
            input_pool: MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),

            layers: self
                .layers
                .iter()
                .map(|layer| layer.init(device))
                .collect(),

            output_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            output_fc: self.output_fc.init(device),
        }
    }
}

/// `QResNet` model.
#[derive(Module, Debug)]
pub struct QResNet<B: Backend> {
    /// Input conv/norm.
    pub input_conv_norm: QConvNorm2d<B>,
    /// Input pool.
    pub input_pool: MaxPool2d,

    /// Layers.
    pub layers: Vec<LayerBlock<B>>,

    /// Head pooling.
    pub output_pool: AdaptiveAvgPool2d,
    /// Head classifier.
    pub output_fc: QLinear<B>,
}

impl<B: Backend> QResNetMeta for QResNet<B> {
    fn in_channels(&self) -> usize {
        self.input_conv_norm.in_channels()
    }

    fn head_planes(&self) -> usize {
        self.output_fc.d_input()
    }

    fn num_classes(&self) -> usize {
        self.output_fc.d_output()
    }

    fn stride(&self) -> usize {
        self.layers
            .iter()
            .fold(self.input_conv_norm.stride()[0] * 2, |acc, layer| {
                acc * layer.stride()
            })
    }
}

impl<B: Backend> QResNet<B> {
    /// `QResNet` forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, height=feature_height*stride, width=feature_width*stride]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, num_classes]`` tensor of logits.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        let [batch] = unpack_shape_contract!(
            [
                "batch",
                "in_channels",
                "height" = "feature_height" * "stride",
                "width" = "feature_width" * "stride"
            ],
            &input,
            &["batch"],
            &[
                ("in_channels", self.in_channels()),
                ("stride", self.stride())
            ],
        );

        // Stem
        let x = relu(self.input_conv_norm.forward(input));
        let x = self.input_pool.forward(x);

        // Residual stages
        let x = self.layers.iter().fold(x, |x, layer| layer.forward(x));

        // Head; [B, C, 1, 1] -> [B, C]
        let x = self.output_pool.forward(x);
        let x = x.flatten(1, 3);
        let x = self.output_fc.forward(x);

        assert_shape_contract_periodically!(
            ["batch", "num_classes"],
            &x,
            &[("batch", batch), ("num_classes", self.num_classes())],
        );

        x
    }

    /// Re-initialize the classifier with the specified number of output classes.
    pub fn with_classes(
        self,
        num_classes: usize,
    ) -> Self {
        Self {
            output_fc: self.output_fc.with_d_output(num_classes),
            ..self
        }
    }
}
