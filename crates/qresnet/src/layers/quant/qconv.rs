//! # `QConv2d` - quantized 2d convolution.
//!
//! A [`QConv2d`] quantizes its input with an activation [`Quantizer`],
//! quantizes its kernel with a weight [`Quantizer`], and convolves.
//!
//! [`QConv2dConfig`] implements [`Config`], and provides
//! [`QConv2dConfig::init`] to initialize a [`QConv2d`].

use crate::layers::quant::quantizer::{Quantizer, QuantizerMeta};
use crate::layers::quant::strategy::QuantConfig;
use burn::config::Config;
use burn::module::Module;
use burn::nn::PaddingConfig2d;
use burn::nn::conv::{Conv2d, Conv2dConfig, Conv2dRecord};
use burn::prelude::{Backend, Tensor};
use burn::tensor::module::conv2d;
use burn::tensor::ops::ConvOptions;

/// Resolve a [`PaddingConfig2d`] to explicit ``[height, width]`` padding.
///
/// # Panics
///
/// On [`PaddingConfig2d::Same`]; the padding of a quantized conv must be
/// known at config time.
pub fn explicit_padding(padding: &PaddingConfig2d) -> [usize; 2] {
    match padding {
        PaddingConfig2d::Explicit(height, width) => [*height, *width],
        PaddingConfig2d::Valid => [0, 0],
        other => panic!("QConv2d requires explicit or valid padding, got {other:?}"),
    }
}

/// [`QConv2d`] Meta trait.
pub trait QConv2dMeta {
    /// Number of input channels.
    fn in_channels(&self) -> usize;

    /// Number of output channels.
    fn out_channels(&self) -> usize;

    /// Number of groups.
    fn groups(&self) -> usize;

    /// The kernel size.
    fn kernel_size(&self) -> [usize; 2];

    /// The stride.
    fn stride(&self) -> [usize; 2];

    /// The padding.
    fn padding(&self) -> [usize; 2];

    /// Weight bit-width.
    fn bits_weights(&self) -> usize;

    /// Activation bit-width.
    fn bits_activations(&self) -> usize;
}

/// [`QConv2d`] Config.
///
/// Implements [`QConv2dMeta`].
#[derive(Config, Debug)]
pub struct QConv2dConfig {
    /// The [`Conv2d`] config.
    pub conv: Conv2dConfig,

    /// Quantization settings.
    #[config(default = "QuantConfig::new()")]
    pub quant: QuantConfig,
}

impl From<Conv2dConfig> for QConv2dConfig {
    fn from(conv: Conv2dConfig) -> Self {
        Self::new(conv)
    }
}

impl QConv2dMeta for QConv2dConfig {
    fn in_channels(&self) -> usize {
        self.conv.channels[0]
    }

    fn out_channels(&self) -> usize {
        self.conv.channels[1]
    }

    fn groups(&self) -> usize {
        self.conv.groups
    }

    fn kernel_size(&self) -> [usize; 2] {
        self.conv.kernel_size
    }

    fn stride(&self) -> [usize; 2] {
        self.conv.stride
    }

    fn padding(&self) -> [usize; 2] {
        explicit_padding(&self.conv.padding)
    }

    fn bits_weights(&self) -> usize {
        self.quant.bits_weights
    }

    fn bits_activations(&self) -> usize {
        self.quant.bits_activations
    }
}

impl QConv2dConfig {
    /// Initialize a [`QConv2d`].
    ///
    /// Learned weight clips are calibrated against the initialized kernel.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> QConv2d<B> {
        let padding = self.padding();
        let conv = self.conv.init(device);

        let weight_quantizer = self
            .quant
            .weight_quantizer()
            .init(device)
            .with_clip_from(&conv.weight.val());

        QConv2d {
            conv,
            padding,
            weight_quantizer,
            activation_quantizer: self.quant.activation_quantizer().init(device),
        }
    }
}

/// Quantized [`Conv2d`] layer.
///
/// Implements [`QConv2dMeta`].
#[derive(Module, Debug)]
pub struct QConv2d<B: Backend> {
    /// Full precision conv parameters.
    pub conv: Conv2d<B>,

    /// Explicit ``[height, width]`` padding.
    pub padding: [usize; 2],

    /// Kernel quantizer.
    pub weight_quantizer: Quantizer<B>,

    /// Input quantizer.
    pub activation_quantizer: Quantizer<B>,
}

impl<B: Backend> QConv2dMeta for QConv2d<B> {
    fn in_channels(&self) -> usize {
        self.conv.weight.shape().dims[1] * self.groups()
    }

    fn out_channels(&self) -> usize {
        self.conv.weight.shape().dims[0]
    }

    fn groups(&self) -> usize {
        self.conv.groups
    }

    fn kernel_size(&self) -> [usize; 2] {
        self.conv.kernel_size
    }

    fn stride(&self) -> [usize; 2] {
        self.conv.stride
    }

    fn padding(&self) -> [usize; 2] {
        self.padding
    }

    fn bits_weights(&self) -> usize {
        self.weight_quantizer.bits()
    }

    fn bits_activations(&self) -> usize {
        self.activation_quantizer.bits()
    }
}

impl<B: Backend> QConv2d<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, out_height, out_width]``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let x = self.activation_quantizer.quantize(input);
        let weight = self.weight_quantizer.quantize(self.conv.weight.val());

        conv2d(
            x,
            weight,
            self.conv.bias.as_ref().map(|bias| bias.val()),
            ConvOptions::new(
                self.conv.stride,
                self.padding,
                self.conv.dilation,
                self.conv.groups,
            ),
        )
    }

    /// The quantized kernel, as used by [`QConv2d::forward`].
    pub fn quantized_weight(&self) -> Tensor<B, 4> {
        self.weight_quantizer.quantize(self.conv.weight.val())
    }

    /// Load full precision conv weights.
    ///
    /// Learned weight clips are re-calibrated against the loaded kernel.
    pub fn load_conv_record(
        self,
        record: Conv2dRecord<B>,
    ) -> Self {
        let conv = self.conv.load_record(record);
        let weight_quantizer = self.weight_quantizer.with_clip_from(&conv.weight.val());
        Self {
            conv,
            weight_quantizer,
            ..self
        }
    }
}
