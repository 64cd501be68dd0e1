//! # `QLinear` - quantized fully connected layer.
use crate::layers::quant::quantizer::{Quantizer, QuantizerMeta};
use crate::layers::quant::strategy::QuantConfig;
use burn::config::Config;
use burn::module::Module;
use burn::nn::{Linear, LinearConfig, LinearRecord};
use burn::prelude::{Backend, Tensor};
use burn::tensor::module::linear;

/// [`QLinear`] Meta trait.
pub trait QLinearMeta {
    /// Input feature size.
    fn d_input(&self) -> usize;

    /// Output feature size.
    fn d_output(&self) -> usize;

    /// Weight bit-width.
    fn bits_weights(&self) -> usize;

    /// Activation bit-width.
    fn bits_activations(&self) -> usize;
}

/// [`QLinear`] Config.
#[derive(Config, Debug)]
pub struct QLinearConfig {
    /// The [`Linear`] config.
    pub linear: LinearConfig,

    /// Quantization settings.
    #[config(default = "QuantConfig::new()")]
    pub quant: QuantConfig,
}

impl From<LinearConfig> for QLinearConfig {
    fn from(linear: LinearConfig) -> Self {
        Self::new(linear)
    }
}

impl QLinearMeta for QLinearConfig {
    fn d_input(&self) -> usize {
        self.linear.d_input
    }

    fn d_output(&self) -> usize {
        self.linear.d_output
    }

    fn bits_weights(&self) -> usize {
        self.quant.bits_weights
    }

    fn bits_activations(&self) -> usize {
        self.quant.bits_activations
    }
}

impl QLinearConfig {
    /// Initialize a [`QLinear`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> QLinear<B> {
        let linear = self.linear.init(device);
        let weight_quantizer = self
            .quant
            .weight_quantizer()
            .init(device)
            .with_clip_from(&linear.weight.val());

        QLinear {
            linear,
            weight_quantizer,
            activation_quantizer: self.quant.activation_quantizer().init(device),
        }
    }
}

/// Quantized [`Linear`] layer.
///
/// The bias is kept at full precision.
#[derive(Module, Debug)]
pub struct QLinear<B: Backend> {
    /// Full precision linear parameters.
    pub linear: Linear<B>,

    /// Weight quantizer.
    pub weight_quantizer: Quantizer<B>,

    /// Input quantizer.
    pub activation_quantizer: Quantizer<B>,
}

impl<B: Backend> QLinearMeta for QLinear<B> {
    fn d_input(&self) -> usize {
        self.linear.weight.shape().dims[0]
    }

    fn d_output(&self) -> usize {
        self.linear.weight.shape().dims[1]
    }

    fn bits_weights(&self) -> usize {
        self.weight_quantizer.bits()
    }

    fn bits_activations(&self) -> usize {
        self.activation_quantizer.bits()
    }
}

impl<B: Backend> QLinear<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[..., d_input]``.
    ///
    /// # Returns
    ///
    /// ``[..., d_output]``
    pub fn forward<const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        let x = self.activation_quantizer.quantize(input);
        let weight = self.weight_quantizer.quantize(self.linear.weight.val());
        linear(x, weight, self.linear.bias.as_ref().map(|bias| bias.val()))
    }

    /// Re-initialize the layer with a new output size.
    ///
    /// The input quantizer is kept; the weight clip is re-calibrated.
    pub fn with_d_output(
        self,
        d_output: usize,
    ) -> Self {
        let device = self.linear.weight.device();
        let linear = LinearConfig::new(self.d_input(), d_output)
            .with_bias(self.linear.bias.is_some())
            .init(&device);
        let weight_quantizer = self
            .weight_quantizer
            .with_clip_from(&linear.weight.val());
        Self {
            linear,
            weight_quantizer,
            ..self
        }
    }

    /// Load full precision linear weights.
    ///
    /// Learned weight clips are re-calibrated against the loaded weights.
    pub fn load_linear_record(
        self,
        record: LinearRecord<B>,
    ) -> Self {
        let linear = self.linear.load_record(record);
        let weight_quantizer = self
            .weight_quantizer
            .with_clip_from(&linear.weight.val());
        Self {
            linear,
            weight_quantizer,
            ..self
        }
    }
}
