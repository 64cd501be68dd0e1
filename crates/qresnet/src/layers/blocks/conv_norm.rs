//! # `QConvNorm2d` Module
//!
//! A [`QConvNorm2d`] module is a [`QConv2d`] layer followed by a [`BatchNorm`] layer.

use crate::layers::quant::qconv::{QConv2d, QConv2dConfig, QConv2dMeta};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2dConfig, Conv2dRecord};
use burn::nn::{BatchNorm, BatchNormConfig, BatchNormRecord, Initializer};
use burn::prelude::{Backend, Tensor};

/// [`QConvNorm2d`] Meta.
pub trait QConvNorm2dMeta {
    /// Number of input channels.
    fn in_channels(&self) -> usize;

    /// Number of output channels.
    fn out_channels(&self) -> usize;

    /// Get the stride.
    fn stride(&self) -> [usize; 2];

    /// Weight bit-width of the conv.
    fn bits_weights(&self) -> usize;

    /// Activation bit-width of the conv.
    fn bits_activations(&self) -> usize;
}

/// [`QConvNorm2d`] Config.
#[derive(Config, Debug)]
pub struct QConvNorm2dConfig {
    /// The [`QConv2d`] config.
    pub conv: QConv2dConfig,
}

impl QConvNorm2dMeta for QConvNorm2dConfig {
    fn in_channels(&self) -> usize {
        self.conv.in_channels()
    }

    fn out_channels(&self) -> usize {
        self.conv.out_channels()
    }

    fn stride(&self) -> [usize; 2] {
        self.conv.stride()
    }

    fn bits_weights(&self) -> usize {
        self.conv.bits_weights()
    }

    fn bits_activations(&self) -> usize {
        self.conv.bits_activations()
    }
}

impl From<QConv2dConfig> for QConvNorm2dConfig {
    fn from(conv: QConv2dConfig) -> Self {
        Self { conv }
    }
}

impl From<Conv2dConfig> for QConvNorm2dConfig {
    fn from(conv: Conv2dConfig) -> Self {
        QConv2dConfig::from(conv).into()
    }
}

impl QConvNorm2dConfig {
    /// Override the initializer of the conv.
    pub fn with_initializer(
        self,
        initializer: Initializer,
    ) -> Self {
        Self {
            conv: QConv2dConfig {
                conv: self.conv.conv.with_initializer(initializer),
                ..self.conv
            },
        }
    }

    /// Initialize a [`QConvNorm2d`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> QConvNorm2d<B> {
        QConvNorm2d {
            conv: self.conv.init(device),
            norm: BatchNormConfig::new(self.out_channels()).init(device),
        }
    }
}

/// [`QConv2d`] and [`BatchNorm`] layer.
#[derive(Module, Debug)]
pub struct QConvNorm2d<B: Backend> {
    /// Internal conv layer.
    pub conv: QConv2d<B>,

    /// Internal norm layer.
    pub norm: BatchNorm<B, 2>,
}

impl<B: Backend> QConvNorm2dMeta for QConvNorm2d<B> {
    fn in_channels(&self) -> usize {
        self.conv.in_channels()
    }

    fn out_channels(&self) -> usize {
        self.conv.out_channels()
    }

    fn stride(&self) -> [usize; 2] {
        self.conv.stride()
    }

    fn bits_weights(&self) -> usize {
        self.conv.bits_weights()
    }

    fn bits_activations(&self) -> usize {
        self.conv.bits_activations()
    }
}

impl<B: Backend> QConvNorm2d<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, in_height=out_height*stride, in_width=out_width*stride]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, out_height, out_width]``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [height_stride, width_stride] = self.stride();
        let [batch, out_height, out_width] = unpack_shape_contract!(
            [
                "batch",
                "in_channels",
                "in_height" = "out_height" * "height_stride",
                "in_width" = "out_width" * "width_stride"
            ],
            &input,
            &["batch", "out_height", "out_width"],
            &[
                ("in_channels", self.in_channels()),
                ("height_stride", height_stride),
                ("width_stride", width_stride),
            ]
        );

        let x = self.conv.forward(input);
        let x = self.norm.forward(x);

        assert_shape_contract_periodically!(
            ["batch", "out_channels", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("out_channels", self.out_channels()),
                ("out_height", out_height),
                ("out_width", out_width)
            ]
        );

        x
    }

    /// Load full precision conv and norm weights.
    pub fn load_conv_norm_records(
        self,
        conv: Conv2dRecord<B>,
        norm: BatchNormRecord<B, 2>,
    ) -> Self {
        Self {
            conv: self.conv.load_conv_record(conv),
            norm: self.norm.load_record(norm),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::quant::strategy::{QuantConfig, QuantStrategy};
    use bimm_contracts::assert_shape_contract;
    use burn::backend::NdArray;
    use burn::nn::PaddingConfig2d;
    use burn::nn::conv::Conv2d;

    #[test]
    fn test_conv_norm_config() {
        let inner_config = Conv2dConfig::new([2, 4], [3, 3])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false);

        let config: QConvNorm2dConfig = inner_config.clone().into();

        assert_eq!(&config.conv.conv.channels, &inner_config.channels);
        assert_eq!(&config.conv.conv.kernel_size, &inner_config.kernel_size);
        assert_eq!(config.in_channels(), 2);
        assert_eq!(config.out_channels(), 4);
        assert_eq!(config.stride(), [2, 2]);
        assert_eq!(config.bits_weights(), 32);
        assert_eq!(config.bits_activations(), 32);

        let config = config.with_initializer(Initializer::Zeros);
        assert!(matches!(config.conv.conv.initializer, Initializer::Zeros));
    }

    #[test]
    fn test_conv_norm_forward() {
        type B = NdArray;
        let device = Default::default();

        let config: QConvNorm2dConfig = QuantConfig::new()
            .with_bits_weights(4)
            .with_bits_activations(4)
            .conv(
                Conv2dConfig::new([2, 4], [3, 3])
                    .with_stride([2, 2])
                    .with_padding(PaddingConfig2d::Explicit(1, 1))
                    .with_bias(false),
            )
            .into();

        let block: QConvNorm2d<B> = config.init(&device);
        assert_eq!(block.bits_weights(), 4);
        assert_eq!(block.bits_activations(), 4);

        let input = Tensor::ones([2, 2, 8, 6], &device);
        let output = block.forward(input);

        assert_shape_contract!(
            ["batch", "out_channels", "out_height", "out_width"],
            &output,
            &[
                ("batch", 2),
                ("out_channels", 4),
                ("out_height", 4),
                ("out_width", 3)
            ],
        );
    }

    #[test]
    fn test_zero_initialized_forward_is_finite() {
        type B = NdArray;
        let device = Default::default();

        for strategy in QuantStrategy::ALL {
            let config: QConvNorm2dConfig = QuantConfig::new()
                .with_strategy(strategy)
                .with_bits_weights(4)
                .with_bits_activations(4)
                .conv(
                    Conv2dConfig::new([2, 4], [3, 3])
                        .with_padding(PaddingConfig2d::Explicit(1, 1))
                        .with_bias(false),
                )
                .into();
            let block: QConvNorm2d<B> = config.with_initializer(Initializer::Zeros).init(&device);

            let output = block
                .forward(Tensor::ones([1, 2, 4, 4], &device))
                .into_data()
                .to_vec::<f32>()
                .unwrap();
            assert!(
                output.iter().all(|v| v.is_finite()),
                "{strategy}: {output:?}"
            );
        }
    }

    #[test]
    #[should_panic(expected = "in_height=(out_height*height_stride)")]
    fn test_conv_norm_forward_bad_resolution() {
        type B = NdArray;
        let device = Default::default();

        let config: QConvNorm2dConfig = Conv2dConfig::new([2, 4], [1, 1])
            .with_stride([2, 2])
            .into();
        let block: QConvNorm2d<B> = config.init(&device);

        block.forward(Tensor::ones([1, 2, 7, 8], &device));
    }

    #[test]
    fn test_load_conv_norm_records() {
        type B = NdArray;
        let device = Default::default();

        let conv_config = Conv2dConfig::new([2, 4], [1, 1]).with_bias(false);
        let config: QConvNorm2dConfig = conv_config.clone().into();
        let block: QConvNorm2d<B> = config.init(&device);

        let source_conv: Conv2d<B> = conv_config.init(&device);
        let mut source_norm: BatchNorm<B, 2> = BatchNormConfig::new(4).init(&device);
        source_norm.gamma = source_norm.gamma.map(|g| g.mul_scalar(2.0));

        let expected_weight = source_conv.weight.val();
        let expected_gamma = source_norm.gamma.val();

        let block =
            block.load_conv_norm_records(source_conv.into_record(), source_norm.into_record());

        block
            .conv
            .conv
            .weight
            .val()
            .to_data()
            .assert_eq(&expected_weight.to_data(), true);
        block
            .norm
            .gamma
            .val()
            .to_data()
            .assert_eq(&expected_gamma.to_data(), true);
    }
}
