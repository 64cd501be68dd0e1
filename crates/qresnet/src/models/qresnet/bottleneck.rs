//! # Bottleneck Block for `QResNet`
//!
//! [`QBottleneckBlock`] compresses to `planes` with a 1x1 conv, applies the
//! (strided) 3x3 conv, and expands back out to `planes * 4` with a 1x1 conv.
//!
//! [`QBottleneckBlockConfig`] implements [`Config`], and provides
//! [`QBottleneckBlockConfig::init`] to initialize a [`QBottleneckBlock`].

use crate::layers::blocks::conv_norm::{QConvNorm2d, QConvNorm2dMeta};
use crate::layers::quant::strategy::QuantConfig;
use crate::models::qresnet::downsample::{QDownsample, QDownsampleConfig};
use crate::models::qresnet::util::{qconv_norm, stride_div_output_resolution};
use burn::prelude::{Backend, Config, Module, Tensor};
use burn::tensor::activation::relu;

/// Output width multiplier of a [`QBottleneckBlock`].
pub const BOTTLENECK_EXPANSION: usize = 4;

/// [`QBottleneckBlock`] Meta trait.
pub trait QBottleneckBlockMeta {
    /// The size of the in channels dimension.
    fn in_planes(&self) -> usize;

    /// The width of the compressed inner convs.
    fn planes(&self) -> usize;

    /// The size of the out channels dimension.
    ///
    /// ``out_planes = planes * BOTTLENECK_EXPANSION``
    fn out_planes(&self) -> usize {
        self.planes() * BOTTLENECK_EXPANSION
    }

    /// The stride of the 3x3 conv.
    fn stride(&self) -> usize;

    /// Weight bit-width.
    fn bits_weights(&self) -> usize;

    /// Activation bit-width.
    fn bits_activations(&self) -> usize;

    /// Get the output resolution for a given input resolution.
    ///
    /// # Panics
    ///
    /// If the input resolution is not a multiple of the stride.
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        stride_div_output_resolution(input_resolution, self.stride())
    }

    /// Does the residual path need a [`QDownsample`]?
    fn needs_downsample(&self) -> bool {
        self.stride() != 1 || self.in_planes() != self.out_planes()
    }
}

/// [`QBottleneckBlock`] Config.
///
/// Implements [`QBottleneckBlockMeta`].
#[derive(Config, Debug)]
pub struct QBottleneckBlockConfig {
    /// The size of the in channels dimension.
    pub in_planes: usize,

    /// The width of the compressed inner convs.
    pub planes: usize,

    /// The stride of the 3x3 conv.
    #[config(default = 1)]
    pub stride: usize,

    /// Quantization settings for every conv in the block.
    #[config(default = "QuantConfig::new()")]
    pub quant: QuantConfig,
}

impl QBottleneckBlockMeta for QBottleneckBlockConfig {
    fn in_planes(&self) -> usize {
        self.in_planes
    }

    fn planes(&self) -> usize {
        self.planes
    }

    fn stride(&self) -> usize {
        self.stride
    }

    fn bits_weights(&self) -> usize {
        self.quant.bits_weights
    }

    fn bits_activations(&self) -> usize {
        self.quant.bits_activations
    }
}

impl QBottleneckBlockConfig {
    /// Initialize a [`QBottleneckBlock`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> QBottleneckBlock<B> {
        let planes = self.planes;
        let out_planes = self.out_planes();

        let downsample = if self.needs_downsample() {
            QDownsampleConfig::new(self.in_planes, out_planes)
                .with_stride(self.stride)
                .with_quant(self.quant.clone())
                .init(device)
                .into()
        } else {
            None
        };

        QBottleneckBlock {
            downsample,
            conv_norm1: qconv_norm(self.in_planes, planes, 1, 1, &self.quant).init(device),
            conv_norm2: qconv_norm(planes, planes, 3, self.stride, &self.quant).init(device),
            conv_norm3: qconv_norm(planes, out_planes, 1, 1, &self.quant).init(device),
        }
    }
}

/// Bottleneck Block for `QResNet`.
///
/// Implements [`QBottleneckBlockMeta`].
#[derive(Module, Debug)]
pub struct QBottleneckBlock<B: Backend> {
    /// Optional `QDownsample` layer; for the residual connection.
    pub downsample: Option<QDownsample<B>>,

    /// 1x1 compression.
    pub conv_norm1: QConvNorm2d<B>,

    /// 3x3 conv; carries the stride.
    pub conv_norm2: QConvNorm2d<B>,

    /// 1x1 expansion.
    pub conv_norm3: QConvNorm2d<B>,
}

impl<B: Backend> QBottleneckBlockMeta for QBottleneckBlock<B> {
    fn in_planes(&self) -> usize {
        self.conv_norm1.in_channels()
    }

    fn planes(&self) -> usize {
        self.conv_norm1.out_channels()
    }

    fn out_planes(&self) -> usize {
        self.conv_norm3.out_channels()
    }

    fn stride(&self) -> usize {
        self.conv_norm2.stride()[0]
    }

    fn bits_weights(&self) -> usize {
        self.conv_norm1.bits_weights()
    }

    fn bits_activations(&self) -> usize {
        self.conv_norm1.bits_activations()
    }
}

impl<B: Backend> QBottleneckBlock<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_planes, in_height=out_height*stride, in_width=out_width*stride]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, out_planes=planes*4, out_height, out_width]`` tensor.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        #[cfg(debug_assertions)]
        let [batch, out_height, out_width] = bimm_contracts::unpack_shape_contract!(
            [
                "batch",
                "in_planes",
                "in_height" = "out_height" * "stride",
                "in_width" = "out_width" * "stride"
            ],
            &input,
            &["batch", "out_height", "out_width"],
            &[("in_planes", self.in_planes()), ("stride", self.stride())],
        );

        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(input.clone()),
            None => input.clone(),
        };

        let x = relu(self.conv_norm1.forward(input));
        let x = relu(self.conv_norm2.forward(x));

        #[cfg(debug_assertions)]
        bimm_contracts::assert_shape_contract_periodically!(
            ["batch", "planes", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("planes", self.planes()),
                ("out_height", out_height),
                ("out_width", out_width),
            ]
        );

        let x = self.conv_norm3.forward(x);
        let x = relu(x + identity);

        #[cfg(debug_assertions)]
        bimm_contracts::assert_shape_contract_periodically!(
            ["batch", "out_planes", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("out_planes", self.out_planes()),
                ("out_height", out_height),
                ("out_width", out_width),
            ]
        );

        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bimm_contracts::assert_shape_contract;
    use burn::backend::NdArray;

    #[test]
    fn test_bottleneck_config() {
        let config = QBottleneckBlockConfig::new(64, 64);
        assert_eq!(config.in_planes(), 64);
        assert_eq!(config.planes(), 64);
        assert_eq!(config.out_planes(), 256);
        assert_eq!(config.stride(), 1);
        assert!(config.needs_downsample());
        assert_eq!(config.output_resolution([16, 16]), [16, 16]);

        assert!(!QBottleneckBlockConfig::new(256, 64).needs_downsample());

        let config = config.with_stride(2);
        assert_eq!(config.output_resolution([16, 16]), [8, 8]);
    }

    #[test]
    #[should_panic(expected = "7 !~ in_height=(out_height*stride)")]
    fn test_bottleneck_config_panic() {
        let config = QBottleneckBlockConfig::new(16, 4).with_stride(2);
        config.output_resolution([7, 7]);
    }

    #[test]
    fn test_bottleneck_meta() {
        type B = NdArray<f32>;
        let device = Default::default();

        let block: QBottleneckBlock<B> = QBottleneckBlockConfig::new(8, 4)
            .with_stride(2)
            .with_quant(QuantConfig::new().with_bits_weights(3))
            .init(&device);

        assert!(block.downsample.is_some());
        assert_eq!(block.in_planes(), 8);
        assert_eq!(block.planes(), 4);
        assert_eq!(block.out_planes(), 16);
        assert_eq!(block.stride(), 2);
        assert_eq!(block.conv_norm1.stride(), [1, 1]);
        assert_eq!(block.conv_norm3.stride(), [1, 1]);
        assert_eq!(block.bits_weights(), 3);
        assert_eq!(block.bits_activations(), 32);
    }

    #[test]
    fn test_bottleneck_forward() {
        type B = NdArray<f32>;
        let device = Default::default();

        for (in_planes, stride) in [(16, 1), (8, 2)] {
            let block: QBottleneckBlock<B> = QBottleneckBlockConfig::new(in_planes, 4)
                .with_stride(stride)
                .with_quant(
                    QuantConfig::new()
                        .with_bits_weights(4)
                        .with_bits_activations(4),
                )
                .init(&device);
            assert_eq!(block.downsample.is_some(), stride != 1);

            let input = Tensor::ones([2, in_planes, 8, 8], &device);
            let output = block.forward(input);

            assert_shape_contract!(
                ["batch", "out_planes", "out_height", "out_width"],
                &output,
                &[
                    ("batch", 2),
                    ("out_planes", 16),
                    ("out_height", 8 / stride),
                    ("out_width", 8 / stride)
                ],
            );
        }
    }
}
