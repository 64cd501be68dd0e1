//! # Residual Block Wrapper

use crate::layers::quant::strategy::QuantConfig;
use crate::models::qresnet::basic_block::{
    BASIC_BLOCK_EXPANSION, QBasicBlock, QBasicBlockConfig, QBasicBlockMeta,
};
use crate::models::qresnet::bottleneck::{
    BOTTLENECK_EXPANSION, QBottleneckBlock, QBottleneckBlockConfig, QBottleneckBlockMeta,
};
use crate::models::qresnet::util::stride_div_output_resolution;
use burn::config::Config;
use burn::prelude::{Backend, Module, Tensor};

/// Output width multiplier for the block kind.
pub fn block_expansion(bottleneck: bool) -> usize {
    if bottleneck {
        BOTTLENECK_EXPANSION
    } else {
        BASIC_BLOCK_EXPANSION
    }
}

/// [`ResidualBlock`] Meta API.
pub trait ResidualBlockMeta {
    /// The number of input feature planes.
    fn in_planes(&self) -> usize;

    /// The number of output feature planes.
    fn out_planes(&self) -> usize;

    /// The stride of convolution.
    ///
    /// Affects downsample behavior.
    fn stride(&self) -> usize;

    /// Get the output resolution for a given input resolution.
    ///
    /// The input must be a multiple of the stride.
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
}

/// [`ResidualBlock`] Config.
#[derive(Config, Debug)]
pub enum ResidualBlockConfig {
    /// A `QResNet` [`QBasicBlock`].
    Basic(QBasicBlockConfig),

    /// A `QResNet` [`QBottleneckBlock`].
    Bottleneck(QBottleneckBlockConfig),
}

impl ResidualBlockMeta for ResidualBlockConfig {
    fn in_planes(&self) -> usize {
        match self {
            Self::Basic(config) => config.in_planes(),
            Self::Bottleneck(config) => config.in_planes(),
        }
    }

    fn out_planes(&self) -> usize {
        match self {
            Self::Basic(config) => config.out_planes(),
            Self::Bottleneck(config) => config.out_planes(),
        }
    }

    fn stride(&self) -> usize {
        match self {
            Self::Basic(config) => config.stride(),
            Self::Bottleneck(config) => config.stride(),
        }
    }
}

impl From<QBasicBlockConfig> for ResidualBlockConfig {
    fn from(config: QBasicBlockConfig) -> Self {
        Self::Basic(config)
    }
}

impl From<QBottleneckBlockConfig> for ResidualBlockConfig {
    fn from(config: QBottleneckBlockConfig) -> Self {
        Self::Bottleneck(config)
    }
}

impl ResidualBlockConfig {
    /// Build a block config.
    ///
    /// # Arguments
    ///
    /// - `in_planes`: input channels.
    /// - `planes`: inner width; the output is ``planes * expansion``.
    /// - `stride`: the block stride.
    /// - `bottleneck`: build a [`QBottleneckBlock`] rather than a [`QBasicBlock`].
    /// - `quant`: quantization settings for every conv in the block.
    pub fn build(
        in_planes: usize,
        planes: usize,
        stride: usize,
        bottleneck: bool,
        quant: &QuantConfig,
    ) -> Self {
        if bottleneck {
            QBottleneckBlockConfig::new(in_planes, planes)
                .with_stride(stride)
                .with_quant(quant.clone())
                .into()
        } else {
            QBasicBlockConfig::new(in_planes, planes)
                .with_stride(stride)
                .with_quant(quant.clone())
                .into()
        }
    }

    /// Initialize a [`ResidualBlock`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ResidualBlock<B> {
        match self {
            Self::Basic(config) => config.init(device).into(),
            Self::Bottleneck(config) => config.init(device).into(),
        }
    }
}

/// A `QResNet` [`QBasicBlock`] or [`QBottleneckBlock`] wrapper.
#[derive(Module, Debug)]
#[allow(clippy::large_enum_variant)]
pub enum ResidualBlock<B: Backend> {
    /// A `QResNet` [`QBasicBlock`].
    Basic(QBasicBlock<B>),

    /// A `QResNet` [`QBottleneckBlock`].
    Bottleneck(QBottleneckBlock<B>),
}

impl<B: Backend> From<QBasicBlock<B>> for ResidualBlock<B> {
    fn from(block: QBasicBlock<B>) -> Self {
        Self::Basic(block)
    }
}

impl<B: Backend> From<QBottleneckBlock<B>> for ResidualBlock<B> {
    fn from(block: QBottleneckBlock<B>) -> Self {
        Self::Bottleneck(block)
    }
}

impl<B: Backend> ResidualBlockMeta for ResidualBlock<B> {
    fn in_planes(&self) -> usize {
        match self {
            Self::Basic(block) => block.in_planes(),
            Self::Bottleneck(block) => block.in_planes(),
        }
    }

    fn out_planes(&self) -> usize {
        match self {
            Self::Basic(block) => block.out_planes(),
            Self::Bottleneck(block) => block.out_planes(),
        }
    }

    fn stride(&self) -> usize {
        match self {
            Self::Basic(block) => block.stride(),
            Self::Bottleneck(block) => block.stride(),
        }
    }
}

impl<B: Backend> ResidualBlock<B> {
    /// Apply the wrapped block to the input.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_planes, in_height=out_height*stride, in_width=out_width*stride]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, out_planes, out_height, out_width]`` tensor.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        match self {
            Self::Basic(block) => block.forward(input),
            Self::Bottleneck(block) => block.forward(input),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bimm_contracts::assert_shape_contract;
    use burn::backend::NdArray;

    #[test]
    fn test_block_expansion() {
        assert_eq!(block_expansion(false), 1);
        assert_eq!(block_expansion(true), 4);
    }

    #[test]
    fn test_residual_block_config() {
        let quant = QuantConfig::new().with_bits_weights(4);

        let cfg = ResidualBlockConfig::build(16, 32, 2, false, &quant);
        assert!(matches!(cfg, ResidualBlockConfig::Basic(_)));
        assert_eq!(cfg.in_planes(), 16);
        assert_eq!(cfg.out_planes(), 32);
        assert_eq!(cfg.stride(), 2);
        assert_eq!(cfg.output_resolution([20, 20]), [10, 10]);

        let cfg = ResidualBlockConfig::build(16, 32, 2, true, &quant);
        assert!(matches!(cfg, ResidualBlockConfig::Bottleneck(_)));
        assert_eq!(cfg.in_planes(), 16);
        assert_eq!(cfg.out_planes(), 128);
        assert_eq!(cfg.stride(), 2);
        match cfg {
            ResidualBlockConfig::Bottleneck(inner) => assert_eq!(inner.quant.bits_weights, 4),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_residual_block_forward() {
        type B = NdArray;
        let device = Default::default();

        for bottleneck in [false, true] {
            let cfg = ResidualBlockConfig::build(8, 4, 2, bottleneck, &QuantConfig::new());
            let block: ResidualBlock<B> = cfg.init(&device);

            assert_eq!(matches!(block, ResidualBlock::Bottleneck(_)), bottleneck);
            assert_eq!(block.in_planes(), 8);
            assert_eq!(block.out_planes(), 4 * block_expansion(bottleneck));
            assert_eq!(block.stride(), 2);

            let input = Tensor::ones([2, 8, 8, 8], &device);
            let output = block.forward(input);

            assert_shape_contract!(
                ["batch", "out_planes", "out_height", "out_width"],
                &output,
                &[
                    ("batch", 2),
                    ("out_planes", 4 * block_expansion(bottleneck)),
                    ("out_height", 4),
                    ("out_width", 4)
                ],
            );
        }
    }
}
