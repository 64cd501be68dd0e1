//! # `QResNet` Stages
//!
//! A [`LayerBlock`] is one stage: a chain of [`ResidualBlock`]s where
//! each block consumes the planes the previous one produced. Only the
//! first block of a standard stage strides or widens.

use crate::layers::quant::strategy::QuantConfig;
use crate::models::qresnet::residual_block::{
    ResidualBlock, ResidualBlockConfig, ResidualBlockMeta, block_expansion,
};
use crate::models::qresnet::util::stride_div_output_resolution;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::prelude::{Backend, Module, Tensor};

/// Shape API shared by [`LayerBlockConfig`] and [`LayerBlock`].
///
/// Plane accessors panic on an empty stage.
pub trait LayerBlockMeta {
    /// Blocks in the stage.
    fn len(&self) -> usize;

    /// `true` when the stage has no blocks.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Planes entering the first block.
    fn in_planes(&self) -> usize;

    /// Planes leaving the last block.
    fn out_planes(&self) -> usize;

    /// Product of the block strides.
    fn stride(&self) -> usize;

    /// ``[in_height, in_width] / stride``; panics if not divisible.
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        stride_div_output_resolution(input_resolution, self.stride())
    }
}

fn chain_stride<M: ResidualBlockMeta>(blocks: &[M]) -> usize {
    blocks.iter().map(|block| block.stride()).product()
}

/// [`LayerBlock`] Configuration.
#[derive(Config, Debug)]
pub struct LayerBlockConfig {
    /// The component blocks.
    pub blocks: Vec<ResidualBlockConfig>,
}

impl From<Vec<ResidualBlockConfig>> for LayerBlockConfig {
    fn from(blocks: Vec<ResidualBlockConfig>) -> Self {
        Self { blocks }
    }
}

impl LayerBlockMeta for LayerBlockConfig {
    fn len(&self) -> usize {
        self.blocks.len()
    }

    fn in_planes(&self) -> usize {
        self.blocks[0].in_planes()
    }

    fn out_planes(&self) -> usize {
        self.blocks[self.blocks.len() - 1].out_planes()
    }

    fn stride(&self) -> usize {
        chain_stride(&self.blocks)
    }
}

impl LayerBlockConfig {
    /// A standard stage of `num_blocks` blocks.
    ///
    /// The first block maps ``in_planes -> planes * expansion`` at `stride`;
    /// the others keep ``planes * expansion`` at stride 1. Every conv uses `quant`.
    pub fn build(
        num_blocks: usize,
        in_planes: usize,
        planes: usize,
        stride: usize,
        bottleneck: bool,
        quant: &QuantConfig,
    ) -> Self {
        let out_planes = planes * block_expansion(bottleneck);
        let head = ResidualBlockConfig::build(in_planes, planes, stride, bottleneck, quant);
        let tail = (1..num_blocks)
            .map(|_| ResidualBlockConfig::build(out_planes, planes, 1, bottleneck, quant));

        std::iter::once(head)
            .chain(tail)
            .take(num_blocks)
            .collect::<Vec<_>>()
            .into()
    }

    /// Check that the stage is non-empty and that adjacent blocks chain.
    pub fn try_validate(&self) -> Result<(), String> {
        if self.is_empty() {
            return Err("blocks is empty".to_string());
        }

        for (idx, pair) in self.blocks.windows(2).enumerate() {
            let (prev, next) = (&pair[0], &pair[1]);
            if prev.out_planes() != next.in_planes() {
                return Err(format!(
                    "block[{}].out_planes({}) != block[{}].in_planes({})\n{:#?}",
                    idx,
                    prev.out_planes(),
                    idx + 1,
                    next.in_planes(),
                    self,
                ));
            }
        }
        Ok(())
    }

    /// Panic with the [`Self::try_validate`] message on an invalid stage.
    pub fn expect_valid(&self) {
        if let Err(err) = self.try_validate() {
            panic!("{}", err);
        }
    }

    /// Initialize a [`LayerBlock`]; panics on an invalid stage.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> LayerBlock<B> {
        self.expect_valid();

        LayerBlock {
            blocks: self
                .blocks
                .iter()
                .map(|block| block.init(device))
                .collect(),
        }
    }
}

/// One `QResNet` stage.
#[derive(Module, Debug)]
pub struct LayerBlock<B: Backend> {
    /// The chained blocks.
    pub blocks: Vec<ResidualBlock<B>>,
}

impl<B: Backend> LayerBlockMeta for LayerBlock<B> {
    fn len(&self) -> usize {
        self.blocks.len()
    }

    fn in_planes(&self) -> usize {
        self.blocks[0].in_planes()
    }

    fn out_planes(&self) -> usize {
        self.blocks[self.blocks.len() - 1].out_planes()
    }

    fn stride(&self) -> usize {
        chain_stride(&self.blocks)
    }
}

impl<B: Backend> LayerBlock<B> {
    /// ``[batch, in_planes, out_height*stride, out_width*stride]``
    /// to ``[batch, out_planes, out_height, out_width]``.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, out_height, out_width] = unpack_shape_contract!(
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

        let x = self.blocks.iter().fold(input, |x, block| block.forward(x));

        assert_shape_contract_periodically!(
            ["batch", "out_planes", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("out_planes", self.out_planes()),
                ("out_height", out_height),
                ("out_width", out_width)
            ],
        );

        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::qresnet::basic_block::QBasicBlockConfig;
    use bimm_contracts::assert_shape_contract;
    use burn::backend::NdArray;

    #[test]
    fn test_layer_block_config_build() {
        let config = LayerBlockConfig::build(2, 16, 32, 2, false, &QuantConfig::new());
        config.expect_valid();
        assert_eq!(config.len(), 2);
        assert_eq!(config.in_planes(), 16);
        assert_eq!(config.out_planes(), 32);
        assert_eq!(config.stride(), 2);
        assert_eq!(config.output_resolution([12, 24]), [6, 12]);

        let block1 = &config.blocks[0];
        assert_eq!(block1.in_planes(), 16);
        assert_eq!(block1.out_planes(), 32);
        assert_eq!(block1.stride(), 2);

        let block2 = &config.blocks[1];
        assert_eq!(block2.in_planes(), 32);
        assert_eq!(block2.out_planes(), 32);
        assert_eq!(block2.stride(), 1);
    }

    #[test]
    fn test_layer_block_config_build_bottleneck() {
        let config = LayerBlockConfig::build(3, 64, 64, 1, true, &QuantConfig::new());
        config.expect_valid();
        assert_eq!(config.len(), 3);
        assert_eq!(config.in_planes(), 64);
        assert_eq!(config.out_planes(), 256);
        assert_eq!(config.stride(), 1);
        assert_eq!(config.blocks[1].in_planes(), 256);
        assert_eq!(config.blocks[2].in_planes(), 256);
    }

    #[test]
    fn test_layer_block_config_build_empty() {
        let config = LayerBlockConfig::build(0, 64, 64, 2, false, &QuantConfig::new());
        assert!(config.is_empty());
        assert_eq!(config.try_validate().unwrap_err(), "blocks is empty");
    }

    #[test]
    fn test_try_validate() {
        let empty = LayerBlockConfig::new(vec![]);
        assert_eq!(empty.try_validate().unwrap_err(), "blocks is empty");

        let broken = LayerBlockConfig::from(vec![
            QBasicBlockConfig::new(8, 16).into(),
            QBasicBlockConfig::new(32, 32).into(),
        ]);
        let err = broken.try_validate().unwrap_err();
        assert!(
            err.starts_with("block[0].out_planes(16) != block[1].in_planes(32)"),
            "{err}"
        );
    }

    #[test]
    #[should_panic(expected = "block[0].out_planes(16) != block[1].in_planes(32)")]
    fn test_init_invalid_panics() {
        type B = NdArray;
        let device = Default::default();

        let broken = LayerBlockConfig::from(vec![
            QBasicBlockConfig::new(8, 16).into(),
            QBasicBlockConfig::new(32, 32).into(),
        ]);
        let _block: LayerBlock<B> = broken.init(&device);
    }

    #[test]
    fn test_layer_block() {
        type B = NdArray;
        let device = Default::default();

        let a_planes = 4;
        let b_planes = 8;
        let c_planes = 16;

        let config = LayerBlockConfig::from(vec![
            QBasicBlockConfig::new(a_planes, b_planes)
                .with_stride(2)
                .into(),
            QBasicBlockConfig::new(b_planes, c_planes)
                .with_stride(3)
                .into(),
        ]);

        config.expect_valid();

        assert_eq!(config.len(), 2);
        assert_eq!(config.in_planes(), a_planes);
        assert_eq!(config.out_planes(), c_planes);
        assert_eq!(config.stride(), 2 * 3);
        assert_eq!(config.output_resolution([12, 24]), [2, 4]);

        let block: LayerBlock<B> = config.init(&device);

        assert_eq!(block.len(), 2);
        assert_eq!(block.in_planes(), a_planes);
        assert_eq!(block.out_planes(), c_planes);
        assert_eq!(block.stride(), 2 * 3);

        let batch_size = 2;
        let input = Tensor::ones([batch_size, a_planes, 12, 24], &device);

        let output = block.forward(input.clone());
        assert_shape_contract!(
            ["batch", "out_planes", "out_height", "out_width"],
            &output,
            &[
                ("batch", batch_size),
                ("out_planes", c_planes),
                ("out_height", 2),
                ("out_width", 4)
            ],
        );

        let mut expected = input;
        for block in block.blocks.iter() {
            expected = block.forward(expected);
        }
        output.to_data().assert_eq(&expected.to_data(), true);
    }
}
