#![allow(missing_docs)]
//! # `torchvision` `ResNet` Stubs.
//!
//! These are stub modules mirroring the ``torchvision`` `ResNet` key layout.
//! Checkpoints are read into the stubs with `burn-import`, and the full
//! precision conv / norm / linear records are then copied onto the quantized
//! topology; this re-calibrates the learned weight clips.
use crate::layers::blocks::conv_norm::QConvNorm2d;
use crate::models::qresnet::basic_block::QBasicBlock;
use crate::models::qresnet::bottleneck::QBottleneckBlock;
use crate::models::qresnet::downsample::QDownsample;
use crate::models::qresnet::layer_block::LayerBlock;
use crate::models::qresnet::residual_block::ResidualBlock;
use crate::models::qresnet::resnet_model::QResNet;
use anyhow::{Context, bail};
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dRecord};
use burn::nn::{BatchNorm, BatchNormRecord, Linear};
use burn::prelude::Backend;
use burn::record::{FullPrecisionSettings, Recorder};
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};
use std::path::PathBuf;

/// Load weights from a ``torch`` weights path onto a [`QResNet`] model.
pub fn load_pytorch_weights<B: Backend>(
    model: QResNet<B>,
    path: PathBuf,
) -> anyhow::Result<QResNet<B>> {
    let device = model
        .devices()
        .into_iter()
        .next()
        .context("model has no device")?;
    let record = load_resnet_stub_record::<B>(path, &device)?;
    record.copy_weights(model)
}

/// Load a [`ResNetStubRecord`] from a ``torch`` weights path.
pub fn load_resnet_stub_record<B: Backend>(
    path: PathBuf,
    device: &B::Device,
) -> anyhow::Result<ResNetStubRecord<B>> {
    let load_args = LoadArgs::new(path)
        .with_key_remap(r"downsample\.0", "downsample.conv")
        .with_key_remap(r"downsample\.1", "downsample.bn")
        .with_key_remap(r"^layer1\.", "layers.0.blocks.")
        .with_key_remap(r"^layer2\.", "layers.1.blocks.")
        .with_key_remap(r"^layer3\.", "layers.2.blocks.")
        .with_key_remap(r"^layer4\.", "layers.3.blocks.");

    let record = PyTorchFileRecorder::<FullPrecisionSettings>::new().load(load_args, device)?;

    Ok(record)
}

fn check_len(
    what: &str,
    stub: usize,
    target: usize,
) -> anyhow::Result<()> {
    if stub != target {
        bail!("{what} count mismatch: checkpoint has {stub}, model has {target}");
    }
    Ok(())
}

#[derive(Module, Debug)]
pub struct ResNetStub<B: Backend> {
    pub conv1: Conv2d<B>,
    pub bn1: BatchNorm<B, 2>,
    pub layers: Vec<LayerBlockStub<B>>,
    pub fc: Linear<B>,
}

impl<B: Backend> ResNetStubRecord<B> {
    pub fn copy_weights(
        self,
        target: QResNet<B>,
    ) -> anyhow::Result<QResNet<B>> {
        check_len("layer", self.layers.len(), target.layers.len())?;

        let layers = self
            .layers
            .into_iter()
            .zip(target.layers)
            .enumerate()
            .map(|(idx, (s, t))| s.copy_weights(t).with_context(|| format!("layer[{idx}]")))
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(QResNet {
            input_conv_norm: copy_conv_norm_weights(self.conv1, self.bn1, target.input_conv_norm),
            layers,
            output_fc: target.output_fc.load_linear_record(self.fc),
            ..target
        })
    }
}

#[derive(Module, Debug)]
pub struct LayerBlockStub<B: Backend> {
    pub blocks: Vec<ResidualBlockStub<B>>,
}

impl<B: Backend> LayerBlockStubRecord<B> {
    pub fn copy_weights(
        self,
        target: LayerBlock<B>,
    ) -> anyhow::Result<LayerBlock<B>> {
        check_len("block", self.blocks.len(), target.blocks.len())?;

        Ok(LayerBlock {
            blocks: self
                .blocks
                .into_iter()
                .zip(target.blocks)
                .enumerate()
                .map(|(idx, (s, t))| s.copy_weights(t).with_context(|| format!("block[{idx}]")))
                .collect::<anyhow::Result<Vec<_>>>()?,
        })
    }
}

/// Bottleneck is listed first; a basic block's keys are a subset of its keys.
#[derive(Module, Debug)]
#[allow(clippy::large_enum_variant)]
pub enum ResidualBlockStub<B: Backend> {
    Bottleneck(BottleneckStub<B>),
    Basic(BasicBlockStub<B>),
}

impl<B: Backend> ResidualBlockStubRecord<B> {
    pub fn copy_weights(
        self,
        target: ResidualBlock<B>,
    ) -> anyhow::Result<ResidualBlock<B>> {
        use ResidualBlock as T;
        use ResidualBlockStubRecord as S;
        match (self, target) {
            (S::Basic(stub), T::Basic(block)) => Ok(stub.copy_weights(block)?.into()),
            (S::Bottleneck(stub), T::Bottleneck(block)) => Ok(stub.copy_weights(block)?.into()),
            (S::Basic(_), T::Bottleneck(_)) => {
                bail!("Cannot apply basic block weights to a bottleneck block")
            }
            (S::Bottleneck(_), T::Basic(_)) => {
                bail!("Cannot apply bottleneck block weights to a basic block")
            }
        }
    }
}

pub fn copy_downsample_weights<B: Backend>(
    downsample: Option<DownsampleStubRecord<B>>,
    target: Option<QDownsample<B>>,
) -> anyhow::Result<Option<QDownsample<B>>> {
    match (downsample, target) {
        (Some(stub), Some(target)) => Ok(Some(stub.copy_weights(target))),
        (None, None) => Ok(None),
        (None, Some(_)) => bail!("checkpoint has no downsample; model has one"),
        (Some(_), None) => bail!("checkpoint has a downsample; model has none"),
    }
}

#[derive(Module, Debug)]
pub struct DownsampleStub<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B, 2>,
}

impl<B: Backend> DownsampleStubRecord<B> {
    pub fn copy_weights(
        self,
        target: QDownsample<B>,
    ) -> QDownsample<B> {
        QDownsample {
            conv_norm: copy_conv_norm_weights(self.conv, self.bn, target.conv_norm),
        }
    }
}

pub fn copy_conv_norm_weights<B: Backend>(
    conv: Conv2dRecord<B>,
    bn: BatchNormRecord<B, 2>,
    target: QConvNorm2d<B>,
) -> QConvNorm2d<B> {
    target.load_conv_norm_records(conv, bn)
}

#[derive(Module, Debug)]
pub struct BasicBlockStub<B: Backend> {
    pub conv1: Conv2d<B>,
    pub bn1: BatchNorm<B, 2>,
    pub conv2: Conv2d<B>,
    pub bn2: BatchNorm<B, 2>,
    pub downsample: Option<DownsampleStub<B>>,
}

impl<B: Backend> BasicBlockStubRecord<B> {
    pub fn copy_weights(
        self,
        target: QBasicBlock<B>,
    ) -> anyhow::Result<QBasicBlock<B>> {
        Ok(QBasicBlock {
            downsample: copy_downsample_weights(self.downsample, target.downsample)?,
            conv_norm1: copy_conv_norm_weights(self.conv1, self.bn1, target.conv_norm1),
            conv_norm2: copy_conv_norm_weights(self.conv2, self.bn2, target.conv_norm2),
        })
    }
}

#[derive(Module, Debug)]
pub struct BottleneckStub<B: Backend> {
    pub conv1: Conv2d<B>,
    pub bn1: BatchNorm<B, 2>,
    pub conv2: Conv2d<B>,
    pub bn2: BatchNorm<B, 2>,
    pub conv3: Conv2d<B>,
    pub bn3: BatchNorm<B, 2>,
    pub downsample: Option<DownsampleStub<B>>,
}

impl<B: Backend> BottleneckStubRecord<B> {
    pub fn copy_weights(
        self,
        target: QBottleneckBlock<B>,
    ) -> anyhow::Result<QBottleneckBlock<B>> {
        Ok(QBottleneckBlock {
            downsample: copy_downsample_weights(self.downsample, target.downsample)?,
            conv_norm1: copy_conv_norm_weights(self.conv1, self.bn1, target.conv_norm1),
            conv_norm2: copy_conv_norm_weights(self.conv2, self.bn2, target.conv_norm2),
            conv_norm3: copy_conv_norm_weights(self.conv3, self.bn3, target.conv_norm3),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::quant::strategy::QuantStrategy;
    use crate::models::qresnet::resnet_model::{QResNetAbstractConfig, QResNetOptions};
    use burn::backend::NdArray;
    use burn::nn::conv::Conv2dConfig;
    use burn::nn::{BatchNormConfig, LinearConfig};

    type B = NdArray;

    fn conv_stub(
        in_planes: usize,
        out_planes: usize,
        kernel_size: usize,
        device: &<B as Backend>::Device,
    ) -> Conv2d<B> {
        Conv2dConfig::new([in_planes, out_planes], [kernel_size, kernel_size])
            .with_bias(false)
            .init(device)
    }

    fn basic_stub(
        in_planes: usize,
        planes: usize,
        device: &<B as Backend>::Device,
    ) -> BasicBlockStub<B> {
        BasicBlockStub {
            conv1: conv_stub(in_planes, planes, 3, device),
            bn1: BatchNormConfig::new(planes).init(device),
            conv2: conv_stub(planes, planes, 3, device),
            bn2: BatchNormConfig::new(planes).init(device),
            downsample: if in_planes != planes {
                Some(DownsampleStub {
                    conv: conv_stub(in_planes, planes, 1, device),
                    bn: BatchNormConfig::new(planes).init(device),
                })
            } else {
                None
            },
        }
    }

    fn resnet_stub(
        num_classes: usize,
        device: &<B as Backend>::Device,
    ) -> ResNetStub<B> {
        let mut layers = Vec::new();
        let mut in_planes = 64;
        for planes in [64, 128, 256, 512] {
            layers.push(LayerBlockStub {
                blocks: vec![ResidualBlockStub::Basic(basic_stub(
                    in_planes, planes, device,
                ))],
            });
            in_planes = planes;
        }
        ResNetStub {
            conv1: conv_stub(3, 64, 7, device),
            bn1: BatchNormConfig::new(64).init(device),
            layers,
            fc: LinearConfig::new(512, num_classes).init(device),
        }
    }

    #[test]
    fn test_copy_weights() {
        let device = Default::default();

        let options = QResNetOptions::new()
            .with_num_classes(10)
            .with_bits_weights(4)
            .with_bits_activations(4)
            .with_quan_type(QuantStrategy::Liq);
        let model: QResNet<B> = QResNetAbstractConfig::new([1, 1, 1, 1])
            .with_options(options)
            .to_structure()
            .init(&device);

        let stub = resnet_stub(10, &device);
        let stem_weight = stub.conv1.weight.val();
        let fc_weight = stub.fc.weight.val();
        let block_weight = match &stub.layers[1].blocks[0] {
            ResidualBlockStub::Basic(block) => block.conv1.weight.val(),
            ResidualBlockStub::Bottleneck(_) => unreachable!(),
        };

        let model = stub.into_record().copy_weights(model).unwrap();

        model
            .input_conv_norm
            .conv
            .conv
            .weight
            .val()
            .to_data()
            .assert_eq(&stem_weight.to_data(), true);
        model
            .output_fc
            .linear
            .weight
            .val()
            .to_data()
            .assert_eq(&fc_weight.to_data(), true);

        match &model.layers[1].blocks[0] {
            ResidualBlock::Basic(block) => {
                assert!(block.downsample.is_some());
                let conv = &block.conv_norm1.conv;
                conv.conv
                    .weight
                    .val()
                    .to_data()
                    .assert_eq(&block_weight.to_data(), true);
                conv.weight_quantizer
                    .clip_value()
                    .unwrap()
                    .to_data()
                    .assert_eq(&block_weight.abs().max().to_data(), true);
            }
            ResidualBlock::Bottleneck(_) => unreachable!(),
        }
    }

    #[test]
    fn test_copy_weights_block_kind_mismatch() {
        let device = Default::default();

        let model: QResNet<B> = QResNetAbstractConfig::new([1, 1, 1, 1])
            .with_bottleneck(true)
            .to_structure()
            .init(&device);

        let err = resnet_stub(1000, &device)
            .into_record()
            .copy_weights(model)
            .unwrap_err();
        assert!(
            format!("{err:#}").contains("Cannot apply basic block weights to a bottleneck block"),
            "{err:#}"
        );
    }

    #[test]
    fn test_copy_weights_depth_mismatch() {
        let device = Default::default();

        let model: QResNet<B> = QResNetAbstractConfig::new([2, 1, 1, 1])
            .to_structure()
            .init(&device);

        let err = resnet_stub(1000, &device)
            .into_record()
            .copy_weights(model)
            .unwrap_err();
        assert!(
            format!("{err:#}").contains("block count mismatch: checkpoint has 1, model has 2"),
            "{err:#}"
        );
    }
}
