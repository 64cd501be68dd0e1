//! # Pre-Fab `QResNet` Configs and Weights

use crate::cache::prefabs::{PreFabConfig, StaticPreFabConfig, StaticPreFabMap};
use crate::cache::weights::{StaticPretrainedWeightsDescriptor, StaticPretrainedWeightsMap};
use crate::models::qresnet::resnet_model::{QResNetAbstractConfig, ResNetDepth};

/// Name of the default pretrained weights of each pre-fab.
pub const DEFAULT_PRETRAINED_WEIGHTS: &str = "tv_in1k";

/// Static builder for [`QResNetPreFabConfig`].
pub type StaticQResNetPreFabConfig = StaticPreFabConfig<QResNetAbstractConfig>;

/// A [`QResNetAbstractConfig`] Well-Known Pre-Fab.
pub type QResNetPreFabConfig = PreFabConfig<QResNetAbstractConfig>;

/// Well-known [`super::QResNet`] configs and weights.
///
/// The weights are full precision ``torchvision`` checkpoints; the
/// quantizers are calibrated against them on load.
pub static PREFAB_QRESNET_MAP: StaticPreFabMap<QResNetAbstractConfig> = StaticPreFabMap {
    name: "qresnet",
    description: "Well-Known QResNet configs",

    items: &[
        &StaticPreFabConfig {
            name: "resnet18",
            description: "ResNet-18 [2, 2, 2, 2] BasicBlocks",
            builder: || QResNetAbstractConfig::for_depth(ResNetDepth::D18),

            weights: Some(&StaticPretrainedWeightsMap {
                items: &[&StaticPretrainedWeightsDescriptor {
                    name: "tv_in1k",
                    description: "ResNet-18 pretrained on ImageNet",
                    license: Some("bsd-3-clause"),
                    origin: Some("https://github.com/pytorch/vision"),
                    urls: &["https://download.pytorch.org/models/resnet18-5c106cde.pth"],
                }],
            }),
        },
        &StaticPreFabConfig {
            name: "resnet34",
            description: "ResNet-34 [3, 4, 6, 3] BasicBlocks",
            builder: || QResNetAbstractConfig::for_depth(ResNetDepth::D34),

            weights: Some(&StaticPretrainedWeightsMap {
                items: &[&StaticPretrainedWeightsDescriptor {
                    name: "tv_in1k",
                    description: "ResNet-34 pretrained on ImageNet",
                    license: Some("bsd-3-clause"),
                    origin: Some("https://github.com/pytorch/vision"),
                    urls: &["https://download.pytorch.org/models/resnet34-333f7ec4.pth"],
                }],
            }),
        },
        &StaticPreFabConfig {
            name: "resnet50",
            description: "ResNet-50 [3, 4, 6, 3] Bottleneck",
            builder: || QResNetAbstractConfig::for_depth(ResNetDepth::D50),

            weights: Some(&StaticPretrainedWeightsMap {
                items: &[&StaticPretrainedWeightsDescriptor {
                    name: "tv_in1k",
                    description: "ResNet-50 pretrained on ImageNet",
                    license: Some("bsd-3-clause"),
                    origin: Some("https://github.com/pytorch/vision"),
                    urls: &["https://download.pytorch.org/models/resnet50-19c8e357.pth"],
                }],
            }),
        },
        &StaticPreFabConfig {
            name: "resnet101",
            description: "ResNet-101 [3, 4, 23, 3] Bottleneck",
            builder: || QResNetAbstractConfig::for_depth(ResNetDepth::D101),

            weights: Some(&StaticPretrainedWeightsMap {
                items: &[&StaticPretrainedWeightsDescriptor {
                    name: "tv_in1k",
                    description: "ResNet-101 pretrained on ImageNet",
                    license: Some("bsd-3-clause"),
                    origin: Some("https://github.com/pytorch/vision"),
                    urls: &["https://download.pytorch.org/models/resnet101-5d3b4d8f.pth"],
                }],
            }),
        },
        &StaticPreFabConfig {
            name: "resnet152",
            description: "ResNet-152 [3, 8, 36, 3] Bottleneck",
            builder: || QResNetAbstractConfig::for_depth(ResNetDepth::D152),

            weights: Some(&StaticPretrainedWeightsMap {
                items: &[&StaticPretrainedWeightsDescriptor {
                    name: "tv_in1k",
                    description: "ResNet-152 pretrained on ImageNet",
                    license: Some("bsd-3-clause"),
                    origin: Some("https://github.com/pytorch/vision"),
                    urls: &["https://download.pytorch.org/models/resnet152-b121ed2d.pth"],
                }],
            }),
        },
    ],
};
