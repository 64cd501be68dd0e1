//! # `QResNet`
//!
//! Quantized `ResNet` 18 / 34 / 50 / 101 / 152.
//!
//! The body convs are [`crate::layers::quant::qconv::QConv2d`] layers at the
//! bit-widths of [`QResNetOptions`]; the stem conv and the classifier are
//! quantized only when [`QResNetOptions::quantize_first_last`] is set.

pub mod basic_block;
pub mod bottleneck;
pub mod downsample;
pub mod layer_block;
pub mod prefabs;
pub mod pretrained;
pub mod residual_block;
pub mod resnet_io;
pub mod resnet_model;
pub mod util;

pub use pretrained::{qresnet, qresnet18, qresnet34, qresnet50, qresnet101, qresnet152};
pub use resnet_model::{QResNet, QResNetAbstractConfig, QResNetConfig, QResNetOptions, ResNetDepth};
