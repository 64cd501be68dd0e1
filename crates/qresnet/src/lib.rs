#![warn(missing_docs)]
//!# qresnet - Quantized `ResNet` Models for Burn
//!
//! ## Notable Components
//!
//! * [`cache`] - weight loading cache.
//! * [`layers`] - reusable neural network modules.
//!   * [`layers::quant`] - fake quantization.
//!     * [`layers::quant::quantizer`] - `LIQ` / `DoReFa` quantizers.
//!     * [`layers::quant::qconv`] - quantized ``Conv2d``.
//!     * [`layers::quant::qlinear`] - quantized ``Linear``.
//!     * [`layers::quant::strategy`] - strategy selection and per-layer bit-widths.
//!   * [`layers::blocks`] - miscellaneous blocks.
//!     * [`layers::blocks::conv_norm`] - ``QConv2d + BatchNorm2d`` block.
//! * [`models`] - complete model families.
//!   * [`models::qresnet`] - `QResNet`

/// Test-only macro import.
#[cfg(test)]
#[allow(unused_imports)]
#[macro_use]
extern crate hamcrest;

pub mod cache;
pub mod layers;
pub mod models;
