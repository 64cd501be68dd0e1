//! # Quantized Layers
//!
//! Fake-quantized drop-in replacements for ``burn`` layers.
//!
//! * [`strategy`] - strategies and per-layer settings.
//! * [`quantizer`] - the fake quantizer.
//! * [`qconv`] - quantized ``Conv2d``.
//! * [`qlinear`] - quantized ``Linear``.

pub mod qconv;
pub mod qlinear;
pub mod quantizer;
pub mod strategy;
