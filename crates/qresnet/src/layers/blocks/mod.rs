//! # Composite Blocks
//!
//! * [`conv_norm`] - ``QConv2d + BatchNorm2d`` block.

pub mod conv_norm;
