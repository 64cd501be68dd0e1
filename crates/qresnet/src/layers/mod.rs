//! Quantized layers and blocks.
pub mod blocks;
pub mod quant;
