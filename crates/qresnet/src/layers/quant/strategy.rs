//! # Quantization Strategies
//!
//! A [`QuantStrategy`] names a family of quantized layers (the ``quan_type``).
//!
//! [`QuantConfig`] bundles a strategy with a weight/activation bit-width pair,
//! and acts as the layer factory: [`QuantConfig::conv`] and
//! [`QuantConfig::linear`] lift plain ``burn`` layer configs into their
//! quantized counterparts.

use crate::layers::quant::qconv::QConv2dConfig;
use crate::layers::quant::qlinear::QLinearConfig;
use crate::layers::quant::quantizer::QuantizerConfig;
use anyhow::bail;
use burn::config::Config;
use burn::nn::LinearConfig;
use burn::nn::conv::Conv2dConfig;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Bit-width at (and above) which a quantizer is the identity.
pub const FULL_PRECISION_BITS: usize = 32;

/// Default initial clip value for learned activation intervals.
pub const DEFAULT_ACTIVATION_CLIP: f64 = 8.0;

/// Panic if `bits` is not a supported bit-width.
///
/// # Returns
///
/// The bit-width, unchanged.
pub fn expect_bits(bits: usize) -> usize {
    assert!(
        (1..=FULL_PRECISION_BITS).contains(&bits),
        "bit-width must be in [1, {FULL_PRECISION_BITS}], got {bits}"
    );
    bits
}

/// Named quantization strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuantStrategy {
    /// Learned interval quantization.
    ///
    /// Each quantized operand carries a learnable clip value.
    Liq,

    /// ``DoReFa`` quantization.
    ///
    /// Weights are ``tanh``-normalized; activations are clipped to ``[0, 1]``.
    Dorefa,
}

impl Default for QuantStrategy {
    fn default() -> Self {
        Self::Liq
    }
}

impl QuantStrategy {
    /// All known strategies.
    pub const ALL: [QuantStrategy; 2] = [QuantStrategy::Liq, QuantStrategy::Dorefa];

    /// The canonical name of the strategy.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Liq => "LIQ",
            Self::Dorefa => "DoReFa",
        }
    }

    /// Does this strategy learn clip values?
    pub fn has_learned_clip(&self) -> bool {
        matches!(self, Self::Liq)
    }

    /// Layer settings for this strategy at the given bit-widths.
    ///
    /// The returned [`QuantConfig`] builds the conv and fc layers
    /// via [`QuantConfig::conv`] and [`QuantConfig::linear`].
    ///
    /// # Panics
    ///
    /// If either bit-width is outside ``[1, 32]``.
    pub fn quant_config(
        &self,
        bits_weights: usize,
        bits_activations: usize,
    ) -> QuantConfig {
        QuantConfig::new()
            .with_strategy(*self)
            .with_bits_weights(expect_bits(bits_weights))
            .with_bits_activations(expect_bits(bits_activations))
    }
}

impl Display for QuantStrategy {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for QuantStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        match Self::ALL
            .iter()
            .find(|strategy| strategy.name().eq_ignore_ascii_case(needle))
        {
            Some(strategy) => Ok(*strategy),
            None => bail!(
                "unknown quantization strategy: {:?}; expected one of {}",
                s,
                Self::ALL
                    .iter()
                    .map(|strategy| strategy.name())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }
}

/// The numeric domain a quantizer maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuantDomain {
    /// Signed grid, symmetric around zero.
    Weights,

    /// Unsigned grid; inputs below zero are clipped.
    Activations,
}

/// Per-layer quantization settings.
#[derive(Config, Debug)]
pub struct QuantConfig {
    /// Weight bit-width.
    #[config(default = 32)]
    pub bits_weights: usize,

    /// Activation (layer input) bit-width.
    #[config(default = 32)]
    pub bits_activations: usize,

    /// Quantization strategy.
    #[config(default = "QuantStrategy::Liq")]
    pub strategy: QuantStrategy,

    /// Initial clip for learned activation intervals.
    #[config(default = "DEFAULT_ACTIVATION_CLIP")]
    pub activation_clip: f64,
}

impl Default for QuantConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl QuantConfig {
    /// Full precision weights and activations.
    pub fn full_precision() -> Self {
        Self::new()
    }

    /// Are both operands at full precision?
    pub fn is_full_precision(&self) -> bool {
        self.bits_weights >= FULL_PRECISION_BITS && self.bits_activations >= FULL_PRECISION_BITS
    }

    /// The weight [`QuantizerConfig`].
    pub fn weight_quantizer(&self) -> QuantizerConfig {
        QuantizerConfig::new(self.bits_weights)
            .with_strategy(self.strategy)
            .with_domain(QuantDomain::Weights)
    }

    /// The activation [`QuantizerConfig`].
    pub fn activation_quantizer(&self) -> QuantizerConfig {
        QuantizerConfig::new(self.bits_activations)
            .with_strategy(self.strategy)
            .with_domain(QuantDomain::Activations)
            .with_clip_init(self.activation_clip)
    }

    /// Lift a [`Conv2dConfig`] to a [`QConv2dConfig`] under these settings.
    pub fn conv(
        &self,
        conv: Conv2dConfig,
    ) -> QConv2dConfig {
        QConv2dConfig::new(conv).with_quant(self.clone())
    }

    /// Lift a [`LinearConfig`] to a [`QLinearConfig`] under these settings.
    pub fn linear(
        &self,
        linear: LinearConfig,
    ) -> QLinearConfig {
        QLinearConfig::new(linear).with_quant(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_parse() {
        assert_eq!("LIQ".parse::<QuantStrategy>().unwrap(), QuantStrategy::Liq);
        assert_eq!("liq".parse::<QuantStrategy>().unwrap(), QuantStrategy::Liq);
        assert_eq!(
            " dorefa ".parse::<QuantStrategy>().unwrap(),
            QuantStrategy::Dorefa
        );

        let err = "PACT".parse::<QuantStrategy>().unwrap_err();
        assert!(err.to_string().contains("LIQ, DoReFa"), "{err}");
    }

    #[test]
    fn test_strategy_display() {
        for strategy in QuantStrategy::ALL {
            let name = strategy.to_string();
            assert_eq!(name.parse::<QuantStrategy>().unwrap(), strategy);
        }
        assert!(QuantStrategy::Liq.has_learned_clip());
        assert!(!QuantStrategy::Dorefa.has_learned_clip());
    }

    #[test]
    fn test_expect_bits() {
        assert_eq!(expect_bits(1), 1);
        assert_eq!(expect_bits(32), 32);
    }

    #[test]
    #[should_panic(expected = "bit-width must be in [1, 32], got 0")]
    fn test_expect_bits_zero() {
        expect_bits(0);
    }

    #[test]
    fn test_quant_config() {
        let config = QuantConfig::new();
        assert!(config.is_full_precision());
        assert_eq!(config.strategy, QuantStrategy::Liq);

        let config = config
            .with_bits_weights(4)
            .with_bits_activations(2)
            .with_strategy(QuantStrategy::Dorefa);
        assert!(!config.is_full_precision());

        let weights = config.weight_quantizer();
        assert_eq!(weights.bits, 4);
        assert_eq!(weights.domain, QuantDomain::Weights);
        assert_eq!(weights.strategy, QuantStrategy::Dorefa);

        let activations = config.activation_quantizer();
        assert_eq!(activations.bits, 2);
        assert_eq!(activations.domain, QuantDomain::Activations);
        assert_eq!(activations.clip_init, DEFAULT_ACTIVATION_CLIP);
    }

    #[test]
    fn test_strategy_quant_config() {
        let config = QuantStrategy::Dorefa.quant_config(4, 8);
        assert_eq!(config.strategy, QuantStrategy::Dorefa);
        assert_eq!(config.bits_weights, 4);
        assert_eq!(config.bits_activations, 8);
        assert_eq!(config.activation_clip, DEFAULT_ACTIVATION_CLIP);

        assert!(QuantStrategy::Liq.quant_config(32, 32).is_full_precision());
    }

    #[test]
    #[should_panic(expected = "bit-width must be in [1, 32], got 33")]
    fn test_strategy_quant_config_bad_bits() {
        QuantStrategy::Liq.quant_config(33, 8);
    }

    #[test]
    fn test_quant_config_json() {
        let config = QuantConfig::new()
            .with_bits_weights(3)
            .with_strategy(QuantStrategy::Dorefa);
        let json = serde_json::to_string(&config).unwrap();
        let loaded: QuantConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded.bits_weights, 3);
        assert_eq!(loaded.strategy, QuantStrategy::Dorefa);
    }
}
