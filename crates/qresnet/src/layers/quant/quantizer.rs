//! # Fake Quantizers
//!
//! A [`Quantizer`] snaps its input onto a low bit-width grid in the forward
//! pass, and lets gradients through the rounding step unchanged
//! (straight-through estimation).
//!
//! [`QuantizerConfig`] implements [`Config`], and provides
//! [`QuantizerConfig::init`] to initialize a [`Quantizer`].
//!
//! At [`FULL_PRECISION_BITS`] a quantizer is the identity, and carries no
//! learnable state.

use crate::layers::quant::strategy::{
    FULL_PRECISION_BITS, QuantDomain, QuantStrategy, expect_bits,
};
use burn::config::Config;
use burn::module::{Ignored, Module, Param};
use burn::prelude::{Backend, Tensor};

/// Lower bound of weight-derived scales; all-zero weights would divide by zero.
pub const MIN_WEIGHT_SCALE: f32 = f32::EPSILON;

/// Round to the nearest integer, with an identity gradient.
///
/// ``x + detach(round(x) - x)``
pub fn round_ste<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    let delta = (x.clone().round() - x.clone()).detach();
    x + delta
}

/// Take the sign, with an identity gradient.
///
/// ``x + detach(sign(x) - x)``
pub fn sign_ste<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    let delta = (x.clone().sign() - x.clone()).detach();
    x + delta
}

/// Number of positive levels on a signed ``bits`` grid.
///
/// ``2^(bits-1) - 1``
pub fn signed_levels(bits: usize) -> f64 {
    2f64.powi(bits as i32 - 1) - 1.0
}

/// Number of levels above zero on an unsigned ``bits`` grid.
///
/// ``2^bits - 1``
pub fn unsigned_levels(bits: usize) -> f64 {
    2f64.powi(bits as i32) - 1.0
}

/// [`Quantizer`] Meta trait.
pub trait QuantizerMeta {
    /// The bit-width.
    fn bits(&self) -> usize;

    /// The quantization strategy.
    fn strategy(&self) -> QuantStrategy;

    /// The quantization domain.
    fn domain(&self) -> QuantDomain;

    /// Is this quantizer the identity?
    fn is_full_precision(&self) -> bool {
        self.bits() >= FULL_PRECISION_BITS
    }

    /// Does this quantizer carry a learned clip value?
    fn has_learned_clip(&self) -> bool {
        !self.is_full_precision() && self.strategy().has_learned_clip()
    }
}

/// [`Quantizer`] Config.
///
/// Implements [`QuantizerMeta`].
#[derive(Config, Debug)]
pub struct QuantizerConfig {
    /// The bit-width.
    pub bits: usize,

    /// The quantization strategy.
    #[config(default = "QuantStrategy::Liq")]
    pub strategy: QuantStrategy,

    /// The quantization domain.
    #[config(default = "QuantDomain::Weights")]
    pub domain: QuantDomain,

    /// Initial value of the learned clip, when the strategy has one.
    #[config(default = "1.0")]
    pub clip_init: f64,
}

impl QuantizerMeta for QuantizerConfig {
    fn bits(&self) -> usize {
        self.bits
    }

    fn strategy(&self) -> QuantStrategy {
        self.strategy
    }

    fn domain(&self) -> QuantDomain {
        self.domain
    }
}

impl QuantizerConfig {
    /// Initialize a [`Quantizer`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Quantizer<B> {
        let bits = expect_bits(self.bits);
        assert!(
            self.clip_init > 0.0,
            "clip_init must be positive, got {}",
            self.clip_init
        );

        Quantizer {
            bits,
            strategy: Ignored(self.strategy),
            domain: Ignored(self.domain),
            clip: if self.has_learned_clip() {
                Some(Param::from_tensor(Tensor::full([1], self.clip_init, device)))
            } else {
                None
            },
        }
    }
}

/// Fake quantization layer.
///
/// Implements [`QuantizerMeta`].
#[derive(Module, Debug)]
pub struct Quantizer<B: Backend> {
    /// The bit-width.
    pub bits: usize,

    /// The quantization strategy.
    pub strategy: Ignored<QuantStrategy>,

    /// The quantization domain.
    pub domain: Ignored<QuantDomain>,

    /// The learned clip value; ``[1]``.
    pub clip: Option<Param<Tensor<B, 1>>>,
}

impl<B: Backend> QuantizerMeta for Quantizer<B> {
    fn bits(&self) -> usize {
        self.bits
    }

    fn strategy(&self) -> QuantStrategy {
        *self.strategy
    }

    fn domain(&self) -> QuantDomain {
        *self.domain
    }
}

impl<B: Backend> Quantizer<B> {
    /// The current clip value, if any.
    pub fn clip_value(&self) -> Option<Tensor<B, 1>> {
        self.clip.as_ref().map(|clip| clip.val())
    }

    /// Re-derive a learned weight clip from a reference tensor.
    ///
    /// The clip becomes ``max(|reference|)``, floored at [`MIN_WEIGHT_SCALE`].
    /// Quantizers without a learned weight clip are returned unchanged.
    pub fn with_clip_from<const D: usize>(
        self,
        reference: &Tensor<B, D>,
    ) -> Self {
        if self.domain() != QuantDomain::Weights {
            return self;
        }
        let max_abs = reference
            .clone()
            .abs()
            .max()
            .clamp_min(MIN_WEIGHT_SCALE)
            .detach();
        Self {
            clip: self.clip.map(|clip| {
                clip.map(|current| max_abs.set_require_grad(current.is_require_grad()))
            }),
            ..self
        }
    }

    /// Quantize a tensor.
    ///
    /// # Arguments
    ///
    /// - `input`: a tensor of any shape.
    ///
    /// # Returns
    ///
    /// A tensor of the same shape, with values on the quantization grid.
    pub fn quantize<const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        if self.is_full_precision() {
            return input;
        }

        match (self.strategy(), self.domain()) {
            (QuantStrategy::Liq, QuantDomain::Weights) => self.liq_weights(input),
            (QuantStrategy::Liq, QuantDomain::Activations) => self.liq_activations(input),
            (QuantStrategy::Dorefa, QuantDomain::Weights) => self.dorefa_weights(input),
            (QuantStrategy::Dorefa, QuantDomain::Activations) => self.dorefa_activations(input),
        }
    }

    fn learned_clip<const D: usize>(&self) -> Tensor<B, D> {
        match self.clip_value() {
            Some(clip) => clip.unsqueeze::<D>(),
            None => panic!(
                "{} {:?} quantizer at {} bits has no learned clip",
                self.strategy(),
                self.domain(),
                self.bits
            ),
        }
    }

    fn liq_weights<const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        let alpha = self.learned_clip::<D>();
        let x = (input / alpha.clone()).clamp(-1.0, 1.0);
        let x = if self.bits == 1 {
            sign_ste(x)
        } else {
            let n = signed_levels(self.bits);
            round_ste(x * n) / n
        };
        x * alpha
    }

    fn liq_activations<const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        let beta = self.learned_clip::<D>();
        let x = (input / beta.clone()).clamp(0.0, 1.0);
        let n = unsigned_levels(self.bits);
        round_ste(x * n) / n * beta
    }

    fn dorefa_weights<const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        if self.bits == 1 {
            let scale = input.clone().abs().mean().detach().unsqueeze::<D>();
            return sign_ste(input) * scale;
        }
        let x = input.tanh();
        let max_abs = x
            .clone()
            .abs()
            .max()
            .clamp_min(MIN_WEIGHT_SCALE)
            .unsqueeze::<D>();
        let x = x / (max_abs * 2.0) + 0.5;
        let n = unsigned_levels(self.bits);
        round_ste(x * n) / n * 2.0 - 1.0
    }

    fn dorefa_activations<const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        let n = unsigned_levels(self.bits);
        round_ste(input.clamp(0.0, 1.0) * n) / n
    }
}
