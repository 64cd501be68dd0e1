//! # Basic Block for `QResNet`
//!
//! [`QBasicBlock`] is the two-conv `QResNet` residual unit.
//!
//! [`QBasicBlockMeta`] defines a common meta API for [`QBasicBlock`]
//! and [`QBasicBlockConfig`].
//!
//! [`QBasicBlockConfig`] implements [`Config`], and provides
//! [`QBasicBlockConfig::init`] to initialize a [`QBasicBlock`].
//!
//! [`QBasicBlock`] implements [`Module`], and provides
//! [`QBasicBlock::forward`].

use crate::layers::blocks::conv_norm::{QConvNorm2d, QConvNorm2dMeta};
use crate::layers::quant::strategy::QuantConfig;
use crate::models::qresnet::downsample::{QDownsample, QDownsampleConfig};
use crate::models::qresnet::util::{qconv_norm, stride_div_output_resolution};
use burn::prelude::{Backend, Config, Module, Tensor};
use burn::tensor::activation::relu;

/// Output width multiplier of a [`QBasicBlock`].
pub const BASIC_BLOCK_EXPANSION: usize = 1;

/// [`QBasicBlock`] Meta trait.
pub trait QBasicBlockMeta {
    /// The size of the in channels dimension.
    fn in_planes(&self) -> usize;

    /// The width of the inner convs.
    fn planes(&self) -> usize;

    /// The size of the out channels dimension.
    ///
    /// ``out_planes = planes * BASIC_BLOCK_EXPANSION``
    fn out_planes(&self) -> usize {
        self.planes() * BASIC_BLOCK_EXPANSION
    }

    /// The stride of the first conv.
    ///
    /// Affects downsample behavior.
    fn stride(&self) -> usize;

    /// Weight bit-width.
    fn bits_weights(&self) -> usize;

    /// Activation bit-width.
    fn bits_activations(&self) -> usize;

    /// Get the output resolution for a given input resolution.
    ///
    /// The input must be a multiple of the stride.
    ///
    /// # Arguments
    ///
    /// - `input_resolution`: \
    ///   ``[in_height=out_height*stride, in_width=out_width*stride]``.
    ///
    /// # Returns
    ///
    /// ``[out_height, out_width]``
    ///
    /// # Panics
    ///
    /// If the input resolution is not a multiple of the stride.
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        stride_div_output_resolution(input_resolution, self.stride())
    }

    /// Does the residual path need a [`QDownsample`]?
    fn needs_downsample(&self) -> bool {
        self.stride() != 1 || self.in_planes() != self.out_planes()
    }
}

/// [`QBasicBlock`] Config.
///
/// Implements [`QBasicBlockMeta`].
#[derive(Config, Debug)]
pub struct QBasicBlockConfig {
    /// The size of the in channels dimension.
    pub in_planes: usize,

    /// The width of the inner convs.
    pub planes: usize,

    /// The stride of the first conv.
    #[config(default = 1)]
    pub stride: usize,

    /// Quantization settings for every conv in the block.
    #[config(default = "QuantConfig::new()")]
    pub quant: QuantConfig,
}

impl QBasicBlockMeta for QBasicBlockConfig {
    fn in_planes(&self) -> usize {
        self.in_planes
    }

    fn planes(&self) -> usize {
        self.planes
    }

    fn stride(&self) -> usize {
        self.stride
    }

    fn bits_weights(&self) -> usize {
        self.quant.bits_weights
    }

    fn bits_activations(&self) -> usize {
        self.quant.bits_activations
    }
}

impl QBasicBlockConfig {
    /// Initialize a [`QBasicBlock`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> QBasicBlock<B> {
        let downsample = if self.needs_downsample() {
            QDownsampleConfig::new(self.in_planes, self.out_planes())
                .with_stride(self.stride)
                .with_quant(self.quant.clone())
                .init(device)
                .into()
        } else {
            None
        };

        QBasicBlock {
            downsample,
            conv_norm1: qconv_norm(self.in_planes, self.planes, 3, self.stride, &self.quant)
                .init(device),
            conv_norm2: qconv_norm(self.planes, self.out_planes(), 3, 1, &self.quant)
                .init(device),
        }
    }
}

/// Basic Block for `QResNet`.
///
/// Implements [`QBasicBlockMeta`].
#[derive(Module, Debug)]
pub struct QBasicBlock<B: Backend> {
    /// Optional `QDownsample` layer; for the residual connection.
    pub downsample: Option<QDownsample<B>>,

    /// First conv/norm; carries the stride.
    pub conv_norm1: QConvNorm2d<B>,

    /// Second conv/norm.
    pub conv_norm2: QConvNorm2d<B>,
}

impl<B: Backend> QBasicBlockMeta for QBasicBlock<B> {
    fn in_planes(&self) -> usize {
        self.conv_norm1.in_channels()
    }

    fn planes(&self) -> usize {
        self.conv_norm1.out_channels()
    }

    fn out_planes(&self) -> usize {
        self.conv_norm2.out_channels()
    }

    fn stride(&self) -> usize {
        self.conv_norm1.stride()[0]
    }

    fn bits_weights(&self) -> usize {
        self.conv_norm1.bits_weights()
    }

    fn bits_activations(&self) -> usize {
        self.conv_norm1.bits_activations()
    }
}

impl<B: Backend> QBasicBlock<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_planes, in_height=out_height*stride, in_width=out_width*stride]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, out_planes, out_height, out_width]`` tensor.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        #[cfg(debug_assertions)]
        let [batch, out_height, out_width] = bimm_contracts::unpack_shape_contract!(
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

        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(input.clone()),
            None => input.clone(),
        };

        let x = relu(self.conv_norm1.forward(input));
        let x = self.conv_norm2.forward(x);
        let x = relu(x + identity);

        #[cfg(debug_assertions)]
        bimm_contracts::assert_shape_contract_periodically!(
            ["batch", "out_planes", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("out_planes", self.out_planes()),
                ("out_height", out_height),
                ("out_width", out_width),
            ]
        );

        x
    }
}
