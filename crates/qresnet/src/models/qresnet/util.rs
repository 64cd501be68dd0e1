//! # `QResNet` Utilities
use crate::layers::blocks::conv_norm::QConvNorm2dConfig;
use crate::layers::quant::strategy::QuantConfig;
use bimm_contracts::unpack_shape_contract;
use burn::nn::conv::Conv2dConfig;
use burn::nn::{Initializer, PaddingConfig2d};

/// Kaiming normal, ``fan_out``, ``relu`` gain.
pub static CONV_INTO_RELU_INITIALIZER: Initializer = Initializer::KaimingNormal {
    gain: std::f64::consts::SQRT_2,
    fan_out_only: true,
};

/// Get the output resolution for a given input resolution.
///
/// The input must be a multiple of the stride.
///
/// # Arguments
///
/// - `input_resolution`: ``[height_in=height_out*stride, width_in=width_out*stride]``.
///
/// # Returns
///
/// ``[height_out, width_out]``
///
/// # Panics
///
/// If the input resolution is not a multiple of the stride.
#[inline(always)]
pub fn stride_div_output_resolution(
    input_resolution: [usize; 2],
    stride: usize,
) -> [usize; 2] {
    unpack_shape_contract!(
        [
            "in_height" = "out_height" * "stride",
            "in_width" = "out_width" * "stride"
        ],
        &input_resolution,
        &["out_height", "out_width"],
        &[("stride", stride)]
    )
}

/// Square, bias-free conv/norm config, padded to preserve resolution at stride 1.
///
/// # Arguments
///
/// - `in_planes`: input channels.
/// - `out_planes`: output channels.
/// - `kernel_size`: an odd kernel size.
/// - `stride`: the conv stride.
/// - `quant`: quantization settings for the conv.
pub fn qconv_norm(
    in_planes: usize,
    out_planes: usize,
    kernel_size: usize,
    stride: usize,
    quant: &QuantConfig,
) -> QConvNorm2dConfig {
    let padding = kernel_size / 2;
    QConvNorm2dConfig::from(
        quant.conv(
            Conv2dConfig::new([in_planes, out_planes], [kernel_size, kernel_size])
                .with_stride([stride, stride])
                .with_padding(PaddingConfig2d::Explicit(padding, padding))
                .with_bias(false),
        ),
    )
    .with_initializer(CONV_INTO_RELU_INITIALIZER.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::blocks::conv_norm::QConvNorm2dMeta;
    use crate::layers::quant::qconv::QConv2dMeta;

    #[test]
    fn test_stride_div_output_resolution() {
        assert_eq!(stride_div_output_resolution([8, 12], 1), [8, 12]);
        assert_eq!(stride_div_output_resolution([8, 12], 2), [4, 6]);
        assert_eq!(stride_div_output_resolution([56, 56], 2), [28, 28]);
    }

    #[test]
    #[should_panic(expected = "7 !~ in_height=(out_height*stride)")]
    fn test_stride_div_output_resolution_panic() {
        stride_div_output_resolution([7, 8], 2);
    }

    #[test]
    fn test_qconv_norm() {
        let quant = QuantConfig::new().with_bits_weights(4);

        let config = qconv_norm(16, 32, 3, 2, &quant);
        assert_eq!(config.in_channels(), 16);
        assert_eq!(config.out_channels(), 32);
        assert_eq!(config.stride(), [2, 2]);
        assert_eq!(config.conv.padding(), [1, 1]);
        assert_eq!(config.conv.kernel_size(), [3, 3]);
        assert_eq!(config.bits_weights(), 4);
        assert!(!config.conv.conv.bias);
        assert!(matches!(
            config.conv.conv.initializer,
            Initializer::KaimingNormal {
                fan_out_only: true,
                ..
            }
        ));

        let config = qconv_norm(16, 64, 1, 1, &quant);
        assert_eq!(config.conv.padding(), [0, 0]);
        assert_eq!(config.conv.kernel_size(), [1, 1]);
    }
}
