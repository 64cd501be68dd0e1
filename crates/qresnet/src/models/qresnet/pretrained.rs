//! # Named `QResNet` Constructors
//!
//! [`qresnet`] builds a [`QResNet`] of a standard [`ResNetDepth`], and
//! optionally loads the ``torchvision`` ImageNet checkpoint for that
//! architecture, downloaded through the [`DiskCacheConfig`] cache.
//!
//! [`qresnet18`], [`qresnet34`], [`qresnet50`], [`qresnet101`] and
//! [`qresnet152`] are shorthands.

use crate::cache::disk::DiskCacheConfig;
use crate::models::qresnet::prefabs::{DEFAULT_PRETRAINED_WEIGHTS, PREFAB_QRESNET_MAP};
use crate::models::qresnet::resnet_io::pytorch_stubs::load_pytorch_weights;
use crate::models::qresnet::resnet_model::{QResNet, QResNetOptions, ResNetDepth};
use anyhow::bail;
use burn::prelude::Backend;

/// Number of classes of the ImageNet checkpoints.
pub const PRETRAINED_NUM_CLASSES: usize = 1000;

/// Build a [`QResNet`] of the given depth.
///
/// # Arguments
///
/// - `depth`: the architecture.
/// - `pretrained`: load the ImageNet checkpoint for the architecture.
/// - `options`: classes and quantization options.
/// - `device`: the target device.
///
/// # Errors
///
/// - `pretrained` with ``options.num_classes != 1000``.
/// - download or checkpoint decoding failures.
pub fn qresnet<B: Backend>(
    depth: ResNetDepth,
    pretrained: bool,
    options: QResNetOptions,
    device: &B::Device,
) -> anyhow::Result<QResNet<B>> {
    qresnet_with_cache(depth, pretrained, options, &DiskCacheConfig::default(), device)
}

/// Build a [`QResNet`] of the given depth, with an explicit weights cache.
///
/// See [`qresnet`].
pub fn qresnet_with_cache<B: Backend>(
    depth: ResNetDepth,
    pretrained: bool,
    options: QResNetOptions,
    disk_cache: &DiskCacheConfig,
    device: &B::Device,
) -> anyhow::Result<QResNet<B>> {
    if pretrained && options.num_classes != PRETRAINED_NUM_CLASSES {
        bail!(
            "pretrained {} weights have {} classes; got num_classes={}",
            depth,
            PRETRAINED_NUM_CLASSES,
            options.num_classes
        );
    }

    let prefab = PREFAB_QRESNET_MAP.try_lookup_prefab(depth.name())?;
    let model: QResNet<B> = prefab
        .to_config()
        .with_options(options)
        .to_structure()
        .init(device);

    if !pretrained {
        return Ok(model);
    }

    let weights = prefab.try_lookup_pretrained_weights(DEFAULT_PRETRAINED_WEIGHTS)?;
    let path = weights.fetch_weights(disk_cache)?;

    tracing::info!(
        model = %depth,
        weights = %weights.name,
        path = %path.display(),
        "loading pretrained weights"
    );

    load_pytorch_weights(model, path)
}

/// Build a quantized ResNet-18.
pub fn qresnet18<B: Backend>(
    pretrained: bool,
    options: QResNetOptions,
    device: &B::Device,
) -> anyhow::Result<QResNet<B>> {
    qresnet(ResNetDepth::D18, pretrained, options, device)
}

/// Build a quantized ResNet-34.
pub fn qresnet34<B: Backend>(
    pretrained: bool,
    options: QResNetOptions,
    device: &B::Device,
) -> anyhow::Result<QResNet<B>> {
    qresnet(ResNetDepth::D34, pretrained, options, device)
}

/// Build a quantized ResNet-50.
pub fn qresnet50<B: Backend>(
    pretrained: bool,
    options: QResNetOptions,
    device: &B::Device,
) -> anyhow::Result<QResNet<B>> {
    qresnet(ResNetDepth::D50, pretrained, options, device)
}

/// Build a quantized ResNet-101.
pub fn qresnet101<B: Backend>(
    pretrained: bool,
    options: QResNetOptions,
    device: &B::Device,
) -> anyhow::Result<QResNet<B>> {
    qresnet(ResNetDepth::D101, pretrained, options, device)
}

/// Build a quantized ResNet-152.
pub fn qresnet152<B: Backend>(
    pretrained: bool,
    options: QResNetOptions,
    device: &B::Device,
) -> anyhow::Result<QResNet<B>> {
    qresnet(ResNetDepth::D152, pretrained, options, device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::quant::qlinear::QLinearMeta;
    use crate::models::qresnet::layer_block::LayerBlockMeta;
    use crate::models::qresnet::resnet_model::QResNetMeta;
    use burn::backend::NdArray;
    use burn::module::Module;
    use burn::prelude::Tensor;

    type B = NdArray;

    #[test]
    fn test_pretrained_requires_default_classes() {
        let device = Default::default();

        let cache_dir = tempfile::tempdir().unwrap();
        let disk_cache = DiskCacheConfig::default().with_cache_home(Some(cache_dir.path().into()));

        let err = qresnet_with_cache::<B>(
            ResNetDepth::D18,
            true,
            QResNetOptions::new().with_num_classes(10),
            &disk_cache,
            &device,
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "pretrained resnet18 weights have 1000 classes; got num_classes=10"
        );

        // Nothing was downloaded.
        assert_eq!(std::fs::read_dir(cache_dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_qresnet18() {
        let device = Default::default();

        let options = QResNetOptions::new()
            .with_num_classes(10)
            .with_bits_weights(4)
            .with_bits_activations(4);
        let model: QResNet<B> = qresnet18(false, options, &device).unwrap();

        assert_eq!(model.num_classes(), 10);
        assert_eq!(model.output_fc.d_input(), 512);
        assert_eq!(
            model.layers.iter().map(|l| l.len()).collect::<Vec<_>>(),
            vec![2, 2, 2, 2]
        );
        // 11,689,512 less the ImageNet head, plus a 10-class head and 38 clips.
        assert_eq!(
            model.num_params(),
            11_689_512 - (512 * 1000 + 1000) + (512 * 10 + 10) + 38
        );
    }

    #[test]
    fn test_qresnet_depth_tables() {
        let device = Default::default();
        let num_classes = 7;

        for depth in ResNetDepth::ALL {
            let options = QResNetOptions::new()
                .with_num_classes(num_classes)
                .with_bits_weights(4)
                .with_bits_activations(4);
            let model: QResNet<B> = qresnet(depth, false, options, &device).unwrap();

            assert_eq!(
                model.layers.iter().map(|l| l.len()).collect::<Vec<_>>(),
                depth.layers().to_vec(),
                "{depth}"
            );
            assert_eq!(model.head_planes(), 512 * depth.expansion(), "{depth}");
            assert_eq!(model.num_classes(), num_classes, "{depth}");

            let output = model.forward(Tensor::ones([1, 3, 32, 32], &device));
            assert_eq!(output.dims(), [1, num_classes], "{depth}");
        }
    }
}
