#![recursion_limit = "256"]
//! Build a `QResNet` and log its structure and parameter counts.

use burn::backend::NdArray;
use burn::config::Config;
use burn::module::Module;
use clap::Parser;
use qresnet::cache::disk::DiskCacheConfig;
use qresnet::layers::blocks::conv_norm::QConvNorm2dMeta;
use qresnet::layers::quant::qlinear::QLinearMeta;
use qresnet::layers::quant::strategy::{FULL_PRECISION_BITS, QuantStrategy};
use qresnet::models::qresnet::layer_block::LayerBlockMeta;
use qresnet::models::qresnet::pretrained::qresnet_with_cache;
use qresnet::models::qresnet::resnet_model::{
    QResNet, QResNetAbstractConfig, QResNetMeta, QResNetOptions, ResNetDepth,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Network depth: 18, 34, 50, 101, or 152.
    #[arg(long, default_value = "18")]
    depth: ResNetDepth,

    /// Weight bit-width of the body convs.
    #[arg(long, default_value_t = 32, value_parser = parse_bits)]
    bits_weights: usize,

    /// Activation bit-width of the body convs.
    #[arg(long, default_value_t = 32, value_parser = parse_bits)]
    bits_activations: usize,

    /// Quantization strategy: LIQ or DoReFa.
    #[arg(long, default_value = "LIQ")]
    quan_type: QuantStrategy,

    /// Also quantize the stem conv and the classifier.
    #[arg(long, default_value_t = false)]
    quantize_first_last: bool,

    /// Number of classification classes.
    #[arg(long, default_value_t = 1000)]
    num_classes: usize,

    /// Load the ImageNet checkpoint.
    #[arg(long, default_value_t = false)]
    pretrained: bool,

    /// Override the weights cache home; defaults to ``~/.cache``.
    #[arg(long)]
    cache_home: Option<PathBuf>,

    /// Write the model config as JSON.
    #[arg(long)]
    save_config: Option<PathBuf>,
}

fn parse_bits(s: &str) -> Result<usize, String> {
    let bits: usize = s.parse().map_err(|e| format!("{e}"))?;
    if !(1..=FULL_PRECISION_BITS).contains(&bits) {
        return Err(format!("bit-width must be in [1, {FULL_PRECISION_BITS}]"));
    }
    Ok(bits)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

fn log_summary<B: burn::prelude::Backend>(model: &QResNet<B>) {
    let stem = &model.input_conv_norm;
    tracing::info!(
        in_channels = stem.in_channels(),
        out_channels = stem.out_channels(),
        bits_weights = stem.bits_weights(),
        bits_activations = stem.bits_activations(),
        params = stem.num_params(),
        "stem"
    );

    for (idx, layer) in model.layers.iter().enumerate() {
        tracing::info!(
            stage = idx + 1,
            blocks = layer.len(),
            in_planes = layer.in_planes(),
            out_planes = layer.out_planes(),
            stride = layer.stride(),
            params = layer.num_params(),
            "stage"
        );
    }

    let head = &model.output_fc;
    tracing::info!(
        d_input = head.d_input(),
        num_classes = head.d_output(),
        bits_weights = head.bits_weights(),
        bits_activations = head.bits_activations(),
        params = head.num_params(),
        "head"
    );

    tracing::info!(
        stride = model.stride(),
        params = model.num_params(),
        "total"
    );
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    type B = NdArray<f32>;
    let device = Default::default();

    let options = QResNetOptions::new()
        .with_num_classes(args.num_classes)
        .with_bits_weights(args.bits_weights)
        .with_bits_activations(args.bits_activations)
        .with_quan_type(args.quan_type)
        .with_quantize_first_last(args.quantize_first_last);

    if let Some(path) = &args.save_config {
        QResNetAbstractConfig::for_depth(args.depth)
            .with_options(options.clone())
            .save(path)?;
        tracing::info!(path = %path.display(), "saved config");
    }

    let disk_cache = DiskCacheConfig::new().with_cache_home(args.cache_home.clone());

    tracing::info!(
        model = %args.depth,
        strategy = %args.quan_type,
        bits_weights = args.bits_weights,
        bits_activations = args.bits_activations,
        quantize_first_last = args.quantize_first_last,
        pretrained = args.pretrained,
        "building"
    );

    let model: QResNet<B> =
        qresnet_with_cache(args.depth, args.pretrained, options, &disk_cache, &device)?;

    log_summary(&model);

    Ok(())
}
