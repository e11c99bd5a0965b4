//! fundus - fundus disease identification CLI
//!
//! Usage:
//!   fundus identify image.jpg              Rank diseases detected in an image
//!   fundus explain image.jpg -o cam.png    Render a Grad-CAM overlay
//!   fundus labels                          List the disease taxonomy

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use fundus_core::{
    load_config, make_device, Config, ExplainOptions, FundusNet, FundusNetConfig,
    IdentifyPipeline, InferenceBridge, LabelCatalog, Prediction,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fundus", about = "Multi-label fundus disease identification")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Identify diseases in a fundus image
    Identify {
        /// Image file (JPEG or PNG)
        image: PathBuf,
        /// Confidence threshold; classes at or above it are reported
        #[arg(long)]
        threshold: Option<f32>,
        /// Emit results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Render a Grad-CAM overlay explaining a prediction
    Explain {
        /// Image file (JPEG or PNG)
        image: PathBuf,
        /// Output path for the PNG overlay
        #[arg(short, long, default_value = "gradcam.png")]
        output: PathBuf,
        /// Heatmap opacity in [0, 1]
        #[arg(long)]
        opacity: Option<f32>,
        /// Conv block to attribute (e.g. "block4"); defaults to the last one
        #[arg(long)]
        layer: Option<String>,
        /// Class index to explain; defaults to the top prediction
        #[arg(long)]
        class: Option<usize>,
    },
    /// List the disease label taxonomy
    Labels {
        /// Emit the catalog as JSON
        #[arg(long)]
        json: bool,
    },
}

fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "fundus").map(|dirs| dirs.config_dir().join("config.toml"))
}

fn resolve_config(cli_path: Option<PathBuf>) -> Result<Config> {
    let path = match cli_path.or_else(default_config_path) {
        Some(path) => path,
        None => return Ok(Config::default()),
    };
    load_config(&path).with_context(|| format!("failed to load config from {}", path.display()))
}

/// Load the model artifact and wire it to the catalog. Any failure here is
/// fatal: the process cannot serve without a model.
fn build_pipeline(config: &Config) -> Result<Arc<IdentifyPipeline>> {
    let weights = config
        .weights_path()
        .context("no model weights configured; set [model].weights in the config file")?;

    let device = make_device();
    let model_config = FundusNetConfig {
        image_size: config.image_size(),
        ..FundusNetConfig::odir()
    };
    let model = FundusNet::load(&weights, &model_config, &device)
        .context("model artifact failed to load")?;
    let pipeline = IdentifyPipeline::new(model, LabelCatalog::odir(), &device)?;
    Ok(Arc::new(pipeline))
}

fn print_predictions(results: &[Prediction], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(results)?);
        return Ok(());
    }
    for p in results {
        let code = p
            .label
            .category
            .map(|c| format!(" [{}]", c.code()))
            .unwrap_or_default();
        println!("{:>6.2}%  {}{}", p.probability * 100.0, p.label.name, code);
    }
    Ok(())
}

async fn run_identify(
    config: &Config,
    image: PathBuf,
    threshold: Option<f32>,
    json: bool,
) -> Result<()> {
    let pipeline = build_pipeline(config)?;
    let bridge = InferenceBridge::new(pipeline, config.workers(), config.queue_depth());

    let bytes = std::fs::read(&image)
        .with_context(|| format!("failed to read image {}", image.display()))?;
    let threshold = threshold.unwrap_or_else(|| config.default_threshold());

    let results = bridge.submit(bytes, threshold)?.join().await?;
    print_predictions(&results, json)
}

fn run_explain(
    config: &Config,
    image: PathBuf,
    output: PathBuf,
    opacity: Option<f32>,
    layer: Option<String>,
    class: Option<usize>,
) -> Result<()> {
    let pipeline = build_pipeline(config)?;
    let options = ExplainOptions {
        target_class: class,
        layer: layer.or_else(|| config.target_layer()),
        opacity: opacity.unwrap_or_else(|| config.default_opacity()),
    };

    let png = pipeline.explain_path(&image, &options)?;
    std::fs::write(&output, png)
        .with_context(|| format!("failed to write overlay to {}", output.display()))?;
    println!("wrote {}", output.display());
    Ok(())
}

fn run_labels(json: bool) -> Result<()> {
    let catalog = LabelCatalog::global();
    if json {
        let labels: Vec<_> = catalog.iter().collect();
        println!("{}", serde_json::to_string_pretty(&labels)?);
        return Ok(());
    }
    for label in catalog.iter() {
        let code = label
            .category
            .map(|c| format!(" [{}]", c.code()))
            .unwrap_or_default();
        println!("{:>3}  {}{}", label.index, label.name, code);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = resolve_config(cli.config.clone())?;

    match cli.command {
        Command::Identify {
            image,
            threshold,
            json,
        } => run_identify(&config, image, threshold, json).await,
        Command::Explain {
            image,
            output,
            opacity,
            layer,
            class,
        } => run_explain(&config, image, output, opacity, layer, class),
        Command::Labels { json } => run_labels(json),
    }
}
