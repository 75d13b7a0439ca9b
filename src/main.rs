//! chipseg: trains a U-Net on a directory of image chips.
//!
//!   chipseg run.json [--epochs N] [--data-dir DIR] [--save-model model.json]
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use chipseg::model::ModelContract;
use chipseg::{ChipDirectoryGenerator, RunConfig, Split, Trainer, UnetVariant};

#[derive(Debug, Parser)]
#[command(name = "chipseg", version, about = "Train a U-Net on satellite image chips")]
struct Cli {
    /// Run configuration (JSON).
    config: PathBuf,

    /// Overrides `epochs` from the configuration.
    #[arg(long)]
    epochs: Option<usize>,

    /// Overrides `data_dir` from the configuration.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Writes the trained model here as JSON.
    #[arg(long)]
    save_model: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = RunConfig::load_json(&cli.config)
        .with_context(|| format!("loading run configuration {}", cli.config.display()))?;
    if let Some(epochs) = cli.epochs {
        config.epochs = epochs;
    }
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    let variant = UnetVariant::from(config.architecture.clone());
    let generator = ChipDirectoryGenerator::new(config.num_classes);
    let sink = config.tracking.open().context("opening tracking sink")?;

    let mut trainer = Trainer::init_run(variant, &generator, sink, &config)
        .with_context(|| format!("initializing run on {}", config.data_dir.display()))?;
    info!(run = trainer.run_name(), "training");

    trainer.fit(config.epochs).context("training")?;

    let sample = trainer.get_val_sample(config.val_sample_size).context("drawing validation sample")?;
    let ious = sample.ious(0.5, &[0, 1])?;
    let val_iou = ious.iter().sum::<f64>() / ious.len().max(1) as f64;
    trainer.log(&[("val/iou", val_iou)])?;

    let report = trainer.evaluate(Split::Test).context("evaluating test partition")?;
    trainer.log(&[("test/loss", report.mean_loss), ("test/iou", report.mean_iou)])?;
    info!(
        model = %trainer.contract().get_name()?,
        val_iou,
        test_loss = report.mean_loss,
        test_iou = report.mean_iou,
        "done"
    );

    if let Some(path) = &cli.save_model {
        trainer
            .model()
            .save_json(path)
            .with_context(|| format!("saving model to {}", path.display()))?;
        info!(path = %path.display(), "model saved");
    }

    trainer.finish()?;
    Ok(())
}
