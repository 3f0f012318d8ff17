use anyhow::{ensure, Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::FmtSubscriber;

use conv_triage::{Config, TriageProcessor};

fn main() -> Result<()> {
    let config = Config::parse();

    FmtSubscriber::builder()
        .with_max_level(config.log_level())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!(
        model = %config.model,
        ckpt = %config.ckpt.display(),
        img_dir = %config.img_dir.display(),
        out_dir = %config.out_dir.display(),
        classes = config.nb_classes(),
        input_size = config.input_size,
        device = ?config.device,
        "starting"
    );

    let processor =
        TriageProcessor::with_onnx_model(config).context("Failed to initialize the classifier")?;
    let summary = processor.process_directory()?;

    for (dir, count) in &summary.copied {
        info!("{dir}: {count}");
    }
    info!(
        "{} of {} images copied",
        summary.copied_total(),
        summary.total
    );

    ensure!(
        summary.failed.is_empty(),
        "{} image(s) could not be processed",
        summary.failed.len()
    );
    Ok(())
}
