//! final-struct - bias-correct and skull-strip approved scans
//!
//! Only scans rated with an approved category in the initial review are
//! processed. Exit code is the number of failed items (capped at 255).

use anyhow::Result;
use bqc_common::artifacts::NiftiSliceRenderer;
use bqc_common::config::QcConfig;
use bqc_pipeline::correction::{STEP_BIAS_CORRECTION, STEP_SKULL_STRIP};
use bqc_pipeline::{run_final, CommandStep, FinalOptions};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "final-struct", version, about = "Run bias correction and skull stripping on approved scans")]
struct Args {
    /// BIDS dataset root
    bids_root: PathBuf,

    /// Re-run both steps even when outputs are up to date
    #[arg(long)]
    force: bool,

    /// Only these subjects (with or without `sub-`)
    #[arg(long, num_args = 1..)]
    subjects: Vec<String>,

    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let (config, config_source) = QcConfig::load(args.config.as_deref(), &args.bids_root)?;
    bqc_common::logging::init(&config.logging)?;

    info!("Starting final-struct v{}", env!("CARGO_PKG_VERSION"));
    QcConfig::log_source(config_source.as_deref());

    let bias = CommandStep::new(STEP_BIAS_CORRECTION, config.pipeline.bias_correction.clone());
    let strip = CommandStep::new(STEP_SKULL_STRIP, config.pipeline.skull_strip.clone());
    info!("Bias correction: {}", config.pipeline.bias_correction.program);
    info!("Skull stripping: {}", config.pipeline.skull_strip.program);

    let options = FinalOptions {
        bids_root: args.bids_root,
        force: args.force,
        subjects: args.subjects,
    };
    let summary = run_final(&config, &options, &NiftiSliceRenderer, &bias, &strip)?;

    Ok(ExitCode::from(summary.exit_code()))
}
