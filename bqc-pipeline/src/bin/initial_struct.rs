//! initial-struct - render review montages for raw BIDS structural scans
//!
//! Exit code is the number of items that failed to render (capped at 255).

use anyhow::Result;
use bqc_common::artifacts::{NiftiSliceRenderer, Plane};
use bqc_common::config::QcConfig;
use bqc_pipeline::{run_initial, InitialOptions};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "initial-struct", version, about = "Render slice montages for raw structural scans")]
struct Args {
    /// BIDS dataset root
    bids_root: PathBuf,

    /// Re-render even when montages are up to date
    #[arg(long)]
    force: bool,

    /// Only these subjects (with or without `sub-`)
    #[arg(long, num_args = 1..)]
    subjects: Vec<String>,

    /// Only these sessions (with or without `ses-`)
    #[arg(long, num_args = 1..)]
    sessions: Vec<String>,

    /// Planes to render: axial, sagittal, coronal
    #[arg(long, num_args = 1..)]
    planes: Vec<Plane>,

    /// Scan suffix to review, overriding the config (e.g. T2w)
    #[arg(long)]
    modality: Option<String>,

    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let (mut config, config_source) = QcConfig::load(args.config.as_deref(), &args.bids_root)?;
    if let Some(modality) = args.modality {
        config.modality = modality;
    }
    bqc_common::logging::init(&config.logging)?;

    info!("Starting initial-struct v{}", env!("CARGO_PKG_VERSION"));
    QcConfig::log_source(config_source.as_deref());

    let options = InitialOptions {
        bids_root: args.bids_root,
        force: args.force,
        subjects: args.subjects,
        sessions: args.sessions,
        planes: args.planes,
    };
    let summary = run_initial(&config, &options, &NiftiSliceRenderer)?;

    Ok(ExitCode::from(summary.exit_code()))
}
