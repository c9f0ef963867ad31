//! report-struct - summarise review and correction state of a dataset
//!
//! Writes `results/report/report.csv` and `results/report/report.html`.

use anyhow::Result;
use bqc_common::config::QcConfig;
use bqc_common::layout::ResultsLayout;
use bqc_report::{build_report, write_report};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "report-struct", version, about = "Write the QC summary report for a BIDS dataset")]
struct Args {
    /// BIDS dataset root
    bids_root: PathBuf,

    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let (config, config_source) = QcConfig::load(args.config.as_deref(), &args.bids_root)?;
    bqc_common::logging::init(&config.logging)?;

    info!("Starting report-struct v{}", env!("CARGO_PKG_VERSION"));
    QcConfig::log_source(config_source.as_deref());

    let report = build_report(&config, &args.bids_root)?;
    let paths = write_report(&ResultsLayout::new(&args.bids_root), &report)?;
    info!("Wrote {}", paths.csv.display());
    info!("Wrote {}", paths.html.display());
    Ok(())
}
