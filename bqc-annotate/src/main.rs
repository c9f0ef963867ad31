//! annotate-struct - review UI for BIDS structural QC
//!
//! Serves slice montages and a rating form; ratings are written to the
//! initial ledger, or with `--final` to the final ledger over the
//! correction pipeline's skull-stripped outputs.

use anyhow::Result;
use bqc_annotate::{bind, build_router, AppState};
use bqc_common::config::QcConfig;
use bqc_common::gate::SelectionGate;
use bqc_common::layout::ResultsLayout;
use bqc_common::scanner::{DatasetScanner, ScanFilter};
use bqc_common::source::{ProcessedOutputSource, RawScanSource, ReviewSource};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "annotate-struct", version, about = "Review and rate BIDS structural scans in the browser")]
struct Args {
    /// BIDS dataset root
    bids_root: PathBuf,

    /// Review correction outputs instead of raw scans
    #[arg(long = "final")]
    final_review: bool,

    /// Port to listen on (default from config, 8080)
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind (default from config, 127.0.0.1)
    #[arg(long)]
    host: Option<String>,

    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Only review these subjects (with or without `sub-`)
    #[arg(long, num_args = 1..)]
    subjects: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (config, config_source) = QcConfig::load(args.config.as_deref(), &args.bids_root)?;
    bqc_common::logging::init(&config.logging)?;

    info!(
        "Starting annotate-struct v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    QcConfig::log_source(config_source.as_deref());

    DatasetScanner::validate_root(&args.bids_root)?;
    let layout = ResultsLayout::new(&args.bids_root);

    let filter = ScanFilter::new(config.modality.clone()).with_subjects(args.subjects.clone());
    let source: Arc<dyn ReviewSource> = if args.final_review {
        Arc::new(ProcessedOutputSource::new(
            layout.clone(),
            filter,
            SelectionGate::from_config(&config.gate),
            config.planes.clone(),
        ))
    } else {
        Arc::new(RawScanSource::new(layout.clone(), filter, config.planes.clone()))
    };
    info!("Phase: {}", source.phase());
    info!("Ledger: {}", layout.ledger_path(source.phase()).display());

    let state = AppState::new(source, layout, config.server.page_size)?;
    let app = build_router(state);

    let host = args.host.unwrap_or(config.server.host);
    let port = args.port.unwrap_or(config.server.port);
    let listener = bind(&host, port).await?;
    info!("annotate-struct listening on http://{}:{}", host, port);
    info!("Health check: http://{}:{}/health", host, port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("annotate-struct stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
