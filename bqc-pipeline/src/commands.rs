//! Command bodies shared by the binaries and the integration tests

use crate::correction::{CorrectionRunner, CorrectionStep};
use bqc_common::artifacts::{ArtifactGenerator, ArtifactSettings, Plane, SliceRenderer};
use bqc_common::config::QcConfig;
use bqc_common::gate::SelectionGate;
use bqc_common::layout::ResultsLayout;
use bqc_common::ledger::ReviewLedger;
use bqc_common::results::ProcessingResultStore;
use bqc_common::scanner::{DatasetScanner, ScanFilter};
use bqc_common::worklist::BatchSummary;
use bqc_common::{Phase, Result};
use std::path::PathBuf;
use tracing::info;

/// Options of `initial-struct`
#[derive(Debug, Clone, Default)]
pub struct InitialOptions {
    pub bids_root: PathBuf,
    pub force: bool,
    pub subjects: Vec<String>,
    pub sessions: Vec<String>,
    /// Overrides the configured planes when non-empty
    pub planes: Vec<Plane>,
}

/// Options of `final-struct`
#[derive(Debug, Clone, Default)]
pub struct FinalOptions {
    pub bids_root: PathBuf,
    pub force: bool,
    pub subjects: Vec<String>,
}

fn scan_filter(config: &QcConfig, subjects: &[String], sessions: &[String]) -> ScanFilter {
    ScanFilter::new(config.modality.clone())
        .with_subjects(subjects.iter().cloned())
        .with_sessions(sessions.iter().cloned())
}

/// Scan the dataset and render raw-stage artifacts
///
/// Fatal errors (invalid dataset) are returned; per-item render failures
/// only show up in the summary.
pub fn run_initial(
    config: &QcConfig,
    options: &InitialOptions,
    renderer: &dyn SliceRenderer,
) -> Result<BatchSummary> {
    let layout = ResultsLayout::new(&options.bids_root);
    let scanner = DatasetScanner::new(scan_filter(config, &options.subjects, &options.sessions));
    let items = scanner.scan(&options.bids_root)?;
    info!("Found {} {} scans", items.len(), config.modality);

    let mut settings = ArtifactSettings::from_config(config, options.force);
    if !options.planes.is_empty() {
        settings.planes = options.planes.clone();
    }
    let generator = ArtifactGenerator::new(&layout, renderer, settings);
    let report = generator.generate_all(items, config.parallel);
    Ok(report.log_summary())
}

/// Gate approved scans through the correction pipeline
///
/// A corrupt initial ledger or an unwritable results table is fatal; step
/// failures are recorded per item in `processing_results.csv`.
pub fn run_final(
    config: &QcConfig,
    options: &FinalOptions,
    renderer: &dyn SliceRenderer,
    bias_correction: &dyn CorrectionStep,
    skull_strip: &dyn CorrectionStep,
) -> Result<BatchSummary> {
    let layout = ResultsLayout::new(&options.bids_root);
    let scanner = DatasetScanner::new(scan_filter(config, &options.subjects, &[]));
    let items = scanner.scan(&options.bids_root)?;

    let snapshot = ReviewLedger::open(&layout).load(Phase::Initial)?;
    let decision = SelectionGate::from_config(&config.gate).select(&items, &snapshot);
    for (item, reason) in &decision.excluded {
        info!("Excluded {} ({})", item.key, reason);
    }

    let generator = ArtifactGenerator::new(
        &layout,
        renderer,
        ArtifactSettings::from_config(config, options.force),
    );
    let runner = CorrectionRunner::new(&layout, bias_correction, skull_strip, &generator, options.force);

    let approved = decision.approved.clone();
    let report = runner.run_all(decision.approved, config.parallel);
    let results = runner.results(&approved, &report);

    let store = ProcessingResultStore::open(&layout);
    store.upsert_many(&results)?;
    info!("Processing results written to {}", store.path().display());

    Ok(report.log_summary())
}
