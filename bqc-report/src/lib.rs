//! bqc-report library - QC summary report
//!
//! Joins the current scan with both review ledgers, the selection gate and
//! the processing results into `results/report/report.csv` and
//! `results/report/report.html`. Ledgers and results are only read.

use bqc_common::artifacts::{read_stats, Plane};
use bqc_common::config::QcConfig;
use bqc_common::gate::{ExclusionReason, SelectionGate};
use bqc_common::layout::ResultsLayout;
use bqc_common::ledger::ReviewLedger;
use bqc_common::model::{ProcessingStatus, VolumeStats};
use bqc_common::results::ProcessingResultStore;
use bqc_common::scanner::{DatasetScanner, ScanFilter};
use bqc_common::source::{artifact_links, ArtifactLink};
use bqc_common::table::replace_file;
use bqc_common::{CandidateItem, Error, Phase, ProcessingResult, Rating, Result, ReviewRecord, Stage};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub mod html;

/// Everything known about one scanned item
#[derive(Debug, Clone)]
pub struct ReportItem {
    pub item: CandidateItem,
    pub initial: Option<ReviewRecord>,
    /// `None` when the gate approved the item
    pub exclusion: Option<ExclusionReason>,
    pub processing: Option<ProcessingResult>,
    pub final_review: Option<ReviewRecord>,
    /// Intensity statistics of the raw scan
    pub stats: Option<VolumeStats>,
    /// Montages that exist on disk, raw first
    pub montages: Vec<ArtifactLink>,
}

impl ReportItem {
    pub fn approved(&self) -> bool {
        self.exclusion.is_none()
    }

    /// Processing result recorded before the item was re-rated out of the
    /// approved set
    pub fn superseded(&self) -> bool {
        !self.approved() && self.processing.is_some()
    }

    /// Processing result that still counts
    pub fn current_processing(&self) -> Option<&ProcessingResult> {
        self.processing.as_ref().filter(|_| self.approved())
    }

    /// Processing column label; empty when the item never ran
    pub fn processing_label(&self) -> &'static str {
        if self.superseded() {
            "superseded"
        } else {
            status_str(self.current_processing())
        }
    }
}

/// Counts per rating category, `unrated` included
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RatingCounts {
    pub pass: usize,
    pub fail: usize,
    pub uncertain: usize,
    pub unrated: usize,
}

impl RatingCounts {
    fn add(&mut self, record: Option<&ReviewRecord>) {
        match record.map(|r| r.rating) {
            Some(Rating::Pass) => self.pass += 1,
            Some(Rating::Fail) => self.fail += 1,
            Some(Rating::Uncertain) => self.uncertain += 1,
            None => self.unrated += 1,
        }
    }

    pub fn get(&self, rating: Option<Rating>) -> usize {
        match rating {
            Some(Rating::Pass) => self.pass,
            Some(Rating::Fail) => self.fail,
            Some(Rating::Uncertain) => self.uncertain,
            None => self.unrated,
        }
    }

    pub fn total(&self) -> usize {
        self.pass + self.fail + self.uncertain + self.unrated
    }
}

/// Aggregate counts shown at the top of the report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportSummary {
    /// Initial review over every scanned item
    pub initial: RatingCounts,
    /// Final review over successfully processed items
    pub final_review: RatingCounts,
    pub approved: usize,
    pub excluded: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Approved items with no processing result yet
    pub not_processed: usize,
    /// Excluded items whose earlier processing result is ignored
    pub superseded: usize,
}

impl ReportSummary {
    fn from_items(items: &[ReportItem]) -> Self {
        let mut summary = Self::default();
        for entry in items {
            summary.initial.add(entry.initial.as_ref());
            if entry.approved() {
                summary.approved += 1;
            } else {
                summary.excluded += 1;
            }
            if entry.superseded() {
                summary.superseded += 1;
            }
            match entry.current_processing().map(|r| r.status) {
                Some(ProcessingStatus::Succeeded) => {
                    summary.succeeded += 1;
                    summary.final_review.add(entry.final_review.as_ref());
                }
                Some(ProcessingStatus::Failed) => summary.failed += 1,
                None if entry.approved() => summary.not_processed += 1,
                None => {}
            }
        }
        summary
    }
}

/// Joined view of a dataset's QC state
#[derive(Debug, Clone)]
pub struct Report {
    pub bids_root: PathBuf,
    pub generated_at: DateTime<Utc>,
    pub items: Vec<ReportItem>,
    pub summary: ReportSummary,
}

/// Files written by [`write_report`]
#[derive(Debug, Clone)]
pub struct ReportPaths {
    pub csv: PathBuf,
    pub html: PathBuf,
}

/// Gather the scan, ledgers, gate decision and processing results
pub fn build_report(config: &QcConfig, bids_root: &Path) -> Result<Report> {
    let layout = ResultsLayout::new(bids_root);
    let items = DatasetScanner::new(ScanFilter::new(config.modality.clone())).scan(bids_root)?;

    let ledger = ReviewLedger::open(&layout);
    let mut initial = ledger.load(Phase::Initial)?;
    let mut final_review = ledger.load(Phase::Final)?;
    let decision = SelectionGate::from_config(&config.gate).select(&items, &initial);
    let mut results = ProcessingResultStore::open(&layout).load()?;
    debug!(
        "Report inputs: {} items, {} initial, {} final, {} results",
        items.len(),
        initial.len(),
        final_review.len(),
        results.len()
    );

    let items: Vec<ReportItem> = items
        .into_iter()
        .map(|item| {
            let montages = montages(&layout, &item, &config.planes);
            ReportItem {
                stats: read_stats(&layout.stats_path(&item.key, Stage::Raw)),
                initial: initial.remove(&item.key),
                exclusion: decision.exclusion_for(&item.key),
                processing: results.remove(&item.key),
                final_review: final_review.remove(&item.key),
                montages,
                item,
            }
        })
        .collect();

    let summary = ReportSummary::from_items(&items);
    Ok(Report {
        bids_root: bids_root.to_path_buf(),
        generated_at: bqc_common::time::now(),
        items,
        summary,
    })
}

fn montages(layout: &ResultsLayout, item: &CandidateItem, planes: &[Plane]) -> Vec<ArtifactLink> {
    let mut links = artifact_links(layout, item, Stage::Raw, planes);
    links.extend(artifact_links(layout, item, Stage::Skullstripped, planes));
    links.retain(|link| link.present);
    links
}

/// One `report.csv` row
#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    subject: &'a str,
    session: &'a str,
    modality: &'a str,
    scan: &'a str,
    initial_rating: &'a str,
    initial_annotation: &'a str,
    gate: &'static str,
    exclusion_reason: String,
    processing_status: &'static str,
    failed_step: &'a str,
    error: &'a str,
    final_rating: &'a str,
    final_annotation: &'a str,
    intensity_mean: Option<f64>,
    intensity_median: Option<f64>,
    intensity_min: Option<f64>,
    intensity_max: Option<f64>,
    intensity_std: Option<f64>,
}

fn rating_str(record: Option<&ReviewRecord>) -> &'static str {
    record.map(|r| r.rating.as_str()).unwrap_or("")
}

fn annotation_str(record: Option<&ReviewRecord>) -> &str {
    record.map(|r| r.annotation.as_str()).unwrap_or("")
}

fn status_str(result: Option<&ProcessingResult>) -> &'static str {
    match result.map(|r| r.status) {
        Some(ProcessingStatus::Succeeded) => "succeeded",
        Some(ProcessingStatus::Failed) => "failed",
        None => "",
    }
}

impl<'a> From<&'a ReportItem> for CsvRow<'a> {
    fn from(entry: &'a ReportItem) -> Self {
        let key = &entry.item.key;
        let processing = entry.current_processing();
        let stats = entry.stats.as_ref();
        Self {
            subject: &key.subject,
            session: key.session.as_deref().unwrap_or(""),
            modality: &key.modality,
            scan: &key.scan,
            initial_rating: rating_str(entry.initial.as_ref()),
            initial_annotation: annotation_str(entry.initial.as_ref()),
            gate: if entry.approved() { "approved" } else { "excluded" },
            exclusion_reason: entry.exclusion.map(|r| r.to_string()).unwrap_or_default(),
            processing_status: entry.processing_label(),
            failed_step: processing.and_then(|r| r.failed_step.as_deref()).unwrap_or(""),
            error: processing.and_then(|r| r.error.as_deref()).unwrap_or(""),
            final_rating: rating_str(entry.final_review.as_ref()),
            final_annotation: annotation_str(entry.final_review.as_ref()),
            intensity_mean: stats.map(|s| s.mean),
            intensity_median: stats.map(|s| s.median),
            intensity_min: stats.map(|s| s.min),
            intensity_max: stats.map(|s| s.max),
            intensity_std: stats.map(|s| s.std),
        }
    }
}

fn write_csv(path: &Path, report: &Report) -> Result<()> {
    replace_file(path, |file| {
        let mut writer = csv::Writer::from_writer(file);
        for entry in &report.items {
            writer.serialize(CsvRow::from(entry))?;
        }
        writer.flush()?;
        Ok::<(), Error>(())
    })
}

/// Write both report files under `results/report/`
pub fn write_report(layout: &ResultsLayout, report: &Report) -> Result<ReportPaths> {
    let dir = layout.report_dir();
    let paths = ReportPaths {
        csv: dir.join("report.csv"),
        html: dir.join("report.html"),
    };

    write_csv(&paths.csv, report)?;
    let page = html::render(report);
    replace_file(&paths.html, |file| {
        use std::io::Write;
        file.write_all(page.as_bytes())
    })
    .map_err(Error::from)?;

    info!(
        "Report: {} items ({} approved, {} excluded, {} processed OK, {} failed)",
        report.items.len(),
        report.summary.approved,
        report.summary.excluded,
        report.summary.succeeded,
        report.summary.failed
    );
    Ok(paths)
}
