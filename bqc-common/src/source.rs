//! Reviewable item sources
//!
//! The annotation server works against a [`ReviewSource`] and never needs
//! to know whether it is showing raw scans or pipeline outputs.

use crate::artifacts::{read_stats, Plane};
use crate::gate::SelectionGate;
use crate::layout::ResultsLayout;
use crate::ledger::ReviewLedger;
use crate::model::{CandidateItem, ItemKey, Phase, Stage, VolumeStats};
use crate::results::ProcessingResultStore;
use crate::scanner::{DatasetScanner, ScanFilter};
use crate::Result;
use std::collections::HashSet;
use std::path::PathBuf;

/// One montage shown on the review page
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactLink {
    /// e.g. `raw axial`
    pub label: String,
    /// Path relative to `results/`
    pub url: String,
    /// Whether the file exists right now
    pub present: bool,
}

/// Item as presented for review
#[derive(Debug, Clone)]
pub struct ReviewItem {
    pub item: CandidateItem,
    pub artifacts: Vec<ArtifactLink>,
    pub stats: Option<VolumeStats>,
}

/// Where the items of a review phase come from
pub trait ReviewSource: Send + Sync {
    /// Ledger phase submissions are written to
    fn phase(&self) -> Phase;

    /// Heading shown in the UI
    fn title(&self) -> &'static str;

    /// Current items in scan order
    fn items(&self) -> Result<Vec<ReviewItem>>;
}

/// Montage links of one item and stage, one per plane, then the
/// intensity histogram
pub fn artifact_links(
    layout: &ResultsLayout,
    item: &CandidateItem,
    stage: Stage,
    planes: &[Plane],
) -> Vec<ArtifactLink> {
    let montages = planes.iter().map(|&plane| {
        (
            format!("{} {}", stage.as_str(), plane.as_str()),
            layout.slice_path(&item.key, stage, plane),
        )
    });
    let histogram = (
        format!("{} intensity histogram", stage.as_str()),
        layout.histogram_path(&item.key, stage),
    );
    montages
        .chain([histogram])
        .filter_map(|(label, path)| {
            Some(ArtifactLink {
                url: layout.relative_url(&path)?,
                present: path.exists(),
                label,
            })
        })
        .collect()
}

/// Raw scans of the dataset (initial review)
#[derive(Debug, Clone)]
pub struct RawScanSource {
    layout: ResultsLayout,
    scanner: DatasetScanner,
    planes: Vec<Plane>,
}

impl RawScanSource {
    pub fn new(layout: ResultsLayout, filter: ScanFilter, planes: Vec<Plane>) -> Self {
        Self {
            layout,
            scanner: DatasetScanner::new(filter),
            planes,
        }
    }
}

impl ReviewSource for RawScanSource {
    fn phase(&self) -> Phase {
        Phase::Initial
    }

    fn title(&self) -> &'static str {
        "Initial review (raw scans)"
    }

    fn items(&self) -> Result<Vec<ReviewItem>> {
        let stage = self.phase().reviewed_stage();
        let items = self.scanner.scan(self.layout.bids_root())?;
        Ok(items
            .into_iter()
            .map(|item| ReviewItem {
                artifacts: artifact_links(&self.layout, &item, stage, &self.planes),
                stats: read_stats(&self.layout.stats_path(&item.key, stage)),
                item,
            })
            .collect())
    }
}

/// Successful correction outputs of items the gate still approves
///
/// A processing result stays on disk when its item is later re-rated out
/// of the approved set; such rows are not offered for final review.
#[derive(Debug, Clone)]
pub struct ProcessedOutputSource {
    layout: ResultsLayout,
    scanner: DatasetScanner,
    gate: SelectionGate,
    ledger: ReviewLedger,
    store: ProcessingResultStore,
    planes: Vec<Plane>,
}

impl ProcessedOutputSource {
    pub fn new(
        layout: ResultsLayout,
        filter: ScanFilter,
        gate: SelectionGate,
        planes: Vec<Plane>,
    ) -> Self {
        Self {
            scanner: DatasetScanner::new(filter),
            gate,
            ledger: ReviewLedger::open(&layout),
            store: ProcessingResultStore::open(&layout),
            layout,
            planes,
        }
    }

    /// Keys the gate approves under the current initial-phase ledger
    fn approved_keys(&self) -> Result<HashSet<ItemKey>> {
        let items = self.scanner.scan(self.layout.bids_root())?;
        let snapshot = self.ledger.load(Phase::Initial)?;
        let decision = self.gate.select(&items, &snapshot);
        Ok(decision.approved.into_iter().map(|item| item.key).collect())
    }
}

impl ReviewSource for ProcessedOutputSource {
    fn phase(&self) -> Phase {
        Phase::Final
    }

    fn title(&self) -> &'static str {
        "Final review (skull-stripped outputs)"
    }

    fn items(&self) -> Result<Vec<ReviewItem>> {
        let stage = self.phase().reviewed_stage();
        let approved = self.approved_keys()?;
        let results = self.store.load()?;
        Ok(results
            .into_values()
            .filter(|r| r.succeeded() && approved.contains(&r.key))
            .map(|r| {
                let source: PathBuf = r
                    .skullstripped
                    .clone()
                    .unwrap_or_else(|| self.layout.skullstripped_path(&r.key));
                let item = CandidateItem {
                    key: r.key,
                    source,
                    stage,
                };
                let mut artifacts = artifact_links(&self.layout, &item, stage, &self.planes);
                artifacts.extend(artifact_links(&self.layout, &item, Stage::Raw, &self.planes));
                ReviewItem {
                    stats: read_stats(&self.layout.stats_path(&item.key, stage)),
                    artifacts,
                    item,
                }
            })
            .collect())
    }
}
