//! Results directory layout
//!
//! Every file the QC commands write lives under `<bids_root>/results/`,
//! named deterministically from the item key:
//!
//! ```text
//! results/
//!   slices/<stage>/<sub>/[<ses>/]<stem>_<plane>.png
//!   slices/<stage>/<sub>/[<ses>/]<stem>_histogram.png
//!   slices/<stage>/<sub>/[<ses>/]<stem>_stats.csv
//!   ledger/<phase>.csv
//!   pipeline/<sub>/[<ses>/]<stem>_desc-biascorrected.nii.gz
//!   pipeline/<sub>/[<ses>/]<stem>_desc-skullstripped.nii.gz
//!   pipeline/processing_results.csv
//!   report/report.html, report/report.csv
//! ```

use crate::artifacts::Plane;
use crate::model::{ItemKey, Phase, Stage};
use std::path::{Path, PathBuf};

/// Name of the results directory nested in the BIDS root
pub const RESULTS_DIR: &str = "results";

/// Path builder for everything under `results/`
#[derive(Debug, Clone)]
pub struct ResultsLayout {
    bids_root: PathBuf,
    root: PathBuf,
}

impl ResultsLayout {
    pub fn new(bids_root: &Path) -> Self {
        Self {
            bids_root: bids_root.to_path_buf(),
            root: bids_root.join(RESULTS_DIR),
        }
    }

    pub fn bids_root(&self) -> &Path {
        &self.bids_root
    }

    /// `<bids_root>/results`
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn item_dir(&self, base: PathBuf, key: &ItemKey) -> PathBuf {
        let mut dir = base.join(&key.subject);
        if let Some(session) = &key.session {
            dir.push(session);
        }
        dir
    }

    /// Directory holding slice montages for one item and stage
    pub fn slice_dir(&self, key: &ItemKey, stage: Stage) -> PathBuf {
        self.item_dir(self.root.join("slices").join(stage.as_str()), key)
    }

    /// Montage PNG for one (item, stage, plane)
    pub fn slice_path(&self, key: &ItemKey, stage: Stage, plane: Plane) -> PathBuf {
        self.slice_dir(key, stage)
            .join(format!("{}_{}.png", key.stem(), plane.as_str()))
    }

    /// Intensity histogram PNG for one (item, stage)
    pub fn histogram_path(&self, key: &ItemKey, stage: Stage) -> PathBuf {
        self.slice_dir(key, stage)
            .join(format!("{}_histogram.png", key.stem()))
    }

    /// Intensity statistics CSV for one (item, stage)
    pub fn stats_path(&self, key: &ItemKey, stage: Stage) -> PathBuf {
        self.slice_dir(key, stage)
            .join(format!("{}_stats.csv", key.stem()))
    }

    pub fn ledger_dir(&self) -> PathBuf {
        self.root.join("ledger")
    }

    /// Ledger table for one review phase
    pub fn ledger_path(&self, phase: Phase) -> PathBuf {
        self.ledger_dir().join(format!("{}.csv", phase.as_str()))
    }

    /// Directory holding correction outputs for one item
    pub fn pipeline_dir(&self, key: &ItemKey) -> PathBuf {
        self.item_dir(self.root.join("pipeline"), key)
    }

    pub fn corrected_path(&self, key: &ItemKey) -> PathBuf {
        self.pipeline_dir(key)
            .join(format!("{}_desc-biascorrected.nii.gz", key.stem()))
    }

    pub fn skullstripped_path(&self, key: &ItemKey) -> PathBuf {
        self.pipeline_dir(key)
            .join(format!("{}_desc-skullstripped.nii.gz", key.stem()))
    }

    /// Table of correction outcomes
    pub fn processing_results_path(&self) -> PathBuf {
        self.root.join("pipeline").join("processing_results.csv")
    }

    pub fn report_dir(&self) -> PathBuf {
        self.root.join("report")
    }

    /// Path of `path` relative to the results root, with `/` separators,
    /// for use in URLs and report links. `None` if outside `results/`.
    pub fn relative_url(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ItemKey {
        ItemKey {
            subject: "sub-01".into(),
            session: Some("ses-02".into()),
            modality: "T1w".into(),
            scan: "sub-01/ses-02/anat/sub-01_ses-02_T1w.nii.gz".into(),
        }
    }

    #[test]
    fn test_slice_path_is_keyed_by_stage_and_plane() {
        let layout = ResultsLayout::new(Path::new("/data/bids"));
        let path = layout.slice_path(&key(), Stage::Raw, Plane::Axial);
        assert_eq!(
            path,
            PathBuf::from("/data/bids/results/slices/raw/sub-01/ses-02/sub-01_ses-02_T1w_axial.png")
        );
    }

    #[test]
    fn test_sessionless_item_dir() {
        let layout = ResultsLayout::new(Path::new("/data/bids"));
        let mut k = key();
        k.session = None;
        k.scan = "sub-01/anat/sub-01_T1w.nii".into();
        assert_eq!(
            layout.skullstripped_path(&k),
            PathBuf::from("/data/bids/results/pipeline/sub-01/sub-01_T1w_desc-skullstripped.nii.gz")
        );
    }

    #[test]
    fn test_ledger_paths_per_phase() {
        let layout = ResultsLayout::new(Path::new("/d"));
        assert_eq!(layout.ledger_path(Phase::Initial), PathBuf::from("/d/results/ledger/initial.csv"));
        assert_eq!(layout.ledger_path(Phase::Final), PathBuf::from("/d/results/ledger/final.csv"));
    }

    #[test]
    fn test_relative_url() {
        let layout = ResultsLayout::new(Path::new("/d"));
        let p = layout.slice_path(&key(), Stage::Skullstripped, Plane::Coronal);
        assert_eq!(
            layout.relative_url(&p).unwrap(),
            "slices/skullstripped/sub-01/ses-02/sub-01_ses-02_T1w_coronal.png"
        );
        assert!(layout.relative_url(Path::new("/elsewhere/x.png")).is_none());
    }
}
