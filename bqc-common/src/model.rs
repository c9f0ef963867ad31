//! Core data model shared by scanner, ledger, pipeline and report

use crate::natural::natural_cmp;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Identity of one reviewable scan
///
/// `scan` is the source path relative to the BIDS root with `/`
/// separators, which makes keys unique within a scan pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemKey {
    pub subject: String,
    pub session: Option<String>,
    pub modality: String,
    pub scan: String,
}

impl ItemKey {
    /// File name of the scan with `.nii.gz` / `.nii` removed
    pub fn stem(&self) -> &str {
        let name = self.scan.rsplit('/').next().unwrap_or(&self.scan);
        strip_nifti_extension(name)
    }

    /// Session label for display (`-` when the dataset has no sessions)
    pub fn session_label(&self) -> &str {
        self.session.as_deref().unwrap_or("-")
    }
}

impl Ord for ItemKey {
    fn cmp(&self, other: &Self) -> Ordering {
        natural_cmp(&self.subject, &other.subject)
            .then_with(|| {
                natural_cmp(
                    self.session.as_deref().unwrap_or(""),
                    other.session.as_deref().unwrap_or(""),
                )
            })
            .then_with(|| natural_cmp(&self.scan, &other.scan))
            .then_with(|| self.modality.cmp(&other.modality))
    }
}

impl PartialOrd for ItemKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.scan)
    }
}

/// Remove a trailing `.nii.gz` or `.nii`
pub fn strip_nifti_extension(name: &str) -> &str {
    name.strip_suffix(".nii.gz")
        .or_else(|| name.strip_suffix(".nii"))
        .unwrap_or(name)
}

/// Processing stage of a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Raw,
    Corrected,
    Skullstripped,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Raw => "raw",
            Stage::Corrected => "corrected",
            Stage::Skullstripped => "skullstripped",
        }
    }
}

/// Review stage: raw scans or post-processing outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Initial,
    Final,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Initial => "initial",
            Phase::Final => "final",
        }
    }

    /// Stage whose artifacts are reviewed in this phase
    pub fn reviewed_stage(&self) -> Stage {
        match self {
            Phase::Initial => Stage::Raw,
            Phase::Final => Stage::Skullstripped,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reviewer decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    Pass,
    Fail,
    Uncertain,
}

impl Rating {
    pub const ALL: [Rating; 3] = [Rating::Pass, Rating::Fail, Rating::Uncertain];

    pub fn as_str(&self) -> &'static str {
        match self {
            Rating::Pass => "pass",
            Rating::Fail => "fail",
            Rating::Uncertain => "uncertain",
        }
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Rating {
    type Err = Error;

    /// Accepts the current names plus the GOOD/BAD/UNCLEAR vocabulary
    /// older hand-written ledgers use
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pass" | "good" => Ok(Rating::Pass),
            "fail" | "bad" => Ok(Rating::Fail),
            "uncertain" | "unclear" => Ok(Rating::Uncertain),
            other => Err(Error::InvalidInput(format!("Unknown rating: {}", other))),
        }
    }
}

/// One reviewable scan found by the dataset scanner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateItem {
    pub key: ItemKey,
    /// Absolute path of the volume under review
    pub source: PathBuf,
    pub stage: Stage,
}

/// Reviewer decision for one item in one phase
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewRecord {
    pub key: ItemKey,
    pub phase: Phase,
    pub rating: Rating,
    pub annotation: String,
    pub reviewed_at: DateTime<Utc>,
}

/// Outcome of the correction pipeline for one item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Succeeded,
    Failed,
}

/// Correction pipeline result for one approved item
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingResult {
    pub key: ItemKey,
    pub source: PathBuf,
    pub corrected: Option<PathBuf>,
    pub skullstripped: Option<PathBuf>,
    pub status: ProcessingStatus,
    pub failed_step: Option<String>,
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl ProcessingResult {
    pub fn succeeded(&self) -> bool {
        self.status == ProcessingStatus::Succeeded
    }
}

/// Voxel intensity summary of a volume
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeStats {
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub std: f64,
}
