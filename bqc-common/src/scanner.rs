//! BIDS dataset scanner
//!
//! Read-only walk of a BIDS root producing candidate items in natural
//! key order. Same inputs always yield the same list, which keeps the UI,
//! the ledger file and the report in one stable order.

use crate::model::{strip_nifti_extension, CandidateItem, ItemKey, Stage};
use crate::{Error, Result};
use std::collections::HashSet;
use std::path::{Component, Path};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// Top-level directories that never hold raw scans
const SKIPPED_DIRS: &[&str] = &["results", "derivatives", "sourcedata", "code"];

/// Subject / session / modality filters
#[derive(Debug, Clone, Default)]
pub struct ScanFilter {
    /// Subject labels, with or without `sub-`; empty means all
    pub subjects: Vec<String>,
    /// Session labels, with or without `ses-`; empty means all
    pub sessions: Vec<String>,
    /// BIDS suffix, e.g. `T1w`
    pub modality: String,
}

impl ScanFilter {
    pub fn new(modality: impl Into<String>) -> Self {
        Self {
            modality: modality.into(),
            ..Self::default()
        }
    }

    pub fn with_subjects(mut self, subjects: impl IntoIterator<Item = String>) -> Self {
        self.subjects = subjects.into_iter().collect();
        self
    }

    pub fn with_sessions(mut self, sessions: impl IntoIterator<Item = String>) -> Self {
        self.sessions = sessions.into_iter().collect();
        self
    }

    fn accepts(&self, key: &ItemKey) -> bool {
        let subject_ok = self.subjects.is_empty()
            || self
                .subjects
                .iter()
                .any(|s| with_prefix("sub-", s) == key.subject);
        let session_ok = self.sessions.is_empty()
            || key.session.as_ref().is_some_and(|ses| {
                self.sessions.iter().any(|s| with_prefix("ses-", s) == *ses)
            });
        subject_ok && session_ok
    }
}

fn with_prefix(prefix: &str, label: &str) -> String {
    let label = label.trim();
    if label.starts_with(prefix) {
        label.to_string()
    } else {
        format!("{}{}", prefix, label)
    }
}

/// Dataset scanner
#[derive(Debug, Clone)]
pub struct DatasetScanner {
    filter: ScanFilter,
}

impl DatasetScanner {
    pub fn new(filter: ScanFilter) -> Self {
        Self { filter }
    }

    /// Check the root looks like a BIDS dataset
    pub fn validate_root(root: &Path) -> Result<()> {
        let invalid = |reason: &str| Error::InvalidDataset {
            path: root.to_path_buf(),
            reason: reason.to_string(),
        };
        if !root.exists() {
            return Err(invalid("path does not exist"));
        }
        if !root.is_dir() {
            return Err(invalid("not a directory"));
        }

        let has_subject = std::fs::read_dir(root)?
            .filter_map(|e| e.ok())
            .any(|e| {
                e.file_type().map(|t| t.is_dir()).unwrap_or(false)
                    && e.file_name().to_string_lossy().starts_with("sub-")
            });
        if !has_subject {
            return Err(invalid("no sub-<label> directories found"));
        }

        if !root.join("dataset_description.json").exists() {
            warn!(
                "{} has no dataset_description.json; continuing anyway",
                root.display()
            );
        }
        Ok(())
    }

    /// Enumerate candidate items under `root`, sorted by key
    pub fn scan(&self, root: &Path) -> Result<Vec<CandidateItem>> {
        Self::validate_root(root)?;

        let mut items = Vec::new();
        let walker = WalkDir::new(root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(should_descend);

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Error accessing entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(item) = self.candidate(root, entry.path()) {
                if self.filter.accepts(&item.key) {
                    items.push(item);
                }
            }
        }

        items.sort_by(|a, b| a.key.cmp(&b.key));
        drop_colliding_stems(&mut items);
        debug!("Scanned {}: {} candidate items", root.display(), items.len());
        Ok(items)
    }

    /// Build a candidate from a file path, if it is a scan of our modality
    fn candidate(&self, root: &Path, path: &Path) -> Option<CandidateItem> {
        let name = path.file_name()?.to_str()?;
        if !(name.ends_with(".nii.gz") || name.ends_with(".nii")) {
            return None;
        }
        let suffix = strip_nifti_extension(name).rsplit('_').next()?;
        if suffix != self.filter.modality {
            return None;
        }

        let rel = path.strip_prefix(root).ok()?;
        let parts: Vec<String> = rel
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        let dirs = &parts[..parts.len().saturating_sub(1)];
        let subject = dirs.iter().find(|p| p.starts_with("sub-"))?.clone();
        let session = dirs.iter().find(|p| p.starts_with("ses-")).cloned();

        Some(CandidateItem {
            key: ItemKey {
                subject,
                session,
                modality: self.filter.modality.clone(),
                scan: parts.join("/"),
            },
            source: path.to_path_buf(),
            stage: Stage::Raw,
        })
    }
}

/// Keep one item per (subject, session, stem)
///
/// Result paths are named from the stem, so `x_T1w.nii` next to
/// `x_T1w.nii.gz` would share montages and pipeline outputs. The first
/// item in key order wins.
fn drop_colliding_stems(items: &mut Vec<CandidateItem>) {
    let mut seen: HashSet<(String, Option<String>, String)> = HashSet::new();
    items.retain(|item| {
        let key = &item.key;
        let slot = (key.subject.clone(), key.session.clone(), key.stem().to_string());
        if seen.insert(slot) {
            true
        } else {
            warn!("Skipping {}: another scan has the same name stem", key);
            false
        }
    });
}

fn should_descend(entry: &DirEntry) -> bool {
    if entry.depth() == 0 {
        return true;
    }
    let name = entry.file_name().to_string_lossy();
    if name.starts_with('.') {
        return false;
    }
    if entry.depth() == 1 && entry.file_type().is_dir() {
        return !SKIPPED_DIRS.contains(&name.as_ref());
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(root: &Path, rel: &str) {
        let p = root.join(rel);
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, b"x").unwrap();
    }

    #[test]
    fn test_candidate_requires_modality_suffix() {
        let scanner = DatasetScanner::new(ScanFilter::new("T1w"));
        let root = Path::new("/bids");
        assert!(scanner
            .candidate(root, Path::new("/bids/sub-01/anat/sub-01_T1w.nii.gz"))
            .is_some());
        assert!(scanner
            .candidate(root, Path::new("/bids/sub-01/anat/sub-01_T2w.nii.gz"))
            .is_none());
        assert!(scanner
            .candidate(root, Path::new("/bids/sub-01/anat/sub-01_T1w.json"))
            .is_none());
    }

    #[test]
    fn test_key_fields() {
        let scanner = DatasetScanner::new(ScanFilter::new("T1w"));
        let item = scanner
            .candidate(
                Path::new("/bids"),
                Path::new("/bids/sub-01/ses-02/anat/sub-01_ses-02_run-1_T1w.nii"),
            )
            .unwrap();
        assert_eq!(item.key.subject, "sub-01");
        assert_eq!(item.key.session.as_deref(), Some("ses-02"));
        assert_eq!(item.key.scan, "sub-01/ses-02/anat/sub-01_ses-02_run-1_T1w.nii");
        assert_eq!(item.stage, Stage::Raw);
    }

    #[test]
    fn test_filter_accepts_unprefixed_labels() {
        let filter = ScanFilter::new("T1w")
            .with_subjects(vec!["01".to_string()])
            .with_sessions(vec!["ses-a".to_string()]);
        let key = ItemKey {
            subject: "sub-01".into(),
            session: Some("ses-a".into()),
            modality: "T1w".into(),
            scan: "x".into(),
        };
        assert!(filter.accepts(&key));
        let mut other = key.clone();
        other.session = None;
        assert!(!filter.accepts(&other));
    }

    #[test]
    fn test_hidden_and_results_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(root, "sub-01/anat/sub-01_T1w.nii.gz");
        touch(root, "results/sub-01/anat/sub-01_T1w.nii.gz");
        touch(root, "derivatives/sub-01/anat/sub-01_T1w.nii.gz");
        touch(root, ".git/sub-01_T1w.nii.gz");
        let items = DatasetScanner::new(ScanFilter::new("T1w")).scan(root).unwrap();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn test_colliding_stems_keep_first() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(root, "sub-1/anat/sub-1_T1w.nii");
        touch(root, "sub-1/anat/sub-1_T1w.nii.gz");
        touch(root, "sub-1/ses-a/anat/sub-1_T1w.nii.gz");
        let items = DatasetScanner::new(ScanFilter::new("T1w")).scan(root).unwrap();
        let scans: Vec<_> = items.iter().map(|i| i.key.scan.as_str()).collect();
        assert_eq!(
            scans,
            vec!["sub-1/anat/sub-1_T1w.nii", "sub-1/ses-a/anat/sub-1_T1w.nii.gz"]
        );
    }
}
