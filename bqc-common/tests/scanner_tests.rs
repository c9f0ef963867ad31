//! Dataset scanner tests over throwaway BIDS trees

use bqc_common::scanner::{DatasetScanner, ScanFilter};
use bqc_common::Error;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

fn touch(root: &Path, rel: &str) {
    let p = root.join(rel);
    fs::create_dir_all(p.parent().unwrap()).unwrap();
    fs::write(p, b"x").unwrap();
}

fn dataset() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    fs::write(root.join("dataset_description.json"), "{}").unwrap();
    for sub in ["sub-10", "sub-2", "sub-1"] {
        touch(root, &format!("{sub}/anat/{sub}_T1w.nii.gz"));
        touch(root, &format!("{sub}/anat/{sub}_T1w.json"));
        touch(root, &format!("{sub}/anat/{sub}_T2w.nii.gz"));
    }
    touch(root, "sub-3/ses-a/anat/sub-3_ses-a_T1w.nii");
    touch(root, "sub-3/ses-b/anat/sub-3_ses-b_T1w.nii");
    dir
}

#[test]
fn test_natural_order() {
    let dir = dataset();
    let items = DatasetScanner::new(ScanFilter::new("T1w")).scan(dir.path()).unwrap();
    let scans: Vec<_> = items.iter().map(|i| i.key.scan.as_str()).collect();
    assert_eq!(
        scans,
        vec![
            "sub-1/anat/sub-1_T1w.nii.gz",
            "sub-2/anat/sub-2_T1w.nii.gz",
            "sub-3/ses-a/anat/sub-3_ses-a_T1w.nii",
            "sub-3/ses-b/anat/sub-3_ses-b_T1w.nii",
            "sub-10/anat/sub-10_T1w.nii.gz",
        ]
    );
}

#[test]
fn test_scan_is_deterministic_and_keys_unique() {
    let dir = dataset();
    let scanner = DatasetScanner::new(ScanFilter::new("T1w"));
    let first = scanner.scan(dir.path()).unwrap();
    let second = scanner.scan(dir.path()).unwrap();
    assert_eq!(first, second);
    let keys: HashSet<_> = first.iter().map(|i| i.key.clone()).collect();
    assert_eq!(keys.len(), first.len());
}

#[test]
fn test_modality_filter() {
    let dir = dataset();
    let items = DatasetScanner::new(ScanFilter::new("T2w")).scan(dir.path()).unwrap();
    assert_eq!(items.len(), 3);
    assert!(items.iter().all(|i| i.key.modality == "T2w"));
}

#[test]
fn test_subject_and_session_filters() {
    let dir = dataset();
    let filter = ScanFilter::new("T1w").with_subjects(vec!["2".into(), "sub-3".into()]);
    let items = DatasetScanner::new(filter).scan(dir.path()).unwrap();
    assert_eq!(items.len(), 3);

    let filter = ScanFilter::new("T1w").with_sessions(vec!["b".into()]);
    let items = DatasetScanner::new(filter).scan(dir.path()).unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].key.session.as_deref(), Some("ses-b"));
}

#[test]
fn test_missing_root_is_invalid_dataset() {
    let dir = tempfile::tempdir().unwrap();
    let err = DatasetScanner::new(ScanFilter::new("T1w"))
        .scan(&dir.path().join("nope"))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidDataset { .. }));
}

#[test]
fn test_root_without_subjects_is_invalid_dataset() {
    let dir = tempfile::tempdir().unwrap();
    touch(dir.path(), "anat/scan_T1w.nii.gz");
    let err = DatasetScanner::new(ScanFilter::new("T1w"))
        .scan(dir.path())
        .unwrap_err();
    assert!(matches!(err, Error::InvalidDataset { .. }));
}

#[test]
fn test_results_dir_not_scanned() {
    let dir = dataset();
    touch(dir.path(), "results/pipeline/sub-1/sub-1_T1w.nii.gz");
    let items = DatasetScanner::new(ScanFilter::new("T1w")).scan(dir.path()).unwrap();
    assert_eq!(items.len(), 5);
}
