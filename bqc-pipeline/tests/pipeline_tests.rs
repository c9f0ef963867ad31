//! Batch command tests with a fake renderer and fake correction steps
//!
//! No NIfTI decoding or external tools are involved: the renderer writes
//! placeholder files and the steps copy their input.

use bqc_common::artifacts::{Histogram, Plane, RenderError, RenderOutput, RenderRequest, SliceRenderer};
use bqc_common::config::QcConfig;
use bqc_common::layout::ResultsLayout;
use bqc_common::ledger::ReviewLedger;
use bqc_common::model::VolumeStats;
use bqc_common::results::ProcessingResultStore;
use bqc_common::{Error, ItemKey, Phase, Rating, Stage};
use bqc_pipeline::correction::{STEP_BIAS_CORRECTION, STEP_RENDER, STEP_SKULL_STRIP};
use bqc_pipeline::{run_final, run_initial, CorrectionStep, FinalOptions, InitialOptions, StepError};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::SystemTime;
use tempfile::TempDir;

/// Writes a marker file per montage; sources containing `corrupt` fail
#[derive(Default)]
struct FakeRenderer {
    calls: AtomicUsize,
}

impl SliceRenderer for FakeRenderer {
    fn render(&self, source: &Path, request: &RenderRequest<'_>) -> Result<RenderOutput, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let content = fs::read(source)?;
        if content.starts_with(b"corrupt") {
            return Err(RenderError::Decode("bad header".into()));
        }
        for (plane, dest) in request.targets {
            fs::create_dir_all(dest.parent().unwrap())?;
            fs::write(dest, plane.as_str())?;
        }
        Ok(RenderOutput {
            stats: VolumeStats {
                mean: 1.0,
                median: 1.0,
                min: 0.0,
                max: 2.0,
                std: 0.5,
            },
            histogram: Histogram::from_values(&[0.0, 1.0, 2.0], 8),
        })
    }
}

/// Copies input to output; fails for inputs whose path contains `fail_on`
struct CopyStep {
    name: &'static str,
    fail_on: Option<&'static str>,
    calls: AtomicUsize,
}

impl CopyStep {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            fail_on: None,
            calls: AtomicUsize::new(0),
        }
    }

    fn failing_on(name: &'static str, pattern: &'static str) -> Self {
        Self {
            fail_on: Some(pattern),
            ..Self::new(name)
        }
    }
}

impl CorrectionStep for CopyStep {
    fn name(&self) -> &str {
        self.name
    }

    fn run(&self, input: &Path, output: &Path) -> Result<(), StepError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(pattern) = self.fail_on {
            if input.to_string_lossy().contains(pattern) {
                return Err(StepError::Exit {
                    program: self.name.to_string(),
                    status: "exit status: 1".into(),
                    stderr: "tool crashed".into(),
                });
            }
        }
        fs::copy(input, output)?;
        Ok(())
    }
}

fn scan(n: u32) -> String {
    format!("sub-{n}/anat/sub-{n}_T1w.nii.gz")
}

fn key(n: u32) -> ItemKey {
    ItemKey {
        subject: format!("sub-{}", n),
        session: None,
        modality: "T1w".into(),
        scan: scan(n),
    }
}

fn dataset(contents: &[&[u8]]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("dataset_description.json"), "{}").unwrap();
    for (i, content) in contents.iter().enumerate() {
        let p = dir.path().join(scan(i as u32 + 1));
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, content).unwrap();
    }
    dir
}

fn config() -> QcConfig {
    QcConfig {
        planes: vec![Plane::Axial, Plane::Sagittal, Plane::Coronal],
        ..QcConfig::default()
    }
}

fn initial(root: &Path) -> InitialOptions {
    InitialOptions {
        bids_root: root.to_path_buf(),
        ..InitialOptions::default()
    }
}

fn final_opts(root: &Path) -> FinalOptions {
    FinalOptions {
        bids_root: root.to_path_buf(),
        ..FinalOptions::default()
    }
}

fn mtimes(layout: &ResultsLayout, n: u32) -> Vec<SystemTime> {
    [Plane::Axial, Plane::Sagittal, Plane::Coronal]
        .iter()
        .map(|&p| {
            fs::metadata(layout.slice_path(&key(n), Stage::Raw, p))
                .unwrap()
                .modified()
                .unwrap()
        })
        .collect()
}

// =============================================================================
// initial-struct
// =============================================================================

#[test]
fn test_initial_renders_every_plane() {
    let dir = dataset(&[b"ok", b"ok", b"ok"]);
    let layout = ResultsLayout::new(dir.path());
    let renderer = FakeRenderer::default();

    let summary = run_initial(&config(), &initial(dir.path()), &renderer).unwrap();
    assert_eq!(summary.processed, 3);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.exit_code(), 0);

    for n in 1..=3 {
        for plane in [Plane::Axial, Plane::Sagittal, Plane::Coronal] {
            assert!(layout.slice_path(&key(n), Stage::Raw, plane).exists());
        }
        assert!(layout.stats_path(&key(n), Stage::Raw).exists());
        assert!(layout.histogram_path(&key(n), Stage::Raw).exists());
    }
}

#[test]
fn test_initial_is_idempotent() {
    let dir = dataset(&[b"ok", b"ok"]);
    let layout = ResultsLayout::new(dir.path());
    let renderer = FakeRenderer::default();

    run_initial(&config(), &initial(dir.path()), &renderer).unwrap();
    let before = mtimes(&layout, 1);
    let calls = renderer.calls.load(Ordering::SeqCst);

    let summary = run_initial(&config(), &initial(dir.path()), &renderer).unwrap();
    assert_eq!(summary.skipped, 2);
    assert_eq!(renderer.calls.load(Ordering::SeqCst), calls, "no re-render");
    assert_eq!(mtimes(&layout, 1), before);
}

#[test]
fn test_initial_force_rerenders() {
    let dir = dataset(&[b"ok"]);
    let renderer = FakeRenderer::default();
    run_initial(&config(), &initial(dir.path()), &renderer).unwrap();

    let options = InitialOptions {
        force: true,
        ..initial(dir.path())
    };
    let summary = run_initial(&config(), &options, &renderer).unwrap();
    assert_eq!(summary.skipped, 0);
    assert_eq!(renderer.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_initial_isolates_corrupt_volume() {
    let dir = dataset(&[b"ok", b"corrupt", b"ok"]);
    let layout = ResultsLayout::new(dir.path());

    let summary = run_initial(&config(), &initial(dir.path()), &FakeRenderer::default()).unwrap();
    assert_eq!(summary.processed, 3);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.exit_code(), 1);
    assert!(layout.slice_path(&key(1), Stage::Raw, Plane::Axial).exists());
    assert!(!layout.slice_path(&key(2), Stage::Raw, Plane::Axial).exists());
    assert!(layout.slice_path(&key(3), Stage::Raw, Plane::Axial).exists());
}

#[test]
fn test_initial_plane_and_subject_filters() {
    let dir = dataset(&[b"ok", b"ok"]);
    let layout = ResultsLayout::new(dir.path());
    let options = InitialOptions {
        subjects: vec!["2".into()],
        planes: vec![Plane::Coronal],
        ..initial(dir.path())
    };
    let summary = run_initial(&config(), &options, &FakeRenderer::default()).unwrap();
    assert_eq!(summary.processed, 1);
    assert!(layout.slice_path(&key(2), Stage::Raw, Plane::Coronal).exists());
    assert!(!layout.slice_path(&key(2), Stage::Raw, Plane::Axial).exists());
    assert!(!layout.slice_path(&key(1), Stage::Raw, Plane::Coronal).exists());
}

#[test]
fn test_initial_parallel_matches_sequential() {
    let dir = dataset(&[b"ok", b"corrupt", b"ok", b"ok"]);
    let config = QcConfig {
        parallel: true,
        ..config()
    };
    let summary = run_initial(&config, &initial(dir.path()), &FakeRenderer::default()).unwrap();
    assert_eq!(summary.processed, 4);
    assert_eq!(summary.failed, 1);
}

#[test]
fn test_initial_invalid_dataset_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let err = run_initial(&config(), &initial(dir.path()), &FakeRenderer::default()).unwrap_err();
    assert!(matches!(err, Error::InvalidDataset { .. }));
}

// =============================================================================
// final-struct
// =============================================================================

#[test]
fn test_final_processes_only_approved() {
    let dir = dataset(&[b"ok", b"ok", b"ok"]);
    let layout = ResultsLayout::new(dir.path());
    let ledger = ReviewLedger::open(&layout);
    ledger.upsert(Phase::Initial, &key(1), Rating::Pass, "").unwrap();
    ledger.upsert(Phase::Initial, &key(2), Rating::Fail, "motion").unwrap();

    let bias = CopyStep::new(STEP_BIAS_CORRECTION);
    let strip = CopyStep::new(STEP_SKULL_STRIP);
    let summary = run_final(&config(), &final_opts(dir.path()), &FakeRenderer::default(), &bias, &strip)
        .unwrap();
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(bias.calls.load(Ordering::SeqCst), 1);

    assert!(layout.corrected_path(&key(1)).exists());
    assert!(layout.skullstripped_path(&key(1)).exists());
    assert!(!layout.corrected_path(&key(2)).exists());
    assert!(!layout.corrected_path(&key(3)).exists());
    assert!(layout.slice_path(&key(1), Stage::Skullstripped, Plane::Axial).exists());

    let results = ProcessingResultStore::open(&layout).load().unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[&key(1)].succeeded());
}

#[test]
fn test_final_step_failure_is_recorded_per_item() {
    let dir = dataset(&[b"ok", b"ok"]);
    let layout = ResultsLayout::new(dir.path());
    let ledger = ReviewLedger::open(&layout);
    ledger.upsert(Phase::Initial, &key(1), Rating::Pass, "").unwrap();
    ledger.upsert(Phase::Initial, &key(2), Rating::Pass, "").unwrap();

    let bias = CopyStep::new(STEP_BIAS_CORRECTION);
    let strip = CopyStep::failing_on(STEP_SKULL_STRIP, "sub-1_");
    let summary = run_final(&config(), &final_opts(dir.path()), &FakeRenderer::default(), &bias, &strip)
        .unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.exit_code(), 1);

    let results = ProcessingResultStore::open(&layout).load().unwrap();
    let failed = &results[&key(1)];
    assert!(!failed.succeeded());
    assert_eq!(failed.failed_step.as_deref(), Some(STEP_SKULL_STRIP));
    assert!(failed.error.as_deref().unwrap().contains("tool crashed"));
    assert_eq!(failed.corrected, Some(layout.corrected_path(&key(1))));
    assert_eq!(failed.skullstripped, None);
    assert!(results[&key(2)].succeeded());
}

#[test]
fn test_final_render_failure_is_render_step() {
    // The stripped copy of a corrupt volume is still corrupt
    let dir = dataset(&[b"corrupt"]);
    let layout = ResultsLayout::new(dir.path());
    ReviewLedger::open(&layout)
        .upsert(Phase::Initial, &key(1), Rating::Pass, "")
        .unwrap();

    let bias = CopyStep::new(STEP_BIAS_CORRECTION);
    let strip = CopyStep::new(STEP_SKULL_STRIP);
    let summary = run_final(&config(), &final_opts(dir.path()), &FakeRenderer::default(), &bias, &strip)
        .unwrap();
    assert_eq!(summary.failed, 1);
    let results = ProcessingResultStore::open(&layout).load().unwrap();
    assert_eq!(results[&key(1)].failed_step.as_deref(), Some(STEP_RENDER));
}

#[test]
fn test_final_reuses_existing_outputs() {
    let dir = dataset(&[b"ok"]);
    let layout = ResultsLayout::new(dir.path());
    ReviewLedger::open(&layout)
        .upsert(Phase::Initial, &key(1), Rating::Pass, "")
        .unwrap();
    let bias = CopyStep::new(STEP_BIAS_CORRECTION);
    let strip = CopyStep::new(STEP_SKULL_STRIP);

    run_final(&config(), &final_opts(dir.path()), &FakeRenderer::default(), &bias, &strip).unwrap();
    let summary =
        run_final(&config(), &final_opts(dir.path()), &FakeRenderer::default(), &bias, &strip).unwrap();
    assert_eq!(summary.skipped, 1);
    assert_eq!(strip.calls.load(Ordering::SeqCst), 1);

    let forced = FinalOptions {
        force: true,
        ..final_opts(dir.path())
    };
    run_final(&config(), &forced, &FakeRenderer::default(), &bias, &strip).unwrap();
    assert_eq!(strip.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_final_keeps_rows_of_earlier_runs() {
    let dir = dataset(&[b"ok", b"ok"]);
    let layout = ResultsLayout::new(dir.path());
    let ledger = ReviewLedger::open(&layout);
    ledger.upsert(Phase::Initial, &key(1), Rating::Pass, "").unwrap();
    let bias = CopyStep::new(STEP_BIAS_CORRECTION);
    let strip = CopyStep::new(STEP_SKULL_STRIP);
    run_final(&config(), &final_opts(dir.path()), &FakeRenderer::default(), &bias, &strip).unwrap();

    // Later run restricted to subject 2
    ledger.upsert(Phase::Initial, &key(2), Rating::Pass, "").unwrap();
    let options = FinalOptions {
        subjects: vec!["sub-2".into()],
        ..final_opts(dir.path())
    };
    run_final(&config(), &options, &FakeRenderer::default(), &bias, &strip).unwrap();

    let results = ProcessingResultStore::open(&layout).load().unwrap();
    assert_eq!(results.len(), 2);
}

#[test]
fn test_final_with_corrupt_ledger_is_fatal() {
    let dir = dataset(&[b"ok"]);
    let layout = ResultsLayout::new(dir.path());
    let path = layout.ledger_path(Phase::Initial);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, "subject,session\n\"unterminated\n").unwrap();

    let bias = CopyStep::new(STEP_BIAS_CORRECTION);
    let strip = CopyStep::new(STEP_SKULL_STRIP);
    let err = run_final(&config(), &final_opts(dir.path()), &FakeRenderer::default(), &bias, &strip)
        .unwrap_err();
    assert!(matches!(err, Error::LedgerIo { .. }));
    assert_eq!(bias.calls.load(Ordering::SeqCst), 0);
}
