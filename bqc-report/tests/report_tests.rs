//! End-to-end QC scenario: render, review, gate, correct, report
//!
//! Three subjects with one T1w scan each. Subject 1 passes, subject 2
//! fails, subject 3 is never rated. Only subject 1 is corrected.

use bqc_common::artifacts::{Histogram, Plane, RenderError, RenderOutput, RenderRequest, SliceRenderer};
use bqc_common::config::QcConfig;
use bqc_common::layout::ResultsLayout;
use bqc_common::ledger::ReviewLedger;
use bqc_common::model::VolumeStats;
use bqc_common::{ItemKey, Phase, Rating};
use bqc_pipeline::{run_final, run_initial, CorrectionStep, FinalOptions, InitialOptions, StepError};
use bqc_report::{build_report, write_report};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

struct FakeRenderer;

impl SliceRenderer for FakeRenderer {
    fn render(&self, _source: &Path, request: &RenderRequest<'_>) -> Result<RenderOutput, RenderError> {
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

struct CopyStep(&'static str);

impl CorrectionStep for CopyStep {
    fn name(&self) -> &str {
        self.0
    }

    fn run(&self, input: &Path, output: &Path) -> Result<(), StepError> {
        fs::copy(input, output)?;
        Ok(())
    }
}

fn key(n: u32) -> ItemKey {
    ItemKey {
        subject: format!("sub-{}", n),
        session: None,
        modality: "T1w".into(),
        scan: format!("sub-{n}/anat/sub-{n}_T1w.nii.gz"),
    }
}

fn dataset() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("dataset_description.json"), "{}").unwrap();
    for n in 1..=3 {
        let p = dir.path().join(&key(n).scan);
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, b"volume").unwrap();
    }
    dir
}

fn config() -> QcConfig {
    QcConfig {
        planes: vec![Plane::Axial, Plane::Sagittal, Plane::Coronal],
        ..QcConfig::default()
    }
}

/// Run the batch stages of the scenario
fn run_scenario(root: &Path) -> ResultsLayout {
    let layout = ResultsLayout::new(root);
    let initial = InitialOptions {
        bids_root: root.to_path_buf(),
        ..InitialOptions::default()
    };
    let summary = run_initial(&config(), &initial, &FakeRenderer).unwrap();
    assert_eq!(summary.succeeded, 3);

    let ledger = ReviewLedger::open(&layout);
    ledger.upsert(Phase::Initial, &key(1), Rating::Pass, "clean").unwrap();
    ledger.upsert(Phase::Initial, &key(2), Rating::Fail, "motion, ringing").unwrap();

    let options = FinalOptions {
        bids_root: root.to_path_buf(),
        ..FinalOptions::default()
    };
    let summary = run_final(
        &config(),
        &options,
        &FakeRenderer,
        &CopyStep("bias_correction"),
        &CopyStep("skull_strip"),
    )
    .unwrap();
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.succeeded, 1);
    layout
}

fn csv_rows(path: &Path) -> Vec<HashMap<String, String>> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    let headers = reader.headers().unwrap().clone();
    reader
        .records()
        .map(|r| {
            let record = r.unwrap();
            headers
                .iter()
                .zip(record.iter())
                .map(|(h, v)| (h.to_string(), v.to_string()))
                .collect()
        })
        .collect()
}

#[test]
fn test_three_subject_scenario() {
    let dir = dataset();
    let layout = run_scenario(dir.path());

    assert!(layout.skullstripped_path(&key(1)).exists());
    assert!(!layout.corrected_path(&key(2)).exists());
    assert!(!layout.corrected_path(&key(3)).exists());

    let report = build_report(&config(), dir.path()).unwrap();
    assert_eq!(report.items.len(), 3);
    assert_eq!(report.summary.approved, 1);
    assert_eq!(report.summary.excluded, 2);
    assert_eq!(report.summary.succeeded, 1);
    assert_eq!(report.summary.initial.pass, 1);
    assert_eq!(report.summary.initial.fail, 1);
    assert_eq!(report.summary.initial.unrated, 1);
    assert_eq!(report.summary.final_review.unrated, 1);

    let paths = write_report(&layout, &report).unwrap();
    let rows = csv_rows(&paths.csv);
    assert_eq!(rows.len(), 3);

    assert_eq!(rows[0]["subject"], "sub-1");
    assert_eq!(rows[0]["gate"], "approved");
    assert_eq!(rows[0]["processing_status"], "succeeded");
    assert_eq!(rows[0]["initial_annotation"], "clean");
    assert_eq!(rows[0]["intensity_mean"], "1.0");
    assert_eq!(rows[0]["intensity_max"], "2.0");

    assert_eq!(rows[1]["subject"], "sub-2");
    assert_eq!(rows[1]["gate"], "excluded");
    assert_eq!(rows[1]["exclusion_reason"], "fail");
    assert_eq!(rows[1]["initial_annotation"], "motion, ringing");
    assert_eq!(rows[1]["processing_status"], "");

    assert_eq!(rows[2]["subject"], "sub-3");
    assert_eq!(rows[2]["gate"], "excluded");
    assert_eq!(rows[2]["exclusion_reason"], "unrated");
    assert_eq!(rows[2]["initial_rating"], "");

    let html = fs::read_to_string(&paths.html).unwrap();
    assert!(html.contains("excluded (fail)"));
    assert!(html.contains("excluded (unrated)"));
    assert!(html.contains(r#"href="../slices/raw/sub-1/sub-1_T1w_axial.png""#));
    assert!(html.contains(r#"href="../slices/skullstripped/sub-1/sub-1_T1w_axial.png""#));
    assert!(html.contains(r#"href="../slices/raw/sub-1/sub-1_T1w_histogram.png""#));
    assert!(html.contains("mean 1.00"));
    assert!(!html.contains("slices/skullstripped/sub-2/"));
}

#[test]
fn test_re_rated_item_result_is_superseded() {
    let dir = dataset();
    let layout = run_scenario(dir.path());
    ReviewLedger::open(&layout)
        .upsert(Phase::Initial, &key(1), Rating::Fail, "missed motion")
        .unwrap();

    let report = build_report(&config(), dir.path()).unwrap();
    assert_eq!(report.summary.approved, 0);
    assert_eq!(report.summary.excluded, 3);
    assert_eq!(report.summary.succeeded, 0);
    assert_eq!(report.summary.superseded, 1);
    assert_eq!(report.summary.final_review.total(), 0);

    let paths = write_report(&layout, &report).unwrap();
    let rows = csv_rows(&paths.csv);
    assert_eq!(rows[0]["gate"], "excluded");
    assert_eq!(rows[0]["processing_status"], "superseded");
    let html = fs::read_to_string(&paths.html).unwrap();
    assert!(html.contains(r#"<span class="status-superseded">superseded</span>"#));
}

#[test]
fn test_final_ratings_appear_in_report() {
    let dir = dataset();
    let layout = run_scenario(dir.path());
    ReviewLedger::open(&layout)
        .upsert(Phase::Final, &key(1), Rating::Uncertain, "residual dura")
        .unwrap();

    let report = build_report(&config(), dir.path()).unwrap();
    assert_eq!(report.summary.final_review.uncertain, 1);
    assert_eq!(report.summary.final_review.unrated, 0);

    let paths = write_report(&layout, &report).unwrap();
    let rows = csv_rows(&paths.csv);
    assert_eq!(rows[0]["final_rating"], "uncertain");
    assert_eq!(rows[0]["final_annotation"], "residual dura");
}

#[test]
fn test_report_does_not_touch_ledgers_or_results() {
    let dir = dataset();
    let layout = run_scenario(dir.path());
    let ledger_path = layout.ledger_path(Phase::Initial);
    let results_path = layout.processing_results_path();

    let ledger_before = fs::read(&ledger_path).unwrap();
    let results_before = fs::read(&results_path).unwrap();
    let ledger_mtime = fs::metadata(&ledger_path).unwrap().modified().unwrap();

    let report = build_report(&config(), dir.path()).unwrap();
    write_report(&layout, &report).unwrap();

    assert_eq!(fs::read(&ledger_path).unwrap(), ledger_before);
    assert_eq!(fs::read(&results_path).unwrap(), results_before);
    assert_eq!(fs::metadata(&ledger_path).unwrap().modified().unwrap(), ledger_mtime);
    assert!(!layout.ledger_path(Phase::Final).exists());
}

#[test]
fn test_report_before_any_review() {
    let dir = dataset();
    let report = build_report(&config(), dir.path()).unwrap();
    assert_eq!(report.summary.initial.unrated, 3);
    assert_eq!(report.summary.excluded, 3);
    assert_eq!(report.summary.not_processed, 0);
    assert!(report.items.iter().all(|i| i.montages.is_empty()));
}

#[test]
fn test_report_on_invalid_dataset_fails() {
    let dir = tempfile::tempdir().unwrap();
    assert!(build_report(&config(), dir.path()).is_err());
}
