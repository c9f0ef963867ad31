//! Correction pipeline: bias-field correction then skull stripping
//!
//! Both external tools sit behind [`CorrectionStep`]. The runner calls them
//! as blocking subprocesses, one item at a time by default, and turns any
//! step failure into a failed [`ProcessingResult`] for that item only.

use bqc_common::artifacts::{ArtifactGenerator, ArtifactOutcome};
use bqc_common::config::CommandTemplate;
use bqc_common::layout::ResultsLayout;
use bqc_common::model::{ProcessingStatus, Stage};
use bqc_common::time::is_fresh;
use bqc_common::worklist::{BatchReport, ItemOutcome, WorkList};
use bqc_common::{CandidateItem, Error, ProcessingResult, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Step names recorded in `failed_step`
pub const STEP_BIAS_CORRECTION: &str = "bias_correction";
pub const STEP_SKULL_STRIP: &str = "skull_strip";
pub const STEP_RENDER: &str = "render";

/// Lines of stderr kept in a failure message
const STDERR_TAIL_LINES: usize = 8;

/// External step failures
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("cannot start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Exit {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("expected output {} was not written", .0.display())]
    MissingOutput(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One external processing routine: reads `input`, writes `output`
pub trait CorrectionStep: Send + Sync {
    fn name(&self) -> &str;

    fn run(&self, input: &Path, output: &Path) -> std::result::Result<(), StepError>;
}

/// Runs a configured program with path placeholders filled in
#[derive(Debug, Clone)]
pub struct CommandStep {
    name: String,
    template: CommandTemplate,
}

impl CommandStep {
    pub fn new(name: impl Into<String>, template: CommandTemplate) -> Self {
        Self {
            name: name.into(),
            template,
        }
    }

    /// Template arguments with `{input}`, `{output}`, `{input_dir}`,
    /// `{output_dir}`, `{input_name}` and `{output_name}` substituted
    pub fn args_for(&self, input: &Path, output: &Path) -> Vec<String> {
        let dir = |p: &Path| {
            p.parent()
                .map(|d| d.display().to_string())
                .unwrap_or_default()
        };
        let name = |p: &Path| {
            p.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        };
        let values = [
            ("{input_dir}", dir(input)),
            ("{output_dir}", dir(output)),
            ("{input_name}", name(input)),
            ("{output_name}", name(output)),
            ("{input}", input.display().to_string()),
            ("{output}", output.display().to_string()),
        ];
        self.template
            .args
            .iter()
            .map(|arg| {
                values
                    .iter()
                    .fold(arg.clone(), |acc, (placeholder, value)| {
                        acc.replace(placeholder, value)
                    })
            })
            .collect()
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join(" | ")
}

impl CorrectionStep for CommandStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, input: &Path, output: &Path) -> std::result::Result<(), StepError> {
        let args = self.args_for(input, output);
        debug!("{}: {} {}", self.name, self.template.program, args.join(" "));

        let result = Command::new(&self.template.program)
            .args(&args)
            .output()
            .map_err(|source| StepError::Spawn {
                program: self.template.program.clone(),
                source,
            })?;

        if !result.status.success() {
            return Err(StepError::Exit {
                program: self.template.program.clone(),
                status: result.status.to_string(),
                stderr: stderr_tail(&result.stderr),
            });
        }
        match fs::metadata(output) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StepError::MissingOutput(output.to_path_buf()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Per-item outcome of the runner
#[derive(Debug, Clone)]
pub enum CorrectionOutcome {
    Processed(ProcessingResult),
    /// Skull-stripped output was already newer than the source
    UpToDate(ProcessingResult),
}

impl CorrectionOutcome {
    pub fn result(&self) -> &ProcessingResult {
        match self {
            CorrectionOutcome::Processed(r) | CorrectionOutcome::UpToDate(r) => r,
        }
    }
}

impl ItemOutcome for CorrectionOutcome {
    fn was_skipped(&self) -> bool {
        matches!(self, CorrectionOutcome::UpToDate(_))
    }
}

/// Drives both steps plus final-phase rendering for approved items
pub struct CorrectionRunner<'a> {
    layout: &'a ResultsLayout,
    bias_correction: &'a dyn CorrectionStep,
    skull_strip: &'a dyn CorrectionStep,
    artifacts: &'a ArtifactGenerator<'a>,
    force: bool,
}

impl<'a> CorrectionRunner<'a> {
    pub fn new(
        layout: &'a ResultsLayout,
        bias_correction: &'a dyn CorrectionStep,
        skull_strip: &'a dyn CorrectionStep,
        artifacts: &'a ArtifactGenerator<'a>,
        force: bool,
    ) -> Self {
        Self {
            layout,
            bias_correction,
            skull_strip,
            artifacts,
            force,
        }
    }

    fn step_error(item: &CandidateItem, step: &str, reason: impl ToString) -> Error {
        Error::PipelineStep {
            item: item.key.to_string(),
            step: step.to_string(),
            reason: reason.to_string(),
        }
    }

    fn run_step(
        &self,
        item: &CandidateItem,
        step: &dyn CorrectionStep,
        step_name: &str,
        input: &Path,
        output: &Path,
    ) -> Result<()> {
        if let Some(dir) = output.parent() {
            fs::create_dir_all(dir)?;
        }
        info!("[{}] {} -> {}", step.name(), item.key, output.display());
        step.run(input, output).map_err(|e| {
            // A partial output must not look finished on the next run
            if output.exists() {
                let _ = fs::remove_file(output);
            }
            Self::step_error(item, step_name, e)
        })
    }

    fn render(&self, item: &CandidateItem, stripped: &Path) -> Result<ArtifactOutcome> {
        let final_item = CandidateItem {
            key: item.key.clone(),
            source: stripped.to_path_buf(),
            stage: Stage::Skullstripped,
        };
        self.artifacts
            .generate(&final_item)
            .map_err(|e| Self::step_error(item, STEP_RENDER, e))
    }

    /// Correct, strip and render one item
    pub fn process(&self, item: &CandidateItem) -> Result<CorrectionOutcome> {
        let corrected = self.layout.corrected_path(&item.key);
        let stripped = self.layout.skullstripped_path(&item.key);

        let up_to_date = !self.force && is_fresh(&stripped, &item.source);
        if !up_to_date {
            self.run_step(item, self.bias_correction, STEP_BIAS_CORRECTION, &item.source, &corrected)?;
            self.run_step(item, self.skull_strip, STEP_SKULL_STRIP, &corrected, &stripped)?;
        } else {
            debug!("{} already stripped, reusing {}", item.key, stripped.display());
        }
        self.render(item, &stripped)?;

        let result = ProcessingResult {
            key: item.key.clone(),
            source: item.source.clone(),
            corrected: corrected.exists().then_some(corrected),
            skullstripped: Some(stripped),
            status: ProcessingStatus::Succeeded,
            failed_step: None,
            error: None,
            finished_at: bqc_common::time::now(),
        };
        Ok(if up_to_date {
            CorrectionOutcome::UpToDate(result)
        } else {
            CorrectionOutcome::Processed(result)
        })
    }

    /// Run every item; one item's failure never stops the others
    pub fn run_all(&self, items: Vec<CandidateItem>, parallel: bool) -> BatchReport<CorrectionOutcome> {
        let list = WorkList::new(items);
        if parallel {
            list.run_parallel("correction", |item| self.process(item))
        } else {
            list.run("correction", |item| self.process(item))
        }
    }

    /// Processing results for every item of a batch, failures included
    pub fn results(&self, items: &[CandidateItem], report: &BatchReport<CorrectionOutcome>) -> Vec<ProcessingResult> {
        report
            .items
            .iter()
            .filter_map(|r| match &r.outcome {
                Ok(outcome) => Some(outcome.result().clone()),
                Err(err) => {
                    let item = items.iter().find(|i| i.key == r.key)?;
                    Some(self.failed_result(item, err))
                }
            })
            .collect()
    }

    fn failed_result(&self, item: &CandidateItem, err: &Error) -> ProcessingResult {
        let (step, reason) = match err {
            Error::PipelineStep { step, reason, .. } => (step.clone(), reason.clone()),
            other => ("setup".to_string(), other.to_string()),
        };
        let corrected = self.layout.corrected_path(&item.key);
        let stripped = self.layout.skullstripped_path(&item.key);
        ProcessingResult {
            key: item.key.clone(),
            source: item.source.clone(),
            corrected: corrected.exists().then_some(corrected),
            skullstripped: stripped.exists().then_some(stripped),
            status: ProcessingStatus::Failed,
            failed_step: Some(step),
            error: Some(reason),
            finished_at: bqc_common::time::now(),
        }
    }
}
