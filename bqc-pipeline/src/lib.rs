//! bqc-pipeline library - batch QC commands
//!
//! `initial-struct` renders review artifacts for raw scans;
//! `final-struct` gates approved scans through bias correction and skull
//! stripping and renders the final-review artifacts.

pub mod commands;
pub mod correction;

pub use commands::{run_final, run_initial, FinalOptions, InitialOptions};
pub use correction::{CommandStep, CorrectionRunner, CorrectionStep, StepError};
