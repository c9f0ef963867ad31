//! Common error types for the QC commands

use std::path::PathBuf;
use thiserror::Error;

/// Common result type for QC operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared by every QC command
///
/// `InvalidDataset`, `LedgerIo` and `PortInUse` abort a command.
/// `ArtifactGeneration` and `PipelineStep` are per-item and end up in
/// per-item status fields instead of stopping a batch.
#[derive(Error, Debug)]
pub enum Error {
    /// BIDS root is missing or does not look like a BIDS dataset
    #[error("Invalid dataset at {path}: {reason}")]
    InvalidDataset { path: PathBuf, reason: String },

    /// A volume could not be read or its slices could not be rendered
    #[error("Artifact generation failed for {item}: {reason}")]
    ArtifactGeneration { item: String, reason: String },

    /// Ledger file unreadable, corrupt or not writable
    #[error("Ledger error in {}: {reason} (restore from {} if the file is damaged)", path.display(), backup.display())]
    LedgerIo {
        path: PathBuf,
        backup: PathBuf,
        reason: String,
    },

    /// Processing-result table unreadable or not writable
    #[error("Processing results error in {}: {reason}", path.display())]
    ResultsIo { path: PathBuf, reason: String },

    /// Annotation server port already bound
    #[error("Port {port} on {host} is already in use; stop the other process or pass --port")]
    PortInUse { host: String, port: u16 },

    /// External correction or skull-stripping step failed
    #[error("Pipeline step '{step}' failed for {item}: {reason}")]
    PipelineStep {
        item: String,
        step: String,
        reason: String,
    },

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV encode/decode error outside the ledger
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// True for errors that are recorded per item rather than aborting a run
    pub fn is_per_item(&self) -> bool {
        matches!(
            self,
            Error::ArtifactGeneration { .. } | Error::PipelineStep { .. }
        )
    }
}
