//! Processing-result table (`results/pipeline/processing_results.csv`)

use crate::layout::ResultsLayout;
use crate::model::{ItemKey, ProcessingResult, ProcessingStatus};
use crate::table::{CsvTable, TableError};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, Serialize, Deserialize)]
struct ResultRow {
    subject: String,
    session: Option<String>,
    modality: String,
    scan: String,
    status: ProcessingStatus,
    source: PathBuf,
    corrected: Option<PathBuf>,
    skullstripped: Option<PathBuf>,
    failed_step: Option<String>,
    error: Option<String>,
    finished_at: String,
}

impl From<&ProcessingResult> for ResultRow {
    fn from(r: &ProcessingResult) -> Self {
        Self {
            subject: r.key.subject.clone(),
            session: r.key.session.clone(),
            modality: r.key.modality.clone(),
            scan: r.key.scan.clone(),
            status: r.status,
            source: r.source.clone(),
            corrected: r.corrected.clone(),
            skullstripped: r.skullstripped.clone(),
            failed_step: r.failed_step.clone(),
            error: r.error.clone(),
            finished_at: r.finished_at.to_rfc3339(),
        }
    }
}

impl TryFrom<ResultRow> for ProcessingResult {
    type Error = TableError;

    fn try_from(row: ResultRow) -> std::result::Result<Self, TableError> {
        let finished_at = DateTime::parse_from_rfc3339(row.finished_at.trim())
            .map_err(|e| TableError::Invalid(format!("finished_at for {}: {}", row.scan, e)))?
            .with_timezone(&Utc);
        Ok(ProcessingResult {
            key: ItemKey {
                subject: row.subject,
                session: row.session,
                modality: row.modality,
                scan: row.scan,
            },
            source: row.source,
            corrected: row.corrected,
            skullstripped: row.skullstripped,
            status: row.status,
            failed_step: row.failed_step,
            error: row.error,
            finished_at,
        })
    }
}

/// Keyed view of the processing-result table
pub type ResultSnapshot = BTreeMap<ItemKey, ProcessingResult>;

/// Handle on the processing-result table
#[derive(Debug, Clone)]
pub struct ProcessingResultStore {
    table: CsvTable,
}

impl ProcessingResultStore {
    pub fn open(layout: &ResultsLayout) -> Self {
        Self {
            table: CsvTable::new(layout.processing_results_path()),
        }
    }

    fn table_error(&self, e: TableError) -> Error {
        Error::ResultsIo {
            path: self.table.path().to_path_buf(),
            reason: e.to_string(),
        }
    }

    /// Every stored result; empty when the pipeline has not run yet
    pub fn load(&self) -> Result<ResultSnapshot> {
        let rows: Vec<ResultRow> = self.table.read().map_err(|e| self.table_error(e))?;
        let mut snapshot = ResultSnapshot::new();
        for row in rows {
            let result = ProcessingResult::try_from(row).map_err(|e| self.table_error(e))?;
            snapshot.insert(result.key.clone(), result);
        }
        Ok(snapshot)
    }

    /// Replace the rows for the given keys; all other rows are kept
    pub fn upsert_many(&self, results: &[ProcessingResult]) -> Result<()> {
        let lock = self.table.lock().map_err(|e| self.table_error(e))?;
        let mut snapshot = self.load()?;
        for result in results {
            snapshot.insert(result.key.clone(), result.clone());
        }
        let rows: Vec<ResultRow> = snapshot.values().map(ResultRow::from).collect();
        self.table
            .write(&rows, &lock)
            .map_err(|e| self.table_error(e))?;
        debug!(
            "Stored {} processing results ({} total)",
            results.len(),
            rows.len()
        );
        Ok(())
    }

    pub fn path(&self) -> PathBuf {
        self.table.path().to_path_buf()
    }
}
