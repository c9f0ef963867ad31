//! Review ledger: durable reviewer decisions, one CSV table per phase
//!
//! The ledger is an explicit handle opened per command invocation. It
//! holds no cached rows: `load` always reads the file, so a `load` right
//! after an `upsert` sees the upsert. `upsert` is a read-modify-write under
//! the table's exclusive lock, which serializes submissions coming from
//! several browser tabs or several processes.

use crate::layout::ResultsLayout;
use crate::model::{ItemKey, Phase, Rating, ReviewRecord};
use crate::table::{CsvTable, TableError};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info};

/// Snapshot of one phase: item key → record, in item order
pub type LedgerSnapshot = BTreeMap<ItemKey, ReviewRecord>;

/// On-disk row; the column order is the file's header order
#[derive(Debug, Serialize, Deserialize)]
struct LedgerRow {
    subject: String,
    session: Option<String>,
    modality: String,
    scan: String,
    rating: String,
    annotation: Option<String>,
    reviewed_at: String,
}

impl LedgerRow {
    fn from_record(record: &ReviewRecord) -> Self {
        Self {
            subject: record.key.subject.clone(),
            session: record.key.session.clone(),
            modality: record.key.modality.clone(),
            scan: record.key.scan.clone(),
            rating: record.rating.as_str().to_string(),
            annotation: if record.annotation.is_empty() {
                None
            } else {
                Some(record.annotation.clone())
            },
            reviewed_at: record.reviewed_at.to_rfc3339(),
        }
    }

    fn into_record(self, phase: Phase) -> std::result::Result<ReviewRecord, TableError> {
        let rating: Rating = self
            .rating
            .parse()
            .map_err(|e: Error| TableError::Invalid(format!("{} ({})", e, self.scan)))?;
        let reviewed_at = DateTime::parse_from_rfc3339(self.reviewed_at.trim())
            .map_err(|e| {
                TableError::Invalid(format!(
                    "reviewed_at '{}' for {}: {}",
                    self.reviewed_at, self.scan, e
                ))
            })?
            .with_timezone(&Utc);
        Ok(ReviewRecord {
            key: ItemKey {
                subject: self.subject,
                session: self.session,
                modality: self.modality,
                scan: self.scan,
            },
            phase,
            rating,
            annotation: self.annotation.unwrap_or_default(),
            reviewed_at,
        })
    }
}

/// Handle on the ledger tables under `results/ledger/`
#[derive(Debug, Clone)]
pub struct ReviewLedger {
    dir: PathBuf,
}

impl ReviewLedger {
    /// Open the ledger of a dataset; nothing is read until `load`
    pub fn open(layout: &ResultsLayout) -> Self {
        Self {
            dir: layout.ledger_dir(),
        }
    }

    /// Open a ledger stored in an arbitrary directory
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn table(&self, phase: Phase) -> CsvTable {
        CsvTable::new(self.dir.join(format!("{}.csv", phase.as_str())))
    }

    /// Path of the phase's table file
    pub fn path(&self, phase: Phase) -> PathBuf {
        self.table(phase).path().to_path_buf()
    }

    fn ledger_error(&self, phase: Phase, err: TableError) -> Error {
        let table = self.table(phase);
        Error::LedgerIo {
            path: table.path().to_path_buf(),
            backup: table.backup_path(),
            reason: err.to_string(),
        }
    }

    fn read_rows(&self, phase: Phase) -> Result<LedgerSnapshot> {
        let rows: Vec<LedgerRow> = self
            .table(phase)
            .read()
            .map_err(|e| self.ledger_error(phase, e))?;
        let mut snapshot = LedgerSnapshot::new();
        for row in rows {
            let record = row
                .into_record(phase)
                .map_err(|e| self.ledger_error(phase, e))?;
            // A hand-edited file may repeat a key; the later row wins
            snapshot.insert(record.key.clone(), record);
        }
        Ok(snapshot)
    }

    /// Current records of a phase; empty if no ledger file exists yet
    pub fn load(&self, phase: Phase) -> Result<LedgerSnapshot> {
        let snapshot = self.read_rows(phase)?;
        debug!("Loaded {} {} ledger records", snapshot.len(), phase);
        Ok(snapshot)
    }

    /// Insert or replace the record for `key` in `phase`
    ///
    /// The last write for a (key, phase) wins; no other row is touched.
    pub fn upsert(
        &self,
        phase: Phase,
        key: &ItemKey,
        rating: Rating,
        annotation: &str,
    ) -> Result<ReviewRecord> {
        let table = self.table(phase);
        let lock = table.lock().map_err(|e| self.ledger_error(phase, e))?;

        let mut snapshot = self.read_rows(phase)?;
        let record = ReviewRecord {
            key: key.clone(),
            phase,
            rating,
            annotation: annotation.trim().to_string(),
            reviewed_at: crate::time::now(),
        };
        let replaced = snapshot.insert(key.clone(), record.clone()).is_some();

        let rows: Vec<LedgerRow> = snapshot.values().map(LedgerRow::from_record).collect();
        table
            .write(&rows, &lock)
            .map_err(|e| self.ledger_error(phase, e))?;
        drop(lock);

        info!(
            "{} {} as {} ({})",
            if replaced { "Updated" } else { "Recorded" },
            key,
            rating,
            phase
        );
        Ok(record)
    }

    /// Rewrite the phase's table in canonical form (sorted, normalized
    /// rating names) and return its path
    ///
    /// Useful after hand edits; the file stays loadable by `load`.
    pub fn export(&self, phase: Phase) -> Result<PathBuf> {
        let table = self.table(phase);
        let lock = table.lock().map_err(|e| self.ledger_error(phase, e))?;
        let snapshot = self.read_rows(phase)?;
        let rows: Vec<LedgerRow> = snapshot.values().map(LedgerRow::from_record).collect();
        table
            .write(&rows, &lock)
            .map_err(|e| self.ledger_error(phase, e))?;
        Ok(table.path().to_path_buf())
    }
}
