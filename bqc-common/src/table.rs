//! Durable CSV tables with atomic replacement
//!
//! Readers never take a lock: a table file is only ever replaced by
//! renaming a fully written temp file over it, so a reader sees either the
//! old or the new contents. Writers serialize on an advisory lock held on a
//! sidecar `.lock` file for the whole read-modify-write.

use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

/// Table I/O errors
#[derive(Debug, Error)]
pub enum TableError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed row: {0}")]
    Csv(#[from] csv::Error),

    #[error("invalid value: {0}")]
    Invalid(String),
}

/// Exclusive writer lock; released when dropped
#[derive(Debug)]
pub struct TableLock {
    file: File,
    path: PathBuf,
}

impl Drop for TableLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!("Failed to release lock {}: {}", self.path.display(), e);
        }
    }
}

/// One CSV file on disk
#[derive(Debug, Clone)]
pub struct CsvTable {
    path: PathBuf,
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

impl CsvTable {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of the previous contents kept by every write
    pub fn backup_path(&self) -> PathBuf {
        with_suffix(&self.path, ".bak")
    }

    pub fn lock_path(&self) -> PathBuf {
        with_suffix(&self.path, ".lock")
    }

    /// Read every row; a missing file is an empty table
    pub fn read<R: DeserializeOwned>(&self) -> Result<Vec<R>, TableError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::Headers)
            .from_path(&self.path)?;
        let mut rows = Vec::new();
        for row in reader.deserialize() {
            rows.push(row?);
        }
        Ok(rows)
    }

    /// Block until this process holds the table's writer lock
    pub fn lock(&self) -> Result<TableLock, TableError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let lock_path = self.lock_path();
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        FileExt::lock_exclusive(&file)?;
        Ok(TableLock {
            file,
            path: lock_path,
        })
    }

    /// Replace the table contents
    ///
    /// Requires the writer lock so concurrent read-modify-write cycles
    /// cannot lose each other's rows.
    pub fn write<R: Serialize>(&self, rows: &[R], _lock: &TableLock) -> Result<(), TableError> {
        if self.path.exists() {
            fs::copy(&self.path, self.backup_path())?;
        }
        replace_file(&self.path, |file| -> Result<(), TableError> {
            let mut writer = csv::Writer::from_writer(file);
            for row in rows {
                writer.serialize(row)?;
            }
            writer.flush()?;
            Ok(())
        })?;
        debug!("Wrote {} rows to {}", rows.len(), self.path.display());
        Ok(())
    }
}

/// Write `path` through a temp file in the same directory and rename it
/// into place, so no reader ever observes a partial file
pub fn replace_file<F, E>(path: &Path, write: F) -> Result<(), E>
where
    F: FnOnce(&mut File) -> Result<(), E>,
    E: From<std::io::Error>,
{
    let dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    fs::create_dir_all(&dir)?;

    let mut tmp = NamedTempFile::new_in(&dir)?;
    write(tmp.as_file_mut())?;
    tmp.as_file_mut().flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| E::from(e.error))?;
    Ok(())
}
