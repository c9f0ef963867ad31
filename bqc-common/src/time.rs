//! Timestamp utilities

use chrono::{DateTime, Utc};
use std::path::Path;
use std::time::SystemTime;

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Modification time of a file, `None` if it does not exist
pub fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// True when `artifact` exists and is not older than `source`
///
/// An unreadable source mtime counts as stale.
pub fn is_fresh(artifact: &Path, source: &Path) -> bool {
    match (modified(artifact), modified(source)) {
        (Some(a), Some(s)) => a >= s,
        _ => false,
    }
}
