/// Persistent metadata store
pub mod metadata;

pub use metadata::MetadataStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Informational sync state of a tracked file. Not a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Remote copy matches the recorded snapshot
    Synced,
    /// A change was observed but has not been propagated yet
    Pending,
    /// The last propagation attempt failed
    Error,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Synced => "synced",
            Self::Pending => "pending",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}

/// Snapshot of a local file taken at its last successful propagation.
///
/// A record exists only for files that have been synced at least once and
/// not deleted since.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Absolute local path (unique key)
    pub path: PathBuf,
    /// Source mtime at last observation
    pub modified_time: DateTime<Utc>,
    /// Byte length at last observation
    pub size: u64,
    /// When the file was last propagated
    pub last_synced: DateTime<Utc>,
    /// Informational status
    pub sync_status: SyncStatus,
    /// Optional xxh3 content hash
    pub checksum: Option<String>,
}

impl FileRecord {
    /// Fresh record for a file that was just synced
    #[must_use]
    pub fn synced(path: PathBuf, modified_time: DateTime<Utc>, size: u64) -> Self {
        Self {
            path,
            modified_time,
            size,
            last_synced: Utc::now(),
            sync_status: SyncStatus::Synced,
            checksum: None,
        }
    }
}
