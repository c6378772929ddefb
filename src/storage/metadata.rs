//! Metadata store: one [`FileRecord`] per synced local path.
//!
//! Records live in a [`DashMap`] so the event worker and a concurrent full sync
//! can upsert different paths without coordinating. Every mutation is written
//! through to a single bincode file; the write happens under an in-process mutex
//! and an `fs4` exclusive lock on a sibling `.lock` file, via a temporary file
//! renamed over the previous snapshot.
//!
//! Errors are propagated as `anyhow` errors. Callers that want the engine to keep
//! running on a degraded store (the reconciler does) log and carry on.

use super::{FileRecord, SyncStatus};
use crate::utils::{modified_utc, serialization};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use fs4::fs_std::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::{debug, warn};

/// On-disk format version
const STORE_VERSION: u32 = 1;

/// Serialized form of the store
#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    records: Vec<FileRecord>,
}

/// Thread-safe metadata store
#[derive(Debug)]
pub struct MetadataStore {
    records: DashMap<PathBuf, FileRecord>,
    /// Backing file; `None` for an in-memory store
    backing: Option<PathBuf>,
    /// Serializes snapshot writes
    write_lock: Mutex<()>,
    /// Number of open [`BatchGuard`]s
    deferred: AtomicUsize,
    /// Set when a write was skipped because a batch was open
    dirty: AtomicBool,
}

/// Defers write-through until dropped; see [`MetadataStore::batch`]
#[must_use = "writes resume as soon as the guard is dropped"]
pub struct BatchGuard<'a> {
    store: &'a MetadataStore,
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        if self.store.deferred.fetch_sub(1, Ordering::AcqRel) == 1
            && self.store.dirty.swap(false, Ordering::AcqRel)
            && let Err(e) = self.store.write_snapshot()
        {
            warn!("Failed to persist metadata store after batch: {e:#}");
        }
    }
}

impl MetadataStore {
    /// Open (or create) a store backed by `path`
    ///
    /// An unreadable or corrupt file is moved aside to `<path>.corrupt` and the
    /// store starts empty; the next sync pass repopulates it.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let store = Self::with_backing(Some(path.to_path_buf()));

        if path.exists() {
            match Self::read_file(path) {
                Ok(records) => {
                    for record in records {
                        store.records.insert(record.path.clone(), record);
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), "Metadata store unreadable, starting empty: {e:#}");
                    let mut aside = path.as_os_str().to_owned();
                    aside.push(".corrupt");
                    if let Err(e) = fs::rename(path, &aside) {
                        warn!("Failed to move corrupt metadata store aside: {e}");
                    }
                }
            }
        }

        debug!(records = store.len(), path = %path.display(), "Opened metadata store");
        Ok(store)
    }

    /// A store that never touches disk
    #[must_use]
    pub fn in_memory() -> Self {
        Self::with_backing(None)
    }

    fn with_backing(backing: Option<PathBuf>) -> Self {
        Self {
            records: DashMap::new(),
            backing,
            write_lock: Mutex::new(()),
            deferred: AtomicUsize::new(0),
            dirty: AtomicBool::new(false),
        }
    }

    fn read_file(path: &Path) -> Result<Vec<FileRecord>> {
        let data = fs::read(path)
            .with_context(|| format!("Failed to read metadata store: {}", path.display()))?;
        if data.is_empty() {
            return Ok(Vec::new());
        }

        let file: StoreFile =
            serialization::deserialize(&data).context("Failed to deserialize metadata store")?;
        if file.version != STORE_VERSION {
            anyhow::bail!("Unsupported metadata store version {}", file.version);
        }
        Ok(file.records)
    }

    /// Path of the backing file, if any
    #[must_use]
    pub fn backing_path(&self) -> Option<&Path> {
        self.backing.as_deref()
    }

    /// Record a successful sync of `path`
    ///
    /// Inserts a `synced` record stamped now, or refreshes the existing one.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written to disk. The in-memory
    /// record is updated regardless.
    pub fn upsert(&self, path: &Path, modified_time: DateTime<Utc>, size: u64) -> Result<FileRecord> {
        self.upsert_with_checksum(path, modified_time, size, None)
    }

    /// Like [`upsert`](Self::upsert), also storing a content checksum
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written to disk
    pub fn upsert_with_checksum(
        &self,
        path: &Path,
        modified_time: DateTime<Utc>,
        size: u64,
        checksum: Option<String>,
    ) -> Result<FileRecord> {
        let record = {
            let mut entry = self
                .records
                .entry(path.to_path_buf())
                .or_insert_with(|| FileRecord::synced(path.to_path_buf(), modified_time, size));
            entry.modified_time = modified_time;
            entry.size = size;
            entry.last_synced = Utc::now();
            entry.sync_status = SyncStatus::Synced;
            entry.checksum = checksum;
            entry.clone()
        };

        self.persist()?;
        Ok(record)
    }

    /// Delete the record for `path`; no-op when absent
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written to disk
    pub fn remove(&self, path: &Path) -> Result<Option<FileRecord>> {
        let removed = self.records.remove(path).map(|(_, record)| record);
        if removed.is_some() {
            self.persist()?;
        }
        Ok(removed)
    }

    /// Delete every record at or below `dir`
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written to disk
    pub fn remove_under(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let doomed: Vec<PathBuf> = self
            .records
            .iter()
            .filter(|entry| entry.key().starts_with(dir))
            .map(|entry| entry.key().clone())
            .collect();

        for path in &doomed {
            self.records.remove(path);
        }
        if !doomed.is_empty() {
            self.persist()?;
        }
        Ok(doomed)
    }

    /// Re-key every record at or below `from` to the same relative place under `to`
    ///
    /// Used when a whole directory is renamed; the snapshots stay valid because
    /// renames keep mtime and size.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written to disk
    pub fn rename_under(&self, from: &Path, to: &Path) -> Result<usize> {
        let moving: Vec<PathBuf> = self
            .records
            .iter()
            .filter(|entry| entry.key().starts_with(from))
            .map(|entry| entry.key().clone())
            .collect();

        for old_path in &moving {
            if let Some((_, mut record)) = self.records.remove(old_path) {
                let relative = old_path.strip_prefix(from).unwrap_or(Path::new(""));
                let new_path = if relative.as_os_str().is_empty() {
                    to.to_path_buf()
                } else {
                    to.join(relative)
                };
                record.path.clone_from(&new_path);
                self.records.insert(new_path, record);
            }
        }
        if !moving.is_empty() {
            self.persist()?;
        }
        Ok(moving.len())
    }

    /// Set the informational status of an existing record
    ///
    /// Returns `false` when there is no record for `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written to disk
    pub fn mark(&self, path: &Path, status: SyncStatus) -> Result<bool> {
        let changed = match self.records.get_mut(path) {
            Some(mut record) => {
                record.sync_status = status;
                true
            }
            None => false,
        };
        if changed {
            self.persist()?;
        }
        Ok(changed)
    }

    /// Get the record for `path`
    #[must_use]
    pub fn get(&self, path: &Path) -> Option<FileRecord> {
        self.records.get(path).map(|record| record.clone())
    }

    /// Whether `path` has to be propagated again
    ///
    /// True when there is no record, when the file is gone (deletions belong in
    /// [`remove`](Self::remove)), when its mtime is newer than recorded, or when
    /// its size differs.
    #[must_use]
    pub fn needs_sync(&self, path: &Path) -> bool {
        let Some(record) = self.get(path) else {
            return true;
        };
        let Ok(metadata) = fs::metadata(path) else {
            return true;
        };
        let Ok(modified) = modified_utc(&metadata) else {
            return true;
        };

        modified > record.modified_time || metadata.len() != record.size
    }

    /// All records, sorted by path
    #[must_use]
    pub fn records(&self) -> Vec<FileRecord> {
        let mut records: Vec<FileRecord> =
            self.records.iter().map(|entry| entry.value().clone()).collect();
        records.sort_by(|a, b| a.path.cmp(&b.path));
        records
    }

    /// Tracked paths for which [`needs_sync`](Self::needs_sync) is true
    #[must_use]
    pub fn stale_paths(&self) -> Vec<PathBuf> {
        // Collected first: needs_sync reads the map again
        let tracked: Vec<PathBuf> = self.records.iter().map(|entry| entry.key().clone()).collect();
        let mut stale: Vec<PathBuf> = tracked
            .into_iter()
            .filter(|path| self.needs_sync(path))
            .collect();
        stale.sort();
        stale
    }

    /// Number of tracked files
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no files are tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Defer write-through until the returned guard is dropped
    ///
    /// Mutations made while any guard is alive only touch memory; the last guard
    /// to drop writes a single snapshot. A full sync of many files uses this to
    /// avoid rewriting the store once per file.
    pub fn batch(&self) -> BatchGuard<'_> {
        self.deferred.fetch_add(1, Ordering::AcqRel);
        BatchGuard { store: self }
    }

    /// Write the current state to disk immediately
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written to disk
    pub fn flush(&self) -> Result<()> {
        self.dirty.store(false, Ordering::Release);
        self.write_snapshot()
    }

    fn persist(&self) -> Result<()> {
        if self.deferred.load(Ordering::Acquire) > 0 {
            self.dirty.store(true, Ordering::Release);
            return Ok(());
        }
        self.write_snapshot()
    }

    fn write_snapshot(&self) -> Result<()> {
        let Some(path) = &self.backing else {
            return Ok(());
        };

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("Metadata store writer panicked"))?;

        // Snapshot under the mutex so the last write always carries the latest state
        let snapshot = StoreFile {
            version: STORE_VERSION,
            records: self.records(),
        };
        let data =
            serialization::serialize(&snapshot).context("Failed to serialize metadata store")?;

        let mut lock_path = path.as_os_str().to_owned();
        lock_path.push(".lock");
        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("Failed to open lock file: {}", PathBuf::from(&lock_path).display()))?;
        lock_file
            .lock_exclusive()
            .context("Failed to acquire exclusive lock on metadata store")?;

        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut staging = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temporary file in {}", dir.display()))?;
        staging
            .write_all(&data)
            .context("Failed to write metadata store")?;
        staging
            .as_file()
            .sync_all()
            .context("Failed to flush metadata store")?;
        staging
            .persist(path)
            .map_err(|e| e.error)
            .with_context(|| format!("Failed to replace metadata store: {}", path.display()))?;

        Ok(())
    }
}
