//! Applies change events to the remote tree.
//!
//! Every filesystem failure is converted into [`SyncOutcome::Recoverable`] and
//! logged; nothing here aborts a walk or stops the worker. Metadata store errors
//! are logged as warnings and otherwise ignored, so a degraded store only costs
//! redundant copies later.

use super::{ChangeEvent, ChangeReceiver, SkipReason, SyncOutcome, SyncReport};
use crate::config::{Config, DirectoryMapping};
use crate::mapping::{self, Resolved};
use crate::policy;
use crate::storage::{MetadataStore, SyncStatus};
use crate::utils::paths::{ensure_parent_dirs, normalize_lexically};
use crate::utils::permissions::copy_preserving;
use crate::utils::{format_size, hash, modified_utc};
use anyhow::{Context, Result};
use rayon::prelude::*;
use std::fs::{self, Metadata};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Turns change events into remote mutations and metadata updates
#[derive(Debug)]
pub struct Reconciler {
    config: Config,
    store: Arc<MetadataStore>,
}

impl Reconciler {
    /// Create a reconciler writing into `store`
    #[must_use]
    pub const fn new(config: Config, store: Arc<MetadataStore>) -> Self {
        Self { config, store }
    }

    /// Configuration this reconciler was built with
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Shared metadata store
    #[must_use]
    pub const fn store(&self) -> &Arc<MetadataStore> {
        &self.store
    }

    /// Apply one event
    ///
    /// Returns once the remote side effects and the metadata update are done.
    pub fn handle(&self, event: &ChangeEvent) -> SyncOutcome {
        debug!(%event, "Handling change");
        let outcome = match event {
            ChangeEvent::Created(path) | ChangeEvent::Modified(path) => self.sync_file(path),
            ChangeEvent::Deleted(path) => self.delete(path),
            ChangeEvent::Moved { from, to } => self.move_file(from, to),
        };

        if let SyncOutcome::Recoverable(reason) = &outcome {
            error!(%event, "{reason}");
        }
        outcome
    }

    /// Handle every event currently waiting in `receiver`, in order
    pub fn drain(&self, receiver: &ChangeReceiver) -> SyncReport {
        let mut report = SyncReport::default();
        while let Some(event) = receiver.try_next() {
            report.record(&self.handle(&event));
        }
        report
    }

    /// Walk every mapping and copy each non-excluded file to the remote tree
    ///
    /// Remote directories are created for every local directory. Unless
    /// `gate_full_sync` is set, files are copied whether or not they changed.
    pub fn full_sync(&self) -> SyncReport {
        self.full_sync_with(&AtomicBool::new(false))
    }

    /// [`full_sync`](Self::full_sync) that stops early once `cancel` is set
    pub fn full_sync_with(&self, cancel: &AtomicBool) -> SyncReport {
        let _batch = self.store.batch();
        info!(
            mappings = self.config.sync_directories.len(),
            "Starting full sync"
        );

        let reports: Vec<SyncReport> = self
            .config
            .sync_directories
            .par_iter()
            .map(|mapping| self.sync_mapping(mapping, cancel))
            .collect();

        let mut total = SyncReport::default();
        for report in reports {
            total.merge(report);
        }

        info!(
            applied = total.applied,
            skipped = total.skipped,
            failed = total.failed,
            directories = total.directories,
            "Full sync finished"
        );
        total
    }

    fn sync_mapping(&self, mapping: &DirectoryMapping, cancel: &AtomicBool) -> SyncReport {
        let root = &mapping.local_root;
        if !root.is_dir() {
            warn!("Sync directory does not exist: {}", root.display());
            return SyncReport::default();
        }
        self.sync_tree(root, mapping, cancel)
    }

    /// Copy a local subtree owned by `mapping`, creating remote directories
    fn sync_tree(&self, dir: &Path, mapping: &DirectoryMapping, cancel: &AtomicBool) -> SyncReport {
        let mount_point = &self.config.server.mount_point;
        let mut report = SyncReport::default();

        // A mount point nested in a local root must not be mirrored into itself
        let walker = WalkDir::new(dir)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| entry.path() != mount_point.as_path());

        for entry in walker {
            if cancel.load(Ordering::Relaxed) {
                info!("Full sync of {} cancelled", dir.display());
                break;
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let reason = format!("Skipping unreadable entry under {}: {e}", dir.display());
                    warn!("{reason}");
                    report.record(&SyncOutcome::Recoverable(reason));
                    continue;
                }
            };

            let path = entry.path();
            let remote = mapping::map_into(path, mapping, mount_point);

            if entry.file_type().is_dir() {
                match fs::create_dir_all(&remote) {
                    Ok(()) => report.directories += 1,
                    Err(e) => {
                        let reason =
                            format!("Failed to create directory {}: {e}", remote.display());
                        error!("{reason}");
                        report.record(&SyncOutcome::Recoverable(reason));
                    }
                }
                continue;
            }

            // Symlinks to files are copied by content; anything else is skipped
            if !entry.file_type().is_file() && !path.is_file() {
                report.record(&SyncOutcome::Skipped(SkipReason::Directory));
                continue;
            }

            if !self.passes_policy(path, mapping) {
                report.record(&SyncOutcome::Skipped(SkipReason::Excluded));
                continue;
            }

            if self.config.engine.gate_full_sync && self.is_current(path, &remote) {
                debug!(path = %path.display(), "Up to date");
                report.record(&SyncOutcome::Skipped(SkipReason::UpToDate));
                continue;
            }

            let outcome = self.copy_to(path, &remote);
            if let SyncOutcome::Recoverable(reason) = &outcome {
                error!("{reason}");
            }
            report.record(&outcome);
        }

        report
    }

    fn is_current(&self, local: &Path, remote: &Path) -> bool {
        if self.store.needs_sync(local) {
            return false;
        }
        self.store.get(local).is_some_and(|record| {
            fs::metadata(remote).is_ok_and(|meta| meta.is_file() && meta.len() == record.size)
        })
    }

    /// Paths under the mount point are our own writes seen through a local root
    fn inside_mount(&self, local: &Path) -> bool {
        let inside = local.starts_with(&self.config.server.mount_point);
        if inside {
            debug!(path = %local.display(), "Ignoring path inside the mount point");
        }
        inside
    }

    /// Remote paths whose removal would take other mappings' trees with it
    fn guards_other_roots(&self, remote: &Path, owner: &DirectoryMapping) -> bool {
        let remote = normalize_lexically(remote);
        let mount_point = normalize_lexically(&self.config.server.mount_point);
        if remote == mount_point {
            return true;
        }
        self.config
            .sync_directories
            .iter()
            .filter(|mapping| !std::ptr::eq(*mapping, owner))
            .map(|mapping| remote_root(&mount_point, mapping))
            .any(|root| root.starts_with(&remote))
    }

    fn resolve<'a>(&'a self, local: &Path) -> Option<Resolved<'a>> {
        let resolved = mapping::resolve(local, &self.config);
        if resolved.is_none() {
            warn!("No sync directory maps {}, dropping event", local.display());
        }
        resolved
    }

    fn passes_policy(&self, local: &Path, owner: &DirectoryMapping) -> bool {
        policy::should_sync_in(
            local,
            Some(owner),
            &self.config.sync_directories,
            self.config.engine.exclude_scope,
        )
    }

    fn sync_file(&self, local: &Path) -> SyncOutcome {
        if self.inside_mount(local) {
            return SyncOutcome::Skipped(SkipReason::InsideMount);
        }
        let Some(resolved) = self.resolve(local) else {
            return SyncOutcome::Skipped(SkipReason::Unmapped);
        };
        if !self.passes_policy(local, resolved.mapping) {
            return SyncOutcome::Skipped(SkipReason::Excluded);
        }
        self.copy_to(local, &resolved.remote)
    }

    /// Copy `local` over `remote` and record the snapshot taken before the copy
    fn copy_to(&self, local: &Path, remote: &Path) -> SyncOutcome {
        let meta = match fs::metadata(local) {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %local.display(), "File vanished before copy");
                return SyncOutcome::Skipped(SkipReason::Vanished);
            }
            Err(e) => {
                return self.copy_failed(local, format!("Failed to stat {}: {e}", local.display()));
            }
        };
        if meta.is_dir() {
            return SyncOutcome::Skipped(SkipReason::Directory);
        }

        match self.copy_file(local, remote, &meta) {
            Ok(bytes) => {
                info!(
                    "Synced {} -> {} ({})",
                    local.display(),
                    remote.display(),
                    format_size(bytes)
                );
                self.record_synced(local, &meta);
                SyncOutcome::Applied
            }
            Err(e) => self.copy_failed(local, format!("{e:#}")),
        }
    }

    fn copy_file(&self, local: &Path, remote: &Path, meta: &Metadata) -> Result<u64> {
        ensure_parent_dirs(remote)?;
        copy_preserving(local, remote, meta, self.config.engine.preserve_permissions)
            .with_context(|| format!("Failed to sync {}", local.display()))
    }

    fn copy_failed(&self, local: &Path, reason: String) -> SyncOutcome {
        if let Err(e) = self.store.mark(local, SyncStatus::Error) {
            warn!("Failed to mark {} as errored: {e:#}", local.display());
        }
        SyncOutcome::Recoverable(reason)
    }

    fn record_synced(&self, local: &Path, meta: &Metadata) {
        let modified = match modified_utc(meta) {
            Ok(modified) => modified,
            Err(e) => {
                warn!("Not recording {}: {e:#}", local.display());
                return;
            }
        };

        let checksum = if self.config.engine.compute_checksums {
            match hash::hash_file(local) {
                Ok(digest) => Some(digest),
                Err(e) => {
                    warn!("Failed to hash {}: {e:#}", local.display());
                    None
                }
            }
        } else {
            None
        };

        if let Err(e) = self
            .store
            .upsert_with_checksum(local, modified, meta.len(), checksum)
        {
            warn!("Metadata store update failed for {}: {e:#}", local.display());
        }
    }

    fn forget(&self, local: &Path) {
        if let Err(e) = self.store.remove_under(local) {
            warn!("Metadata store removal failed for {}: {e:#}", local.display());
        }
    }

    fn delete(&self, local: &Path) -> SyncOutcome {
        if self.inside_mount(local) {
            return SyncOutcome::Skipped(SkipReason::InsideMount);
        }
        let Some(resolved) = self.resolve(local) else {
            return SyncOutcome::Skipped(SkipReason::Unmapped);
        };
        let remote = resolved.remote;
        if self.guards_other_roots(&remote, resolved.mapping) {
            return SyncOutcome::Recoverable(format!(
                "Refusing to remove {}: it holds the mount point or another sync directory",
                remote.display()
            ));
        }

        let removed = match remove_remote(&remote) {
            Ok(removed) => removed,
            Err(e) => return SyncOutcome::Recoverable(format!("{e:#}")),
        };

        let had_record = self.store.get(local).is_some();
        self.forget(local);

        if removed {
            info!("Removed {}", remote.display());
            SyncOutcome::Applied
        } else if had_record {
            debug!(path = %remote.display(), "Remote already absent");
            SyncOutcome::Applied
        } else {
            SyncOutcome::Skipped(SkipReason::UpToDate)
        }
    }

    fn move_file(&self, from: &Path, to: &Path) -> SyncOutcome {
        let source = mapping::resolve(from, &self.config)
            .filter(|_| !self.inside_mount(from))
            .filter(|resolved| self.passes_policy(from, resolved.mapping));
        let Some(dest) = mapping::resolve(to, &self.config)
            .filter(|_| !self.inside_mount(to))
            .filter(|resolved| self.passes_policy(to, resolved.mapping))
        else {
            debug!(from = %from.display(), to = %to.display(), "Move leaves the synced set");
            return self.delete(from);
        };
        let Some(source) = source else {
            debug!(from = %from.display(), to = %to.display(), "Move enters the synced set");
            return self.copy_tree_or_file(to, dest.mapping, &dest.remote);
        };

        if self.guards_other_roots(&source.remote, source.mapping) {
            return SyncOutcome::Recoverable(format!(
                "Refusing to move {}: it holds the mount point or another sync directory",
                source.remote.display()
            ));
        }

        if fs::symlink_metadata(&source.remote).is_err() {
            debug!(path = %source.remote.display(), "Remote source missing, copying destination");
            self.forget(from);
            return self.copy_tree_or_file(to, dest.mapping, &dest.remote);
        }

        if let Err(e) = ensure_parent_dirs(&dest.remote) {
            return SyncOutcome::Recoverable(format!("{e:#}"));
        }

        if let Err(e) = fs::rename(&source.remote, &dest.remote) {
            warn!(
                "Rename {} -> {} failed ({e}), falling back to copy",
                source.remote.display(),
                dest.remote.display()
            );
            let outcome = self.copy_tree_or_file(to, dest.mapping, &dest.remote);
            if outcome.is_applied() {
                if let Err(e) = remove_remote(&source.remote) {
                    warn!("{e:#}");
                }
                self.forget(from);
            }
            return outcome;
        }

        info!(
            "Moved {} -> {}",
            source.remote.display(),
            dest.remote.display()
        );

        match fs::metadata(to) {
            Ok(meta) if meta.is_dir() => {
                if let Err(e) = self.store.rename_under(from, to) {
                    warn!("Metadata store rename failed for {}: {e:#}", from.display());
                }
            }
            Ok(meta) => {
                self.forget(from);
                self.record_synced(to, &meta);
            }
            // Already gone locally; the following delete event cleans up
            Err(_) => self.forget(from),
        }
        SyncOutcome::Applied
    }

    fn copy_tree_or_file(&self, local: &Path, mapping: &DirectoryMapping, remote: &Path) -> SyncOutcome {
        if !local.is_dir() {
            return self.copy_to(local, remote);
        }

        let report = self.sync_tree(local, mapping, &AtomicBool::new(false));
        if report.has_failures() {
            SyncOutcome::Recoverable(format!(
                "{} of {} files under {} failed to sync",
                report.failed,
                report.failed + report.applied,
                local.display()
            ))
        } else {
            SyncOutcome::Applied
        }
    }
}

fn remote_root(mount_point: &Path, mapping: &DirectoryMapping) -> PathBuf {
    normalize_lexically(&mount_point.join(&mapping.remote_subpath))
}

/// Remove a remote file or directory tree; `Ok(false)` if it was not there
fn remove_remote(remote: &Path) -> Result<bool> {
    let meta = match fs::symlink_metadata(remote) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to stat {}", remote.display()));
        }
    };

    if meta.is_dir() {
        fs::remove_dir_all(remote)
    } else {
        fs::remove_file(remote)
    }
    .with_context(|| format!("Failed to remove {}", remote.display()))?;
    Ok(true)
}
