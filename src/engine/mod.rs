//! Reconciliation engine.
//!
//! [`Reconciler`] turns [`ChangeEvent`]s into remote filesystem mutations and
//! metadata updates. [`queue`] carries events from producers to the single
//! worker thread that feeds the reconciler.

pub mod queue;
pub mod reconciler;

pub use queue::{ChangeQueue, ChangeReceiver, ChangeSender, SyncWorker, WorkerStats};
pub use reconciler::Reconciler;

use std::fmt;
use std::path::{Path, PathBuf};

/// A single observed filesystem change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// A file appeared
    Created(PathBuf),
    /// A file's contents or metadata changed
    Modified(PathBuf),
    /// A file (or directory) disappeared
    Deleted(PathBuf),
    /// A file was renamed within the watched trees
    Moved {
        /// Old location
        from: PathBuf,
        /// New location
        to: PathBuf,
    },
}

impl ChangeEvent {
    /// Primary path of the event; the destination for moves
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Created(path) | Self::Modified(path) | Self::Deleted(path) => path,
            Self::Moved { to, .. } => to,
        }
    }

    /// Short label used in logs
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Created(_) => "created",
            Self::Modified(_) => "modified",
            Self::Deleted(_) => "deleted",
            Self::Moved { .. } => "moved",
        }
    }
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Moved { from, to } => {
                write!(f, "moved {} -> {}", from.display(), to.display())
            }
            other => write!(f, "{} {}", other.kind(), other.path().display()),
        }
    }
}

/// Why an event or file was not propagated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// An exclude pattern matched
    Excluded,
    /// No mapping owns the path
    Unmapped,
    /// The path is a directory
    Directory,
    /// The remote copy is already current
    UpToDate,
    /// The local file vanished before it could be copied
    Vanished,
    /// The path lies inside the remote mount point
    InsideMount,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Excluded => "excluded",
            Self::Unmapped => "unmapped",
            Self::Directory => "directory",
            Self::UpToDate => "up to date",
            Self::Vanished => "vanished",
            Self::InsideMount => "inside mount point",
        };
        f.write_str(label)
    }
}

/// Result of handling one event or one file
///
/// `Recoverable` failures have already been logged; callers decide whether to
/// treat them as fatal. Nothing in the engine does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The remote tree was changed
    Applied,
    /// Nothing to do
    Skipped(SkipReason),
    /// The operation failed; processing continues
    Recoverable(String),
}

impl SyncOutcome {
    /// Whether the remote tree was changed
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Tally of a full sync or a drained batch of events
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Files copied, removed or moved
    pub applied: usize,
    /// Files skipped for any [`SkipReason`]
    pub skipped: usize,
    /// Recoverable failures
    pub failed: usize,
    /// Remote directories ensured
    pub directories: usize,
    /// First few failure messages
    pub errors: Vec<String>,
}

impl SyncReport {
    /// Failure messages kept in a report
    pub const MAX_ERRORS: usize = 20;

    /// Count one outcome
    pub fn record(&mut self, outcome: &SyncOutcome) {
        match outcome {
            SyncOutcome::Applied => self.applied += 1,
            SyncOutcome::Skipped(_) => self.skipped += 1,
            SyncOutcome::Recoverable(reason) => {
                self.failed += 1;
                if self.errors.len() < Self::MAX_ERRORS {
                    self.errors.push(reason.clone());
                }
            }
        }
    }

    /// Fold another report into this one
    pub fn merge(&mut self, other: Self) {
        self.applied += other.applied;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.directories += other.directories;
        let room = Self::MAX_ERRORS.saturating_sub(self.errors.len());
        self.errors.extend(other.errors.into_iter().take(room));
    }

    /// Whether any failure was recorded
    #[must_use]
    pub const fn has_failures(&self) -> bool {
        self.failed > 0
    }
}
