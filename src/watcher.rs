//! Filesystem watch adapter.
//!
//! One `notify` watcher per configured root feeds a forwarding thread, which
//! translates raw notifications into [`ChangeEvent`]s and pushes them onto the
//! change queue. Directory creations and modifications never reach the queue.

use crate::engine::{ChangeEvent, ChangeSender};
use anyhow::{Context, Result};
use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Idle wait between shutdown checks in a forwarding thread
const FORWARD_POLL: Duration = Duration::from_millis(200);

/// Translate one notification without rename pairing
///
/// Paths that are directories at translation time are ignored, except for
/// removals (the directory is already gone) and renames of whole directories.
#[must_use]
pub fn translate(event: &Event) -> Vec<ChangeEvent> {
    match &event.kind {
        EventKind::Create(CreateKind::Folder) => Vec::new(),
        EventKind::Create(_) => event
            .paths
            .iter()
            .filter(|path| !path.is_dir())
            .map(|path| ChangeEvent::Created(path.clone()))
            .collect(),
        EventKind::Modify(ModifyKind::Name(mode)) => translate_rename(*mode, &event.paths),
        EventKind::Modify(_) => event
            .paths
            .iter()
            .filter(|path| !path.is_dir())
            .map(|path| ChangeEvent::Modified(path.clone()))
            .collect(),
        EventKind::Remove(_) => event
            .paths
            .iter()
            .map(|path| ChangeEvent::Deleted(path.clone()))
            .collect(),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

fn translate_rename(mode: RenameMode, paths: &[PathBuf]) -> Vec<ChangeEvent> {
    match (mode, paths) {
        (RenameMode::Both, [from, to]) => vec![ChangeEvent::Moved {
            from: from.clone(),
            to: to.clone(),
        }],
        (RenameMode::From, _) => paths.iter().cloned().map(ChangeEvent::Deleted).collect(),
        (RenameMode::To, _) => paths.iter().flat_map(|path| arrived(path)).collect(),
        // Backends that cannot tell which side of a rename they saw
        _ => paths
            .iter()
            .flat_map(|path| {
                if path.exists() {
                    arrived(path)
                } else {
                    vec![ChangeEvent::Deleted(path.clone())]
                }
            })
            .collect(),
    }
}

/// Created events for a path that appeared; a directory yields its files
fn arrived(path: &Path) -> Vec<ChangeEvent> {
    if !path.is_dir() {
        return vec![ChangeEvent::Created(path.to_path_buf())];
    }
    WalkDir::new(path)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|entry| !entry.file_type().is_dir())
        .map(|entry| ChangeEvent::Created(entry.into_path()))
        .collect()
}

/// Pairs rename halves into single moves
///
/// Some backends report a rename three times: the old name, the new name,
/// then both together under one tracker id. The halves are held back until the
/// combined notification arrives; a half that is never completed (the file
/// left or entered the watched tree) is released as a delete or create.
#[derive(Debug, Default)]
pub struct RenamePairer {
    pending: Vec<Event>,
}

impl RenamePairer {
    /// Feed one notification, returning whatever can be released now
    pub fn push(&mut self, event: Event) -> Vec<ChangeEvent> {
        let rename = match event.kind {
            EventKind::Modify(ModifyKind::Name(mode)) => Some(mode),
            _ => None,
        };

        match (rename, event.attrs.tracker()) {
            (Some(RenameMode::From), Some(id)) => {
                let released = self.release_except(id);
                self.pending.push(event);
                released
            }
            (Some(RenameMode::To), Some(id)) => {
                let mut released = self.release_except(id);
                if self.pending.is_empty() {
                    // Arrived from outside the watched tree
                    released.extend(translate(&event));
                } else {
                    self.pending.push(event);
                }
                released
            }
            (Some(RenameMode::Both), Some(id)) => {
                self.pending.retain(|held| held.attrs.tracker() != Some(id));
                let mut released = self.flush();
                released.extend(translate(&event));
                released
            }
            _ => {
                let mut released = self.flush();
                released.extend(translate(&event));
                released
            }
        }
    }

    /// Release every held half
    pub fn flush(&mut self) -> Vec<ChangeEvent> {
        self.pending.drain(..).flat_map(|held| translate(&held)).collect()
    }

    fn release_except(&mut self, id: usize) -> Vec<ChangeEvent> {
        let (keep, release): (Vec<Event>, Vec<Event>) = self
            .pending
            .drain(..)
            .partition(|held| held.attrs.tracker() == Some(id));
        self.pending = keep;
        release.iter().flat_map(translate).collect()
    }
}

struct RootWatch {
    root: PathBuf,
    watcher: RecommendedWatcher,
    forwarder: JoinHandle<()>,
}

/// Recursive watches over a set of roots
pub struct FileWatcher {
    roots: Vec<RootWatch>,
    stop: Arc<AtomicBool>,
}

impl FileWatcher {
    /// Watch every existing root recursively, forwarding changes to `sender`
    ///
    /// Roots that do not exist are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if a watcher cannot be created or registered, or a
    /// forwarding thread cannot be spawned.
    pub fn start(roots: &[PathBuf], sender: &ChangeSender) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let mut watches = Vec::with_capacity(roots.len());

        for root in roots {
            if !root.is_dir() {
                warn!("Not watching missing directory: {}", root.display());
                continue;
            }

            let (tx, rx) = mpsc::channel::<notify::Result<Event>>();
            let mut watcher = notify::recommended_watcher(move |res| {
                let _ = tx.send(res);
            })
            .with_context(|| format!("Failed to create watcher for {}", root.display()))?;
            watcher
                .watch(root, RecursiveMode::Recursive)
                .with_context(|| format!("Failed to watch {}", root.display()))?;

            let forwarder = {
                let root = root.clone();
                let sender = sender.clone();
                let stop = Arc::clone(&stop);
                thread::Builder::new()
                    .name(format!("modsync-watch-{}", watches.len()))
                    .spawn(move || forward(&root, &rx, &sender, &stop))
                    .context("Failed to spawn watch forwarding thread")?
            };

            info!("Watching {}", root.display());
            watches.push(RootWatch {
                root: root.clone(),
                watcher,
                forwarder,
            });
        }

        Ok(Self {
            roots: watches,
            stop,
        })
    }

    /// Roots actually being watched
    #[must_use]
    pub fn watched_roots(&self) -> Vec<PathBuf> {
        self.roots.iter().map(|watch| watch.root.clone()).collect()
    }

    /// Stop every watch, then wait for the forwarding threads to exit
    pub fn stop(self) {
        self.stop.store(true, Ordering::Release);

        let mut forwarders = Vec::with_capacity(self.roots.len());
        for watch in self.roots {
            drop(watch.watcher);
            forwarders.push((watch.root, watch.forwarder));
        }
        for (root, forwarder) in forwarders {
            if forwarder.join().is_err() {
                error!("Watch forwarder for {} panicked", root.display());
            }
        }
        info!("File watching stopped");
    }
}

fn forward(
    root: &Path,
    rx: &mpsc::Receiver<notify::Result<Event>>,
    sender: &ChangeSender,
    stop: &AtomicBool,
) {
    let mut pairer = RenamePairer::default();
    let send_all = |events: Vec<ChangeEvent>| {
        for event in events {
            debug!(%event, "Queueing change");
            if !sender.enqueue(event) {
                return false;
            }
        }
        true
    };

    while !stop.load(Ordering::Acquire) {
        let released = match rx.recv_timeout(FORWARD_POLL) {
            Ok(Ok(event)) => pairer.push(event),
            Ok(Err(e)) => {
                error!("Watch error on {}: {e}", root.display());
                continue;
            }
            Err(RecvTimeoutError::Timeout) => pairer.flush(),
            Err(RecvTimeoutError::Disconnected) => break,
        };
        if !send_all(released) {
            break;
        }
    }
    debug!("Forwarder for {} exiting", root.display());
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, DataChange, MetadataKind, RemoveKind};
    use tempfile::tempdir;

    fn event(kind: EventKind, paths: &[&Path]) -> Event {
        paths
            .iter()
            .fold(Event::new(kind), |ev, path| ev.add_path(path.to_path_buf()))
    }

    #[test]
    fn test_translate_basic_kinds() {
        let file = Path::new("/nonexistent/a.txt");

        assert_eq!(
            translate(&event(EventKind::Create(CreateKind::File), &[file])),
            vec![ChangeEvent::Created(file.to_path_buf())]
        );
        assert_eq!(
            translate(&event(
                EventKind::Modify(ModifyKind::Data(DataChange::Content)),
                &[file]
            )),
            vec![ChangeEvent::Modified(file.to_path_buf())]
        );
        assert_eq!(
            translate(&event(
                EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)),
                &[file]
            )),
            vec![ChangeEvent::Modified(file.to_path_buf())]
        );
        assert_eq!(
            translate(&event(EventKind::Remove(RemoveKind::File), &[file])),
            vec![ChangeEvent::Deleted(file.to_path_buf())]
        );
        assert!(translate(&event(EventKind::Access(AccessKind::Any), &[file])).is_empty());
        assert!(translate(&event(EventKind::Create(CreateKind::Folder), &[file])).is_empty());
    }

    #[test]
    fn test_translate_directory_modify_ignored() -> anyhow::Result<()> {
        let dir = tempdir()?;
        assert!(
            translate(&event(EventKind::Modify(ModifyKind::Any), &[dir.path()])).is_empty()
        );
        assert!(translate(&event(EventKind::Create(CreateKind::Any), &[dir.path()])).is_empty());
        Ok(())
    }

    #[test]
    fn test_translate_rename_halves() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let present = dir.path().join("present.txt");
        std::fs::write(&present, b"x")?;
        let missing = dir.path().join("missing.txt");

        assert_eq!(
            translate(&event(
                EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
                &[missing.as_path(), present.as_path()]
            )),
            vec![ChangeEvent::Moved {
                from: missing.clone(),
                to: present.clone()
            }]
        );
        assert_eq!(
            translate(&event(
                EventKind::Modify(ModifyKind::Name(RenameMode::From)),
                &[missing.as_path()]
            )),
            vec![ChangeEvent::Deleted(missing.clone())]
        );
        assert_eq!(
            translate(&event(
                EventKind::Modify(ModifyKind::Name(RenameMode::Any)),
                &[present.as_path()]
            )),
            vec![ChangeEvent::Created(present.clone())]
        );
        assert_eq!(
            translate(&event(
                EventKind::Modify(ModifyKind::Name(RenameMode::Any)),
                &[missing.as_path()]
            )),
            vec![ChangeEvent::Deleted(missing)]
        );
        Ok(())
    }

    #[test]
    fn test_directory_moved_in_yields_its_files() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let moved_in = dir.path().join("incoming");
        std::fs::create_dir_all(moved_in.join("nested"))?;
        std::fs::write(moved_in.join("a.txt"), b"a")?;
        std::fs::write(moved_in.join("nested/b.txt"), b"b")?;

        let mut events = translate(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::To)),
            &[moved_in.as_path()],
        ));
        events.sort_by(|a, b| a.path().cmp(b.path()));
        assert_eq!(
            events,
            vec![
                ChangeEvent::Created(moved_in.join("a.txt")),
                ChangeEvent::Created(moved_in.join("nested/b.txt")),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_pairer_collapses_triple_into_move() {
        let from = Path::new("/w/old.txt");
        let to = Path::new("/w/new.txt");
        let mut pairer = RenamePairer::default();

        let half_from =
            event(EventKind::Modify(ModifyKind::Name(RenameMode::From)), &[from]).set_tracker(7);
        let half_to =
            event(EventKind::Modify(ModifyKind::Name(RenameMode::To)), &[to]).set_tracker(7);
        let both = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &[from, to],
        )
        .set_tracker(7);

        assert!(pairer.push(half_from).is_empty());
        assert!(pairer.push(half_to).is_empty());
        assert_eq!(
            pairer.push(both),
            vec![ChangeEvent::Moved {
                from: from.to_path_buf(),
                to: to.to_path_buf()
            }]
        );
        assert!(pairer.flush().is_empty());
    }

    #[test]
    fn test_pairer_releases_unpaired_from_as_delete() {
        let from = Path::new("/w/leaving.txt");
        let mut pairer = RenamePairer::default();

        let half_from =
            event(EventKind::Modify(ModifyKind::Name(RenameMode::From)), &[from]).set_tracker(3);
        assert!(pairer.push(half_from).is_empty());
        assert_eq!(pairer.flush(), vec![ChangeEvent::Deleted(from.to_path_buf())]);
    }

    #[test]
    fn test_pairer_unrelated_event_flushes_first() {
        let from = Path::new("/w/leaving.txt");
        let other = Path::new("/w/other.txt");
        let mut pairer = RenamePairer::default();

        pairer.push(
            event(EventKind::Modify(ModifyKind::Name(RenameMode::From)), &[from]).set_tracker(1),
        );
        let released = pairer.push(event(EventKind::Remove(RemoveKind::File), &[other]));
        assert_eq!(
            released,
            vec![
                ChangeEvent::Deleted(from.to_path_buf()),
                ChangeEvent::Deleted(other.to_path_buf()),
            ]
        );
    }

    #[test]
    fn test_start_skips_missing_roots() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let (tx, _rx) = crate::engine::ChangeQueue::unbounded();
        let watcher = FileWatcher::start(
            &[dir.path().to_path_buf(), dir.path().join("absent")],
            &tx,
        )?;
        assert_eq!(watcher.watched_roots(), vec![dir.path().to_path_buf()]);
        watcher.stop();
        Ok(())
    }
}
