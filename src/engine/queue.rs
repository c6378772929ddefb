//! Change queue and the worker that drains it.
//!
//! The queue is an unbounded `std::sync::mpsc` channel: any number of producers
//! hold a [`ChangeSender`], exactly one [`SyncWorker`] consumes. Events are
//! handled one at a time in enqueue order.

use super::{ChangeEvent, Reconciler, SyncOutcome};
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How often the worker re-checks its shutdown flag while idle
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Constructor for the sender/receiver pair
pub struct ChangeQueue;

impl ChangeQueue {
    /// New unbounded queue
    #[must_use]
    pub fn unbounded() -> (ChangeSender, ChangeReceiver) {
        let (tx, rx) = mpsc::channel();
        (ChangeSender { tx }, ChangeReceiver { rx })
    }
}

/// Producer handle; cheap to clone, never blocks
#[derive(Debug, Clone)]
pub struct ChangeSender {
    tx: Sender<ChangeEvent>,
}

impl ChangeSender {
    /// Queue an event
    ///
    /// Returns `false` if the consumer is gone; the event is dropped.
    pub fn enqueue(&self, event: ChangeEvent) -> bool {
        match self.tx.send(event) {
            Ok(()) => true,
            Err(mpsc::SendError(event)) => {
                debug!(%event, "Change queue closed, dropping event");
                false
            }
        }
    }
}

/// Consumer handle
#[derive(Debug)]
pub struct ChangeReceiver {
    rx: Receiver<ChangeEvent>,
}

impl ChangeReceiver {
    /// Next event if one is waiting
    #[must_use]
    pub fn try_next(&self) -> Option<ChangeEvent> {
        self.rx.try_recv().ok()
    }

    /// Wait up to `timeout` for the next event
    ///
    /// # Errors
    ///
    /// Returns [`RecvTimeoutError::Timeout`] when nothing arrived and
    /// [`RecvTimeoutError::Disconnected`] once every sender is dropped and the
    /// queue is empty.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<ChangeEvent, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    /// Whether every sender is dropped and nothing is left
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }
}

/// Counters published by a running worker
#[derive(Debug, Default)]
pub struct WorkerStats {
    processed: AtomicU64,
    applied: AtomicU64,
    failed: AtomicU64,
}

impl WorkerStats {
    fn record(&self, outcome: &SyncOutcome) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        match outcome {
            SyncOutcome::Applied => {
                self.applied.fetch_add(1, Ordering::Relaxed);
            }
            SyncOutcome::Recoverable(_) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
            SyncOutcome::Skipped(_) => {}
        }
    }

    /// Events handled so far
    #[must_use]
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Events that changed the remote tree
    #[must_use]
    pub fn applied(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }

    /// Events that ended in a recoverable failure
    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Dedicated thread feeding queued events to a [`Reconciler`]
pub struct SyncWorker {
    handle: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    stats: Arc<WorkerStats>,
    done: Receiver<()>,
}

impl SyncWorker {
    /// Start the worker thread
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned
    pub fn spawn(reconciler: Arc<Reconciler>, receiver: ChangeReceiver) -> Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(WorkerStats::default());
        let (done_tx, done) = mpsc::channel();

        let handle = {
            let shutdown = Arc::clone(&shutdown);
            let stats = Arc::clone(&stats);
            thread::Builder::new()
                .name("modsync-worker".to_string())
                .spawn(move || {
                    run(&reconciler, &receiver, &shutdown, &stats);
                    let _ = done_tx.send(());
                })
                .context("Failed to spawn sync worker thread")?
        };

        Ok(Self {
            handle: Some(handle),
            shutdown,
            stats,
            done,
        })
    }

    /// Live counters
    #[must_use]
    pub fn stats(&self) -> Arc<WorkerStats> {
        Arc::clone(&self.stats)
    }

    /// Ask the worker to stop and wait up to `grace` for it
    ///
    /// The event in flight is allowed to finish; queued events are dropped.
    /// Returns `false` if the worker was still busy when the grace period ran
    /// out, in which case the thread is left to finish on its own.
    pub fn stop(mut self, grace: Duration) -> bool {
        self.shutdown.store(true, Ordering::Release);

        match self.done.recv_timeout(grace) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                self.join();
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Sync worker did not stop within {}, detaching",
                    humantime::format_duration(grace)
                );
                self.handle.take();
                false
            }
        }
    }

    /// Wait for the worker to drain the queue and exit
    ///
    /// Returns once every [`ChangeSender`] is dropped and all queued events are
    /// handled.
    pub fn finish(mut self) {
        self.join();
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("Sync worker panicked");
        }
    }
}

fn run(reconciler: &Reconciler, receiver: &ChangeReceiver, shutdown: &AtomicBool, stats: &WorkerStats) {
    info!("Sync worker started");
    loop {
        if shutdown.load(Ordering::Acquire) {
            let dropped = std::iter::from_fn(|| receiver.try_next()).count();
            if dropped > 0 {
                info!(dropped, "Dropping queued events on shutdown");
            }
            break;
        }

        match receiver.recv_timeout(POLL_INTERVAL) {
            Ok(event) => {
                let outcome = reconciler.handle(&event);
                stats.record(&outcome);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    info!(
        processed = stats.processed(),
        failed = stats.failed(),
        "Sync worker stopped"
    );
}
