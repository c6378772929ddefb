use crate::SyncContext;
use crate::engine::{ChangeQueue, SyncReport, SyncWorker};
use crate::watcher::FileWatcher;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tracing::{info, warn};

/// Watch every configured directory until interrupted
///
/// The initial full sync runs on its own thread alongside the event worker.
/// On Ctrl+C (or SIGTERM) the watches stop first, then the worker gets the
/// configured grace period to finish the event in flight.
///
/// # Errors
///
/// Returns an error if the remote tree cannot be mounted or the watches,
/// threads or signal handlers cannot be set up.
pub fn execute(ctx: &SyncContext, initial_sync: bool) -> Result<()> {
    super::require_mount(ctx)?;

    let reconciler = ctx.reconciler();
    let (sender, receiver) = ChangeQueue::unbounded();

    let watcher = FileWatcher::start(&ctx.config.local_roots(), &sender)?;
    // The forwarding threads hold their own senders
    drop(sender);

    if watcher.watched_roots().is_empty() {
        watcher.stop();
        anyhow::bail!("None of the configured sync directories exist");
    }

    let worker = SyncWorker::spawn(Arc::clone(&reconciler), receiver)?;
    let stats = worker.stats();

    let cancel = Arc::new(AtomicBool::new(false));
    let initial = if initial_sync {
        let reconciler = Arc::clone(&reconciler);
        let cancel = Arc::clone(&cancel);
        Some(
            thread::Builder::new()
                .name("modsync-full-sync".to_string())
                .spawn(move || reconciler.full_sync_with(&cancel))
                .context("Failed to spawn full sync thread")?,
        )
    } else {
        None
    };

    super::print_info(&format!(
        "Watching {} director{}. Press Ctrl+C to stop.",
        watcher.watched_roots().len(),
        if watcher.watched_roots().len() == 1 { "y" } else { "ies" }
    ));

    let waited = wait_for_shutdown();

    watcher.stop();
    cancel.store(true, Ordering::Relaxed);

    let grace = ctx.config.engine.shutdown_grace;
    if !worker.stop(grace) {
        super::print_warning("Sync worker was still busy at shutdown");
    }

    if let Some(handle) = initial {
        match handle.join() {
            Ok(report) => report_initial(&report),
            Err(_) => warn!("Initial full sync panicked"),
        }
    }

    if let Err(e) = ctx.store.flush() {
        warn!("Failed to flush metadata store: {e:#}");
    }

    super::print_success(&format!(
        "Stopped after {} events ({} applied, {} failed)",
        stats.processed(),
        stats.applied(),
        stats.failed()
    ));
    waited
}

fn report_initial(report: &SyncReport) {
    info!(
        applied = report.applied,
        failed = report.failed,
        "Initial full sync done"
    );
    super::print_report(report);
}

/// Block until Ctrl+C or SIGTERM
fn wait_for_shutdown() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start signal runtime")?;

    runtime.block_on(async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            let mut sigterm =
                signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
            tokio::select! {
                res = tokio::signal::ctrl_c() => res.context("Failed to listen for Ctrl+C")?,
                _ = sigterm.recv() => {}
            }
        }

        #[cfg(not(unix))]
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl+C")?;

        info!("Received shutdown signal, stopping");
        Ok(())
    })
}
