use crate::SyncContext;
use crate::engine::Reconciler;
use anyhow::Result;
use std::sync::Arc;

/// Run one full sync of every configured directory
///
/// With `changed_only`, files the metadata store considers current are not
/// copied again.
///
/// # Errors
///
/// Returns an error if the remote tree cannot be mounted. Per-file failures
/// are reported but do not fail the command.
pub fn execute(ctx: &SyncContext, changed_only: bool) -> Result<()> {
    super::require_mount(ctx)?;

    let reconciler = if changed_only {
        let mut config = ctx.config.clone();
        config.engine.gate_full_sync = true;
        Arc::new(Reconciler::new(config, Arc::clone(&ctx.store)))
    } else {
        ctx.reconciler()
    };

    if reconciler.config().sync_directories.is_empty() {
        super::print_warning("No sync directories configured");
        return Ok(());
    }

    super::print_info(&format!(
        "Syncing {} director{} to {}",
        reconciler.config().sync_directories.len(),
        if reconciler.config().sync_directories.len() == 1 { "y" } else { "ies" },
        reconciler.config().server.mount_point.display()
    ));

    let report = reconciler.full_sync();
    super::print_report(&report);
    Ok(())
}
