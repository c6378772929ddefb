use crate::SyncContext;
use anyhow::{Context, Result};

pub fn execute_mount(ctx: &SyncContext) -> Result<()> {
    let manager = ctx.mount_manager();
    if manager.is_mounted() {
        super::print_info(&format!("{} is already mounted", manager.describe()));
        return Ok(());
    }

    manager
        .mount()
        .with_context(|| format!("Failed to mount {}", manager.describe()))?;
    super::print_success(&format!("Mounted {}", manager.describe()));
    Ok(())
}

pub fn execute_unmount(ctx: &SyncContext) -> Result<()> {
    let manager = ctx.mount_manager();
    manager
        .unmount()
        .with_context(|| format!("Failed to unmount {}", manager.describe()))?;
    super::print_success(&format!("Unmounted {}", manager.describe()));
    Ok(())
}
