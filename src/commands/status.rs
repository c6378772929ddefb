use crate::SyncContext;
use crate::storage::{FileRecord, SyncStatus};
use crate::utils::format_size;
use anyhow::Result;
use chrono::Local;
use colored::Colorize;
use std::collections::HashSet;
use std::path::PathBuf;

pub fn execute(ctx: &SyncContext, all: bool) -> Result<()> {
    let mount = ctx.mount_manager();
    let mounted = if mount.is_mounted() {
        "mounted".green()
    } else {
        "not mounted".red()
    };
    println!("Remote: {} ({mounted})", mount.describe());

    for mapping in &ctx.config.sync_directories {
        let marker = if mapping.local_root.is_dir() {
            "".normal()
        } else {
            " (missing)".red()
        };
        println!(
            "  {}{marker} -> {}",
            mapping.local_root.display(),
            ctx.config.remote_root(mapping).display()
        );
    }
    println!();

    let records = ctx.store.records();
    if records.is_empty() {
        super::print_info("No files synced yet");
        return Ok(());
    }

    let stale: HashSet<PathBuf> = ctx.store.stale_paths().into_iter().collect();
    let total_size: u64 = records.iter().map(|record| record.size).sum();

    for record in &records {
        let needs_sync = stale.contains(&record.path);
        if all || needs_sync || record.sync_status != SyncStatus::Synced {
            print_record(record, needs_sync);
        }
    }

    println!();
    let summary = format!(
        "{} files tracked ({}), {} need sync",
        records.len(),
        format_size(total_size),
        stale.len()
    );
    if stale.is_empty() {
        super::print_success(&summary);
    } else {
        super::print_warning(&summary);
    }
    Ok(())
}

fn print_record(record: &FileRecord, needs_sync: bool) {
    let status = match (record.sync_status, needs_sync) {
        (SyncStatus::Error, _) => "error".red().bold(),
        (_, true) => "stale".yellow().bold(),
        (SyncStatus::Pending, false) => "pending".yellow(),
        (SyncStatus::Synced, false) => "synced".green(),
    };
    let synced_at = record.last_synced.with_timezone(&Local);

    println!(
        "  {:>8}  {:>10}  {}  {}",
        status,
        format_size(record.size),
        synced_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
        record.path.display()
    );
}
