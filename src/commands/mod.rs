pub mod mount;
pub mod status;
pub mod sync;
pub mod watch;

use crate::SyncContext;
use crate::engine::SyncReport;
use colored::Colorize;

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Mount the remote tree or fail the command
///
/// # Errors
///
/// Returns an error if the remote tree cannot be mounted
pub fn require_mount(ctx: &SyncContext) -> anyhow::Result<()> {
    let manager = ctx.mount_manager();
    if !manager.ensure_mounted() {
        anyhow::bail!("Remote {} is not available", manager.describe());
    }
    Ok(())
}

/// Print the totals of a sync run and up to [`SyncReport::MAX_ERRORS`] failures
pub fn print_report(report: &SyncReport) {
    let summary = format!(
        "{} synced, {} skipped, {} directories",
        report.applied, report.skipped, report.directories
    );

    if report.has_failures() {
        print_warning(&format!("{summary}, {} failed", report.failed));
        for reason in &report.errors {
            print_error(reason);
        }
        if report.failed > report.errors.len() {
            println!("  ... and {} more", report.failed - report.errors.len());
        }
    } else {
        print_success(&summary);
    }
}
