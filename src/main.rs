use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use modsync::cli::{Cli, Commands};
use modsync::{SyncContext, commands};
use std::process;
use tracing_subscriber::EnvFilter;

fn main() {
    if let Err(e) = run() {
        eprintln!("{} {e:#}", "Error:".red().bold());
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_target(false)
        .init();

    let ctx = SyncContext::load(cli.config)?;

    match cli.command {
        Commands::Sync { changed_only } => commands::sync::execute(&ctx, changed_only),
        Commands::Watch { no_initial_sync } => commands::watch::execute(&ctx, !no_initial_sync),
        Commands::Status { all } => commands::status::execute(&ctx, all),
        Commands::Mount => commands::mount::execute_mount(&ctx),
        Commands::Unmount => commands::mount::execute_unmount(&ctx),
    }
}
