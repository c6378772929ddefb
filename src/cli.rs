//! Command-line interface definitions for modsync.
//!
//! Field-level documentation is provided via clap attributes, so missing docs
//! are allowed for this module.

#![allow(missing_docs)]

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Main CLI structure for modsync.
#[derive(Parser, Debug)]
#[command(
    name = "modsync",
    version = crate::VERSION,
    about = "Mirror local directories onto a remote mount",
    long_about = "Propagates creates, modifications, deletions and renames from local \
                  directory trees to a remote-mounted tree such as an NFS share"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file
    #[arg(short, long, global = true, env = crate::CONFIG_PATH_ENV)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,
}

/// All available commands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run one full sync of every configured directory
    Sync {
        /// Only copy files whose metadata says they changed
        #[arg(long)]
        changed_only: bool,
    },

    /// Full sync, then keep watching for changes until interrupted
    Watch {
        /// Skip the initial full sync
        #[arg(long)]
        no_initial_sync: bool,
    },

    /// Show tracked files and those needing sync
    Status {
        /// List every tracked file, not only stale ones
        #[arg(short, long)]
        all: bool,
    },

    /// Mount the remote tree
    Mount,

    /// Unmount the remote tree
    Unmount,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "modsync",
            "sync",
            "--config",
            "/etc/modsync.toml",
            "--log-level",
            "debug",
        ])
        .expect("valid args");
        assert_eq!(cli.command, Commands::Sync { changed_only: false });
        assert_eq!(cli.config, Some(PathBuf::from("/etc/modsync.toml")));
        assert_eq!(cli.log_level, "debug");
    }
}
