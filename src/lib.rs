#![warn(missing_docs)]
#![allow(clippy::arithmetic_side_effects)] // Simple counters cannot overflow

//! # Modsync - Local-to-Remote Directory Mirroring
//!
//! Modsync keeps local directory trees mirrored onto a remote-mounted tree (typically
//! an NFS share), propagating creates, modifications, deletions and renames.
//!
//! ## Architecture
//!
//! - [`storage`]: Metadata store holding one [`storage::FileRecord`] per synced file
//! - [`mapping`]: Maps a local path onto its remote counterpart
//! - [`policy`]: Exclude-pattern evaluation
//! - [`engine`]: The reconciler, change queue and worker thread
//! - [`watcher`]: Filesystem watch adapter feeding the change queue
//! - [`mount`]: Remote mount lifecycle
//! - [`config`]: Configuration parsing and validation
//!
//! Events flow `watcher -> engine::queue -> engine::Reconciler -> remote tree + storage`.
//! A full sync walks the local roots directly into the reconciler.
//!
//! ## Example Usage
//!
//! ```no_run
//! use modsync::SyncContext;
//!
//! # fn main() -> anyhow::Result<()> {
//! let ctx = SyncContext::load(None)?;
//! let report = ctx.reconciler().full_sync();
//! println!("{} files synced", report.applied);
//! # Ok(())
//! # }
//! ```

/// Command-line interface definitions.
pub mod cli;

/// Command implementations (sync, watch, status, mount, unmount).
pub mod commands;

/// Configuration parsing, validation, and management.
pub mod config;

/// Reconciliation engine and change queue.
pub mod engine;

/// Local-to-remote path mapping.
pub mod mapping;

/// Remote mount management.
pub mod mount;

/// Exclude-pattern sync policy.
pub mod policy;

/// Metadata store for synced files.
pub mod storage;

/// Utility functions and helpers.
pub mod utils;

/// Filesystem watch adapter.
pub mod watcher;

use anyhow::{Context, Result};
use engine::Reconciler;
use std::path::PathBuf;
use std::sync::Arc;
use storage::MetadataStore;

/// Current version of the modsync binary.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration file path relative to home directory.
pub const DEFAULT_CONFIG_PATH: &str = ".config/modsync/config.toml";

/// Default metadata store path relative to home directory.
pub const DEFAULT_DB_PATH: &str = ".local/share/modsync/metadata.bin";

/// Environment variable overriding the configuration file path.
pub const CONFIG_PATH_ENV: &str = "MODSYNC_CONFIG_PATH";

/// Central context for a sync session.
///
/// Holds the loaded configuration and the opened metadata store. Everything the
/// commands need (reconciler, mount manager) is derived from it.
#[derive(Debug, Clone)]
pub struct SyncContext {
    /// Path to the configuration file.
    pub config_path: PathBuf,

    /// Loaded configuration settings.
    pub config: config::Config,

    /// Metadata store shared by every reconciler built from this context.
    pub store: Arc<MetadataStore>,
}

impl SyncContext {
    /// Loads the configuration and opens the metadata store.
    ///
    /// The configuration path is taken from `config_path` if given, then from
    /// `MODSYNC_CONFIG_PATH`, then from `~/.config/modsync/config.toml`.
    ///
    /// # Errors
    /// Returns an error if the configuration cannot be read or parsed, or the
    /// metadata store's directory cannot be created.
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        let config_path = match config_path {
            Some(path) => path,
            None => default_config_path()?,
        };

        let validator = config::validator::ConfigValidator::new();
        if let Err(e) = validator.validate_config_file(&config_path) {
            tracing::warn!("Configuration validation failed: {e:#}");
        }

        let config = config::Config::load(&config_path)?;
        Self::new_explicit(config_path, config)
    }

    /// Creates a context from an already loaded configuration.
    ///
    /// # Errors
    /// Returns an error if the metadata store cannot be opened.
    pub fn new_explicit(config_path: PathBuf, config: config::Config) -> Result<Self> {
        let store = MetadataStore::open(&config.metadata.db_path).with_context(|| {
            format!(
                "Failed to open metadata store: {}",
                config.metadata.db_path.display()
            )
        })?;

        Ok(Self {
            config_path,
            config,
            store: Arc::new(store),
        })
    }

    /// Builds a reconciler sharing this context's metadata store.
    #[must_use]
    pub fn reconciler(&self) -> Arc<Reconciler> {
        Arc::new(Reconciler::new(self.config.clone(), Arc::clone(&self.store)))
    }

    /// Builds the mount manager for the configured server.
    #[must_use]
    pub fn mount_manager(&self) -> Box<dyn mount::MountManager> {
        mount::from_config(&self.config.server)
    }
}

/// Resolves the configuration path from the environment or the home directory.
///
/// # Errors
/// Returns an error if the home directory cannot be determined.
pub fn default_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        return Ok(PathBuf::from(path));
    }
    let home = dirs::home_dir().context("Could not find home directory")?;
    Ok(home.join(DEFAULT_CONFIG_PATH))
}
