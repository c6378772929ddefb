pub mod parser;
pub mod validator;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,

    #[serde(default)]
    pub metadata: MetadataConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    /// Directory mappings in configuration order (first match wins)
    #[serde(default)]
    pub sync_directories: Vec<DirectoryMapping>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Where the remote tree is mounted locally
    pub mount_point: PathBuf,
    /// NFS server host; when absent the mount point must already be present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nfs_server: Option<String>,
    /// Exported path on the NFS server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nfs_share: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

/// Pairs a local root with a remote subpath and its exclusion rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryMapping {
    #[serde(rename = "local_path")]
    pub local_root: PathBuf,
    #[serde(rename = "remote_path")]
    pub remote_subpath: PathBuf,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

/// How a mapping's local root is matched against a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrefixMatch {
    /// Root must match whole path components (`/data` does not match `/database`)
    #[default]
    Component,
    /// Raw string prefix, kept for configurations relying on the legacy behavior
    String,
}

/// Which mappings' exclude patterns apply to a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExcludeScope {
    /// Only the patterns of the mapping that owns the path
    #[default]
    Mapping,
    /// Patterns of every configured mapping
    Global,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub prefix_match: PrefixMatch,
    #[serde(default)]
    pub exclude_scope: ExcludeScope,
    #[serde(default = "default_true")]
    pub preserve_permissions: bool,
    /// Skip full-sync copies of files the metadata store considers fresh
    #[serde(default)]
    pub gate_full_sync: bool,
    /// Store an xxh3 content hash in each record
    #[serde(default)]
    pub compute_checksums: bool,
    /// How long shutdown waits for in-flight work
    #[serde(default = "default_shutdown_grace", with = "humantime_duration")]
    pub shutdown_grace: Duration,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            prefix_match: PrefixMatch::default(),
            exclude_scope: ExcludeScope::default(),
            preserve_permissions: true,
            gate_full_sync: false,
            compute_checksums: false,
            shutdown_grace: default_shutdown_grace(),
        }
    }
}

impl DirectoryMapping {
    /// Create a mapping without exclude patterns
    #[must_use]
    pub fn new(local_root: impl Into<PathBuf>, remote_subpath: impl Into<PathBuf>) -> Self {
        Self {
            local_root: local_root.into(),
            remote_subpath: remote_subpath.into(),
            exclude_patterns: Vec::new(),
        }
    }

    /// Builder-style helper to attach exclude patterns
    #[must_use]
    pub fn with_excludes<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }
}

impl Config {
    /// Create a configuration for the given mount point with default settings
    #[must_use]
    pub fn new(mount_point: impl Into<PathBuf>) -> Self {
        Self {
            server: ServerConfig {
                mount_point: mount_point.into(),
                nfs_server: None,
                nfs_share: None,
            },
            metadata: MetadataConfig::default(),
            engine: EngineConfig::default(),
            sync_directories: Vec::new(),
        }
    }

    /// Load configuration from a file
    ///
    /// Invalid mappings are logged and dropped; see [`parser::parse_config_file`].
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file does not exist or cannot be read
    /// - The file contains invalid TOML
    /// - The server section is unusable
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("Configuration file not found: {}", path.display());
        }
        parser::parse_config_file(path)
    }

    /// Save configuration to a file
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Cannot create parent directories
    /// - Cannot write to the file
    /// - TOML serialization fails
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;
        let mut file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create config file: {}", path.display()))?;
        file.write_all(toml_str.as_bytes())?;
        Ok(())
    }

    /// Remote directory a mapping lands in
    #[must_use]
    pub fn remote_root(&self, mapping: &DirectoryMapping) -> PathBuf {
        self.server.mount_point.join(&mapping.remote_subpath)
    }

    /// Local roots of every mapping, in configuration order
    #[must_use]
    pub fn local_roots(&self) -> Vec<PathBuf> {
        self.sync_directories
            .iter()
            .map(|m| m.local_root.clone())
            .collect()
    }
}

// Default functions for serde
fn default_db_path() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"));
    home.join(crate::DEFAULT_DB_PATH)
}

const fn default_true() -> bool {
    true
}

const fn default_shutdown_grace() -> Duration {
    Duration::from_secs(5)
}

/// Durations written as human-readable strings ("5s", "1m 30s")
mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
