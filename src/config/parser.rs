use super::{Config, DirectoryMapping};
use crate::utils::paths::{expand_tilde, is_plain_relative, normalize_lexically};
use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, warn};

fn decode_mapping(entry: toml::Value) -> Result<DirectoryMapping> {
    let mapping: DirectoryMapping = entry.try_into().context("malformed mapping")?;
    validate_mapping(mapping)
}

/// Read and parse a configuration file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, is not valid TOML, or the
/// server section is unusable.
pub fn parse_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config_str(&content)
        .with_context(|| format!("Invalid config file: {}", path.display()))
}

/// Parse configuration from TOML text.
///
/// Home-relative paths (`~/...`) are expanded. Mappings that cannot work are
/// logged and dropped; the remaining ones are kept in order.
///
/// # Errors
///
/// Returns an error if the text is not valid TOML or the mount point is unusable.
pub fn parse_config_str(content: &str) -> Result<Config> {
    let mut table: toml::Table = toml::from_str(content).context("Failed to parse TOML config")?;
    let entries = match table.remove("sync_directories") {
        Some(toml::Value::Array(entries)) => entries,
        Some(_) => {
            warn!("sync_directories is not an array of tables, ignoring it");
            Vec::new()
        }
        None => Vec::new(),
    };
    let mut config: Config = toml::Value::Table(table)
        .try_into()
        .context("Failed to parse TOML config")?;

    config.server.mount_point = expand_tilde(&config.server.mount_point)?;
    config.metadata.db_path = expand_tilde(&config.metadata.db_path)?;

    validate_server(&config)?;

    config.sync_directories = entries
        .into_iter()
        .enumerate()
        .filter_map(|(position, entry)| match decode_mapping(entry) {
            Ok(mapping) => Some(mapping),
            Err(e) => {
                warn!(position, "Skipping sync directory: {e:#}");
                None
            }
        })
        .collect();

    if config.sync_directories.is_empty() {
        warn!("No usable sync directories configured");
    }

    Ok(config)
}

fn validate_server(config: &Config) -> Result<()> {
    let mount_point = &config.server.mount_point;
    if mount_point.as_os_str().is_empty() {
        anyhow::bail!("server.mount_point must not be empty");
    }
    if !mount_point.is_absolute() {
        anyhow::bail!(
            "server.mount_point must be absolute: {}",
            mount_point.display()
        );
    }
    if config.server.nfs_server.is_some() != config.server.nfs_share.is_some() {
        anyhow::bail!("server.nfs_server and server.nfs_share must be set together");
    }
    Ok(())
}

fn validate_mapping(mut mapping: DirectoryMapping) -> Result<DirectoryMapping> {
    if mapping.local_root.as_os_str().is_empty() {
        anyhow::bail!("local_path is missing");
    }

    mapping.local_root = expand_tilde(&mapping.local_root)?;
    if !mapping.local_root.is_absolute() {
        anyhow::bail!(
            "local_path must be absolute: {}",
            mapping.local_root.display()
        );
    }

    if !is_plain_relative(&mapping.remote_subpath) {
        anyhow::bail!(
            "remote_path must stay inside the mount point: {}",
            mapping.remote_subpath.display()
        );
    }

    if normalize_lexically(&mapping.remote_subpath)
        .as_os_str()
        .is_empty()
    {
        anyhow::bail!("remote_path must name a directory below the mount point");
    }

    mapping.exclude_patterns.retain(|pattern| {
        let keep = !pattern.is_empty();
        if !keep {
            debug!(root = %mapping.local_root.display(), "Ignoring empty exclude pattern");
        }
        keep
    });

    Ok(mapping)
}
