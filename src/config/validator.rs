use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::Path;
use tracing::warn;

/// Fields allowed in each `[[sync_directories]]` entry
const MAPPING_FIELDS: &[&str] = &["local_path", "remote_path", "exclude_patterns"];

/// Reports configuration fields that modsync does not recognise
pub struct ConfigValidator {
    /// Fully qualified names of recognised fields
    known_fields: HashSet<String>,
}

impl ConfigValidator {
    /// Create a new validator with known configuration fields
    #[must_use]
    pub fn new() -> Self {
        let known_fields = [
            "server.mount_point",
            "server.nfs_server",
            "server.nfs_share",
            "metadata.db_path",
            "engine.prefix_match",
            "engine.exclude_scope",
            "engine.preserve_permissions",
            "engine.gate_full_sync",
            "engine.compute_checksums",
            "engine.shutdown_grace",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        Self { known_fields }
    }

    /// Validate a configuration file, logging and returning any warnings
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed
    pub fn validate_config_file(&self, config_path: &Path) -> Result<Vec<String>> {
        if !config_path.exists() {
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;
        let warnings = self.validate_str(&content)?;

        for warning in &warnings {
            warn!("{warning}");
        }

        Ok(warnings)
    }

    /// Validate configuration text and return warnings
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML
    pub fn validate_str(&self, content: &str) -> Result<Vec<String>> {
        let parsed: toml::Value = toml::from_str(content)?;
        let mut unknown = Vec::new();
        self.check_table(&parsed, "", &mut unknown);

        Ok(unknown
            .into_iter()
            .map(|field| format!("Unknown configuration field: {field}"))
            .collect())
    }

    /// Recursively checks a TOML table for unknown fields
    fn check_table(&self, table: &toml::Value, prefix: &str, unknown: &mut Vec<String>) {
        let toml::Value::Table(map) = table else {
            return;
        };

        for (key, value) in map {
            let full_key = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };

            if full_key == "sync_directories" {
                Self::check_mappings(value, unknown);
                continue;
            }

            match value {
                toml::Value::Table(_) => self.check_table(value, &full_key, unknown),
                _ if !self.known_fields.contains(&full_key) => unknown.push(full_key),
                _ => {}
            }
        }
    }

    /// Checks the entries of the `sync_directories` array
    fn check_mappings(value: &toml::Value, unknown: &mut Vec<String>) {
        let toml::Value::Array(entries) = value else {
            unknown.push("sync_directories (expected an array of tables)".to_string());
            return;
        };

        for (position, entry) in entries.iter().enumerate() {
            if let toml::Value::Table(map) = entry {
                for key in map.keys() {
                    if !MAPPING_FIELDS.contains(&key.as_str()) {
                        unknown.push(format!("sync_directories[{position}].{key}"));
                    }
                }
            }
        }
    }
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}
