use anyhow::Result;
use modsync::config::validator::ConfigValidator;
use modsync::config::{Config, DirectoryMapping, ExcludeScope, PrefixMatch};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::tempdir;

#[test]
fn test_malformed_configs_rejected() -> Result<()> {
    let dir = tempdir()?;

    let malformed = vec![
        ("invalid_syntax.toml", "invalid toml content {{ broken"),
        ("no_server.toml", "[metadata]\ndb_path = \"/tmp/x\""),
        ("relative_mount.toml", "[server]\nmount_point = \"mnt\""),
        (
            "bad_prefix_mode.toml",
            "[server]\nmount_point = \"/mnt\"\n[engine]\nprefix_match = \"longest\"",
        ),
        (
            "bad_grace.toml",
            "[server]\nmount_point = \"/mnt\"\n[engine]\nshutdown_grace = \"soon\"",
        ),
        ("wrong_server_type.toml", "[server]\nmount_point = 5"),
    ];

    for (name, content) in malformed {
        let path = dir.path().join(name);
        fs::write(&path, content)?;
        assert!(Config::load(&path).is_err(), "{name} should be rejected");
    }
    Ok(())
}

#[test]
fn test_save_and_load_round_trip() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("nested/config.toml");

    let mut config = Config::new("/mnt/remote");
    config.server.nfs_server = Some("nas.local".into());
    config.server.nfs_share = Some("/export/sync".into());
    config.metadata.db_path = dir.path().join("meta.bin");
    config.engine.prefix_match = PrefixMatch::String;
    config.engine.exclude_scope = ExcludeScope::Global;
    config.engine.shutdown_grace = Duration::from_millis(1500);
    config.sync_directories = vec![
        DirectoryMapping::new("/data/proj", "proj").with_excludes(["*.log", "cache*"]),
        DirectoryMapping::new("/home/user/docs", "team/docs"),
    ];
    config.save(&path)?;

    let loaded = Config::load(&path)?;
    assert_eq!(loaded.server.nfs_server.as_deref(), Some("nas.local"));
    assert_eq!(loaded.engine.prefix_match, PrefixMatch::String);
    assert_eq!(loaded.engine.exclude_scope, ExcludeScope::Global);
    assert_eq!(loaded.engine.shutdown_grace, Duration::from_millis(1500));
    assert_eq!(loaded.sync_directories, config.sync_directories);
    Ok(())
}

#[test]
fn test_mapping_order_preserved_after_skips() -> Result<()> {
    let config = modsync::config::parser::parse_config_str(
        r#"
[server]
mount_point = "/mnt/remote"

[[sync_directories]]
local_path = "/b"
remote_path = "b"

[[sync_directories]]
local_path = ""
remote_path = "empty"

[[sync_directories]]
local_path = "/a"
remote_path = "/absolute"

[[sync_directories]]
local_path = "/a"
remote_path = "a"
"#,
    )?;

    let roots: Vec<PathBuf> = config.local_roots();
    assert_eq!(roots, vec![PathBuf::from("/b"), PathBuf::from("/a")]);
    Ok(())
}

#[test]
fn test_validator_reports_unknown_fields() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        r#"
[server]
mount_point = "/mnt/remote"
mount_opts = "vers=4"

[engine]
gate_full_sync = true

[[sync_directories]]
local_path = "/data"
remote_path = "data"
exclude = ["*.tmp"]
"#,
    )?;

    let warnings = ConfigValidator::new().validate_config_file(&path)?;
    assert_eq!(warnings.len(), 2);
    assert!(warnings.iter().any(|w| w.contains("server.mount_opts")));
    assert!(warnings.iter().any(|w| w.contains("exclude")));

    // Unknown fields are warnings only
    let config = Config::load(&path)?;
    assert!(config.engine.gate_full_sync);
    Ok(())
}
