#![allow(dead_code)]

use anyhow::Result;
use modsync::config::{Config, DirectoryMapping};
use modsync::engine::Reconciler;
use modsync::storage::MetadataStore;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Scratch local tree, remote mount and metadata file
pub struct TestEnv {
    pub temp_dir: TempDir,
    pub local: PathBuf,
    pub mount: PathBuf,
    pub db_path: PathBuf,
    pub config: Config,
}

impl TestEnv {
    /// One mapping `<tmp>/local/proj -> proj` with the given exclude patterns
    pub fn new(excludes: &[&str]) -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let local = temp_dir.path().join("local");
        let mount = temp_dir.path().join("mnt/remote");
        let db_path = temp_dir.path().join("state/metadata.bin");
        fs::create_dir_all(local.join("proj"))?;
        fs::create_dir_all(&mount)?;

        let mut config = Config::new(&mount);
        config.metadata.db_path.clone_from(&db_path);
        config.sync_directories = vec![
            DirectoryMapping::new(local.join("proj"), "proj")
                .with_excludes(excludes.iter().copied()),
        ];

        Ok(Self {
            temp_dir,
            local,
            mount,
            db_path,
            config,
        })
    }

    /// Local root of the first mapping
    pub fn proj(&self) -> PathBuf {
        self.local.join("proj")
    }

    /// Remote root of the first mapping
    pub fn remote_proj(&self) -> PathBuf {
        self.mount.join("proj")
    }

    /// Reconciler over an in-memory store
    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(self.config.clone(), Arc::new(MetadataStore::in_memory()))
    }

    /// Reconciler over the on-disk store at `db_path`
    pub fn persistent_reconciler(&self) -> Result<Reconciler> {
        let store = MetadataStore::open(&self.db_path)?;
        Ok(Reconciler::new(self.config.clone(), Arc::new(store)))
    }

    /// Write a local file under the first mapping, creating parents
    pub fn write(&self, relative: &str, contents: &[u8]) -> Result<PathBuf> {
        let path = self.proj().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents)?;
        Ok(path)
    }

    /// Write the configuration as TOML and return its path
    pub fn write_config(&self) -> Result<PathBuf> {
        let path = self.temp_dir.path().join("config.toml");
        self.config.save(&path)?;
        Ok(path)
    }
}

/// Relative path -> contents for every file under `root`
pub fn snapshot_tree(root: &Path) -> Result<Vec<(PathBuf, Vec<u8>)>> {
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_file() {
            let relative = entry.path().strip_prefix(root)?.to_path_buf();
            files.push((relative, fs::read(entry.path())?));
        }
    }
    Ok(files)
}
