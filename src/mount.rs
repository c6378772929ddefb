//! Remote mount lifecycle.
//!
//! A sync session calls [`MountManager::ensure_mounted`] once before touching
//! the remote tree; `false` aborts the session.

use crate::config::ServerConfig;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, error, info};

/// Establishes and tears down the remote mount
pub trait MountManager: Send + Sync {
    /// Whether the remote tree is currently available at the mount point
    fn is_mounted(&self) -> bool;

    /// Mount the remote tree
    ///
    /// # Errors
    ///
    /// Returns an error if the mount cannot be established
    fn mount(&self) -> Result<()>;

    /// Unmount the remote tree
    ///
    /// # Errors
    ///
    /// Returns an error if the unmount command fails
    fn unmount(&self) -> Result<()>;

    /// Human-readable description for logs and status output
    fn describe(&self) -> String;

    /// Mount if needed; failures are logged and reported as `false`
    fn ensure_mounted(&self) -> bool {
        if self.is_mounted() {
            debug!("{} already mounted", self.describe());
            return true;
        }
        match self.mount() {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to mount {}: {e:#}", self.describe());
                false
            }
        }
    }
}

/// Build the manager matching the server configuration
#[must_use]
pub fn from_config(server: &ServerConfig) -> Box<dyn MountManager> {
    match (&server.nfs_server, &server.nfs_share) {
        (Some(host), Some(share)) => Box::new(NfsMountManager::new(
            host.clone(),
            share.clone(),
            server.mount_point.clone(),
        )),
        _ => Box::new(LocalMountManager::new(server.mount_point.clone())),
    }
}

/// Whether a mount table lists `source` mounted at `mount_point`
///
/// Accepts both `mount` output (`src on target type ...`) and `/proc/mounts`
/// lines (`src target type ...`).
#[must_use]
pub fn mount_table_contains(table: &str, source: &str, mount_point: &Path) -> bool {
    table.lines().any(|line| {
        let mut fields = line.split_whitespace();
        let Some(src) = fields.next() else {
            return false;
        };
        let target = match fields.next() {
            Some("on") => fields.next(),
            other => other,
        };
        src == source && target.is_some_and(|target| Path::new(target) == mount_point)
    })
}

/// NFS export mounted with the system `mount` command
#[derive(Debug, Clone)]
pub struct NfsMountManager {
    server: String,
    share: String,
    mount_point: PathBuf,
}

impl NfsMountManager {
    /// Manager for `server:share` mounted at `mount_point`
    #[must_use]
    pub const fn new(server: String, share: String, mount_point: PathBuf) -> Self {
        Self {
            server,
            share,
            mount_point,
        }
    }

    /// `server:share` as it appears in the mount table
    #[must_use]
    pub fn source(&self) -> String {
        format!("{}:{}", self.server, self.share)
    }

    fn privileged(program: &str) -> Command {
        // Already root, or no sudo to escalate with
        if which::which("sudo").is_err() || is_root() {
            return Command::new(program);
        }
        let mut cmd = Command::new("sudo");
        cmd.arg(program);
        cmd
    }

    fn run(mut cmd: Command, what: &str) -> Result<()> {
        let output = cmd
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("Failed to run {what}"))?;

        if !output.status.success() {
            anyhow::bail!(
                "{what} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

impl MountManager for NfsMountManager {
    fn is_mounted(&self) -> bool {
        match Command::new("mount").stdin(Stdio::null()).output() {
            Ok(output) if output.status.success() => mount_table_contains(
                &String::from_utf8_lossy(&output.stdout),
                &self.source(),
                &self.mount_point,
            ),
            Ok(output) => {
                error!(
                    "Listing mounts failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                false
            }
            Err(e) => {
                error!("Failed to run mount: {e}");
                false
            }
        }
    }

    fn mount(&self) -> Result<()> {
        std::fs::create_dir_all(&self.mount_point).with_context(|| {
            format!(
                "Failed to create mount point {}",
                self.mount_point.display()
            )
        })?;

        let mut cmd = Self::privileged("mount");
        cmd.args(["-t", "nfs"])
            .arg(self.source())
            .arg(&self.mount_point);
        Self::run(cmd, "mount")?;

        info!("Mounted {} at {}", self.source(), self.mount_point.display());
        Ok(())
    }

    fn unmount(&self) -> Result<()> {
        let mut cmd = Self::privileged("umount");
        cmd.arg(&self.mount_point);
        Self::run(cmd, "umount")?;

        info!("Unmounted {}", self.mount_point.display());
        Ok(())
    }

    fn describe(&self) -> String {
        format!("{} at {}", self.source(), self.mount_point.display())
    }
}

#[cfg(target_os = "linux")]
fn is_root() -> bool {
    use std::os::unix::fs::MetadataExt;
    // /proc/self belongs to the effective uid
    std::fs::metadata("/proc/self").is_ok_and(|meta| meta.uid() == 0)
}

#[cfg(not(target_os = "linux"))]
const fn is_root() -> bool {
    false
}

/// A mount point that is managed outside modsync (or a plain directory)
#[derive(Debug, Clone)]
pub struct LocalMountManager {
    mount_point: PathBuf,
}

impl LocalMountManager {
    /// Manager for an existing directory
    #[must_use]
    pub const fn new(mount_point: PathBuf) -> Self {
        Self { mount_point }
    }
}

impl MountManager for LocalMountManager {
    fn is_mounted(&self) -> bool {
        self.mount_point.is_dir()
    }

    fn mount(&self) -> Result<()> {
        if self.mount_point.is_dir() {
            return Ok(());
        }
        anyhow::bail!(
            "Mount point {} does not exist and no NFS server is configured",
            self.mount_point.display()
        )
    }

    fn unmount(&self) -> Result<()> {
        debug!("Nothing to unmount at {}", self.mount_point.display());
        Ok(())
    }

    fn describe(&self) -> String {
        self.mount_point.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const MOUNT_OUTPUT: &str = "\
sysfs on /sys type sysfs (rw,nosuid,nodev,noexec,relatime)
nas.local:/export/sync on /mnt/remote type nfs4 (rw,relatime,vers=4.2)
/dev/sda1 on / type ext4 (rw,relatime)
";

    const PROC_MOUNTS: &str = "\
nas.local:/export/sync /mnt/remote nfs4 rw,relatime 0 0
";

    #[test]
    fn test_mount_table_detection() {
        let mnt = Path::new("/mnt/remote");
        assert!(mount_table_contains(MOUNT_OUTPUT, "nas.local:/export/sync", mnt));
        assert!(mount_table_contains(PROC_MOUNTS, "nas.local:/export/sync", mnt));
        assert!(!mount_table_contains(MOUNT_OUTPUT, "nas.local:/export/other", mnt));
        assert!(!mount_table_contains(
            MOUNT_OUTPUT,
            "nas.local:/export/sync",
            Path::new("/mnt/elsewhere")
        ));
        assert!(!mount_table_contains("", "nas.local:/export/sync", mnt));
    }

    #[test]
    fn test_local_manager() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let present = LocalMountManager::new(dir.path().to_path_buf());
        assert!(present.ensure_mounted());
        present.unmount()?;

        let absent = LocalMountManager::new(dir.path().join("missing"));
        assert!(!absent.is_mounted());
        assert!(!absent.ensure_mounted());
        Ok(())
    }

    #[test]
    fn test_from_config_picks_manager() {
        let local = ServerConfig {
            mount_point: PathBuf::from("/mnt/remote"),
            nfs_server: None,
            nfs_share: None,
        };
        assert_eq!(from_config(&local).describe(), "/mnt/remote");

        let nfs = ServerConfig {
            nfs_server: Some("nas.local".into()),
            nfs_share: Some("/export/sync".into()),
            ..local
        };
        assert_eq!(
            from_config(&nfs).describe(),
            "nas.local:/export/sync at /mnt/remote"
        );
    }
}
