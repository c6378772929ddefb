use anyhow::{Context, Result};
use filetime::FileTime;
use std::fs::{self, Metadata};
use std::path::Path;

/// Permission bits applied to a remote copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilePermissions {
    mode: u32,
}

impl FilePermissions {
    /// Create permissions from a raw mode value
    #[must_use]
    pub const fn from_mode(mode: u32) -> Self {
        Self { mode }
    }

    /// Read permissions from already fetched metadata
    #[must_use]
    pub fn from_metadata(metadata: &Metadata) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            Self::from_mode(metadata.permissions().mode() & 0o7777)
        }

        #[cfg(not(unix))]
        {
            if metadata.permissions().readonly() {
                Self::from_mode(0o444)
            } else {
                Self::from_mode(0o644)
            }
        }
    }

    /// Apply permissions to a file
    ///
    /// # Errors
    ///
    /// Returns an error if the permissions cannot be set
    pub fn apply_to_path(&self, path: &Path) -> Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(self.mode))
                .with_context(|| format!("Failed to set permissions for: {}", path.display()))?;
        }

        #[cfg(not(unix))]
        {
            let mut permissions = fs::metadata(path)
                .with_context(|| format!("Failed to read metadata for: {}", path.display()))?
                .permissions();
            permissions.set_readonly((self.mode & 0o200) == 0);
            fs::set_permissions(path, permissions)
                .with_context(|| format!("Failed to set permissions for: {}", path.display()))?;
        }

        Ok(())
    }

    /// Platform default for newly written files
    #[must_use]
    pub const fn default_file() -> Self {
        Self::from_mode(0o644)
    }
}

/// Copies `src` over `dst` the way `cp -p` does: contents, permissions and timestamps.
///
/// The bytes are written to a temporary sibling of `dst` and renamed into place,
/// so an interrupted copy never leaves a truncated file at `dst`. `source_meta` is
/// the metadata snapshot whose mtime/atime are applied to the copy.
///
/// # Errors
///
/// Returns an error if:
/// - `dst` has no parent directory or the temporary file cannot be created there
/// - Reading `src` or writing the copy fails
/// - Permissions or timestamps cannot be applied
pub fn copy_preserving(
    src: &Path,
    dst: &Path,
    source_meta: &Metadata,
    preserve_permissions: bool,
) -> Result<u64> {
    let parent = dst
        .parent()
        .with_context(|| format!("Destination has no parent: {}", dst.display()))?;

    let staging = tempfile::Builder::new()
        .prefix(".modsync-")
        .suffix(".part")
        .tempfile_in(parent)
        .with_context(|| format!("Failed to create temporary file in {}", parent.display()))?;

    // fs::copy carries the source permission bits onto the staging file
    let bytes = fs::copy(src, staging.path())
        .with_context(|| format!("Failed to copy {} to {}", src.display(), dst.display()))?;

    let permissions = if preserve_permissions {
        FilePermissions::from_metadata(source_meta)
    } else {
        FilePermissions::default_file()
    };
    permissions.apply_to_path(staging.path())?;

    let staged = staging
        .persist(dst)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to move copy into place at {}", dst.display()))?;
    drop(staged);

    let mtime = FileTime::from_last_modification_time(source_meta);
    let atime = FileTime::from_last_access_time(source_meta);
    filetime::set_file_times(dst, atime, mtime)
        .with_context(|| format!("Failed to set timestamps on {}", dst.display()))?;

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_copy_preserving_contents_and_mtime() -> Result<()> {
        let dir = tempdir()?;
        let src = dir.path().join("src.txt");
        let dst = dir.path().join("dst.txt");
        fs::write(&src, b"payload")?;
        filetime::set_file_mtime(&src, FileTime::from_unix_time(1_600_000_000, 500))?;

        let meta = fs::metadata(&src)?;
        let bytes = copy_preserving(&src, &dst, &meta, true)?;

        assert_eq!(bytes, 7);
        assert_eq!(fs::read(&dst)?, b"payload");
        let dst_mtime = FileTime::from_last_modification_time(&fs::metadata(&dst)?);
        assert_eq!(dst_mtime, FileTime::from_last_modification_time(&meta));
        Ok(())
    }

    #[test]
    fn test_copy_overwrites_existing() -> Result<()> {
        let dir = tempdir()?;
        let src = dir.path().join("src.txt");
        let dst = dir.path().join("dst.txt");
        fs::write(&src, b"new")?;
        fs::write(&dst, b"old and longer")?;

        copy_preserving(&src, &dst, &fs::metadata(&src)?, true)?;
        assert_eq!(fs::read(&dst)?, b"new");

        // No staging files left behind
        let leftovers = fs::read_dir(dir.path())?
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".part"))
            .count();
        assert_eq!(leftovers, 0);
        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_copy_preserves_mode() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir()?;
        let src = dir.path().join("run.sh");
        let dst = dir.path().join("copy.sh");
        fs::write(&src, b"#!/bin/sh\n")?;
        fs::set_permissions(&src, fs::Permissions::from_mode(0o750))?;

        copy_preserving(&src, &dst, &fs::metadata(&src)?, true)?;
        assert_eq!(fs::metadata(&dst)?.permissions().mode() & 0o777, 0o750);

        copy_preserving(&src, &dst, &fs::metadata(&src)?, false)?;
        assert_eq!(fs::metadata(&dst)?.permissions().mode() & 0o777, 0o644);
        Ok(())
    }

    #[test]
    fn test_copy_missing_source_fails() -> Result<()> {
        let dir = tempdir()?;
        let src = dir.path().join("exists.txt");
        fs::write(&src, b"x")?;
        let meta = fs::metadata(&src)?;
        fs::remove_file(&src)?;

        let result = copy_preserving(&src, &dir.path().join("dst.txt"), &meta, true);
        assert!(result.is_err());
        assert!(!dir.path().join("dst.txt").exists());
        Ok(())
    }
}
