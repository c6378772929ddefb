//! Local-to-remote path mapping.
//!
//! Mappings are scanned in configuration order and the first one whose local
//! root prefixes the path wins. It is deliberately not the longest match.

use crate::config::{Config, DirectoryMapping, PrefixMatch};
use crate::utils::paths::{lexical_relative, normalize_lexically};
use std::path::{Path, PathBuf};

/// A local path resolved against its owning mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved<'a> {
    /// The mapping that claimed the path
    pub mapping: &'a DirectoryMapping,
    /// Where the path lands on the remote side
    pub remote: PathBuf,
}

/// Whether `root` prefixes `local` under the given matching mode
#[must_use]
pub fn root_matches(local: &Path, root: &Path, mode: PrefixMatch) -> bool {
    match mode {
        PrefixMatch::Component => local.starts_with(root),
        PrefixMatch::String => local
            .as_os_str()
            .as_encoded_bytes()
            .starts_with(root.as_os_str().as_encoded_bytes()),
    }
}

/// First mapping, in configuration order, whose local root prefixes `local`
#[must_use]
pub fn find_mapping<'a>(
    local: &Path,
    mappings: &'a [DirectoryMapping],
    mode: PrefixMatch,
) -> Option<&'a DirectoryMapping> {
    mappings
        .iter()
        .find(|mapping| root_matches(local, &mapping.local_root, mode))
}

/// Remote location of `local` inside `mapping`, assuming the mapping matched
///
/// The path is re-rooted at `mount_point / remote_subpath`. A path equal to the
/// local root maps to the remote root itself.
#[must_use]
pub fn map_into(local: &Path, mapping: &DirectoryMapping, mount_point: &Path) -> PathBuf {
    let remote_root = mount_point.join(&mapping.remote_subpath);

    if let Ok(relative) = local.strip_prefix(&mapping.local_root) {
        if relative.as_os_str().is_empty() {
            return remote_root;
        }
        return remote_root.join(relative);
    }

    // Only reachable with a raw string prefix such as /data claiming /database/x
    let relative = lexical_relative(local, &mapping.local_root);
    normalize_lexically(&remote_root.join(relative))
}

/// `mount_point / remote_subpath / relative` for the first matching mapping
#[must_use]
pub fn remote_path(
    local: &Path,
    mount_point: &Path,
    mappings: &[DirectoryMapping],
    mode: PrefixMatch,
) -> Option<PathBuf> {
    find_mapping(local, mappings, mode).map(|mapping| map_into(local, mapping, mount_point))
}

/// Resolve `local` using a full configuration
#[must_use]
pub fn resolve<'a>(local: &Path, config: &'a Config) -> Option<Resolved<'a>> {
    let mapping = find_mapping(local, &config.sync_directories, config.engine.prefix_match)?;
    Some(Resolved {
        mapping,
        remote: map_into(local, mapping, &config.server.mount_point),
    })
}
