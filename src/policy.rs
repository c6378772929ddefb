//! Exclude-pattern sync policy.
//!
//! Patterns are matched against the file name only:
//! - `*suffix` excludes names ending with `suffix`
//! - `prefix*` excludes names starting with `prefix`
//! - anything else excludes that exact name
//!
//! A leading `*` takes precedence, so `*tmp*` is a suffix rule for `tmp*`.

use crate::config::{DirectoryMapping, ExcludeScope, PrefixMatch};
use crate::mapping::find_mapping;
use std::path::Path;

/// A parsed exclude pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExcludePattern {
    /// `*rest`
    Suffix(String),
    /// `rest*`
    Prefix(String),
    /// Exact file name
    Exact(String),
}

impl ExcludePattern {
    /// Classify a raw pattern string
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        if let Some(rest) = raw.strip_prefix('*') {
            Self::Suffix(rest.to_string())
        } else if let Some(rest) = raw.strip_suffix('*') {
            Self::Prefix(rest.to_string())
        } else {
            Self::Exact(raw.to_string())
        }
    }

    /// Whether this pattern excludes `file_name`
    #[must_use]
    pub fn matches(&self, file_name: &str) -> bool {
        match self {
            Self::Suffix(suffix) => file_name.ends_with(suffix.as_str()),
            Self::Prefix(prefix) => file_name.starts_with(prefix.as_str()),
            Self::Exact(name) => file_name == name,
        }
    }
}

fn file_name_of(path: &Path) -> Option<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
}

fn excluded_by<'a, I>(file_name: &str, patterns: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a String>,
{
    patterns
        .into_iter()
        .find(|raw| ExcludePattern::parse(raw).matches(file_name))
        .map(String::as_str)
}

/// Whether `path` passes the exclude patterns
///
/// With [`ExcludeScope::Mapping`] only the patterns of the mapping owning the
/// path apply; an unmapped path has no patterns and passes. With
/// [`ExcludeScope::Global`] every mapping's patterns apply.
#[must_use]
pub fn should_sync(
    path: &Path,
    mappings: &[DirectoryMapping],
    scope: ExcludeScope,
    prefix_match: PrefixMatch,
) -> bool {
    let owner = match scope {
        ExcludeScope::Mapping => find_mapping(path, mappings, prefix_match),
        ExcludeScope::Global => None,
    };
    should_sync_in(path, owner, mappings, scope)
}

/// Like [`should_sync`] when the owning mapping is already known
///
/// Full sync knows which mapping it is walking, so it passes it here instead
/// of looking it up again.
#[must_use]
pub fn should_sync_in(
    path: &Path,
    owner: Option<&DirectoryMapping>,
    all: &[DirectoryMapping],
    scope: ExcludeScope,
) -> bool {
    let Some(file_name) = file_name_of(path) else {
        return true;
    };

    let hit = match scope {
        ExcludeScope::Mapping => {
            owner.and_then(|mapping| excluded_by(&file_name, &mapping.exclude_patterns))
        }
        ExcludeScope::Global => excluded_by(
            &file_name,
            all.iter().flat_map(|mapping| &mapping.exclude_patterns),
        ),
    };

    if let Some(pattern) = hit {
        tracing::debug!(path = %path.display(), pattern, "Excluded");
        return false;
    }
    true
}
