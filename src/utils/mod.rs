//! Utility functions and helpers.
//!
//! - [`hash`]: xxh3 content checksums
//! - [`paths`]: Path expansion and lexical path arithmetic
//! - [`permissions`]: Metadata-preserving file copies
//! - [`serialization`]: Binary serialization for the metadata store

/// Content checksums
pub mod hash;
/// Path manipulation and resolution utilities
pub mod paths;
/// Unix permission handling and metadata-preserving copies
pub mod permissions;
/// Binary serialization utilities
pub mod serialization;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fs::Metadata;
use std::time::SystemTime;

/// Converts a filesystem timestamp into UTC, keeping sub-second precision.
#[must_use]
pub fn to_utc(time: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(time)
}

/// Reads the modification time of a file's metadata as UTC.
///
/// # Errors
/// Returns an error if the platform does not report modification times.
pub fn modified_utc(metadata: &Metadata) -> Result<DateTime<Utc>> {
    metadata
        .modified()
        .map(to_utc)
        .context("Failed to get file modification time")
}

/// Formats a file size in bytes into a human-readable string with appropriate units.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn format_size(size: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = size as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", size.round() as u64, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}
