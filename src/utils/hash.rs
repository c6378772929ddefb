use anyhow::{Context, Result};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use xxhash_rust::xxh3::{Xxh3, xxh3_128};

/// Hex-encoded XXH3-128 of a byte slice
#[must_use]
pub fn hash_bytes(data: &[u8]) -> String {
    format!("{:032x}", xxh3_128(data))
}

/// Hex-encoded XXH3-128 of a file's contents, streamed in 64 KiB chunks
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut hasher = Xxh3::new();
    let mut buffer = vec![0u8; 65536];

    loop {
        let bytes_read = file
            .read(&mut buffer)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:032x}", hasher.digest128()))
}
