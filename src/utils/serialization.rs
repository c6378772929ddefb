use anyhow::{Context, Result};

/// Upper bound on a decoded metadata file; guards against corrupt length prefixes
const DECODE_LIMIT: usize = 256 * 1024 * 1024;

/// Get the bincode configuration
fn get_config() -> impl bincode::config::Config {
    bincode::config::legacy().with_limit::<DECODE_LIMIT>()
}

/// Serialize data using bincode v2.0 with serde
///
/// # Errors
///
/// Returns an error if serialization fails
pub fn serialize<T: serde::Serialize>(data: &T) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(data, get_config()).context("Failed to encode data")
}

/// Deserialize data using bincode v2.0 with serde
///
/// Trailing bytes are rejected so a file truncated mid-record or padded with
/// garbage is reported as corrupt.
///
/// # Errors
///
/// Returns an error if the data is malformed or has trailing bytes
pub fn deserialize<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let (result, bytes_read) = bincode::serde::decode_from_slice(bytes, get_config())
        .context("Failed to decode data")?;
    if bytes_read != bytes.len() {
        anyhow::bail!(
            "Unexpected trailing data: decoded {bytes_read} of {} bytes",
            bytes.len()
        );
    }
    Ok(result)
}
