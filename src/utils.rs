//! Small helpers shared across the crate.

use std::path::Path;

use anyhow::Result;
use log::info;
use tokio::fs;

/// Creates the directory (and parents) if it does not exist yet.
pub async fn ensure_directory_exists(dir: &Path) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir).await?;
        info!("Created directory {:?}", dir);
    }
    Ok(())
}

/// Decodes a hex string such as `"A1B2C3"` into its bytes.
/// Returns `None` for odd-length input or anything that is not a plain
/// hex digit (explicit signs and whitespace included).
pub fn decode_hex(input: &str) -> Option<Vec<u8>> {
    if input.len() % 2 != 0 || !input.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    (0..input.len())
        .step_by(2)
        .map(|i| {
            let pair = input.get(i..i + 2)?;
            u8::from_str_radix(pair, 16).ok()
        })
        .collect()
}

/// Formats bytes as lowercase hex for logging.
pub fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
