//! Existence checks and content fingerprints for declared artifacts.
//!
//! Absence is a result value here, never a fault: `missing` reports absent
//! paths and `fingerprint` silently skips them.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::core::types::ArgValue;

/// Sentinel fingerprint recorded for directories.
pub const FOLDER_SENTINEL: &str = "folder";

const BLOCK_SIZE: usize = 64 * 1024;

/// Flatten nested lists into rendered path candidates, in order.
pub fn flatten(values: &[ArgValue]) -> Vec<String> {
    let mut out = Vec::new();
    for value in values {
        flatten_into(value, &mut out);
    }
    out
}

fn flatten_into(value: &ArgValue, out: &mut Vec<String>) {
    match value {
        ArgValue::List(items) => {
            for item in items {
                flatten_into(item, out);
            }
        }
        other => out.push(other.render()),
    }
}

/// Paths in `values` that are neither an existing file nor an existing
/// directory.
pub fn missing(values: &[ArgValue]) -> Vec<String> {
    flatten(values)
        .into_iter()
        .filter(|candidate| {
            let path = Path::new(candidate);
            !path.is_file() && !path.is_dir()
        })
        .collect()
}

/// `(path, digest)` pairs for the present paths. Directories are tagged
/// [`FOLDER_SENTINEL`] rather than hashed; absent or unreadable paths are
/// skipped.
pub fn fingerprint(values: &[ArgValue]) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for candidate in flatten(values) {
        let path = Path::new(&candidate);
        if path.is_dir() {
            out.push((candidate, FOLDER_SENTINEL.to_string()));
        } else if path.is_file() {
            match file_digest(path) {
                Ok(digest) => out.push((candidate, digest)),
                Err(err) => debug!("skipping unreadable artifact: {err:#}"),
            }
        }
    }
    out
}

/// SHA-256 of the file contents, streamed in fixed-size blocks.
fn file_digest(path: &Path) -> Result<String> {
    let mut file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut block = vec![0u8; BLOCK_SIZE];
    loop {
        let n = file
            .read(&mut block)
            .with_context(|| format!("read {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&block[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
