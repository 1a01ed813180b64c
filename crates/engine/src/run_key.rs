use crate::Result;
use sha2::{Digest, Sha256};
use shadowscan_model::VersionPins;
use std::path::Path;

/// Hash of the input manifest: sorted relative file names, each entry
/// `name|size|sha256`. File content, not modification time, defines the
/// manifest, so copying inputs to a new working area never changes the key.
pub fn compute_input_manifest_hash(files: &[std::path::PathBuf]) -> Result<String> {
    let mut entries: Vec<String> = Vec::with_capacity(files.len());
    for path in files {
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        entries.push(format!(
            "{name}|{}|{}",
            bytes.len(),
            hex::encode(Sha256::digest(&bytes))
        ));
    }
    entries.sort();
    Ok(hex::encode(Sha256::digest(entries.join("\n").as_bytes())))
}

/// The run key: two runs with identical keys are interchangeable.
pub fn compute_run_key(
    input_manifest_hash: &str,
    range_start: Option<&str>,
    range_end: Option<&str>,
    pins: &VersionPins,
) -> String {
    let preimage = [
        input_manifest_hash,
        range_start.unwrap_or(""),
        range_end.unwrap_or(""),
        &pins.signature_scheme_version,
        &pins.rule_version,
        &pins.prompt_version,
        &pins.taxonomy_version,
        &pins.taxonomy_artifact_hash,
        &pins.engine_spec_version,
    ]
    .join("|");
    hex::encode(Sha256::digest(preimage.as_bytes()))
}

const BASE32_ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";

/// Short run id: lowercase base32 of the key bytes, first 16 characters.
pub fn run_id_from_key(run_key: &str) -> String {
    let bytes = match hex::decode(run_key) {
        Ok(bytes) => bytes,
        Err(_) => run_key.as_bytes().to_vec(),
    };
    base32_encode(&bytes).chars().take(16).collect()
}

fn base32_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len().div_ceil(5) * 8);
    let mut buffer: u64 = 0;
    let mut bits: u32 = 0;
    for &byte in bytes {
        buffer = (buffer << 8) | u64::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            let index = ((buffer >> bits) & 0x1f) as usize;
            out.push(BASE32_ALPHABET[index] as char);
        }
    }
    if bits > 0 {
        let index = ((buffer << (5 - bits)) & 0x1f) as usize;
        out.push(BASE32_ALPHABET[index] as char);
    }
    out
}

/// Collect the input files of a run: regular files directly under the input
/// directory, sorted by name for determinism.
pub fn discover_inputs(input_dir: &Path) -> Result<Vec<std::path::PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(input_dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
