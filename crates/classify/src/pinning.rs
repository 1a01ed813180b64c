use crate::{ClassifyError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Development override. Ignored in release builds: pinning is the audit
/// boundary and production must never skip it.
pub const SKIP_PINNING_ENV: &str = "SHADOWSCAN_ALLOW_SKIP_PINNING";

/// Compiled-in expectation for the taxonomy artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinnedTaxonomy {
    pub version: String,
    /// Expected directory hash. `None` pins the version only.
    pub artifact_hash: Option<String>,
}

/// What the resolver found on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedTaxonomy {
    pub version: String,
    pub artifact_dir: PathBuf,
    pub artifact_hash: String,
}

/// Locate and hash the artifact directory for `version` inside the
/// version-keyed cache directory.
pub fn resolve_taxonomy_artifact(cache_dir: &Path, version: &str) -> Result<ResolvedTaxonomy> {
    let artifact_dir = cache_dir.join(version);
    if !artifact_dir.is_dir() {
        return Err(ClassifyError::ArtifactMissing(
            artifact_dir.display().to_string(),
        ));
    }
    let artifact_hash = hash_directory(&artifact_dir)?;
    Ok(ResolvedTaxonomy {
        version: version.to_string(),
        artifact_dir,
        artifact_hash,
    })
}

/// Deterministic content hash of a directory tree: relative paths sorted
/// bytewise, each contributing its path and file bytes.
pub fn hash_directory(root: &Path) -> Result<String> {
    let mut files = Vec::new();
    collect_files(root, root, &mut files)?;
    files.sort();

    let mut hasher = Sha256::new();
    for relative in files {
        hasher.update(relative.as_bytes());
        hasher.update([0u8]);
        hasher.update(std::fs::read(root.join(&relative))?);
        hasher.update([0u8]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, out)?;
        } else {
            let relative = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            out.push(relative);
        }
    }
    Ok(())
}

/// Verify the resolved artifact against the pinned expectation. A mismatch
/// is fatal unless the development override is set in a debug build.
pub fn enforce_pinning(pinned: &PinnedTaxonomy, resolved: &ResolvedTaxonomy) -> Result<()> {
    let mut mismatches = Vec::new();
    if pinned.version != resolved.version {
        mismatches.push(format!(
            "version: pinned {} resolved {}",
            pinned.version, resolved.version
        ));
    }
    if let Some(expected) = &pinned.artifact_hash {
        if *expected != resolved.artifact_hash {
            mismatches.push(format!(
                "artifact hash: pinned {} resolved {}",
                expected, resolved.artifact_hash
            ));
        }
    }
    if mismatches.is_empty() {
        return Ok(());
    }

    let override_set = std::env::var(SKIP_PINNING_ENV)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    if cfg!(debug_assertions) && override_set {
        log::warn!(
            "{SKIP_PINNING_ENV} set; proceeding despite pinning mismatch: {}",
            mismatches.join("; ")
        );
        return Ok(());
    }
    Err(ClassifyError::PinningMismatch(mismatches.join("; ")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn artifact_cache() -> (tempfile::TempDir, ResolvedTaxonomy) {
        let dir = tempfile::TempDir::new().unwrap();
        let artifact = dir.path().join("1.0");
        fs::create_dir_all(&artifact).unwrap();
        fs::write(
            artifact.join("codes.json"),
            crate::taxonomy::test_artifact_json(),
        )
        .unwrap();
        let resolved = resolve_taxonomy_artifact(dir.path(), "1.0").unwrap();
        (dir, resolved)
    }

    #[test]
    fn directory_hash_is_deterministic_and_content_sensitive() {
        let (dir, resolved) = artifact_cache();
        let again = resolve_taxonomy_artifact(dir.path(), "1.0").unwrap();
        assert_eq!(resolved.artifact_hash, again.artifact_hash);

        fs::write(dir.path().join("1.0").join("extra.txt"), "x").unwrap();
        let changed = resolve_taxonomy_artifact(dir.path(), "1.0").unwrap();
        assert_ne!(resolved.artifact_hash, changed.artifact_hash);
    }

    #[test]
    fn matching_pin_passes() {
        let (_dir, resolved) = artifact_cache();
        let pinned = PinnedTaxonomy {
            version: "1.0".to_string(),
            artifact_hash: Some(resolved.artifact_hash.clone()),
        };
        enforce_pinning(&pinned, &resolved).unwrap();
    }

    #[test]
    fn hash_mismatch_is_fatal_without_override() {
        let (_dir, resolved) = artifact_cache();
        let pinned = PinnedTaxonomy {
            version: "1.0".to_string(),
            artifact_hash: Some("deadbeef".to_string()),
        };
        std::env::remove_var(SKIP_PINNING_ENV);
        assert!(enforce_pinning(&pinned, &resolved).is_err());
    }

    #[test]
    fn version_only_pin_accepts_any_hash() {
        let (_dir, resolved) = artifact_cache();
        let pinned = PinnedTaxonomy {
            version: "1.0".to_string(),
            artifact_hash: None,
        };
        enforce_pinning(&pinned, &resolved).unwrap();
    }

    #[test]
    fn missing_artifact_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(resolve_taxonomy_artifact(dir.path(), "9.9").is_err());
    }
}
