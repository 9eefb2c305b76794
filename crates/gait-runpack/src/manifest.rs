//! The runpack/pack manifest: a content-addressed index of every file in
//! the archive, plus the pack-level digest and optional signature.

use chrono::{DateTime, Utc};
use gait_error::{ErrorCode, GaitError};
use gait_sign::SignatureBlock;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How the artifacts referenced by a manifest were captured.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    /// The manifest records hashes of artifacts stored elsewhere.
    Reference,
    /// The manifest's artifacts are embedded in the archive verbatim.
    #[default]
    Raw,
}

/// One file entry within a [`PackManifest`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ManifestFileEntry {
    /// Archive-relative path.
    pub path: String,
    /// Lowercase hex SHA-256 of the file's contents.
    pub sha256: String,
    /// File size in bytes.
    pub size_bytes: u64,
}

/// The manifest written last into every runpack/pack archive, indexing
/// every other entry by content hash.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PackManifest {
    /// Record schema identifier, e.g. `"gait.runpack"`.
    pub schema_id: String,
    /// Schema generation.
    pub schema_version: u32,
    /// UTC creation timestamp.
    pub generated_at: DateTime<Utc>,
    /// Producing binary's version string.
    pub producer_version: String,
    /// How the indexed artifacts were captured.
    pub capture_mode: CaptureMode,
    /// Every other file in the archive, in lexicographic path order.
    pub files: Vec<ManifestFileEntry>,
    /// Digest of this manifest's own canonical form with `manifest_digest`
    /// and `signature` removed.
    pub manifest_digest: String,
    /// Signature over the same image, if the archive is signed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<SignatureBlock>,
}

/// Canonical JSON image of `manifest` with `manifest_digest` and
/// `signature` removed, the byte image both the digest and signature are
/// computed over.
pub fn signable_image(manifest: &PackManifest) -> Result<String, GaitError> {
    let mut value = serde_json::to_value(manifest)
        .map_err(|e| GaitError::new(ErrorCode::SchemaInvalid, format!("failed to convert manifest to JSON: {e}")))?;
    if let Value::Object(map) = &mut value {
        map.remove("manifest_digest");
        map.remove("signature");
    }
    gait_canon::canonicalize(&value)
}

/// Digest of [`signable_image`].
pub fn compute_manifest_digest(manifest: &PackManifest) -> Result<String, GaitError> {
    Ok(gait_canon::sha256_hex(signable_image(manifest)?))
}

/// Re-hash `manifest`'s own content and compare against its stored
/// `manifest_digest`.
pub fn verify_manifest_digest(manifest: &PackManifest) -> Result<(), GaitError> {
    let recomputed = compute_manifest_digest(manifest)?;
    if recomputed != manifest.manifest_digest {
        return Err(GaitError::new(
            ErrorCode::ManifestHashMismatch,
            "manifest_digest does not match the manifest's own content",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(files: Vec<ManifestFileEntry>) -> PackManifest {
        PackManifest {
            schema_id: "gait.runpack".into(),
            schema_version: 1,
            generated_at: Utc::now(),
            producer_version: "0.1.0".into(),
            capture_mode: CaptureMode::Raw,
            files,
            manifest_digest: String::new(),
            signature: None,
        }
    }

    #[test]
    fn manifest_digest_ignores_itself_and_signature() {
        let mut m = manifest(vec![ManifestFileEntry { path: "run.json".into(), sha256: "abc".into(), size_bytes: 10 }]);
        let first = compute_manifest_digest(&m).unwrap();
        m.manifest_digest = "stale".into();
        let second = compute_manifest_digest(&m).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn tampered_manifest_fails_verification() {
        let mut m = manifest(vec![ManifestFileEntry { path: "run.json".into(), sha256: "abc".into(), size_bytes: 10 }]);
        m.manifest_digest = compute_manifest_digest(&m).unwrap();
        verify_manifest_digest(&m).unwrap();
        m.files.push(ManifestFileEntry { path: "extra.json".into(), sha256: "def".into(), size_bytes: 1 });
        let err = verify_manifest_digest(&m).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ManifestHashMismatch);
    }
}
