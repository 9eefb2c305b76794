//! Deterministic runpack/pack zip writer.
//!
//! Two logically identical runpacks must produce byte-identical archives.
//! This is enforced by fixing every degree of freedom the zip format
//! otherwise leaves open: entries are written in lexicographic path order,
//! every entry uses deflate at a fixed compression level, every entry's
//! modified-time is pinned to the MS-DOS epoch, and the manifest is always
//! the last entry written.

use std::io::{Cursor, Write as _};
use std::path::Path;

use chrono::{DateTime, Utc};
use gait_config::DEFAULT_DEFLATE_LEVEL;
use gait_error::{ErrorCode, GaitError};
use gait_sign::{SignatureBlock, SigningKey};
use serde_json::Value;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::manifest::{compute_manifest_digest, signable_image, CaptureMode, ManifestFileEntry, PackManifest};

/// The fixed internal layout's top-level files, written before the
/// manifest.
const RUN_FILE: &str = "run.json";
const REFS_FILE: &str = "refs.json";
const MANIFEST_FILE: &str = "pack_manifest.json";

/// Builds a runpack's fixed layout: `run.json`, `intents/<ordinal>.json`,
/// `results/<ordinal>.json`, `refs.json`, `pack_manifest.json`.
#[derive(Debug, Default)]
pub struct RunpackBuilder {
    run: Option<Value>,
    intents: Vec<Value>,
    results: Vec<Value>,
    refs: Option<Value>,
    capture_mode: CaptureMode,
}

impl RunpackBuilder {
    /// An empty builder, defaulting to [`CaptureMode::Raw`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the `run.json` content.
    #[must_use]
    pub fn run(mut self, run: Value) -> Self {
        self.run = Some(run);
        self
    }

    /// Append an intent, assigned the next ordinal.
    #[must_use]
    pub fn add_intent(mut self, intent: Value) -> Self {
        self.intents.push(intent);
        self
    }

    /// Append a result, assigned the next ordinal.
    #[must_use]
    pub fn add_result(mut self, result: Value) -> Self {
        self.results.push(result);
        self
    }

    /// Set the `refs.json` content.
    #[must_use]
    pub fn refs(mut self, refs: Value) -> Self {
        self.refs = Some(refs);
        self
    }

    /// Override the default capture mode.
    #[must_use]
    pub fn capture_mode(mut self, mode: CaptureMode) -> Self {
        self.capture_mode = mode;
        self
    }

    /// Assemble the deterministic zip bytes and manifest, signing the
    /// manifest when `signing` is supplied.
    pub fn build(
        self,
        generated_at: DateTime<Utc>,
        signing: Option<(&SigningKey, &str)>,
    ) -> Result<RunpackArtifact, GaitError> {
        let mut entries: Vec<(String, Vec<u8>)> = Vec::new();
        entries.push((RUN_FILE.to_string(), canonical_bytes(&self.run.unwrap_or(Value::Null))?));
        for (i, intent) in self.intents.iter().enumerate() {
            entries.push((format!("intents/{i:06}.json"), canonical_bytes(intent)?));
        }
        for (i, result) in self.results.iter().enumerate() {
            entries.push((format!("results/{i:06}.json"), canonical_bytes(result)?));
        }
        entries.push((REFS_FILE.to_string(), canonical_bytes(&self.refs.unwrap_or(Value::Null))?));
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let files: Vec<ManifestFileEntry> = entries
            .iter()
            .map(|(path, bytes)| ManifestFileEntry {
                path: path.clone(),
                sha256: gait_canon::sha256_hex(bytes),
                size_bytes: bytes.len() as u64,
            })
            .collect();

        let mut manifest = PackManifest {
            schema_id: "gait.runpack".to_string(),
            schema_version: gait_core::SCHEMA_VERSION,
            generated_at,
            producer_version: env!("CARGO_PKG_VERSION").to_string(),
            capture_mode: self.capture_mode,
            files,
            manifest_digest: String::new(),
            signature: None,
        };
        manifest.manifest_digest = compute_manifest_digest(&manifest)?;
        if let Some((key, key_id)) = signing {
            let image = signable_image(&manifest)?;
            manifest.signature = Some(gait_sign::sign_bytes(key, key_id, image.as_bytes()));
        }
        let manifest_bytes = canonical_bytes(&manifest)?;
        entries.push((MANIFEST_FILE.to_string(), manifest_bytes));

        let bytes = write_deterministic_zip(&entries, DEFAULT_DEFLATE_LEVEL)?;
        Ok(RunpackArtifact { manifest, bytes })
    }
}

fn canonical_bytes<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, GaitError> {
    Ok(gait_canon::canonicalize(value)?.into_bytes())
}

/// Write `entries` (already sorted by path) into a zip archive, fixing
/// compression, entry timestamps, and omitting extended attributes so the
/// output is byte-identical for identical input.
fn write_deterministic_zip(entries: &[(String, Vec<u8>)], deflate_level: u32) -> Result<Vec<u8>, GaitError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(i64::from(deflate_level)))
        .last_modified_time(zip::DateTime::default())
        .unix_permissions(0o644);
    for (path, bytes) in entries {
        writer
            .start_file(path, options)
            .map_err(|e| GaitError::new(ErrorCode::Internal, format!("failed to start zip entry {path}: {e}")))?;
        writer
            .write_all(bytes)
            .map_err(|e| GaitError::new(ErrorCode::Internal, format!("failed to write zip entry {path}: {e}")))?;
    }
    let cursor = writer
        .finish()
        .map_err(|e| GaitError::new(ErrorCode::Internal, format!("failed to finalize zip archive: {e}")))?;
    Ok(cursor.into_inner())
}

/// A built, in-memory runpack/pack archive and its manifest.
#[derive(Debug, Clone)]
pub struct RunpackArtifact {
    /// The manifest describing this archive's contents.
    pub manifest: PackManifest,
    bytes: Vec<u8>,
}

impl RunpackArtifact {
    /// The archive's raw zip bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Atomically write this archive to `path` (write to a sibling temp
    /// file, fsync, rename).
    #[tracing::instrument(skip(self), fields(path = %path.display(), bytes = self.bytes.len()))]
    pub fn write_to(&self, path: &Path) -> Result<(), GaitError> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp = tempfile::NamedTempFile::new_in(dir)?;
        temp.write_all(&self.bytes)?;
        temp.as_file().sync_all()?;
        temp.persist(path)
            .map_err(|e| GaitError::new(ErrorCode::Io, format!("failed to persist runpack to {}: {e}", path.display())))?;
        tracing::info!(manifest_digest = %self.manifest.manifest_digest, "wrote runpack");
        Ok(())
    }
}

/// Signature carried by a [`PackManifest`], re-exported for callers that
/// only need to inspect it without depending on `gait-sign` directly.
pub type ManifestSignature = SignatureBlock;
