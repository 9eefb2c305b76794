//! The `VerifiableBundle` capability: the minimal surface [`crate::verify`]
//! needs to check an artifact's hashes and signature, regardless of
//! whether that artifact is a zip archive or a loose set of files
//! referenced by a JSON pack.

use std::io::Read as _;
use std::path::{Path, PathBuf};

use gait_error::{ErrorCode, GaitError};
use gait_runpack::{EvidencePack, PackManifest};
use gait_sign::SignatureBlock;

/// One manifest-listed file: its path within the bundle and its expected
/// hash and size.
#[derive(Debug, Clone)]
pub struct FileEntryRef {
    /// Path or locator within the bundle.
    pub path: String,
    /// Expected SHA-256 hex digest.
    pub sha256: String,
    /// Expected size in bytes.
    pub size_bytes: u64,
}

/// A manifest-backed artifact [`crate::verify::verify`] can check: reading
/// its manifest, listing its files, and opening them by path.
pub trait VerifiableBundle {
    /// The manifest's recorded digest over its own canonical form.
    fn manifest_digest(&self) -> &str;
    /// The manifest's signature, if signed.
    fn signature(&self) -> Option<&SignatureBlock>;
    /// The canonical image `manifest_digest` was computed over (and
    /// `signature`, if present, signs).
    fn signable_image(&self) -> Result<String, GaitError>;
    /// Every file entry the manifest lists.
    fn file_entries(&self) -> Vec<FileEntryRef>;
    /// Open one file by the path recorded in its [`FileEntryRef`].
    fn open_file(&mut self, path: &str) -> Result<Vec<u8>, GaitError>;
}

/// A runpack or pack zip archive, read via its bundled `pack_manifest.json`.
pub struct ZipManifestBundle {
    archive: zip::ZipArchive<std::fs::File>,
    manifest: PackManifest,
}

impl ZipManifestBundle {
    /// Open the zip archive at `path` and read its manifest.
    pub fn open(path: &Path) -> Result<Self, GaitError> {
        let file = std::fs::File::open(path)?;
        let mut archive = zip::ZipArchive::new(file)
            .map_err(|e| GaitError::new(ErrorCode::SchemaInvalid, format!("failed to open zip archive {}: {e}", path.display())))?;
        let manifest = read_json_entry(&mut archive, "pack_manifest.json")?;
        Ok(Self { archive, manifest })
    }

    /// The parsed manifest.
    #[must_use]
    pub fn manifest(&self) -> &PackManifest {
        &self.manifest
    }
}

fn read_json_entry<T: serde::de::DeserializeOwned>(
    archive: &mut zip::ZipArchive<std::fs::File>,
    name: &str,
) -> Result<T, GaitError> {
    let mut entry = archive
        .by_name(name)
        .map_err(|_| GaitError::new(ErrorCode::ManifestFileMissing, format!("archive is missing {name}")))?;
    let mut buf = Vec::new();
    entry.read_to_end(&mut buf)?;
    serde_json::from_slice(&buf).map_err(|e| GaitError::new(ErrorCode::SchemaInvalid, format!("failed to decode {name}: {e}")))
}

impl VerifiableBundle for ZipManifestBundle {
    fn manifest_digest(&self) -> &str {
        &self.manifest.manifest_digest
    }

    fn signature(&self) -> Option<&SignatureBlock> {
        self.manifest.signature.as_ref()
    }

    fn signable_image(&self) -> Result<String, GaitError> {
        gait_runpack::signable_image(&self.manifest)
    }

    fn file_entries(&self) -> Vec<FileEntryRef> {
        self.manifest
            .files
            .iter()
            .map(|f| FileEntryRef { path: f.path.clone(), sha256: f.sha256.clone(), size_bytes: f.size_bytes })
            .collect()
    }

    fn open_file(&mut self, path: &str) -> Result<Vec<u8>, GaitError> {
        let mut entry = self
            .archive
            .by_name(path)
            .map_err(|_| GaitError::new(ErrorCode::ManifestFileMissing, format!("archive is missing {path}")))?;
        let mut buf = Vec::new();
        entry.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

/// An evidence or incident pack: a JSON manifest referencing loose files
/// on disk, relative to the pack file's directory.
pub struct EvidencePackBundle {
    base_dir: PathBuf,
    pack: EvidencePack,
}

impl EvidencePackBundle {
    /// Read the pack JSON at `path`.
    pub fn open(path: &Path) -> Result<Self, GaitError> {
        let bytes = std::fs::read(path)?;
        let pack: EvidencePack = serde_json::from_slice(&bytes)
            .map_err(|e| GaitError::new(ErrorCode::SchemaInvalid, format!("failed to decode evidence pack {}: {e}", path.display())))?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
        Ok(Self { base_dir, pack })
    }

    /// The parsed pack.
    #[must_use]
    pub fn pack(&self) -> &EvidencePack {
        &self.pack
    }
}

impl VerifiableBundle for EvidencePackBundle {
    fn manifest_digest(&self) -> &str {
        &self.pack.manifest_digest
    }

    fn signature(&self) -> Option<&SignatureBlock> {
        self.pack.signature.as_ref()
    }

    fn signable_image(&self) -> Result<String, GaitError> {
        gait_runpack::pack_signable_image(&self.pack)
    }

    fn file_entries(&self) -> Vec<FileEntryRef> {
        self.pack
            .artifacts
            .iter()
            .map(|a| FileEntryRef { path: a.path.clone(), sha256: a.sha256.clone(), size_bytes: a.size_bytes })
            .collect()
    }

    fn open_file(&mut self, path: &str) -> Result<Vec<u8>, GaitError> {
        std::fs::read(self.base_dir.join(path)).map_err(|e| {
            GaitError::new(ErrorCode::ManifestFileMissing, format!("failed to read {path} under {}: {e}", self.base_dir.display()))
        })
    }
}
