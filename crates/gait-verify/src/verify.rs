//! The single verification algorithm every [`VerifiableBundle`] is checked
//! by, plus the convenience entry points for runpacks, evidence packs, and
//! session chains.

use std::path::Path;

use gait_config::VerificationProfile;
use gait_error::{ErrorCode, GaitError};
use gait_runpack::SessionChain;
use gait_sign::VerifyingKey;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::bundle::{EvidencePackBundle, VerifiableBundle, ZipManifestBundle};

/// Whether a bundle's signature verified, failed, or was never present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SignatureStatus {
    /// No signature was present on the bundle.
    Absent,
    /// A signature was present and verified.
    Verified,
    /// A signature was present but failed to verify, or a signature was
    /// present with no public key available to check it.
    Failed,
}

/// The result of checking one bundle: `{missing_files, hash_mismatches,
/// signature_status, files_checked}`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VerifyReport {
    /// Manifest-listed files absent from the bundle.
    pub missing_files: Vec<String>,
    /// Files present but whose recomputed SHA-256 does not match the
    /// manifest, plus `"<manifest>"` if the manifest's own digest does not
    /// match its recomputed canonical image.
    pub hash_mismatches: Vec<String>,
    /// The signature check outcome.
    pub signature_status: SignatureStatus,
    /// Number of manifest-listed files checked.
    pub files_checked: usize,
}

impl VerifyReport {
    /// Whether every check passed: no missing files, no hash mismatches,
    /// and a signature status of `verified` (or `absent` under a lenient
    /// profile).
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.missing_files.is_empty() && self.hash_mismatches.is_empty() && self.signature_status != SignatureStatus::Failed
    }
}

/// Check `bundle` against `profile`: re-hash every listed file, recompute
/// the manifest digest, and check the signature. The offline-strict
/// profile requires `public_key` and treats an absent signature as a
/// failure.
pub fn verify(
    bundle: &mut dyn VerifiableBundle,
    profile: VerificationProfile,
    public_key: Option<&VerifyingKey>,
) -> Result<VerifyReport, GaitError> {
    if profile == VerificationProfile::OfflineStrict && public_key.is_none() {
        return Err(GaitError::new(ErrorCode::KeySourceMissing, "offline-strict verification requires a public key"));
    }

    let entries = bundle.file_entries();
    let mut missing_files = Vec::new();
    let mut hash_mismatches = Vec::new();
    for entry in &entries {
        match bundle.open_file(&entry.path) {
            Ok(bytes) => {
                let actual = gait_canon::sha256_hex(&bytes);
                if actual != entry.sha256 {
                    hash_mismatches.push(entry.path.clone());
                }
            }
            Err(_) => missing_files.push(entry.path.clone()),
        }
    }

    let image = bundle.signable_image()?;
    let recomputed_manifest_digest = gait_canon::sha256_hex(image.as_bytes());
    if recomputed_manifest_digest != bundle.manifest_digest() {
        hash_mismatches.push("<manifest>".to_string());
    }

    let signature_status = match (bundle.signature(), public_key) {
        (None, _) => SignatureStatus::Absent,
        (Some(signature), Some(key)) => match gait_sign::verify_bytes(key, image.as_bytes(), signature) {
            Ok(()) => SignatureStatus::Verified,
            Err(_) => SignatureStatus::Failed,
        },
        (Some(_), None) => SignatureStatus::Failed,
    };
    let signature_status = if profile == VerificationProfile::OfflineStrict && signature_status == SignatureStatus::Absent {
        SignatureStatus::Failed
    } else {
        signature_status
    };

    Ok(VerifyReport { missing_files, hash_mismatches, signature_status, files_checked: entries.len() })
}

/// Verify a runpack or pack zip archive at `path`.
pub fn verify_runpack(path: &Path, profile: VerificationProfile, public_key: Option<&VerifyingKey>) -> Result<VerifyReport, GaitError> {
    let mut bundle = ZipManifestBundle::open(path)?;
    verify(&mut bundle, profile, public_key)
}

/// Verify an evidence or incident pack JSON file at `path`.
pub fn verify_evidence_pack(
    path: &Path,
    profile: VerificationProfile,
    public_key: Option<&VerifyingKey>,
) -> Result<VerifyReport, GaitError> {
    let mut bundle = EvidencePackBundle::open(path)?;
    verify(&mut bundle, profile, public_key)
}

/// One checkpoint's runpack verification result, keyed by its path.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CheckpointVerification {
    /// The checkpoint's runpack path.
    pub runpack_path: String,
    /// That runpack's verification report.
    pub report: VerifyReport,
}

/// The result of walking a session's checkpoint chain end to end.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionChainReport {
    /// Number of checkpoints walked.
    pub checkpoints_checked: usize,
    /// Per-checkpoint runpack verification results, in chain order.
    pub checkpoints: Vec<CheckpointVerification>,
}

/// Verify a session's checkpoint chain: digest linkage and sequence
/// contiguity (`SessionChain::verify_links`), then each referenced
/// runpack's existence and manifest/signature.
pub fn verify_session_chain(
    chain_path: &Path,
    profile: VerificationProfile,
    public_key: Option<&VerifyingKey>,
) -> Result<SessionChainReport, GaitError> {
    let chain = SessionChain::open(chain_path);
    chain.verify_links()?;
    let checkpoints = chain.load()?;

    let mut reports = Vec::with_capacity(checkpoints.len());
    for checkpoint in &checkpoints {
        let runpack_path = Path::new(&checkpoint.runpack_path);
        if !runpack_path.exists() {
            return Err(GaitError::new(
                ErrorCode::ManifestFileMissing,
                format!("checkpoint {} references missing runpack {}", checkpoint.checkpoint_index, checkpoint.runpack_path),
            ));
        }
        let report = verify_runpack(runpack_path, profile, public_key)?;
        reports.push(CheckpointVerification { runpack_path: checkpoint.runpack_path.clone(), report });
    }

    Ok(SessionChainReport { checkpoints_checked: checkpoints.len(), checkpoints: reports })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gait_runpack::{ArtifactKind, CandidateArtifact, EvidencePackBuilder};
    use gait_sign::SigningKey;

    fn write_evidence_pack(
        dir: &Path,
        signing: Option<(&SigningKey, &str)>,
    ) -> std::path::PathBuf {
        let a = b"content-a".to_vec();
        let b = b"content-b".to_vec();
        std::fs::write(dir.join("a.json"), &a).unwrap();
        std::fs::write(dir.join("b.json"), &b).unwrap();
        let pack = EvidencePackBuilder::new("pack-1")
            .artifact(CandidateArtifact { kind: ArtifactKind::Trace, path: "a.json".into(), bytes: a, trace_ids: vec![] })
            .artifact(CandidateArtifact { kind: ArtifactKind::Trace, path: "b.json".into(), bytes: b, trace_ids: vec![] })
            .build(Utc::now(), signing)
            .unwrap();
        let pack_path = dir.join("pack.json");
        std::fs::write(&pack_path, serde_json::to_vec_pretty(&pack).unwrap()).unwrap();
        pack_path
    }

    #[test]
    fn clean_evidence_pack_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_evidence_pack(dir.path(), None);
        let report = verify_evidence_pack(&path, VerificationProfile::Lenient, None).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.files_checked, 2);
        assert_eq!(report.signature_status, SignatureStatus::Absent);
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_evidence_pack(dir.path(), None);
        std::fs::remove_file(dir.path().join("b.json")).unwrap();
        let report = verify_evidence_pack(&path, VerificationProfile::Lenient, None).unwrap();
        assert_eq!(report.missing_files, vec!["b.json".to_string()]);
        assert!(!report.is_clean());
    }

    #[test]
    fn tampered_file_is_reported_as_hash_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_evidence_pack(dir.path(), None);
        std::fs::write(dir.path().join("a.json"), b"tampered").unwrap();
        let report = verify_evidence_pack(&path, VerificationProfile::Lenient, None).unwrap();
        assert_eq!(report.hash_mismatches, vec!["a.json".to_string()]);
    }

    #[test]
    fn signed_pack_verifies_with_correct_key() {
        let dir = tempfile::tempdir().unwrap();
        let key = SigningKey::generate(&mut rand::rngs::OsRng);
        let path = write_evidence_pack(dir.path(), Some((&key, "key-1")));
        let report = verify_evidence_pack(&path, VerificationProfile::OfflineStrict, Some(&key.verifying_key())).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.signature_status, SignatureStatus::Verified);
    }

    #[test]
    fn strict_profile_without_key_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_evidence_pack(dir.path(), None);
        let err = verify_evidence_pack(&path, VerificationProfile::OfflineStrict, None).unwrap_err();
        assert_eq!(err.code(), ErrorCode::KeySourceMissing);
    }

    #[test]
    fn strict_profile_treats_absent_signature_as_failure() {
        let dir = tempfile::tempdir().unwrap();
        let key = SigningKey::generate(&mut rand::rngs::OsRng);
        let path = write_evidence_pack(dir.path(), None);
        let report = verify_evidence_pack(&path, VerificationProfile::OfflineStrict, Some(&key.verifying_key())).unwrap();
        assert_eq!(report.signature_status, SignatureStatus::Failed);
        assert!(!report.is_clean());
    }

    #[test]
    fn runpack_archive_round_trips_through_verify() {
        use gait_runpack::RunpackBuilder;
        use serde_json::json;

        let dir = tempfile::tempdir().unwrap();
        let artifact = RunpackBuilder::new()
            .run(json!({"run_id": "r1"}))
            .add_intent(json!({"tool_name": "tool.a"}))
            .refs(json!({}))
            .build(Utc::now(), None)
            .unwrap();
        let path = dir.path().join("run.zip");
        artifact.write_to(&path).unwrap();
        let report = verify_runpack(&path, VerificationProfile::Lenient, None).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.files_checked, artifact.manifest.files.len());
    }

    #[test]
    fn session_chain_verifies_every_referenced_runpack() {
        use gait_runpack::{compute_checkpoint_digest, Checkpoint, RunpackBuilder, SessionChain};
        use serde_json::json;

        let dir = tempfile::tempdir().unwrap();
        let artifact = RunpackBuilder::new().run(json!({"run_id": "r1"})).refs(json!({})).build(Utc::now(), None).unwrap();
        let runpack_path = dir.path().join("checkpoint-0.zip");
        artifact.write_to(&runpack_path).unwrap();

        let digest = compute_checkpoint_digest(&artifact.manifest.manifest_digest, 1, 3, None).unwrap();
        let chain = SessionChain::open(dir.path().join("chain.json"));
        chain
            .append(Checkpoint {
                checkpoint_index: 0,
                runpack_path: runpack_path.display().to_string(),
                sequence_start: 1,
                sequence_end: 3,
                checkpoint_digest: digest,
                prev_checkpoint_digest: None,
            })
            .unwrap();

        let report = verify_session_chain(&dir.path().join("chain.json"), VerificationProfile::Lenient, None).unwrap();
        assert_eq!(report.checkpoints_checked, 1);
        assert!(report.checkpoints[0].report.is_clean());
    }
}
