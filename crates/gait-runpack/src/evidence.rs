//! Evidence and incident packs: typed bundles composing multiple
//! already-produced artifacts (runpacks, traces, regress results, approval
//! audits, credential evidence) under one signed manifest.

use chrono::{DateTime, Utc};
use gait_error::{ErrorCode, GaitError};
use gait_sign::{SignatureBlock, SigningKey};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Generate a fresh, time-ordered pack id (UUIDv7).
#[must_use]
pub fn generate_pack_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// What kind of pack this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PackKind {
    /// A general-purpose evidence bundle.
    Evidence,
    /// An incident pack, constrained to a time window around one run.
    Incident,
}

/// The kind of artifact referenced by an [`EvidenceArtifactRef`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// A runpack archive.
    Runpack,
    /// A signed trace record.
    Trace,
    /// A regression test result.
    RegressResult,
    /// An approval audit record.
    ApprovalAudit,
    /// Credential evidence.
    CredentialEvidence,
}

/// One artifact composed into an [`EvidencePack`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct EvidenceArtifactRef {
    /// The artifact's kind.
    pub kind: ArtifactKind,
    /// Pack-relative or external path.
    pub path: String,
    /// SHA-256 of the artifact's contents.
    pub sha256: String,
    /// Size in bytes.
    pub size_bytes: u64,
}

/// A typed bundle of artifacts under one manifest.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct EvidencePack {
    /// Unique pack id.
    pub pack_id: String,
    /// Evidence or incident.
    pub kind: PackKind,
    /// UTC creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Inclusion window `[start, end]`, present for incident packs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<(DateTime<Utc>, DateTime<Utc>)>,
    /// The run this pack was derived from, present for incident packs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_created_at: Option<DateTime<Utc>>,
    /// The window width in seconds, present for incident packs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_seconds: Option<i64>,
    /// Trace ids this pack's artifacts were filtered down to.
    #[serde(default)]
    pub included_trace_ids: Vec<String>,
    /// The composed artifacts.
    pub artifacts: Vec<EvidenceArtifactRef>,
    /// Digest of this pack's canonical form with `manifest_digest` and
    /// `signature` removed.
    pub manifest_digest: String,
    /// Signature over the same image, if signed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<SignatureBlock>,
}

/// Canonical form of `pack` with `manifest_digest` and `signature` removed,
/// the image `manifest_digest` is computed over and `signature` signs.
pub fn pack_signable_image(pack: &EvidencePack) -> Result<String, GaitError> {
    let mut value = serde_json::to_value(pack)
        .map_err(|e| GaitError::new(ErrorCode::SchemaInvalid, format!("failed to convert evidence pack to JSON: {e}")))?;
    if let Value::Object(map) = &mut value {
        map.remove("manifest_digest");
        map.remove("signature");
    }
    gait_canon::canonicalize(&value)
}

/// A candidate artifact supplied to [`EvidencePackBuilder`], carrying the
/// trace ids it is associated with (used to filter incident pack
/// membership).
#[derive(Debug, Clone)]
pub struct CandidateArtifact {
    /// The artifact's kind.
    pub kind: ArtifactKind,
    /// Pack-relative or external path.
    pub path: String,
    /// Raw contents, hashed to populate the manifest entry.
    pub bytes: Vec<u8>,
    /// Trace ids this artifact is associated with.
    pub trace_ids: Vec<String>,
}

/// Builds an [`EvidencePack`] from a set of candidate artifacts.
#[derive(Debug, Default)]
pub struct EvidencePackBuilder {
    pack_id: String,
    kind: PackKind,
    artifacts: Vec<CandidateArtifact>,
}

impl EvidencePackBuilder {
    /// Start a general-purpose evidence pack.
    #[must_use]
    pub fn new(pack_id: impl Into<String>) -> Self {
        Self { pack_id: pack_id.into(), kind: PackKind::Evidence, artifacts: Vec::new() }
    }

    /// Add a candidate artifact.
    #[must_use]
    pub fn artifact(mut self, artifact: CandidateArtifact) -> Self {
        self.artifacts.push(artifact);
        self
    }

    /// Build a general-purpose evidence pack including every added
    /// artifact.
    pub fn build(
        self,
        created_at: DateTime<Utc>,
        signing: Option<(&SigningKey, &str)>,
    ) -> Result<EvidencePack, GaitError> {
        let included_trace_ids = dedup_trace_ids(self.artifacts.iter().flat_map(|a| a.trace_ids.iter().cloned()));
        finish_pack(self.pack_id, PackKind::Evidence, created_at, None, None, None, included_trace_ids, self.artifacts, signing)
    }

    /// Build an incident pack: constrained to artifacts whose
    /// `trace_ids` intersect `run_trace_ids`, within the window
    /// `[run_created_at - window_seconds/2, run_created_at +
    /// window_seconds/2]`.
    pub fn build_incident(
        self,
        created_at: DateTime<Utc>,
        run_created_at: DateTime<Utc>,
        window_seconds: i64,
        run_trace_ids: &[String],
        signing: Option<(&SigningKey, &str)>,
    ) -> Result<EvidencePack, GaitError> {
        let half = chrono::Duration::seconds(window_seconds / 2);
        let window = (run_created_at - half, run_created_at + half);
        let selected: Vec<CandidateArtifact> = self
            .artifacts
            .into_iter()
            .filter(|a| a.trace_ids.iter().any(|t| run_trace_ids.contains(t)))
            .collect();
        let included_trace_ids = dedup_trace_ids(selected.iter().flat_map(|a| a.trace_ids.iter().cloned()));
        finish_pack(
            self.pack_id,
            PackKind::Incident,
            created_at,
            Some(window),
            Some(run_created_at),
            Some(window_seconds),
            included_trace_ids,
            selected,
            signing,
        )
    }
}

fn dedup_trace_ids(ids: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = std::collections::BTreeSet::new();
    let mut out = Vec::new();
    for id in ids {
        if seen.insert(id.clone()) {
            out.push(id);
        }
    }
    out
}

#[allow(clippy::too_many_arguments)]
fn finish_pack(
    pack_id: String,
    kind: PackKind,
    created_at: DateTime<Utc>,
    window: Option<(DateTime<Utc>, DateTime<Utc>)>,
    run_created_at: Option<DateTime<Utc>>,
    window_seconds: Option<i64>,
    included_trace_ids: Vec<String>,
    artifacts: Vec<CandidateArtifact>,
    signing: Option<(&SigningKey, &str)>,
) -> Result<EvidencePack, GaitError> {
    let mut refs: Vec<EvidenceArtifactRef> = artifacts
        .iter()
        .map(|a| EvidenceArtifactRef {
            kind: a.kind,
            path: a.path.clone(),
            sha256: gait_canon::sha256_hex(&a.bytes),
            size_bytes: a.bytes.len() as u64,
        })
        .collect();
    refs.sort_by(|a, b| a.path.cmp(&b.path));

    let mut pack = EvidencePack {
        pack_id,
        kind,
        created_at,
        window,
        run_created_at,
        window_seconds,
        included_trace_ids,
        artifacts: refs,
        manifest_digest: String::new(),
        signature: None,
    };
    pack.manifest_digest = gait_canon::sha256_hex(pack_signable_image(&pack)?);
    if let Some((key, key_id)) = signing {
        let image = pack_signable_image(&pack)?;
        pack.signature = Some(gait_sign::sign_bytes(key, key_id, image.as_bytes()));
    }
    Ok(pack)
}

/// Re-hash an [`EvidencePack`]'s own content and compare against its
/// stored `manifest_digest`.
pub fn verify_pack_digest(pack: &EvidencePack) -> Result<(), GaitError> {
    let recomputed = gait_canon::sha256_hex(pack_signable_image(pack)?);
    if recomputed != pack.manifest_digest {
        return Err(GaitError::new(ErrorCode::ManifestHashMismatch, "evidence pack manifest_digest does not match its content"));
    }
    Ok(())
}
