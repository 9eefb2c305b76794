// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Deterministic content-addressed runpack/pack archives, the session
//! journal and its checkpoint chain, and evidence/incident pack assembly.
//!
//! A runpack is a zip archive with a fixed internal layout
//! (`run.json`, `intents/<ordinal>.json`, `results/<ordinal>.json`,
//! `refs.json`, `pack_manifest.json`) written so that two logically
//! identical runs produce byte-identical archives: see [`writer`] for the
//! determinism rules. Sessions checkpoint their append-only event journal
//! into a chain of such runpacks (see [`journal`]); evidence and incident
//! packs (see [`evidence`]) compose already-produced artifacts of several
//! kinds under one signed manifest.

pub mod evidence;
pub mod journal;
pub mod manifest;
pub mod writer;

pub use evidence::{
    ArtifactKind, CandidateArtifact, EvidenceArtifactRef, EvidencePack, EvidencePackBuilder,
    PackKind, generate_pack_id, pack_signable_image, verify_pack_digest,
};
pub use journal::{
    CompactionReport, Checkpoint, SessionChain, SessionEvent, SessionJournal,
    compaction_dry_run, compute_checkpoint_digest, create_checkpoint,
};
pub use manifest::{
    CaptureMode, ManifestFileEntry, PackManifest, compute_manifest_digest, signable_image,
    verify_manifest_digest,
};
pub use writer::{RunpackArtifact, RunpackBuilder};
