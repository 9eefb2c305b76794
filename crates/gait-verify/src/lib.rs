// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Cross-artifact offline verification.
//!
//! Runpacks, packs, and session chains are all, at their core, a manifest
//! naming a set of files by path, hash, and size, plus an optional
//! signature over that manifest's canonical image. [`bundle`] exposes that
//! shape as one [`VerifiableBundle`] capability regardless of whether the
//! files live inside a zip archive or loose on disk next to a JSON pack;
//! [`verify`] implements the one re-hash-and-compare algorithm every bundle
//! kind is checked by.

mod bundle;
mod verify;

pub use bundle::{EvidencePackBundle, FileEntryRef, VerifiableBundle, ZipManifestBundle};
pub use verify::{
    CheckpointVerification, SessionChainReport, SignatureStatus, VerifyReport, verify,
    verify_evidence_pack, verify_runpack, verify_session_chain,
};
