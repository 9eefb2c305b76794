// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Ed25519 signing primitives shared by every signed artifact in this
//! workspace (traces, approval/delegation/say tokens, pack manifests).
//!
//! All of those record types follow one pattern: canonicalize the record
//! with its own `signature` field removed, sign or verify that byte image,
//! and carry the result as a [`SignatureBlock`] alongside the payload.

use std::path::PathBuf;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use ed25519_dalek::{Signature, Signer, Verifier};
use gait_error::{ErrorCode, GaitError};
use serde::{Deserialize, Serialize};

pub use ed25519_dalek::{SigningKey, VerifyingKey};

/// How a signing key is sourced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyMode {
    /// Ephemeral keys are acceptable; every use emits a warning.
    Dev,
    /// An explicit [`KeySource`] is required.
    Prod,
}

/// Where to load a base64-encoded Ed25519 seed from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    /// A file containing a base64-encoded 32-byte seed.
    File(PathBuf),
    /// An environment variable holding the same.
    EnvVar(String),
}

/// Key loading configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyConfig {
    /// Dev or prod mode.
    pub mode: KeyMode,
    /// The key source, required in [`KeyMode::Prod`].
    pub source: Option<KeySource>,
}

/// Load (or, in dev mode with no source, generate) a signing key.
pub fn load_signing_key(config: &KeyConfig) -> Result<SigningKey, GaitError> {
    if let Some(source) = &config.source {
        return load_from_source(source);
    }
    match config.mode {
        KeyMode::Prod => Err(GaitError::new(
            ErrorCode::KeySourceMissing,
            "production key mode requires an explicit key source",
        )
        .with_hint("set key_source to a file path or environment variable name")),
        KeyMode::Dev => {
            tracing::warn!("generating an ephemeral development signing key; do not use this outside local development");
            Ok(SigningKey::generate(&mut rand::rngs::OsRng))
        }
    }
}

fn load_from_source(source: &KeySource) -> Result<SigningKey, GaitError> {
    let encoded = match source {
        KeySource::File(path) => std::fs::read_to_string(path)?,
        KeySource::EnvVar(name) => std::env::var(name).map_err(|_| {
            GaitError::new(
                ErrorCode::KeySourceMissing,
                format!("environment variable {name} is not set"),
            )
        })?,
    };
    decode_signing_key(encoded.trim())
}

fn decode_signing_key(encoded: &str) -> Result<SigningKey, GaitError> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| GaitError::new(ErrorCode::SchemaInvalid, format!("invalid base64 signing key: {e}")))?;
    let seed: [u8; 32] = bytes.try_into().map_err(|_| {
        GaitError::new(ErrorCode::SchemaInvalid, "signing key seed must be exactly 32 bytes")
    })?;
    Ok(SigningKey::from_bytes(&seed))
}

/// A signature attached to a record, alongside the key id used to produce
/// it. `algorithm` is always `"ed25519"` today but is carried explicitly so
/// a future algorithm can be added without breaking the schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct SignatureBlock {
    /// Identifies which key produced this signature (operator-assigned).
    pub key_id: String,
    /// Signing algorithm; always `"ed25519"`.
    pub algorithm: String,
    /// Base64-encoded 64-byte Ed25519 signature.
    pub value: String,
}

/// Sign raw bytes, returning a [`SignatureBlock`].
#[must_use]
pub fn sign_bytes(key: &SigningKey, key_id: &str, bytes: &[u8]) -> SignatureBlock {
    let signature = key.sign(bytes);
    SignatureBlock {
        key_id: key_id.to_string(),
        algorithm: "ed25519".to_string(),
        value: STANDARD.encode(signature.to_bytes()),
    }
}

/// Verify raw bytes against a [`SignatureBlock`].
pub fn verify_bytes(
    verifying_key: &VerifyingKey,
    bytes: &[u8],
    signature: &SignatureBlock,
) -> Result<(), GaitError> {
    if signature.algorithm != "ed25519" {
        return Err(GaitError::new(
            ErrorCode::SignatureInvalid,
            format!("unsupported signature algorithm: {}", signature.algorithm),
        ));
    }
    let raw = STANDARD.decode(&signature.value).map_err(|e| {
        GaitError::new(ErrorCode::SignatureInvalid, format!("invalid base64 signature: {e}"))
    })?;
    let raw: [u8; 64] = raw
        .try_into()
        .map_err(|_| GaitError::new(ErrorCode::SignatureInvalid, "signature must be exactly 64 bytes"))?;
    let sig = Signature::from_bytes(&raw);
    verifying_key
        .verify(bytes, &sig)
        .map_err(|e| GaitError::new(ErrorCode::SignatureInvalid, format!("signature verification failed: {e}")))
}

/// Sign the canonical JSON image of `payload` with `exclude_field` (e.g.
/// `"signature"`) removed before hashing, the pattern every signed record
/// type in this workspace follows.
pub fn sign_canonical_excluding<T: Serialize>(
    key: &SigningKey,
    key_id: &str,
    payload: &T,
    exclude_field: &str,
) -> Result<SignatureBlock, GaitError> {
    let image = gait_canon::canonicalize_without_field(payload, exclude_field)?;
    Ok(sign_bytes(key, key_id, image.as_bytes()))
}

/// Verify `signature` against the canonical JSON image of `payload` with
/// `exclude_field` removed.
pub fn verify_canonical_excluding<T: Serialize>(
    verifying_key: &VerifyingKey,
    payload: &T,
    exclude_field: &str,
    signature: &SignatureBlock,
) -> Result<(), GaitError> {
    let image = gait_canon::canonicalize_without_field(payload, exclude_field)?;
    verify_bytes(verifying_key, image.as_bytes(), signature)
}
