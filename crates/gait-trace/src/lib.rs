// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Signed trace records and approval/delegation/say token issuance.
//!
//! A [`Trace`] is the signed decision record emitted after every policy
//! evaluation. Token issuance (approval, delegation, say) reuses the same
//! canonical-image-then-sign discipline from `gait-sign`; this crate owns
//! the signing key lifecycle for that discipline, while `gait-core` owns
//! the token record shapes and their pure (key-free) validity predicates.

mod token;

use chrono::{DateTime, Utc};
use gait_core::{EvalOutcome, Intent};
use gait_error::{ErrorCode, GaitError};
use gait_sign::{SignatureBlock, SigningKey, VerifyingKey};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub use token::{
    issue_approval_token, issue_delegation_token, issue_say_token, verify_approval_token,
    verify_delegation_token, verify_say_token, TokenVerifyOptions,
};

/// Current schema generation for records defined in this crate.
pub const SCHEMA_VERSION: u32 = 1;

/// Identifies this record type and its schema version, carried on every
/// persisted artifact per the workspace-wide record envelope convention.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SchemaHeader {
    /// The record's schema identifier, e.g. `"gait.trace"`.
    pub schema_id: String,
    /// The schema generation.
    pub schema_version: u32,
    /// UTC creation timestamp, RFC3339 with nanosecond precision.
    pub created_at: DateTime<Utc>,
    /// The producing binary's version string.
    pub producer_version: String,
}

impl SchemaHeader {
    /// Build a header for `schema_id`, stamped `created_at`.
    #[must_use]
    pub fn new(schema_id: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            schema_id: schema_id.into(),
            schema_version: SCHEMA_VERSION,
            created_at,
            producer_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// A signed decision record: the outcome of one policy evaluation, bound to
/// the intent and policy digests that produced it.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Trace {
    /// Record envelope.
    #[serde(flatten)]
    pub header: SchemaHeader,
    /// Deterministic trace id: `digest(intent_digest || policy_digest ||
    /// correlation_id)`.
    pub trace_id: String,
    /// The terminating verdict.
    pub verdict: gait_core::Verdict,
    /// Accumulated reason codes.
    pub reason_codes: Vec<String>,
    /// Accumulated violations.
    pub violations: Vec<gait_core::Violation>,
    /// Digest of the policy evaluated.
    pub policy_digest: String,
    /// Digest of the intent evaluated.
    pub intent_digest: String,
    /// Correlation id this trace was minted under (e.g. a session or job id).
    pub correlation_id: String,
    /// Signature over this record's canonical form with `signature` omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<SignatureBlock>,
}

/// `trace_id = digest(intent_digest || policy_digest || correlation_id)`,
/// deterministic so identical decisions at identical timestamps reproduce
/// the same id; path disambiguation at write time uses a separate suffix.
pub fn trace_id(intent_digest: &str, policy_digest: &str, correlation_id: &str) -> Result<String, GaitError> {
    let combined = format!("{intent_digest}|{policy_digest}|{correlation_id}");
    Ok(gait_canon::sha256_hex(combined.as_bytes()))
}

/// Assemble and sign a [`Trace`] from an evaluation outcome.
pub fn emit_signed_trace(
    intent: &Intent,
    outcome: &EvalOutcome,
    correlation_id: &str,
    signing_key: &SigningKey,
    key_id: &str,
    now: DateTime<Utc>,
) -> Result<Trace, GaitError> {
    let _ = intent;
    let id = trace_id(&outcome.intent_digest, &outcome.policy_digest, correlation_id)?;
    let mut trace = Trace {
        header: SchemaHeader::new("gait.trace", now),
        trace_id: id,
        verdict: outcome.verdict,
        reason_codes: outcome.reason_codes.clone(),
        violations: outcome.violations.clone(),
        policy_digest: outcome.policy_digest.clone(),
        intent_digest: outcome.intent_digest.clone(),
        correlation_id: correlation_id.to_string(),
        signature: None,
    };
    let signature = gait_sign::sign_canonical_excluding(signing_key, key_id, &trace, "signature")?;
    trace.signature = Some(signature);
    Ok(trace)
}

/// Verify a [`Trace`]'s signature against `verifying_key`.
pub fn verify_trace(trace: &Trace, verifying_key: &VerifyingKey) -> Result<(), GaitError> {
    let signature = trace.signature.as_ref().ok_or_else(|| {
        GaitError::new(ErrorCode::SignatureInvalid, "trace carries no signature")
    })?;
    gait_sign::verify_canonical_excluding(verifying_key, trace, "signature", signature)
}

/// The default path a trace is written to, before monotonic-suffix
/// disambiguation: `trace_<trace_id>.json`.
#[must_use]
pub fn default_trace_filename(trace_id: &str) -> String {
    format!("trace_{trace_id}.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use gait_core::{IntentBuilder, IntentContext, Policy, Verdict, VerdictSource};

    fn ctx() -> IntentContext {
        IntentContext {
            identity: "agent-1".into(),
            workspace: None,
            risk_class: None,
            session_id: None,
            job_id: None,
            auth_mode: None,
            oauth_evidence: None,
        }
    }

    fn outcome() -> (Intent, EvalOutcome) {
        let intent = IntentBuilder::new("tool.search").context(ctx()).build().unwrap();
        let policy = Policy { default_verdict: Verdict::Allow, rules: vec![] };
        let outcome = EvalOutcome {
            verdict: Verdict::Allow,
            context_source: VerdictSource::Default,
            matched_rule: None,
            reason_codes: vec![],
            violations: vec![],
            policy_digest: policy.digest().unwrap(),
            intent_digest: intent.digest().unwrap(),
            pre_approved: false,
            pattern_id: None,
            step_verdicts: vec![],
        };
        (intent, outcome)
    }

    #[test]
    fn trace_id_is_deterministic_given_same_inputs() {
        let a = trace_id("i", "p", "corr-1").unwrap();
        let b = trace_id("i", "p", "corr-1").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn trace_id_differs_on_correlation_id() {
        let a = trace_id("i", "p", "corr-1").unwrap();
        let b = trace_id("i", "p", "corr-2").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn emitted_trace_self_verifies() {
        let (intent, outcome) = outcome();
        let key = SigningKey::generate(&mut rand::rngs::OsRng);
        let trace = emit_signed_trace(&intent, &outcome, "session-1", &key, "key-1", Utc::now()).unwrap();
        verify_trace(&trace, &key.verifying_key()).unwrap();
    }

    #[test]
    fn tampered_trace_fails_verification() {
        let (intent, outcome) = outcome();
        let key = SigningKey::generate(&mut rand::rngs::OsRng);
        let mut trace = emit_signed_trace(&intent, &outcome, "session-1", &key, "key-1", Utc::now()).unwrap();
        trace.reason_codes.push("tampered".to_string());
        let err = verify_trace(&trace, &key.verifying_key()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::SignatureInvalid);
    }

    #[test]
    fn default_trace_filename_embeds_id() {
        assert_eq!(default_trace_filename("abc123"), "trace_abc123.json");
    }
}
