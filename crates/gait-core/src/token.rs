//! Signed capability tokens: approval, delegation, and say tokens.
//!
//! All three share one shape discipline: a payload plus an optional
//! [`gait_sign::SignatureBlock`], signed and verified over the payload's
//! canonical JSON with the `signature` field itself excluded. The actual
//! signing/verification calls live in `gait-trace`, which owns the signing
//! key lifecycle; this crate only defines the record shapes and the pure
//! validity predicates (expiry, scope coverage) that do not require a key.

use chrono::{DateTime, Utc};
use gait_sign::SignatureBlock;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A signed record granting approval for a specific intent under a
/// specific policy.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ApprovalToken {
    /// Unique token id.
    pub token_id: String,
    /// The intent digest this approval covers.
    pub intent_digest: String,
    /// The policy digest this approval was issued under.
    pub policy_digest: String,
    /// Digest of the delegation binding this approval is scoped to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegation_binding_digest: Option<String>,
    /// Scopes this approval grants, e.g. `"tool:tool.write"`.
    pub scope: Vec<String>,
    /// Identity of the approver.
    pub approver_identity: String,
    /// Reason code recorded alongside the approval.
    pub reason_code: String,
    /// Maximum number of targets this approval covers, if bounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_targets: Option<u32>,
    /// Maximum number of operations this approval covers, if bounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_ops: Option<u32>,
    /// Issuance time.
    pub issued_at: DateTime<Utc>,
    /// Expiry time.
    pub expires_at: DateTime<Utc>,
    /// Signature over the canonical form of this token with `signature`
    /// excluded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<SignatureBlock>,
}

impl ApprovalToken {
    /// Whether this token has expired as of `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether this token's scope covers every entry in `requested`.
    #[must_use]
    pub fn covers_scope(&self, requested: &[String]) -> bool {
        requested.iter().all(|r| self.scope.iter().any(|s| s == r))
    }
}

/// A signed record binding `delegator` to `delegate` within `scope_class`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct DelegationToken {
    /// Unique token id.
    pub token_id: String,
    /// The identity granting authority.
    pub delegator: String,
    /// The identity receiving authority.
    pub delegate: String,
    /// The scope class this delegation covers.
    pub scope_class: String,
    /// Individual scopes granted within that class.
    pub scopes: Vec<String>,
    /// Issuance time.
    pub issued_at: DateTime<Utc>,
    /// Expiry time.
    pub expires_at: DateTime<Utc>,
    /// Signature over the canonical form of this token with `signature`
    /// excluded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<SignatureBlock>,
}

impl DelegationToken {
    /// Whether this token has expired as of `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether this token's scopes cover every entry in `requested`.
    #[must_use]
    pub fn covers_scope(&self, requested: &[String]) -> bool {
        requested.iter().all(|r| self.scopes.iter().any(|s| s == r))
    }
}

/// A signed record binding a specific conversational turn to a decision.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SayToken {
    /// Unique token id.
    pub token_id: String,
    /// The conversational call this token is bound to.
    pub call_id: String,
    /// The turn index within that call.
    pub turn_index: u64,
    /// The intent digest this token covers.
    pub intent_digest: String,
    /// The policy digest this token was issued under.
    pub policy_digest: String,
    /// Scopes this token grants.
    pub scope: Vec<String>,
    /// Identity of the approver.
    pub approver_identity: String,
    /// Issuance time.
    pub issued_at: DateTime<Utc>,
    /// Expiry time.
    pub expires_at: DateTime<Utc>,
    /// Signature over the canonical form of this token with `signature`
    /// excluded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<SignatureBlock>,
}

impl SayToken {
    /// Whether this token has expired as of `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Validate the two expected-value constraints unique to say tokens:
    /// the call id and turn index must match the evaluation context's own.
    #[must_use]
    pub fn matches_call(&self, expected_call_id: &str, expected_turn_index: u64) -> bool {
        self.call_id == expected_call_id && self.turn_index == expected_turn_index
    }
}
