//! The approved-script registry backing the fast evaluation path.

use chrono::{DateTime, Utc};

/// One previously-approved script, bound to the exact policy it was
/// reviewed against.
#[derive(Debug, Clone)]
pub struct ApprovedScriptEntry {
    /// Digest of the script's ordered steps.
    pub script_hash: String,
    /// The policy digest this approval is bound to.
    pub policy_digest: String,
    /// Operator-facing identifier for this approved pattern.
    pub pattern_id: String,
    /// Optional expiry; `None` means the entry never expires.
    pub expires_at: Option<DateTime<Utc>>,
}

/// A set of approved-script entries. A hit bypasses rule evaluation
/// entirely (see `evaluate`'s fast path), including `block` and
/// `require_approval` rules, because the script was already reviewed
/// against the exact policy digest it is now being matched against.
#[derive(Debug, Clone, Default)]
pub struct ApprovedScriptRegistry {
    entries: Vec<ApprovedScriptEntry>,
}

impl ApprovedScriptRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an approved script entry.
    pub fn insert(&mut self, entry: ApprovedScriptEntry) {
        self.entries.push(entry);
    }

    /// Find a non-expired entry matching `script_hash` and `policy_digest`.
    #[must_use]
    pub fn find(&self, script_hash: &str, policy_digest: &str, now: DateTime<Utc>) -> Option<&ApprovedScriptEntry> {
        self.entries.iter().find(|e| {
            e.script_hash == script_hash
                && e.policy_digest == policy_digest
                && e.expires_at.is_none_or(|exp| now < exp)
        })
    }
}
