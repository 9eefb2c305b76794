//! The result of evaluating an intent against a policy.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::policy::Verdict;

/// A single accumulated violation: the reason code plus the rule that
/// produced it, if any.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Violation {
    /// The reason code.
    pub reason_code: String,
    /// The rule name that produced this violation, if a rule (rather than
    /// the default verdict) was responsible.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_name: Option<String>,
}

/// Per-step outcome within a script intent's composite evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StepVerdict {
    /// Index of the step within the script.
    pub step_index: usize,
    /// The verdict for this step alone.
    pub verdict: Verdict,
    /// The rule that terminated this step's evaluation, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_rule: Option<String>,
    /// Reason codes accumulated for this step.
    #[serde(default)]
    pub reason_codes: Vec<String>,
}

/// Where the terminating verdict came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum VerdictSource {
    /// A rule matched and terminated evaluation.
    Rule,
    /// No rule matched; the policy's default verdict applied.
    Default,
    /// The approved-script fast path matched, bypassing rule evaluation.
    ApprovedScript,
    /// A previously `require_approval` verdict was satisfied by a
    /// supplied approval token.
    ApprovalToken,
    /// Evaluation was preempted by an emergency-stopped job.
    EmergencyStopPreemption,
}

/// The full outcome of evaluating an intent against a policy.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EvalOutcome {
    /// The terminating verdict.
    pub verdict: Verdict,
    /// Where the verdict came from.
    pub context_source: VerdictSource,
    /// The rule that matched, if `context_source` is `rule`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_rule: Option<String>,
    /// Accumulated reason codes.
    #[serde(default)]
    pub reason_codes: Vec<String>,
    /// Accumulated violations (populated for `block`/`require_approval`).
    #[serde(default)]
    pub violations: Vec<Violation>,
    /// Digest of the policy that was evaluated.
    pub policy_digest: String,
    /// Digest of the intent that was evaluated.
    pub intent_digest: String,
    /// Whether the approved-script fast path produced this outcome.
    #[serde(default)]
    pub pre_approved: bool,
    /// The matched approved-script registry pattern id, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_id: Option<String>,
    /// Per-step outcomes for script intents.
    #[serde(default)]
    pub step_verdicts: Vec<StepVerdict>,
}

impl EvalOutcome {
    /// Convenience: whether the verdict is `allow`.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        self.verdict == Verdict::Allow
    }
}
