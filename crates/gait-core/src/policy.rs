//! Policy: a declarative rule set governing which intents are allowed.

use gait_error::GaitError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The outcome of evaluating an intent against a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Permitted to proceed.
    Allow,
    /// Requires an explicit dry run instead of live execution.
    DryRun,
    /// Requires a satisfying approval token before it may proceed.
    RequireApproval,
    /// Not permitted.
    Block,
}

impl Verdict {
    /// Severity ordering used to compose step verdicts:
    /// `block > require_approval > dry_run > allow`.
    #[must_use]
    pub fn severity(self) -> u8 {
        match self {
            Self::Allow => 0,
            Self::DryRun => 1,
            Self::RequireApproval => 2,
            Self::Block => 3,
        }
    }

    /// The more severe of two verdicts.
    #[must_use]
    pub fn max(self, other: Self) -> Self {
        if other.severity() > self.severity() { other } else { self }
    }
}

/// A rule's effect: every [`Verdict`] variant, plus `continue` which falls
/// through to the next rule without terminating evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RuleEffect {
    /// Terminate evaluation with `allow`.
    Allow,
    /// Terminate evaluation with `dry_run`.
    DryRun,
    /// Terminate evaluation with `require_approval`.
    RequireApproval,
    /// Terminate evaluation with `block`.
    Block,
    /// Record that this rule matched but keep evaluating subsequent rules.
    Continue,
}

impl RuleEffect {
    /// The [`Verdict`] this effect terminates with, if any.
    #[must_use]
    pub fn as_verdict(self) -> Option<Verdict> {
        match self {
            Self::Allow => Some(Verdict::Allow),
            Self::DryRun => Some(Verdict::DryRun),
            Self::RequireApproval => Some(Verdict::RequireApproval),
            Self::Block => Some(Verdict::Block),
            Self::Continue => None,
        }
    }
}

/// Conjunctive match predicate for a [`Rule`]. An empty list for any field
/// is treated as "don't care"; all non-empty fields must match.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct RuleMatch {
    /// Tool names this rule applies to.
    pub tool_names: Vec<String>,
    /// Target kinds this rule applies to.
    pub target_kinds: Vec<String>,
    /// Target values (exact match) this rule applies to.
    pub target_values: Vec<String>,
    /// Risk classes this rule applies to.
    pub risk_classes: Vec<String>,
    /// When true, the intent must carry a verifiable delegation chain.
    pub require_delegation: bool,
    /// If non-empty, delegation chains must originate from one of these
    /// identities.
    pub allowed_delegator_identities: Vec<String>,
    /// If non-empty, the terminal delegate must be one of these identities.
    pub allowed_delegate_identities: Vec<String>,
    /// If non-empty, the delegation's scope class must be one of these.
    pub delegation_scopes: Vec<String>,
}

/// A single policy rule.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Rule {
    /// Human-readable rule name, unique within a policy by convention.
    pub name: String,
    /// Higher priority rules are considered first; ties are broken by the
    /// rule's position in the policy's `rules` list (earlier wins).
    pub priority: i64,
    /// What happens when this rule matches.
    pub effect: RuleEffect,
    /// The match predicate.
    #[serde(default)]
    pub r#match: RuleMatch,
    /// Reason codes attached to the verdict when this rule is the one
    /// that terminates evaluation.
    #[serde(default)]
    pub reason_codes: Vec<String>,
}

/// A declarative policy: a default verdict plus an ordered rule set.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Policy {
    /// Verdict applied when no rule terminates evaluation.
    pub default_verdict: Verdict,
    /// The rule set, in authoring order (index used for tie-breaking).
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl Policy {
    /// Rules sorted by `(priority desc, index asc)`, the order the policy
    /// engine evaluates them in.
    #[must_use]
    pub fn ordered_rules(&self) -> Vec<&Rule> {
        let mut indexed: Vec<(usize, &Rule)> = self.rules.iter().enumerate().collect();
        indexed.sort_by(|(ia, a), (ib, b)| b.priority.cmp(&a.priority).then(ia.cmp(ib)));
        indexed.into_iter().map(|(_, r)| r).collect()
    }

    /// Content digest of this policy's canonical form.
    pub fn digest(&self) -> Result<String, GaitError> {
        gait_canon::digest(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(name: &str, priority: i64, effect: RuleEffect) -> Rule {
        Rule {
            name: name.into(),
            priority,
            effect,
            r#match: RuleMatch::default(),
            reason_codes: vec![],
        }
    }

    #[test]
    fn ordered_rules_sorts_by_priority_desc_then_index_asc() {
        let policy = Policy {
            default_verdict: Verdict::Allow,
            rules: vec![
                rule("low", 1, RuleEffect::Allow),
                rule("high-a", 10, RuleEffect::Block),
                rule("high-b", 10, RuleEffect::Allow),
            ],
        };
        let ordered: Vec<&str> = policy.ordered_rules().iter().map(|r| r.name.as_str()).collect();
        // Both priority-10 rules tie; "high-a" was authored first and must
        // win the tie by staying ahead of "high-b".
        assert_eq!(ordered, vec!["high-a", "high-b", "low"]);
    }

    #[test]
    fn verdict_severity_orders_block_highest() {
        assert!(Verdict::Block.severity() > Verdict::RequireApproval.severity());
        assert!(Verdict::RequireApproval.severity() > Verdict::DryRun.severity());
        assert!(Verdict::DryRun.severity() > Verdict::Allow.severity());
    }

    #[test]
    fn policy_digest_is_order_sensitive_to_rule_content_not_formatting() {
        let a = Policy { default_verdict: Verdict::Allow, rules: vec![rule("r", 1, RuleEffect::Allow)] };
        let b = Policy { default_verdict: Verdict::Allow, rules: vec![rule("r", 1, RuleEffect::Allow)] };
        assert_eq!(a.digest().unwrap(), b.digest().unwrap());
    }
}
