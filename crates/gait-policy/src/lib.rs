// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! The deterministic policy evaluation engine.
//!
//! [`evaluate`] is a pure function: given a policy, an intent, and a set
//! of options (the current time, an approved-script registry, and the
//! approval/delegation tokens and verification key available to this
//! call), it always returns the same [`gait_core::EvalOutcome`]. No I/O
//! happens inside evaluation itself.

mod registry;

use chrono::{DateTime, Utc};
use gait_core::{
    EvalOutcome, Intent, Policy, Rule, RuleMatch, StepVerdict, Target, Verdict, VerdictSource,
    Violation,
};
use gait_core::{ApprovalToken, DelegationToken};
use gait_error::GaitError;
use gait_sign::VerifyingKey;
use globset::Glob;

pub use registry::{ApprovedScriptEntry, ApprovedScriptRegistry};

/// Inputs to [`evaluate`] beyond the policy and intent themselves.
pub struct EvalOptions<'a> {
    /// The time evaluation runs at. Token expiry and approved-script
    /// entry expiry are checked against this, never the wall clock
    /// directly, so evaluation stays a pure function of its inputs.
    pub now: DateTime<Utc>,
    /// The approved-script fast-path registry, if one applies to this call.
    pub approved_script_registry: Option<&'a ApprovedScriptRegistry>,
    /// Approval tokens available to satisfy a `require_approval` verdict.
    pub approval_tokens: &'a [ApprovalToken],
    /// Delegation tokens available to validate a delegation chain.
    pub delegation_tokens: &'a [DelegationToken],
    /// Public key used to verify token signatures. When absent, tokens are
    /// trusted on shape alone (useful for tests); production callers
    /// should always supply one.
    pub verify_key: Option<&'a VerifyingKey>,
    /// Job ids currently in the `emergency_stopped` state. Any intent
    /// whose `context.job_id` is in this list is blocked regardless of
    /// policy.
    pub emergency_stopped_job_ids: &'a [String],
}

impl<'a> EvalOptions<'a> {
    /// The common case: no registry, no tokens, no verification key, no
    /// emergency-stopped jobs, evaluated at `now`.
    #[must_use]
    pub fn bare(now: DateTime<Utc>) -> Self {
        Self {
            now,
            approved_script_registry: None,
            approval_tokens: &[],
            delegation_tokens: &[],
            verify_key: None,
            emergency_stopped_job_ids: &[],
        }
    }
}

/// Evaluate `intent` against `policy`, producing a full [`EvalOutcome`].
pub fn evaluate(policy: &Policy, intent: &Intent, options: &EvalOptions) -> Result<EvalOutcome, GaitError> {
    let policy_digest = policy.digest()?;
    let intent_digest = intent.digest()?;

    if let Some(job_id) = &intent.context.job_id {
        if options.emergency_stopped_job_ids.iter().any(|j| j == job_id) {
            return Ok(emergency_stop_outcome(policy_digest, intent_digest));
        }
    }

    if let Some(script) = &intent.script {
        if let Some(registry) = options.approved_script_registry {
            let script_hash = gait_canon::digest(script)?;
            if let Some(entry) = registry.find(&script_hash, &policy_digest, options.now) {
                return Ok(EvalOutcome {
                    verdict: Verdict::Allow,
                    context_source: VerdictSource::ApprovedScript,
                    matched_rule: None,
                    reason_codes: vec!["approved_script_match".to_string()],
                    violations: vec![],
                    policy_digest,
                    intent_digest,
                    pre_approved: true,
                    pattern_id: Some(entry.pattern_id.clone()),
                    step_verdicts: vec![],
                });
            }
        }
    }

    if let Some(script) = &intent.script {
        return evaluate_script(policy, intent, script, policy_digest, intent_digest, options);
    }

    let single = evaluate_single(policy, &intent.tool_name, &intent.targets, intent, options)?;
    let mut verdict = single.verdict;
    let mut context_source = if single.matched_rule.is_some() { VerdictSource::Rule } else { VerdictSource::Default };
    let mut reason_codes = single.reason_codes;
    let violations = single.violations;

    if verdict == Verdict::RequireApproval {
        let requested_scope = vec![format!("tool:{}", intent.tool_name)];
        if let Some(token) = find_satisfying_approval(options, &intent_digest, &policy_digest, &requested_scope) {
            let _ = token;
            verdict = Verdict::Allow;
            context_source = VerdictSource::ApprovalToken;
            reason_codes = vec!["approval_token_accepted".to_string()];
        }
    }

    Ok(EvalOutcome {
        verdict,
        context_source,
        matched_rule: single.matched_rule,
        reason_codes,
        violations,
        policy_digest,
        intent_digest,
        pre_approved: false,
        pattern_id: None,
        step_verdicts: vec![],
    })
}

fn emergency_stop_outcome(policy_digest: String, intent_digest: String) -> EvalOutcome {
    EvalOutcome {
        verdict: Verdict::Block,
        context_source: VerdictSource::EmergencyStopPreemption,
        matched_rule: None,
        reason_codes: vec!["emergency_stop_preempted".to_string()],
        violations: vec![Violation { reason_code: "emergency_stop_preempted".to_string(), rule_name: None }],
        policy_digest,
        intent_digest,
        pre_approved: false,
        pattern_id: None,
        step_verdicts: vec![],
    }
}

fn evaluate_script(
    policy: &Policy,
    intent: &Intent,
    script: &gait_core::Script,
    policy_digest: String,
    intent_digest: String,
    options: &EvalOptions,
) -> Result<EvalOutcome, GaitError> {
    let mut step_verdicts = Vec::with_capacity(script.steps.len());
    let mut worst = Verdict::Allow;
    let mut matched_rule_overall = None;
    let mut reason_codes = Vec::new();
    let mut violations = Vec::new();

    for (index, step) in script.steps.iter().enumerate() {
        let single = evaluate_single(policy, &step.tool_name, &step.targets, intent, options)?;
        step_verdicts.push(StepVerdict {
            step_index: index,
            verdict: single.verdict,
            matched_rule: single.matched_rule.clone(),
            reason_codes: single.reason_codes.clone(),
        });
        if single.verdict.severity() >= worst.severity() {
            worst = single.verdict;
            if single.matched_rule.is_some() {
                matched_rule_overall = single.matched_rule.clone();
            }
        }
        reason_codes.extend(single.reason_codes);
        violations.extend(single.violations);
    }

    let mut context_source = VerdictSource::Rule;
    if worst == Verdict::RequireApproval {
        let requested_scope = vec![format!("tool:{}", intent.tool_name)];
        if find_satisfying_approval(options, &intent_digest, &policy_digest, &requested_scope).is_some() {
            worst = Verdict::Allow;
            context_source = VerdictSource::ApprovalToken;
            reason_codes = vec!["approval_token_accepted".to_string()];
        }
    }

    Ok(EvalOutcome {
        verdict: worst,
        context_source,
        matched_rule: matched_rule_overall,
        reason_codes,
        violations,
        policy_digest,
        intent_digest,
        pre_approved: false,
        pattern_id: None,
        step_verdicts,
    })
}

struct SingleOutcome {
    verdict: Verdict,
    matched_rule: Option<String>,
    reason_codes: Vec<String>,
    violations: Vec<Violation>,
}

/// Evaluate the rule set against one tool call (either the whole intent,
/// when it is not a script, or a single step). Rules are tried in
/// `(priority desc, index asc)` order; the first rule whose predicate
/// matches and whose effect is not `continue` terminates evaluation.
fn evaluate_single(
    policy: &Policy,
    tool_name: &str,
    targets: &[Target],
    intent: &Intent,
    options: &EvalOptions,
) -> Result<SingleOutcome, GaitError> {
    let risk_class = intent.context.risk_class.as_deref();

    for rule in policy.ordered_rules() {
        if !rule_matches(&rule.r#match, tool_name, targets, risk_class) {
            continue;
        }

        if rule.r#match.require_delegation {
            if let Err(reason) = validate_delegation(&rule.r#match, intent, options) {
                return Ok(SingleOutcome {
                    verdict: Verdict::Block,
                    matched_rule: Some(rule.name.clone()),
                    reason_codes: vec![reason.clone()],
                    violations: vec![Violation { reason_code: reason, rule_name: Some(rule.name.clone()) }],
                });
            }
        }

        let Some(verdict) = rule.effect.as_verdict() else {
            continue;
        };

        let reason_codes = rule.reason_codes.clone();
        let violations = if matches!(verdict, Verdict::Block | Verdict::RequireApproval) {
            reason_codes
                .iter()
                .map(|code| Violation { reason_code: code.clone(), rule_name: Some(rule.name.clone()) })
                .collect()
        } else {
            vec![]
        };

        return Ok(SingleOutcome {
            verdict,
            matched_rule: Some(rule.name.clone()),
            reason_codes,
            violations,
        });
    }

    let verdict = policy.default_verdict;
    let (reason_codes, violations) = if matches!(verdict, Verdict::Block | Verdict::RequireApproval) {
        (
            vec!["default_verdict".to_string()],
            vec![Violation { reason_code: "default_verdict".to_string(), rule_name: None }],
        )
    } else {
        (vec![], vec![])
    };

    Ok(SingleOutcome { verdict, matched_rule: None, reason_codes, violations })
}

fn glob_list_matches(list: &[String], value: &str) -> bool {
    if list.is_empty() {
        return true;
    }
    list.iter().any(|pattern| {
        Glob::new(pattern)
            .ok()
            .map(|g| g.compile_matcher().is_match(value))
            .unwrap_or(pattern == value)
    })
}

fn list_matches(list: &[String], value: Option<&str>) -> bool {
    if list.is_empty() {
        return true;
    }
    match value {
        Some(v) => list.iter().any(|item| item == v),
        None => false,
    }
}

fn targets_match(rule_match: &RuleMatch, targets: &[Target]) -> bool {
    if rule_match.target_kinds.is_empty() && rule_match.target_values.is_empty() {
        return true;
    }
    targets.iter().any(|t| {
        glob_list_matches(&rule_match.target_kinds, &t.kind)
            && glob_list_matches(&rule_match.target_values, &t.value)
    })
}

fn rule_matches(rule_match: &RuleMatch, tool_name: &str, targets: &[Target], risk_class: Option<&str>) -> bool {
    glob_list_matches(&rule_match.tool_names, tool_name)
        && list_matches(&rule_match.risk_classes, risk_class)
        && targets_match(rule_match, targets)
}

fn validate_delegation(rule_match: &RuleMatch, intent: &Intent, options: &EvalOptions) -> Result<(), String> {
    let Some(delegation) = &intent.delegation else {
        return Err("delegation_missing".to_string());
    };
    let Some(terminal_edge) = delegation.chain.last() else {
        return Err("delegation_missing".to_string());
    };
    if terminal_edge.delegate != delegation.requester_identity
        || terminal_edge.delegate != intent.context.identity
    {
        return Err("identity_binding_mismatch".to_string());
    }
    for pair in delegation.chain.windows(2) {
        if pair[0].delegate != pair[1].delegator {
            return Err("identity_binding_mismatch".to_string());
        }
    }
    if !rule_match.allowed_delegator_identities.is_empty() {
        let first_delegator = &delegation.chain[0].delegator;
        if !rule_match.allowed_delegator_identities.iter().any(|d| d == first_delegator) {
            return Err("delegation_scope_insufficient".to_string());
        }
    }
    if !rule_match.allowed_delegate_identities.is_empty()
        && !rule_match.allowed_delegate_identities.iter().any(|d| d == &terminal_edge.delegate)
    {
        return Err("delegation_scope_insufficient".to_string());
    }
    if !rule_match.delegation_scopes.is_empty()
        && !rule_match.delegation_scopes.iter().any(|s| s == &delegation.scope_class)
    {
        return Err("delegation_scope_insufficient".to_string());
    }

    for token_ref in &delegation.token_refs {
        let token = options
            .delegation_tokens
            .iter()
            .find(|t| &t.token_id == token_ref)
            .ok_or_else(|| "delegation_missing".to_string())?;
        if token.is_expired(options.now) {
            return Err("delegation_expired".to_string());
        }
        if let Some(verify_key) = options.verify_key {
            let Some(signature) = &token.signature else {
                return Err("delegation_missing".to_string());
            };
            if gait_sign::verify_canonical_excluding(verify_key, token, "signature", signature).is_err() {
                return Err("delegation_signature_invalid".to_string());
            }
        }
    }
    Ok(())
}

fn find_satisfying_approval<'a>(
    options: &EvalOptions<'a>,
    intent_digest: &str,
    policy_digest: &str,
    requested_scope: &[String],
) -> Option<&'a ApprovalToken> {
    options.approval_tokens.iter().find(|token| {
        token.intent_digest == intent_digest
            && token.policy_digest == policy_digest
            && !token.is_expired(options.now)
            && token.covers_scope(requested_scope)
            && match (&options.verify_key, &token.signature) {
                (Some(vk), Some(sig)) => gait_sign::verify_canonical_excluding(vk, *token, "signature", sig).is_ok(),
                (Some(_), None) => false,
                (None, _) => true,
            }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gait_core::{IntentBuilder, IntentContext, Rule, RuleEffect};

    fn ctx(identity: &str) -> IntentContext {
        IntentContext {
            identity: identity.to_string(),
            workspace: None,
            risk_class: None,
            session_id: None,
            job_id: None,
            auth_mode: None,
            oauth_evidence: None,
        }
    }

    fn rule(name: &str, priority: i64, effect: RuleEffect, tool_names: Vec<&str>) -> Rule {
        Rule {
            name: name.to_string(),
            priority,
            effect,
            r#match: RuleMatch { tool_names: tool_names.into_iter().map(String::from).collect(), ..Default::default() },
            reason_codes: vec!["destructive_tool_blocked".to_string()],
        }
    }

    #[test]
    fn default_allow_policy_allows_unmatched_intent() {
        let policy = Policy { default_verdict: Verdict::Allow, rules: vec![] };
        let intent = IntentBuilder::new("tool.search").context(ctx("agent-1")).build().unwrap();
        let outcome = evaluate(&policy, &intent, &EvalOptions::bare(Utc::now())).unwrap();
        assert_eq!(outcome.verdict, Verdict::Allow);
        assert!(outcome.reason_codes.is_empty());
    }

    #[test]
    fn matching_block_rule_blocks_with_reason_code() {
        let policy = Policy {
            default_verdict: Verdict::Allow,
            rules: vec![rule("no-delete", 10, RuleEffect::Block, vec!["tool.delete"])],
        };
        let intent = IntentBuilder::new("tool.delete").context(ctx("agent-1")).build().unwrap();
        let outcome = evaluate(&policy, &intent, &EvalOptions::bare(Utc::now())).unwrap();
        assert_eq!(outcome.verdict, Verdict::Block);
        assert_eq!(outcome.reason_codes, vec!["destructive_tool_blocked".to_string()]);
        assert_eq!(outcome.matched_rule.as_deref(), Some("no-delete"));
    }

    #[test]
    fn continue_effect_falls_through_to_next_rule() {
        let policy = Policy {
            default_verdict: Verdict::Allow,
            rules: vec![
                Rule {
                    name: "log-only".to_string(),
                    priority: 10,
                    effect: RuleEffect::Continue,
                    r#match: RuleMatch { tool_names: vec!["tool.delete".to_string()], ..Default::default() },
                    reason_codes: vec![],
                },
                rule("no-delete", 5, RuleEffect::Block, vec!["tool.delete"]),
            ],
        };
        let intent = IntentBuilder::new("tool.delete").context(ctx("agent-1")).build().unwrap();
        let outcome = evaluate(&policy, &intent, &EvalOptions::bare(Utc::now())).unwrap();
        assert_eq!(outcome.verdict, Verdict::Block);
    }

    #[test]
    fn priority_ties_are_broken_by_authoring_order_not_last_match() {
        let policy = Policy {
            default_verdict: Verdict::Allow,
            rules: vec![
                rule("first", 10, RuleEffect::Block, vec!["tool.x"]),
                rule("second", 10, RuleEffect::Allow, vec!["tool.x"]),
            ],
        };
        let intent = IntentBuilder::new("tool.x").context(ctx("agent-1")).build().unwrap();
        let outcome = evaluate(&policy, &intent, &EvalOptions::bare(Utc::now())).unwrap();
        assert_eq!(outcome.verdict, Verdict::Block);
        assert_eq!(outcome.matched_rule.as_deref(), Some("first"));
    }

    #[test]
    fn approval_token_satisfies_require_approval() {
        let policy = Policy { default_verdict: Verdict::RequireApproval, rules: vec![] };
        let intent = IntentBuilder::new("tool.write").context(ctx("agent-1")).build().unwrap();
        let policy_digest = policy.digest().unwrap();
        let intent_digest = intent.digest().unwrap();
        let now = Utc::now();
        let token = ApprovalToken {
            token_id: "tok-1".to_string(),
            intent_digest: intent_digest.clone(),
            policy_digest: policy_digest.clone(),
            delegation_binding_digest: None,
            scope: vec!["tool:tool.write".to_string()],
            approver_identity: "alice".to_string(),
            reason_code: "manual_review".to_string(),
            max_targets: None,
            max_ops: None,
            issued_at: now,
            expires_at: now + chrono::Duration::hours(1),
            signature: None,
        };
        let tokens = vec![token];
        let options = EvalOptions { approval_tokens: &tokens, ..EvalOptions::bare(now) };
        let outcome = evaluate(&policy, &intent, &options).unwrap();
        assert_eq!(outcome.verdict, Verdict::Allow);
        assert_eq!(outcome.context_source, VerdictSource::ApprovalToken);
    }

    #[test]
    fn approved_script_fast_path_bypasses_blocking_rule() {
        let policy = Policy {
            default_verdict: Verdict::Allow,
            rules: vec![rule("no-delete", 10, RuleEffect::Block, vec!["tool.delete"])],
        };
        let step = gait_core::ScriptStep {
            tool_name: "tool.delete".to_string(),
            args: serde_json::Value::Null,
            targets: vec![],
        };
        let intent = IntentBuilder::new("tool.script")
            .script(vec![step.clone()])
            .context(ctx("agent-1"))
            .build()
            .unwrap();
        let policy_digest = policy.digest().unwrap();
        let script_hash = gait_canon::digest(&gait_core::Script { steps: vec![step] }).unwrap();
        let mut registry = ApprovedScriptRegistry::new();
        registry.insert(ApprovedScriptEntry {
            script_hash,
            policy_digest,
            pattern_id: "pattern-1".to_string(),
            expires_at: None,
        });
        let options = EvalOptions { approved_script_registry: Some(&registry), ..EvalOptions::bare(Utc::now()) };
        let outcome = evaluate(&policy, &intent, &options).unwrap();
        assert_eq!(outcome.verdict, Verdict::Allow);
        assert!(outcome.pre_approved);
        assert_eq!(outcome.pattern_id.as_deref(), Some("pattern-1"));
    }

    #[test]
    fn emergency_stopped_job_preempts_otherwise_allowed_intent() {
        let policy = Policy { default_verdict: Verdict::Allow, rules: vec![] };
        let mut context = ctx("agent-1");
        context.job_id = Some("job-1".to_string());
        let intent = IntentBuilder::new("tool.search").context(context).build().unwrap();
        let stopped = vec!["job-1".to_string()];
        let options = EvalOptions { emergency_stopped_job_ids: &stopped, ..EvalOptions::bare(Utc::now()) };
        let outcome = evaluate(&policy, &intent, &options).unwrap();
        assert_eq!(outcome.verdict, Verdict::Block);
        assert_eq!(outcome.context_source, VerdictSource::EmergencyStopPreemption);
    }

    #[test]
    fn missing_delegation_blocks_when_required() {
        let policy = Policy {
            default_verdict: Verdict::Allow,
            rules: vec![Rule {
                name: "requires-delegation".to_string(),
                priority: 10,
                effect: RuleEffect::Allow,
                r#match: RuleMatch {
                    tool_names: vec!["tool.admin".to_string()],
                    require_delegation: true,
                    ..Default::default()
                },
                reason_codes: vec![],
            }],
        };
        let intent = IntentBuilder::new("tool.admin").context(ctx("agent-1")).build().unwrap();
        let outcome = evaluate(&policy, &intent, &EvalOptions::bare(Utc::now())).unwrap();
        assert_eq!(outcome.verdict, Verdict::Block);
        assert_eq!(outcome.reason_codes, vec!["delegation_missing".to_string()]);
    }

    #[test]
    fn composite_script_verdict_takes_worst_step() {
        let policy = Policy {
            default_verdict: Verdict::Allow,
            rules: vec![rule("no-delete", 10, RuleEffect::Block, vec!["tool.delete"])],
        };
        let intent = IntentBuilder::new("tool.script")
            .script(vec![
                gait_core::ScriptStep { tool_name: "tool.read".to_string(), args: serde_json::Value::Null, targets: vec![] },
                gait_core::ScriptStep { tool_name: "tool.delete".to_string(), args: serde_json::Value::Null, targets: vec![] },
            ])
            .context(ctx("agent-1"))
            .build()
            .unwrap();
        let outcome = evaluate(&policy, &intent, &EvalOptions::bare(Utc::now())).unwrap();
        assert_eq!(outcome.verdict, Verdict::Block);
        assert_eq!(outcome.step_verdicts.len(), 2);
    }
}
