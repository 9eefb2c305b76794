//! Property-based invariants spanning `gait-canon` and `gait-policy`: the
//! canonicalization and policy-evaluation purity guarantees the rest of the
//! toolchain is built on.

use chrono::{TimeZone, Utc};
use gait_core::{IntentBuilder, IntentContext, Policy, Rule, RuleEffect, RuleMatch, Verdict};
use gait_policy::{evaluate, EvalOptions};
use proptest::prelude::*;
use serde_json::json;

fn ctx(identity: &str, risk_class: Option<&str>) -> IntentContext {
    IntentContext {
        identity: identity.to_string(),
        workspace: None,
        risk_class: risk_class.map(String::from),
        session_id: None,
        job_id: None,
        auth_mode: None,
        oauth_evidence: None,
    }
}

fn blocking_policy() -> Policy {
    Policy {
        default_verdict: Verdict::Allow,
        rules: vec![Rule {
            name: "no-delete".into(),
            priority: 10,
            effect: RuleEffect::Block,
            r#match: RuleMatch { tool_names: vec!["tool.delete".into()], ..Default::default() },
            reason_codes: vec!["destructive_tool_blocked".into()],
        }],
    }
}

proptest! {
    /// Canonical JSON encoding of an object is unaffected by the order its
    /// keys were constructed in.
    #[test]
    fn canonical_json_is_key_order_invariant(a in 0i64..10_000, b in 0i64..10_000, c in 0i64..10_000) {
        let forward = json!({"a": a, "b": b, "c": c});
        let shuffled = json!({"c": c, "a": a, "b": b});
        prop_assert_eq!(
            gait_canon::canonicalize(&forward).unwrap(),
            gait_canon::canonicalize(&shuffled).unwrap()
        );
    }

    /// Evaluating the same policy and intent twice, at the same time,
    /// always produces the same verdict and reason codes: `evaluate` has
    /// no hidden state or clock dependence beyond `EvalOptions::now`.
    #[test]
    fn policy_evaluation_is_pure(tool_ordinal in 0u8..2, risk_ordinal in 0u8..2) {
        let tool_name = if tool_ordinal == 0 { "tool.delete" } else { "tool.search" };
        let risk_class = if risk_ordinal == 0 { Some("high") } else { None };
        let policy = blocking_policy();
        let intent = IntentBuilder::new(tool_name).context(ctx("agent-1", risk_class)).build().unwrap();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();

        let first = evaluate(&policy, &intent, &EvalOptions::bare(now)).unwrap();
        let second = evaluate(&policy, &intent, &EvalOptions::bare(now)).unwrap();
        prop_assert_eq!(first.verdict, second.verdict);
        prop_assert_eq!(first.reason_codes, second.reason_codes);
        prop_assert_eq!(first.matched_rule, second.matched_rule);
    }

    /// `Verdict::max` is idempotent and always returns the more severe of
    /// its two operands, regardless of argument order.
    #[test]
    fn verdict_max_is_commutative_and_returns_the_more_severe(
        a in 0u8..4, b in 0u8..4
    ) {
        let verdicts = [Verdict::Allow, Verdict::DryRun, Verdict::RequireApproval, Verdict::Block];
        let va = verdicts[a as usize];
        let vb = verdicts[b as usize];
        prop_assert_eq!(va.max(vb), vb.max(va));
        let expected = if va.severity() >= vb.severity() { va } else { vb };
        prop_assert_eq!(va.max(vb), expected);
    }
}
