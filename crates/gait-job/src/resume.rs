//! Resume re-evaluation: a paused job may only return to `running` after
//! its bound intent re-evaluates to `allow` against the policy the caller
//! supplies.

use std::time::Duration;

use chrono::{DateTime, Utc};
use gait_core::{EvalOutcome, Intent, Policy, Verdict};
use gait_error::{ErrorCode, GaitError};
use gait_lock::LockManager;
use gait_policy::EvalOptions;

use crate::event::JobEventKind;
use crate::state::{JobState, JobStatus};
use crate::store::JobStore;

/// The result of a resume attempt.
#[derive(Debug, Clone)]
pub enum ResumeOutcome {
    /// The job re-evaluated to `allow` and is now `running`.
    Resumed(JobState),
    /// Resume was refused; the job remains `paused` (or stays
    /// `emergency_stopped` if that preempted the attempt) and no event was
    /// appended.
    Blocked {
        /// One of `policy_regression`, `identity_revoked`,
        /// `environment_fingerprint_changed`, `identity_binding_mismatch`,
        /// `approval_required`, `resume_blocked_emergency_stop`.
        reason_code: String,
    },
}

/// Caller-supplied facts about the current invocation context, checked
/// against the job's persisted identity/environment binding before the
/// policy re-evaluation runs. The revocation list and fingerprint
/// whitelist are owned by the caller (gait-job has no registry of its own).
#[derive(Debug, Clone, Default)]
pub struct ResumeContext {
    /// The environment fingerprint observed at resume time.
    pub environment_fingerprint: String,
    /// Whether the job's bound identity has been revoked since submission.
    pub identity_revoked: bool,
    /// Fingerprints allowed to differ from the job's bound one without
    /// blocking resume.
    pub fingerprint_whitelist: Vec<String>,
}

impl ResumeContext {
    /// Whether `environment_fingerprint` differs from `bound` and is not
    /// covered by the whitelist.
    #[must_use]
    fn fingerprint_changed_and_not_whitelisted(&self, bound: &str) -> bool {
        self.environment_fingerprint != bound
            && !self.fingerprint_whitelist.iter().any(|w| w == &self.environment_fingerprint)
    }
}

/// Attempt to resume a paused job: first check the job's identity/
/// environment binding against `resume_context`, then re-evaluate `intent`
/// against `policy`, and only append a `resume` event (returning it to
/// `running`) if both checks pass. A blocked resume leaves the job's
/// persisted state untouched.
#[allow(clippy::too_many_arguments)]
pub fn resume(
    store: &JobStore,
    lock_manager: &dyn LockManager,
    lock_timeout: Duration,
    policy: &Policy,
    policy_ref: &str,
    intent: &Intent,
    eval_options: &EvalOptions,
    resume_context: &ResumeContext,
    now: DateTime<Utc>,
) -> Result<ResumeOutcome, GaitError> {
    let state = store
        .load_state()?
        .ok_or_else(|| GaitError::new(ErrorCode::JobTransitionInvalid, "job does not exist"))?;

    if state.status == JobStatus::EmergencyStopped {
        return Ok(ResumeOutcome::Blocked { reason_code: "resume_blocked_emergency_stop".to_string() });
    }
    if state.status != JobStatus::Paused {
        return Err(GaitError::new(
            ErrorCode::JobTransitionInvalid,
            format!("resume requires paused, job is {:?}", state.status),
        ));
    }

    if resume_context.identity_revoked {
        return Ok(ResumeOutcome::Blocked { reason_code: "identity_revoked".to_string() });
    }
    if resume_context.fingerprint_changed_and_not_whitelisted(&state.environment_fingerprint) {
        return Ok(ResumeOutcome::Blocked { reason_code: "environment_fingerprint_changed".to_string() });
    }

    let policy_digest = policy.digest()?;
    let outcome = gait_policy::evaluate(policy, intent, eval_options)?;
    if outcome.verdict != Verdict::Allow {
        return Ok(ResumeOutcome::Blocked { reason_code: resume_block_reason(&outcome) });
    }

    let policy_digest_changed = policy_digest != state.policy_digest;
    let kind = JobEventKind::Resume { policy_digest, policy_ref: policy_ref.to_string(), policy_digest_changed };
    let next = store.apply(lock_manager, lock_timeout, kind, now)?;
    Ok(ResumeOutcome::Resumed(next))
}

/// Map a blocked re-evaluation outcome to one of resume's documented
/// reason codes, preferring `identity_binding_mismatch` when the policy
/// evaluation surfaced one (delegation-chain identity checks live in
/// `gait-policy`, not here).
fn resume_block_reason(outcome: &EvalOutcome) -> String {
    for code in &outcome.reason_codes {
        if code == "identity_binding_mismatch" {
            return code.clone();
        }
    }
    if outcome.verdict == Verdict::RequireApproval {
        return "approval_required".to_string();
    }
    "policy_regression".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gait_core::{IntentBuilder, IntentContext, Rule, RuleEffect, RuleMatch};
    use gait_lock::InMemoryLockManager;

    fn ctx() -> IntentContext {
        IntentContext {
            identity: "agent-1".into(),
            workspace: None,
            risk_class: None,
            session_id: None,
            job_id: Some("job-1".into()),
            auth_mode: None,
            oauth_evidence: None,
        }
    }

    fn allow_policy() -> Policy {
        Policy { default_verdict: Verdict::Allow, rules: vec![] }
    }

    fn block_policy() -> Policy {
        Policy {
            default_verdict: Verdict::Allow,
            rules: vec![Rule {
                name: "deny-all".into(),
                priority: 10,
                effect: RuleEffect::Block,
                r#match: RuleMatch::default(),
                reason_codes: vec!["policy_regression".into()],
            }],
        }
    }

    fn paused_store() -> (tempfile::TempDir, JobStore, InMemoryLockManager) {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::open(dir.path().join("job-1"));
        let lock_manager = InMemoryLockManager::new();
        let policy_digest = allow_policy().digest().unwrap();
        store
            .apply(
                &lock_manager,
                Duration::from_millis(50),
                JobEventKind::Submit {
                    job_id: "job-1".into(),
                    policy_digest,
                    policy_ref: "policy.yaml".into(),
                    identity: "agent-1".into(),
                    environment_fingerprint: "env-1".into(),
                },
                Utc::now(),
            )
            .unwrap();
        store.apply(&lock_manager, Duration::from_millis(50), JobEventKind::Pause, Utc::now()).unwrap();
        (dir, store, lock_manager)
    }

    fn same_env_context() -> ResumeContext {
        ResumeContext { environment_fingerprint: "env-1".into(), identity_revoked: false, fingerprint_whitelist: vec![] }
    }

    #[test]
    fn resume_succeeds_and_returns_to_running() {
        let (_dir, store, lock_manager) = paused_store();
        let policy = allow_policy();
        let intent = IntentBuilder::new("tool.search").context(ctx()).build().unwrap();
        let outcome = resume(
            &store,
            &lock_manager,
            Duration::from_millis(50),
            &policy,
            "policy.yaml",
            &intent,
            &EvalOptions::bare(Utc::now()),
            &same_env_context(),
            Utc::now(),
        )
        .unwrap();
        match outcome {
            ResumeOutcome::Resumed(state) => {
                assert_eq!(state.status, JobStatus::Running);
                assert!(state.status_reason_code.is_none());
            }
            ResumeOutcome::Blocked { reason_code } => panic!("unexpected block: {reason_code}"),
        }
    }

    #[test]
    fn resume_records_policy_transition_when_digest_changes() {
        let (_dir, store, lock_manager) = paused_store();
        let mut policy = allow_policy();
        policy.rules.push(Rule {
            name: "noop".into(),
            priority: 0,
            effect: RuleEffect::Continue,
            r#match: RuleMatch::default(),
            reason_codes: vec![],
        });
        let intent = IntentBuilder::new("tool.search").context(ctx()).build().unwrap();
        let outcome = resume(
            &store,
            &lock_manager,
            Duration::from_millis(50),
            &policy,
            "policy.yaml",
            &intent,
            &EvalOptions::bare(Utc::now()),
            &same_env_context(),
            Utc::now(),
        )
        .unwrap();
        match outcome {
            ResumeOutcome::Resumed(state) => {
                assert_eq!(state.status_reason_code.as_deref(), Some("resumed_with_policy_transition"));
            }
            ResumeOutcome::Blocked { reason_code } => panic!("unexpected block: {reason_code}"),
        }
    }

    #[test]
    fn resume_blocked_by_policy_regression_leaves_job_paused() {
        let (_dir, store, lock_manager) = paused_store();
        let policy = block_policy();
        let intent = IntentBuilder::new("tool.search").context(ctx()).build().unwrap();
        let outcome = resume(
            &store,
            &lock_manager,
            Duration::from_millis(50),
            &policy,
            "policy.yaml",
            &intent,
            &EvalOptions::bare(Utc::now()),
            &same_env_context(),
            Utc::now(),
        )
        .unwrap();
        match outcome {
            ResumeOutcome::Blocked { reason_code } => assert_eq!(reason_code, "policy_regression"),
            ResumeOutcome::Resumed(_) => panic!("expected resume to be blocked"),
        }
        assert_eq!(store.load_state().unwrap().unwrap().status, JobStatus::Paused);
    }

    #[test]
    fn resume_blocked_on_emergency_stopped_job() {
        let (_dir, store, lock_manager) = paused_store();
        store.apply(&lock_manager, Duration::from_millis(50), JobEventKind::EmergencyStop, Utc::now()).unwrap();
        let policy = allow_policy();
        let intent = IntentBuilder::new("tool.search").context(ctx()).build().unwrap();
        let outcome = resume(
            &store,
            &lock_manager,
            Duration::from_millis(50),
            &policy,
            "policy.yaml",
            &intent,
            &EvalOptions::bare(Utc::now()),
            &same_env_context(),
            Utc::now(),
        )
        .unwrap();
        match outcome {
            ResumeOutcome::Blocked { reason_code } => assert_eq!(reason_code, "resume_blocked_emergency_stop"),
            ResumeOutcome::Resumed(_) => panic!("expected resume to be blocked"),
        }
    }

    #[test]
    fn resume_blocked_when_identity_revoked() {
        let (_dir, store, lock_manager) = paused_store();
        let policy = allow_policy();
        let intent = IntentBuilder::new("tool.search").context(ctx()).build().unwrap();
        let revoked = ResumeContext { identity_revoked: true, ..same_env_context() };
        let outcome = resume(
            &store,
            &lock_manager,
            Duration::from_millis(50),
            &policy,
            "policy.yaml",
            &intent,
            &EvalOptions::bare(Utc::now()),
            &revoked,
            Utc::now(),
        )
        .unwrap();
        match outcome {
            ResumeOutcome::Blocked { reason_code } => assert_eq!(reason_code, "identity_revoked"),
            ResumeOutcome::Resumed(_) => panic!("expected resume to be blocked"),
        }
        assert_eq!(store.load_state().unwrap().unwrap().status, JobStatus::Paused);
    }

    #[test]
    fn resume_blocked_when_environment_fingerprint_changed_and_not_whitelisted() {
        let (_dir, store, lock_manager) = paused_store();
        let policy = allow_policy();
        let intent = IntentBuilder::new("tool.search").context(ctx()).build().unwrap();
        let changed = ResumeContext {
            environment_fingerprint: "env-2".into(),
            identity_revoked: false,
            fingerprint_whitelist: vec![],
        };
        let outcome = resume(
            &store,
            &lock_manager,
            Duration::from_millis(50),
            &policy,
            "policy.yaml",
            &intent,
            &EvalOptions::bare(Utc::now()),
            &changed,
            Utc::now(),
        )
        .unwrap();
        match outcome {
            ResumeOutcome::Blocked { reason_code } => assert_eq!(reason_code, "environment_fingerprint_changed"),
            ResumeOutcome::Resumed(_) => panic!("expected resume to be blocked"),
        }
    }

    #[test]
    fn resume_allowed_when_environment_fingerprint_changed_but_whitelisted() {
        let (_dir, store, lock_manager) = paused_store();
        let policy = allow_policy();
        let intent = IntentBuilder::new("tool.search").context(ctx()).build().unwrap();
        let whitelisted = ResumeContext {
            environment_fingerprint: "env-2".into(),
            identity_revoked: false,
            fingerprint_whitelist: vec!["env-2".into()],
        };
        let outcome = resume(
            &store,
            &lock_manager,
            Duration::from_millis(50),
            &policy,
            "policy.yaml",
            &intent,
            &EvalOptions::bare(Utc::now()),
            &whitelisted,
            Utc::now(),
        )
        .unwrap();
        match outcome {
            ResumeOutcome::Resumed(state) => assert_eq!(state.status, JobStatus::Running),
            ResumeOutcome::Blocked { reason_code } => panic!("unexpected block: {reason_code}"),
        }
    }
}
