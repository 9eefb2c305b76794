//! The pure event fold implementing the job state machine's transition
//! table.

use gait_error::{ErrorCode, GaitError};

use crate::event::{CheckpointOutcome, JobEventKind, JobEventRecord};
use crate::state::{CheckpointRecord, JobState, JobStatus};

fn invalid(message: impl Into<String>) -> GaitError {
    GaitError::new(ErrorCode::JobTransitionInvalid, message.into())
}

/// Apply one event to a job's prior state (`None` if the job does not yet
/// exist), enforcing the transition table and strictly monotonic
/// sequencing. Pure: the same `(state, event)` pair always folds to the
/// same result.
pub fn fold(state: Option<JobState>, event: &JobEventRecord) -> Result<JobState, GaitError> {
    let expected_seq = state.as_ref().map_or(1, |s| s.latest_event_seq + 1);
    if event.sequence != expected_seq {
        return Err(invalid(format!(
            "event sequence {} is not contiguous with expected {expected_seq}",
            event.sequence
        )));
    }

    match (&state, &event.kind) {
        (None, JobEventKind::Submit { job_id, policy_digest, policy_ref, identity, environment_fingerprint }) => {
            Ok(JobState {
                job_id: job_id.clone(),
                status: JobStatus::Running,
                status_reason_code: None,
                policy_digest: policy_digest.clone(),
                policy_ref: policy_ref.clone(),
                identity: identity.clone(),
                environment_fingerprint: environment_fingerprint.clone(),
                checkpoints: Vec::new(),
                latest_event_seq: event.sequence,
                last_approval_actor: None,
                created_at: event.created_at,
                updated_at: event.created_at,
            })
        }
        (None, other) => Err(invalid(format!("job does not exist yet, cannot apply {other:?}"))),
        (Some(_), JobEventKind::Submit { .. }) => Err(invalid("job already submitted")),
        (Some(s), _) if s.status.is_terminal() => {
            Err(invalid(format!("job is in terminal status {:?}, no further events accepted", s.status)))
        }
        (Some(s), JobEventKind::AddCheckpoint { outcome, runpack_path, checkpoint_digest, sequence_start, sequence_end }) => {
            if s.status != JobStatus::Running {
                return Err(invalid(format!("add_checkpoint requires running, job is {:?}", s.status)));
            }
            let mut next = s.clone();
            next.checkpoints.push(CheckpointRecord {
                checkpoint_index: s.checkpoints.len() as u64,
                runpack_path: runpack_path.clone(),
                checkpoint_digest: checkpoint_digest.clone(),
                sequence_start: *sequence_start,
                sequence_end: *sequence_end,
            });
            next.status = match outcome {
                CheckpointOutcome::DecisionNeeded => JobStatus::AwaitingApproval,
                CheckpointOutcome::Completed => JobStatus::Completed,
            };
            next.latest_event_seq = event.sequence;
            next.updated_at = event.created_at;
            Ok(next)
        }
        (Some(s), JobEventKind::Pause) => {
            if s.status != JobStatus::Running {
                return Err(invalid(format!("pause requires running, job is {:?}", s.status)));
            }
            Ok(with_status(s, JobStatus::Paused, None, event))
        }
        (Some(s), JobEventKind::Approve { approver_identity }) => {
            if s.status != JobStatus::AwaitingApproval {
                return Err(invalid(format!("approve requires awaiting_approval, job is {:?}", s.status)));
            }
            let mut next = with_status(s, JobStatus::Paused, None, event);
            next.last_approval_actor = Some(approver_identity.clone());
            Ok(next)
        }
        (Some(s), JobEventKind::Resume { policy_digest, policy_ref, policy_digest_changed }) => {
            if s.status != JobStatus::Paused {
                return Err(invalid(format!("resume requires paused, job is {:?}", s.status)));
            }
            let reason = policy_digest_changed.then(|| "resumed_with_policy_transition".to_string());
            let mut next = with_status(s, JobStatus::Running, reason, event);
            next.policy_digest = policy_digest.clone();
            next.policy_ref = policy_ref.clone();
            Ok(next)
        }
        (Some(s), JobEventKind::Cancel) => {
            if !matches!(s.status, JobStatus::Running | JobStatus::Paused) {
                return Err(invalid(format!("cancel requires running or paused, job is {:?}", s.status)));
            }
            Ok(with_status(s, JobStatus::Cancelled, None, event))
        }
        (Some(s), JobEventKind::EmergencyStop) => {
            if !matches!(s.status, JobStatus::Running | JobStatus::Paused | JobStatus::AwaitingApproval) {
                return Err(invalid(format!("emergency_stop requires a non-terminal status, job is {:?}", s.status)));
            }
            Ok(with_status(s, JobStatus::EmergencyStopped, None, event))
        }
        (Some(s), JobEventKind::Fail { reason_code }) => {
            Ok(with_status(s, JobStatus::Failed, Some(reason_code.clone()), event))
        }
    }
}

fn with_status(
    s: &JobState,
    status: JobStatus,
    status_reason_code: Option<String>,
    event: &JobEventRecord,
) -> JobState {
    let mut next = s.clone();
    next.status = status;
    next.status_reason_code = status_reason_code;
    next.latest_event_seq = event.sequence;
    next.updated_at = event.created_at;
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(sequence: u64, kind: JobEventKind) -> JobEventRecord {
        JobEventRecord { sequence, created_at: Utc::now(), kind }
    }

    fn submit() -> JobEventRecord {
        record(
            1,
            JobEventKind::Submit {
                job_id: "job-1".into(),
                policy_digest: "pd1".into(),
                policy_ref: "policy.yaml".into(),
                identity: "agent-1".into(),
                environment_fingerprint: "env-1".into(),
            },
        )
    }

    #[test]
    fn submit_folds_directly_to_running() {
        let state = fold(None, &submit()).unwrap();
        assert_eq!(state.status, JobStatus::Running);
        assert_eq!(state.latest_event_seq, 1);
    }

    #[test]
    fn out_of_order_sequence_is_rejected() {
        let state = fold(None, &submit()).unwrap();
        let err = fold(Some(state), &record(3, JobEventKind::Pause)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::JobTransitionInvalid);
    }

    #[test]
    fn full_happy_path_to_completion() {
        let mut state = fold(None, &submit()).unwrap();
        state = fold(Some(state), &record(2, JobEventKind::Pause)).unwrap();
        assert_eq!(state.status, JobStatus::Paused);
        state = fold(
            Some(state),
            &record(
                3,
                JobEventKind::Resume { policy_digest: "pd1".into(), policy_ref: "policy.yaml".into(), policy_digest_changed: false },
            ),
        )
        .unwrap();
        assert_eq!(state.status, JobStatus::Running);
        assert!(state.status_reason_code.is_none());
        state = fold(
            Some(state),
            &record(
                4,
                JobEventKind::AddCheckpoint {
                    outcome: CheckpointOutcome::Completed,
                    runpack_path: "checkpoints/0.zip".into(),
                    checkpoint_digest: "cd0".into(),
                    sequence_start: 1,
                    sequence_end: 4,
                },
            ),
        )
        .unwrap();
        assert_eq!(state.status, JobStatus::Completed);
        assert_eq!(state.checkpoints.len(), 1);
    }

    #[test]
    fn resume_with_changed_policy_records_reason_code() {
        let mut state = fold(None, &submit()).unwrap();
        state = fold(Some(state), &record(2, JobEventKind::Pause)).unwrap();
        state = fold(
            Some(state),
            &record(
                3,
                JobEventKind::Resume { policy_digest: "pd2".into(), policy_ref: "policy.yaml".into(), policy_digest_changed: true },
            ),
        )
        .unwrap();
        assert_eq!(state.status_reason_code.as_deref(), Some("resumed_with_policy_transition"));
        assert_eq!(state.policy_digest, "pd2");
    }

    #[test]
    fn emergency_stop_rejects_any_further_event() {
        let mut state = fold(None, &submit()).unwrap();
        state = fold(Some(state), &record(2, JobEventKind::EmergencyStop)).unwrap();
        assert_eq!(state.status, JobStatus::EmergencyStopped);
        let err = fold(Some(state), &record(3, JobEventKind::Pause)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::JobTransitionInvalid);
    }

    #[test]
    fn decision_needed_checkpoint_moves_to_awaiting_approval_then_approve_pauses() {
        let mut state = fold(None, &submit()).unwrap();
        state = fold(
            Some(state),
            &record(
                2,
                JobEventKind::AddCheckpoint {
                    outcome: CheckpointOutcome::DecisionNeeded,
                    runpack_path: "checkpoints/0.zip".into(),
                    checkpoint_digest: "cd0".into(),
                    sequence_start: 1,
                    sequence_end: 2,
                },
            ),
        )
        .unwrap();
        assert_eq!(state.status, JobStatus::AwaitingApproval);
        state = fold(Some(state), &record(3, JobEventKind::Approve { approver_identity: "reviewer-1".into() })).unwrap();
        assert_eq!(state.status, JobStatus::Paused);
        assert_eq!(state.last_approval_actor.as_deref(), Some("reviewer-1"));
    }

    #[test]
    fn fail_is_accepted_from_any_non_terminal_status() {
        let state = fold(None, &submit()).unwrap();
        let failed = fold(Some(state), &record(2, JobEventKind::Fail { reason_code: "boom".into() })).unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.status_reason_code.as_deref(), Some("boom"));
    }

    #[test]
    fn cancel_rejected_once_completed() {
        let mut state = fold(None, &submit()).unwrap();
        state = fold(
            Some(state),
            &record(
                2,
                JobEventKind::AddCheckpoint {
                    outcome: CheckpointOutcome::Completed,
                    runpack_path: "checkpoints/0.zip".into(),
                    checkpoint_digest: "cd0".into(),
                    sequence_start: 1,
                    sequence_end: 2,
                },
            ),
        )
        .unwrap();
        let err = fold(Some(state), &record(3, JobEventKind::Cancel)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::JobTransitionInvalid);
    }
}
