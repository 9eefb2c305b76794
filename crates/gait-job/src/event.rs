//! The append-only event log a job's state is folded from.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Which kind of checkpoint an `add_checkpoint` event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointOutcome {
    /// The checkpoint surfaced a decision that needs approval before the
    /// job may continue.
    DecisionNeeded,
    /// The checkpoint represents the job's successful completion.
    Completed,
}

/// One durable event in a job's log. Folding a job's events in order from
/// an empty state must reconstruct its `state.json` exactly.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEventKind {
    /// Create the job, binding it to a policy and identity.
    Submit {
        /// This job's id.
        job_id: String,
        /// Digest of the policy bound at submission.
        policy_digest: String,
        /// Reference to the policy bound at submission.
        policy_ref: String,
        /// The submitting identity.
        identity: String,
        /// Opaque environment fingerprint at submission.
        environment_fingerprint: String,
    },
    /// Record a checkpoint materialized from the events folded into it.
    AddCheckpoint {
        /// Whether this checkpoint needs approval or completes the job.
        outcome: CheckpointOutcome,
        /// Path or locator of the runpack produced for this checkpoint.
        runpack_path: String,
        /// Digest of the runpack produced for this checkpoint.
        checkpoint_digest: String,
        /// First event sequence folded into this checkpoint.
        sequence_start: u64,
        /// Last event sequence folded into this checkpoint.
        sequence_end: u64,
    },
    /// Pause an actively running job.
    Pause,
    /// Approve an `awaiting_approval` checkpoint, returning the job to
    /// `paused`.
    Approve {
        /// The identity that approved.
        approver_identity: String,
    },
    /// Resume a paused job. Only ever appended after the caller's policy
    /// re-evaluation produced `allow`; a blocked resume appends no event.
    Resume {
        /// Digest of the policy supplied at resume.
        policy_digest: String,
        /// Reference to the policy supplied at resume.
        policy_ref: String,
        /// Whether `policy_digest` differs from the job's prior one.
        policy_digest_changed: bool,
    },
    /// Cancel a running or paused job.
    Cancel,
    /// Preempt the job; no further transitions are accepted afterward.
    EmergencyStop,
    /// Terminate a non-terminal job with an explicit failure.
    Fail {
        /// Machine-readable failure reason code.
        reason_code: String,
    },
}

/// A [`JobEventKind`] with its position in the log and wall-clock time.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct JobEventRecord {
    /// Strictly monotonic position in the job's event log, starting at 1.
    pub sequence: u64,
    /// When this event was appended.
    pub created_at: DateTime<Utc>,
    /// The event itself.
    #[serde(flatten)]
    pub kind: JobEventKind,
}
