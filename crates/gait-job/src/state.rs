//! The durable shape of a job: its status and the facts needed to
//! re-evaluate it on resume.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A job's lifecycle status. `Completed`, `Cancelled`, `Failed`, and
/// `EmergencyStopped` are terminal: no further event applies to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Recorded for schema parity with the job state shape; the `submit`
    /// event folds straight to `running`, so this value is never observed
    /// in a persisted state produced by [`crate::machine::fold`].
    Submitted,
    /// Actively executing.
    Running,
    /// Paused, awaiting a `resume`.
    Paused,
    /// A checkpoint requires approval before the job may continue.
    AwaitingApproval,
    /// Preempted; no further transitions are accepted.
    EmergencyStopped,
    /// Cancelled by the caller.
    Cancelled,
    /// Finished successfully.
    Completed,
    /// Terminated by an explicit failure.
    Failed,
}

impl JobStatus {
    /// Whether this status accepts no further events.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::EmergencyStopped | Self::Cancelled | Self::Completed | Self::Failed)
    }
}

/// One checkpoint recorded against a job, referencing the runpack that
/// materialized the events folded into it.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CheckpointRecord {
    /// Index of this checkpoint within the job's chain.
    pub checkpoint_index: u64,
    /// Path or locator of the runpack produced for this checkpoint.
    pub runpack_path: String,
    /// Digest of the runpack produced for this checkpoint.
    pub checkpoint_digest: String,
    /// First event sequence folded into this checkpoint.
    pub sequence_start: u64,
    /// Last event sequence folded into this checkpoint.
    pub sequence_end: u64,
}

/// The durable state of one job: `job_id, status, status_reason_code?,
/// policy_digest, policy_ref, identity, environment_fingerprint,
/// checkpoints[], latest_event_seq`. Exclusively owned by the process
/// holding `state.lock` for this job's directory.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct JobState {
    /// This job's id.
    pub job_id: String,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// Machine-readable reason for the current status, when one applies
    /// (e.g. `resumed_with_policy_transition`, a failure reason code).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_reason_code: Option<String>,
    /// Digest of the policy currently bound to this job.
    pub policy_digest: String,
    /// Reference (path or identifier) to the policy currently bound.
    pub policy_ref: String,
    /// The identity that submitted (or most recently resumed) this job.
    pub identity: String,
    /// Opaque fingerprint of the environment the job is bound to.
    pub environment_fingerprint: String,
    /// Checkpoints recorded so far, in ascending `checkpoint_index` order.
    #[serde(default)]
    pub checkpoints: Vec<CheckpointRecord>,
    /// The sequence number of the last event folded into this state.
    pub latest_event_seq: u64,
    /// Identity that approved the most recent `awaiting_approval`
    /// checkpoint, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_approval_actor: Option<String>,
    /// Creation timestamp, set at `submit`.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the last applied event.
    pub updated_at: DateTime<Utc>,
}
