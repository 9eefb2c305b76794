//! Per-job durable storage: `state.json`, append-only `events.jsonl`, and
//! the `state.lock` advisory lock guarding both.
//!
//! Every mutation follows the same discipline: acquire the lock, append
//! the event, atomically replace the cached state (write temp, fsync,
//! rename), release the lock. `state.json` is a materialized cache of
//! folding `events.jsonl`; [`JobStore::rebuild_from_events`] recomputes it
//! from scratch and is the ground truth the cache is checked against.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write as _};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use gait_error::{ErrorCode, GaitError};
use gait_lock::LockManager;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::event::{JobEventKind, JobEventRecord};
use crate::machine;
use crate::state::JobState;

const STATE_SCHEMA_VERSION: u32 = 1;
const LOCK_KEY: &str = "state";

/// The cached `state.json` envelope: a schema version plus an integrity
/// hash over the state payload, checked on every load.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct StateEnvelope {
    schema_version: u32,
    integrity_sha256: String,
    state: JobState,
}

/// A job's on-disk directory: `events.jsonl` plus the `state.json` cache
/// folded from it.
#[derive(Debug, Clone)]
pub struct JobStore {
    dir: PathBuf,
}

impl JobStore {
    /// Open (without creating) the job directory at `dir`.
    #[must_use]
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The job's directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn events_path(&self) -> PathBuf {
        self.dir.join("events.jsonl")
    }

    fn state_path(&self) -> PathBuf {
        self.dir.join("state.json")
    }

    /// Read every event in the log, in sequence order.
    pub fn read_events(&self) -> Result<Vec<JobEventRecord>, GaitError> {
        let path = self.events_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = std::fs::File::open(&path)?;
        let reader = BufReader::new(file);
        let mut events = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: JobEventRecord = serde_json::from_str(&line)
                .map_err(|e| GaitError::new(ErrorCode::SchemaInvalid, format!("failed to decode job event: {e}")))?;
            events.push(record);
        }
        Ok(events)
    }

    /// Recompute the job's state by folding `events.jsonl` from empty,
    /// ignoring any cached `state.json`. Property: this always agrees with
    /// [`JobStore::load_state`] when the cache is uncorrupted.
    pub fn rebuild_from_events(&self) -> Result<Option<JobState>, GaitError> {
        let mut state = None;
        for record in self.read_events()? {
            state = Some(machine::fold(state, &record)?);
        }
        Ok(state)
    }

    /// Load the cached state, verifying its integrity hash. Returns `None`
    /// if the job does not exist yet.
    pub fn load_state(&self) -> Result<Option<JobState>, GaitError> {
        let path = self.state_path();
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)?;
        let envelope: StateEnvelope = serde_json::from_slice(&bytes)
            .map_err(|e| GaitError::new(ErrorCode::SchemaInvalid, format!("failed to decode job state: {e}")))?;
        if envelope.schema_version != STATE_SCHEMA_VERSION {
            return Err(GaitError::new(
                ErrorCode::SchemaInvalid,
                format!("job state schema version {} unsupported, expected {STATE_SCHEMA_VERSION}", envelope.schema_version),
            ));
        }
        let computed = gait_canon::digest(&envelope.state)?;
        if computed != envelope.integrity_sha256 {
            return Err(GaitError::new(ErrorCode::ManifestHashMismatch, "job state integrity check failed"));
        }
        Ok(Some(envelope.state))
    }

    /// Apply one event under `lock_manager`'s advisory lock: append it to
    /// `events.jsonl`, fold it against the current cached state, and
    /// atomically persist the result to `state.json`.
    #[tracing::instrument(skip(self, lock_manager, kind), fields(dir = %self.dir.display()))]
    pub fn apply(
        &self,
        lock_manager: &dyn LockManager,
        lock_timeout: Duration,
        kind: JobEventKind,
        now: DateTime<Utc>,
    ) -> Result<JobState, GaitError> {
        std::fs::create_dir_all(&self.dir)?;
        let _guard = lock_manager.acquire(LOCK_KEY, lock_timeout)?;
        let current = self.load_state()?;
        let sequence = current.as_ref().map_or(1, |s| s.latest_event_seq + 1);
        let record = JobEventRecord { sequence, created_at: now, kind };
        let next = machine::fold(current, &record)?;
        append_event_line(&self.events_path(), &record)?;
        persist_state(&self.state_path(), &next)?;
        tracing::info!(job_id = %next.job_id, status = ?next.status, sequence, "applied job event");
        Ok(next)
    }
}

fn append_event_line(path: &Path, record: &JobEventRecord) -> Result<(), GaitError> {
    let line = serde_json::to_string(record)
        .map_err(|e| GaitError::new(ErrorCode::SchemaInvalid, format!("failed to encode job event: {e}")))?;
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")?;
    file.sync_all()?;
    Ok(())
}

fn persist_state(path: &Path, state: &JobState) -> Result<(), GaitError> {
    let integrity_sha256 = gait_canon::digest(state)?;
    let envelope = StateEnvelope { schema_version: STATE_SCHEMA_VERSION, integrity_sha256, state: state.clone() };
    let bytes = serde_json::to_vec_pretty(&envelope)
        .map_err(|e| GaitError::new(ErrorCode::SchemaInvalid, format!("failed to encode job state: {e}")))?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(&bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(path)
        .map_err(|e| GaitError::new(ErrorCode::Io, format!("failed to persist job state to {}: {e}", path.display())))?;
    Ok(())
}
