//! The append-only session journal and its checkpoint chain.
//!
//! Every tool-call evaluation within a session appends one [`SessionEvent`]
//! to an append-only JSONL file. Periodically that journal is checkpointed:
//! the events since the last checkpoint are materialized into a runpack,
//! and a [`Checkpoint`] recording that runpack's digest is appended to the
//! session chain, each linked to its predecessor by
//! `prev_checkpoint_digest`.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write as _};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use gait_core::Verdict;
use gait_error::{ErrorCode, GaitError};
use gait_lock::LockManager;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::writer::RunpackArtifact;

/// One journaled tool-call evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SessionEvent {
    /// Monotone sequence number, starting at 1.
    pub sequence: u64,
    /// UTC timestamp this event was recorded.
    pub created_at: DateTime<Utc>,
    /// The tool invoked.
    pub tool_name: String,
    /// The evaluation verdict.
    pub verdict: Verdict,
    /// Digest of the evaluated intent.
    pub intent_digest: String,
    /// Digest of the policy evaluated against.
    pub policy_digest: String,
    /// The trace id emitted for this evaluation, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

/// An append-only JSONL session journal.
#[derive(Debug, Clone)]
pub struct SessionJournal {
    path: PathBuf,
}

impl SessionJournal {
    /// Open (without creating) the journal at `path`.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append `event`, requiring its sequence to be exactly one greater
    /// than the journal's current last sequence (or 1, for an empty/absent
    /// journal).
    pub fn append(&self, event: &SessionEvent) -> Result<(), GaitError> {
        let expected = self.last_sequence()?.map_or(1, |s| s + 1);
        if event.sequence != expected {
            return Err(GaitError::new(
                ErrorCode::SchemaInvalid,
                format!("session event sequence must be {expected}, got {}", event.sequence),
            ));
        }
        let line = serde_json::to_string(event)
            .map_err(|e| GaitError::new(ErrorCode::SchemaInvalid, format!("failed to encode session event: {e}")))?;
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{line}")?;
        file.sync_all()?;
        Ok(())
    }

    /// Read every event in the journal, in sequence order.
    pub fn read_all(&self) -> Result<Vec<SessionEvent>, GaitError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = std::fs::File::open(&self.path)?;
        let reader = BufReader::new(file);
        let mut events = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let event: SessionEvent = serde_json::from_str(&line).map_err(|e| {
                GaitError::new(ErrorCode::SchemaInvalid, format!("failed to decode session event: {e}"))
            })?;
            events.push(event);
        }
        Ok(events)
    }

    /// Read every event with `sequence > after`.
    pub fn read_since(&self, after: u64) -> Result<Vec<SessionEvent>, GaitError> {
        Ok(self.read_all()?.into_iter().filter(|e| e.sequence > after).collect())
    }

    /// The highest recorded sequence number, or `None` if the journal is
    /// empty or absent.
    pub fn last_sequence(&self) -> Result<Option<u64>, GaitError> {
        Ok(self.read_all()?.last().map(|e| e.sequence))
    }

    /// Total size in bytes of the journal file, or 0 if absent.
    pub fn byte_len(&self) -> Result<u64, GaitError> {
        match std::fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// The journal's path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// One entry in a session's checkpoint chain.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Checkpoint {
    /// Position of this checkpoint within the chain, starting at 0.
    pub checkpoint_index: u64,
    /// Path to the runpack this checkpoint materialized.
    pub runpack_path: String,
    /// First sequence number (inclusive) covered by this checkpoint.
    pub sequence_start: u64,
    /// Last sequence number (inclusive) covered by this checkpoint.
    pub sequence_end: u64,
    /// Digest binding this checkpoint to its runpack and predecessor.
    pub checkpoint_digest: String,
    /// The previous checkpoint's digest, or `None` for the first entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_checkpoint_digest: Option<String>,
}

/// `digest({runpack_manifest_digest, sequence_start, sequence_end,
/// prev_checkpoint_digest})`.
pub fn compute_checkpoint_digest(
    runpack_manifest_digest: &str,
    sequence_start: u64,
    sequence_end: u64,
    prev_checkpoint_digest: Option<&str>,
) -> Result<String, GaitError> {
    let value = serde_json::json!({
        "runpack_manifest_digest": runpack_manifest_digest,
        "sequence_start": sequence_start,
        "sequence_end": sequence_end,
        "prev_checkpoint_digest": prev_checkpoint_digest,
    });
    gait_canon::digest(&value)
}

/// A session's checkpoint chain, persisted as a single JSON array.
#[derive(Debug, Clone)]
pub struct SessionChain {
    path: PathBuf,
}

impl SessionChain {
    /// Open (without creating) the chain file at `path`.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load every checkpoint, in chain order.
    pub fn load(&self) -> Result<Vec<Checkpoint>, GaitError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let bytes = std::fs::read(&self.path)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| GaitError::new(ErrorCode::SchemaInvalid, format!("failed to decode session chain: {e}")))
    }

    /// The checkpoint with the largest `checkpoint_index`, if any.
    pub fn latest(&self) -> Result<Option<Checkpoint>, GaitError> {
        Ok(self.load()?.into_iter().max_by_key(|c| c.checkpoint_index))
    }

    /// Validate `checkpoint` against the current chain (contiguous,
    /// non-overlapping sequence ranges; correctly linked
    /// `prev_checkpoint_digest`) and append it.
    pub fn append(&self, checkpoint: Checkpoint) -> Result<(), GaitError> {
        let mut chain = self.load()?;
        let expected_index = chain.len() as u64;
        if checkpoint.checkpoint_index != expected_index {
            return Err(GaitError::new(
                ErrorCode::ChainBrokenLink,
                format!("expected checkpoint_index {expected_index}, got {}", checkpoint.checkpoint_index),
            ));
        }
        match chain.last() {
            Some(prev) => {
                if checkpoint.sequence_start != prev.sequence_end + 1 {
                    return Err(GaitError::new(
                        ErrorCode::ChainBrokenLink,
                        "checkpoint sequence range is not contiguous with its predecessor",
                    ));
                }
                if checkpoint.prev_checkpoint_digest.as_deref() != Some(prev.checkpoint_digest.as_str()) {
                    return Err(GaitError::new(
                        ErrorCode::ChainBrokenLink,
                        "checkpoint prev_checkpoint_digest does not match the chain's last entry",
                    ));
                }
            }
            None => {
                if checkpoint.sequence_start != 1 {
                    return Err(GaitError::new(
                        ErrorCode::ChainBrokenLink,
                        "the first checkpoint must start at sequence 1",
                    ));
                }
                if checkpoint.prev_checkpoint_digest.is_some() {
                    return Err(GaitError::new(
                        ErrorCode::ChainBrokenLink,
                        "the first checkpoint must not carry a prev_checkpoint_digest",
                    ));
                }
            }
        }
        if checkpoint.sequence_end < checkpoint.sequence_start {
            return Err(GaitError::new(ErrorCode::ChainBrokenLink, "checkpoint sequence_end precedes sequence_start"));
        }
        chain.push(checkpoint);
        let bytes = serde_json::to_vec_pretty(&chain)
            .map_err(|e| GaitError::new(ErrorCode::SchemaInvalid, format!("failed to encode session chain: {e}")))?;
        atomic_write(&self.path, &bytes)
    }

    /// Walk the full chain, checking digest linkage and sequence
    /// contiguity end-to-end (used by offline verification, which also
    /// re-verifies each referenced runpack independently).
    pub fn verify_links(&self) -> Result<(), GaitError> {
        let chain = self.load()?;
        for (i, checkpoint) in chain.iter().enumerate() {
            if checkpoint.checkpoint_index != i as u64 {
                return Err(GaitError::new(ErrorCode::ChainBrokenLink, format!("checkpoint at position {i} has out-of-order checkpoint_index")));
            }
            if i == 0 {
                if checkpoint.prev_checkpoint_digest.is_some() {
                    return Err(GaitError::new(ErrorCode::ChainBrokenLink, "first checkpoint must not reference a predecessor"));
                }
                continue;
            }
            let prev = &chain[i - 1];
            if checkpoint.sequence_start != prev.sequence_end + 1 {
                return Err(GaitError::new(ErrorCode::ChainBrokenLink, format!("checkpoint {i} sequence range is not contiguous")));
            }
            if checkpoint.prev_checkpoint_digest.as_deref() != Some(prev.checkpoint_digest.as_str()) {
                return Err(GaitError::new(ErrorCode::ChainBrokenLink, format!("checkpoint {i} prev_checkpoint_digest link is broken")));
            }
        }
        Ok(())
    }
}

fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), GaitError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(path)
        .map_err(|e| GaitError::new(ErrorCode::Io, format!("failed to persist {}: {e}", path.display())))?;
    Ok(())
}

/// A dry-run compaction report: what compacting the journal down to the
/// tail past the last checkpoint would look like, without mutating state.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CompactionReport {
    /// Number of events in the journal before compaction.
    pub events_before: usize,
    /// Number of events that would remain after compaction.
    pub events_after: usize,
    /// Journal size in bytes before compaction.
    pub bytes_before: u64,
    /// Estimated journal size in bytes after compaction.
    pub bytes_after: u64,
    /// Number of checkpoints in the chain.
    pub checkpoints: usize,
}

/// Report what compacting `journal` against `chain` would do, without
/// mutating either.
pub fn compaction_dry_run(journal: &SessionJournal, chain: &SessionChain) -> Result<CompactionReport, GaitError> {
    let events = journal.read_all()?;
    let checkpoints = chain.load()?;
    let last_checkpoint_seq_end = checkpoints.last().map_or(0, |c| c.sequence_end);
    let retained: Vec<&SessionEvent> = events.iter().filter(|e| e.sequence > last_checkpoint_seq_end).collect();
    let bytes_before = journal.byte_len()?;
    let mut bytes_after = 0u64;
    for event in &retained {
        let line = serde_json::to_string(event)
            .map_err(|e| GaitError::new(ErrorCode::SchemaInvalid, format!("failed to encode session event: {e}")))?;
        bytes_after += line.len() as u64 + 1;
    }
    Ok(CompactionReport {
        events_before: events.len(),
        events_after: retained.len(),
        bytes_before,
        bytes_after,
        checkpoints: checkpoints.len(),
    })
}

/// Checkpoint `journal` against `chain` under `lock_manager`'s advisory
/// lock keyed by `lock_key`: read events since the chain's last
/// checkpoint, hand them to `build_runpack` to materialize into a runpack,
/// write that runpack to `runpack_path`, and append the resulting
/// [`Checkpoint`] to the chain. Fails without mutating state if there are
/// no new events to checkpoint.
#[tracing::instrument(skip(lock_manager, journal, chain, build_runpack), fields(lock_key, runpack_path = %runpack_path.display()))]
pub fn create_checkpoint(
    lock_manager: &dyn LockManager,
    lock_key: &str,
    lock_timeout: Duration,
    journal: &SessionJournal,
    chain: &SessionChain,
    runpack_path: &Path,
    build_runpack: impl FnOnce(&[SessionEvent]) -> Result<RunpackArtifact, GaitError>,
) -> Result<Checkpoint, GaitError> {
    let _guard = lock_manager.acquire(lock_key, lock_timeout)?;
    let last = chain.latest()?;
    let sequence_start = last.as_ref().map_or(1, |c| c.sequence_end + 1);
    let events = journal.read_since(sequence_start.saturating_sub(1))?;
    if events.is_empty() {
        tracing::debug!("no new events to checkpoint");
        return Err(GaitError::new(ErrorCode::Internal, "no new events since the last checkpoint"));
    }
    let sequence_end = events.last().map(|e| e.sequence).unwrap_or(sequence_start);
    let artifact = build_runpack(&events)?;
    artifact.write_to(runpack_path)?;

    let checkpoint_digest = compute_checkpoint_digest(
        &artifact.manifest.manifest_digest,
        sequence_start,
        sequence_end,
        last.as_ref().map(|c| c.checkpoint_digest.as_str()),
    )?;
    let checkpoint = Checkpoint {
        checkpoint_index: last.as_ref().map_or(0, |c| c.checkpoint_index + 1),
        runpack_path: runpack_path.display().to_string(),
        sequence_start,
        sequence_end,
        checkpoint_digest,
        prev_checkpoint_digest: last.map(|c| c.checkpoint_digest),
    };
    chain.append(checkpoint.clone())?;
    tracing::info!(
        checkpoint_index = checkpoint.checkpoint_index,
        sequence_start,
        sequence_end,
        "appended session checkpoint"
    );
    Ok(checkpoint)
}
