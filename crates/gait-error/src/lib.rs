// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Unified error envelope shared by every crate in this workspace.
//!
//! All fallible public APIs return `Result<T, GaitError>` (or a crate-local
//! error that converts into it at the boundary). A [`GaitError`] is never
//! used to carry a policy [`Verdict`](https://docs.rs/gait-core) value:
//! `policy_blocked` and `approval_required` are ordinary successful results,
//! not exceptions.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Broad failure category, mirroring the outward-facing exit code taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// The request was malformed or violated a documented precondition.
    InvalidInput,
    /// A signature, manifest, or chain check failed.
    VerificationFailed,
    /// Policy evaluation produced a `block` verdict.
    PolicyBlocked,
    /// Policy evaluation requires an approval token that was not supplied
    /// or did not satisfy the request.
    ApprovalRequired,
    /// A required key, schema asset, or registry entry is absent.
    DependencyMissing,
    /// I/O, lock, or other unexpected failure. State is left consistent.
    Internal,
    /// Lock acquisition failed within the allotted timeout.
    StateContention,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InvalidInput => "invalid_input",
            Self::VerificationFailed => "verification_failed",
            Self::PolicyBlocked => "policy_blocked",
            Self::ApprovalRequired => "approval_required",
            Self::DependencyMissing => "dependency_missing",
            Self::Internal => "internal_failure",
            Self::StateContention => "state_contention",
        };
        f.write_str(s)
    }
}

/// Stable, catalog-wide error code. Every variant maps to exactly one
/// [`ErrorCategory`] via [`ErrorCode::category`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// A record failed schema or shape validation.
    SchemaInvalid,
    /// A script intent had no steps.
    EmptyScript,
    /// A job event was applied to a state that does not accept it (e.g.
    /// `resume` while not `paused`, any event after a terminal state).
    JobTransitionInvalid,
    /// Policy YAML contained an unknown field.
    PolicyUnknownField,
    /// A policy or intent digest did not match its expected value.
    DigestMismatch,
    /// A signature failed to verify.
    SignatureInvalid,
    /// A manifest listed a file whose hash does not match its contents.
    ManifestHashMismatch,
    /// A say token's bound call id or turn index does not match the
    /// evaluation context it is presented against.
    SayTokenCallMismatch,
    /// A session checkpoint chain link is broken.
    ChainBrokenLink,
    /// A verifiable bundle is missing a file its manifest references.
    ManifestFileMissing,
    /// Policy evaluation yielded `block`.
    PolicyBlocked,
    /// Policy evaluation yielded `require_approval` and no token satisfied it.
    ApprovalRequired,
    /// A presented token (approval, delegation, or say) has passed its
    /// `expires_at`.
    TokenExpired,
    /// A presented token's scope does not cover the requested operation.
    TokenScopeInsufficient,
    /// A referenced job is in `emergency_stopped` and preempts the request.
    EmergencyStopPreempted,
    /// A required signing or verification key source was not configured.
    KeySourceMissing,
    /// A referenced approved-script or delegation registry entry is absent.
    RegistryEntryMissing,
    /// An advisory lock could not be acquired before its timeout elapsed.
    LockContention,
    /// Underlying I/O failure.
    Io,
    /// An invariant was violated that indicates a programming error rather
    /// than bad input.
    Internal,
}

impl ErrorCode {
    /// The [`ErrorCategory`] this code belongs to.
    #[must_use]
    pub fn category(self) -> ErrorCategory {
        use ErrorCategory as C;
        match self {
            Self::SchemaInvalid
            | Self::EmptyScript
            | Self::PolicyUnknownField
            | Self::JobTransitionInvalid => C::InvalidInput,
            Self::DigestMismatch
            | Self::SignatureInvalid
            | Self::ManifestHashMismatch
            | Self::SayTokenCallMismatch
            | Self::ChainBrokenLink
            | Self::ManifestFileMissing => C::VerificationFailed,
            Self::PolicyBlocked | Self::EmergencyStopPreempted => C::PolicyBlocked,
            Self::ApprovalRequired | Self::TokenExpired | Self::TokenScopeInsufficient => {
                C::ApprovalRequired
            }
            Self::KeySourceMissing | Self::RegistryEntryMissing => C::DependencyMissing,
            Self::LockContention => C::StateContention,
            Self::Io | Self::Internal => C::Internal,
        }
    }

    /// The exit code the process adapter should return for this code.
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self.category() {
            ErrorCategory::InvalidInput => 2,
            ErrorCategory::VerificationFailed => 3,
            ErrorCategory::PolicyBlocked => 4,
            ErrorCategory::ApprovalRequired => 5,
            ErrorCategory::DependencyMissing => 6,
            ErrorCategory::Internal => 10,
            ErrorCategory::StateContention => 10,
        }
    }

    /// Whether callers may reasonably retry the operation unchanged.
    #[must_use]
    pub fn default_retryable(self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::StateContention | ErrorCategory::Internal
        )
    }
}

/// The error type returned by every fallible public function in this
/// workspace.
#[derive(Debug, Serialize, Deserialize)]
pub struct GaitError {
    code: ErrorCode,
    message: String,
    retryable: bool,
    hint: Option<String>,
    correlation_id: Option<String>,
    #[serde(skip)]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
    #[serde(default)]
    context: BTreeMap<String, serde_json::Value>,
}

impl GaitError {
    /// Build a new error with the default retryability for `code`.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            retryable: code.default_retryable(),
            message: message.into(),
            hint: None,
            correlation_id: None,
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach an operator-facing hint.
    #[must_use]
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach a correlation id for cross-artifact log tracing.
    #[must_use]
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Override the default retryability.
    #[must_use]
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Attach a chained source error.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Attach a structured context value, following the same
    /// accumulate-as-you-go pattern used for diagnostics elsewhere in this
    /// workspace.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// This error's stable code.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// This error's category, shorthand for `code().category()`.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    /// Whether the caller may retry.
    #[must_use]
    pub fn retryable(&self) -> bool {
        self.retryable
    }

    /// The human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The operator-facing hint, if any.
    #[must_use]
    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    /// The correlation id, if any.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }
}

impl fmt::Display for GaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.code, self.message)?;
        if !self.context.is_empty() {
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for GaitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<std::io::Error> for GaitError {
    fn from(err: std::io::Error) -> Self {
        GaitError::new(ErrorCode::Io, err.to_string()).with_source(err)
    }
}

/// Serializable snapshot of a [`GaitError`] for cross-process propagation,
/// used where the source chain (not serializable) must be dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GaitErrorDto {
    /// Stable error code.
    pub code: ErrorCode,
    /// Broad category.
    pub category: ErrorCategory,
    /// Human-readable message.
    pub message: String,
    /// Whether the caller may retry.
    pub retryable: bool,
    /// Operator-facing hint, if any.
    pub hint: Option<String>,
    /// Correlation id, if any.
    pub correlation_id: Option<String>,
    /// Structured context values.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl From<&GaitError> for GaitErrorDto {
    fn from(err: &GaitError) -> Self {
        Self {
            code: err.code,
            category: err.category(),
            message: err.message.clone(),
            retryable: err.retryable,
            hint: err.hint.clone(),
            correlation_id: err.correlation_id.clone(),
            context: err.context.clone(),
        }
    }
}
