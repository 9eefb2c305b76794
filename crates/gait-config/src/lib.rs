// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Configuration loading, key-mode selection, and the env-var contracts
//! that the (out-of-scope) adoption/operational logging collaborator
//! reads. This crate performs no I/O against those paths itself; it only
//! exposes the typed contract so the core stays decoupled from that
//! collaborator.

use std::fmt;
use std::path::{Path, PathBuf};

use gait_error::{ErrorCode, GaitError};
use gait_sign::{KeyConfig, KeyMode, KeySource};
use serde::{Deserialize, Serialize};

/// Deflate compression level used for deterministic runpack/pack zips.
/// Fixed at the ecosystem default (6): any fixed level satisfies
/// byte-identical-output determinism, and 6 keeps archives inspectable
/// with standard tools without unusual compression-ratio surprises.
pub const DEFAULT_DEFLATE_LEVEL: u32 = 6;

/// Strictness profile applied during offline verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationProfile {
    /// A public key is required; an absent signature is treated as a
    /// failure rather than merely unverifiable.
    OfflineStrict,
    /// Signatures are checked when present but not required.
    Lenient,
}

/// Top-level configuration for this toolchain's core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct GaitConfig {
    /// Directory runpacks and traces are written under.
    pub out_dir: PathBuf,
    /// Directory session journals and chains are written under.
    pub sessions_dir: PathBuf,
    /// Signing key mode and source.
    pub key: KeyConfig,
    /// Deflate level for deterministic zip archives.
    pub deflate_level: u32,
    /// Verification strictness.
    pub verification_profile: VerificationProfile,
}

impl Default for GaitConfig {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from("./gait-out"),
            sessions_dir: PathBuf::from("./sessions"),
            key: KeyConfig { mode: KeyMode::Dev, source: None },
            deflate_level: DEFAULT_DEFLATE_LEVEL,
            verification_profile: VerificationProfile::OfflineStrict,
        }
    }
}

/// Failure loading or validating a [`GaitConfig`].
#[derive(Debug)]
pub enum ConfigError {
    /// The configuration file does not exist.
    FileNotFound {
        /// The path that was attempted.
        path: PathBuf,
    },
    /// The file could not be parsed as TOML.
    ParseError {
        /// Parser diagnostic.
        reason: String,
    },
    /// The parsed configuration failed validation.
    ValidationError {
        /// One message per failed check.
        reasons: Vec<String>,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FileNotFound { path } => write!(f, "config file not found: {}", path.display()),
            Self::ParseError { reason } => write!(f, "failed to parse config: {reason}"),
            Self::ValidationError { reasons } => {
                write!(f, "config validation failed: {}", reasons.join("; "))
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for GaitError {
    fn from(err: ConfigError) -> Self {
        GaitError::new(ErrorCode::SchemaInvalid, err.to_string())
    }
}

/// Non-fatal configuration diagnostics surfaced to operators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// A dev-mode signing key is in use.
    DevKeyModeInUse,
    /// A deprecated field was present; `suggestion` names its replacement.
    DeprecatedField {
        /// The deprecated field's name.
        field: String,
        /// What to use instead.
        suggestion: String,
    },
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DevKeyModeInUse => {
                write!(f, "signing with an ephemeral development key; do not use this configuration in production")
            }
            Self::DeprecatedField { field, suggestion } => {
                write!(f, "field '{field}' is deprecated; use '{suggestion}' instead")
            }
        }
    }
}

impl GaitConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load_toml(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.to_path_buf(),
        })?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError { reason: e.to_string() })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut reasons = Vec::new();
        if matches!(self.key.mode, KeyMode::Prod) && self.key.source.is_none() {
            reasons.push("key.mode is 'prod' but no key.source was configured".to_string());
        }
        if reasons.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::ValidationError { reasons })
        }
    }

    /// Warnings implied by this configuration's current values.
    #[must_use]
    pub fn warnings(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        if matches!(self.key.mode, KeyMode::Dev) {
            warnings.push(ConfigWarning::DevKeyModeInUse);
        }
        warnings
    }
}

/// Strict Policy-YAML parsing: unknown keys are rejected. `T` is expected
/// to derive `#[serde(deny_unknown_fields)]` throughout its structure, as
/// every schema type in `gait-core` does.
pub fn parse_policy_yaml<T: for<'de> Deserialize<'de>>(yaml: &str) -> Result<T, GaitError> {
    serde_yaml::from_str(yaml)
        .map_err(|e| GaitError::new(ErrorCode::PolicyUnknownField, format!("invalid policy YAML: {e}")))
}

/// Env-var names this toolchain's adoption/operational logging
/// collaborator reads. The core performs no I/O against these paths;
/// it only exposes the contract so the collaborator and the core agree on
/// variable names.
pub mod env_contract {
    /// Path to the adoption event log, when adoption tracking is enabled.
    pub const ADOPTION_LOG: &str = "GAIT_ADOPTION_LOG";
    /// Path to the operational event log, when operational logging is
    /// enabled.
    pub const OPERATIONAL_LOG: &str = "GAIT_OPERATIONAL_LOG";
    /// Tag propagated into adoption events identifying the workflow.
    pub const ADOPTION_WORKFLOW: &str = "GAIT_ADOPTION_WORKFLOW";
}

/// Resolved observer configuration read from the environment. `None`
/// fields mean the corresponding collaborator is not configured and the
/// core emits no events for it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObserverConfig {
    /// Value of [`env_contract::ADOPTION_LOG`], if set.
    pub adoption_log: Option<String>,
    /// Value of [`env_contract::OPERATIONAL_LOG`], if set.
    pub operational_log: Option<String>,
    /// Value of [`env_contract::ADOPTION_WORKFLOW`], if set.
    pub adoption_workflow: Option<String>,
}

impl ObserverConfig {
    /// Read the observer configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            adoption_log: std::env::var(env_contract::ADOPTION_LOG).ok(),
            operational_log: std::env::var(env_contract::OPERATIONAL_LOG).ok(),
            adoption_workflow: std::env::var(env_contract::ADOPTION_WORKFLOW).ok(),
        }
    }
}

/// A discrete event the adoption/operational logging collaborator may want
/// to observe. The core constructs these at the same call sites that
/// already perform the underlying action; this is a notification contract,
/// not a second audit trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObserverEvent {
    /// An adoption-tracked action occurred (e.g. a tool call, a token
    /// issuance).
    Adoption {
        /// Machine-readable event kind, e.g. `"tool_call"`.
        kind: String,
        /// The workflow tag this event is attributed to, if configured.
        workflow: Option<String>,
    },
    /// An operational diagnostic worth recording outside the audit trail.
    Operational {
        /// Machine-readable event kind.
        kind: String,
        /// Human-readable detail.
        detail: String,
    },
}

/// Thin interface decoupling the core from whatever actually persists
/// [`ObserverEvent`]s. The core depends only on this trait, never on a
/// concrete collaborator.
pub trait ObserverSink: Send + Sync {
    /// Record one event.
    fn record(&self, event: &ObserverEvent);
}

/// Discards every event. The default when no observer is configured.
#[derive(Debug, Default)]
pub struct NoopObserverSink;

impl ObserverSink for NoopObserverSink {
    fn record(&self, _event: &ObserverEvent) {}
}

/// Resolve a [`KeySource`] by name, for callers that build `GaitConfig`
/// programmatically rather than from TOML.
#[must_use]
pub fn key_source_file(path: impl Into<PathBuf>) -> KeySource {
    KeySource::File(path.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn default_config_is_dev_mode_with_standard_layout() {
        let config = GaitConfig::default();
        assert_eq!(config.out_dir, PathBuf::from("./gait-out"));
        assert_eq!(config.deflate_level, DEFAULT_DEFLATE_LEVEL);
        assert!(matches!(config.key.mode, KeyMode::Dev));
    }

    #[test]
    fn dev_mode_emits_warning() {
        let config = GaitConfig::default();
        assert!(config.warnings().contains(&ConfigWarning::DevKeyModeInUse));
    }

    #[test]
    fn prod_mode_without_source_fails_validation() {
        let mut config = GaitConfig::default();
        config.key.mode = KeyMode::Prod;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gait.toml");
        std::fs::write(&path, toml::to_string(&config).unwrap()).unwrap();
        let err = GaitConfig::load_toml(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn missing_file_reports_not_found() {
        let err = GaitConfig::load_toml("/nonexistent/gait.toml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn loads_valid_toml_roundtrip() {
        let config = GaitConfig::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gait.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(f, "{}", toml::to_string(&config).unwrap()).unwrap();
        let loaded = GaitConfig::load_toml(&path).unwrap();
        assert_eq!(loaded.out_dir, config.out_dir);
    }

    #[test]
    fn strict_policy_yaml_rejects_unknown_fields() {
        #[derive(Deserialize)]
        #[serde(deny_unknown_fields)]
        struct Tiny {
            #[allow(dead_code)]
            known: String,
        }
        let err = parse_policy_yaml::<Tiny>("known: a\nextra: b\n").unwrap_err();
        assert_eq!(err.code(), ErrorCode::PolicyUnknownField);
    }

    #[test]
    fn noop_observer_sink_accepts_any_event() {
        let sink = NoopObserverSink;
        sink.record(&ObserverEvent::Adoption { kind: "tool_call".into(), workflow: None });
        sink.record(&ObserverEvent::Operational { kind: "warn".into(), detail: "example".into() });
    }

    #[test]
    fn observer_config_defaults_to_none_when_unset() {
        // Not asserting process env state (shared across tests); just
        // confirm the struct's own default is fully absent.
        assert_eq!(ObserverConfig::default(), ObserverConfig {
            adoption_log: None,
            operational_log: None,
            adoption_workflow: None,
        });
    }
}
