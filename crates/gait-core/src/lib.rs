// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Core schema types shared across the toolchain: intents, policies,
//! verdicts, and evaluation outcomes.
//!
//! This crate is deliberately pure data plus small, total helper methods
//! (digests, ordering, predicate matching). The policy evaluation
//! algorithm itself lives in `gait-policy`; the signed artifact types
//! (traces, tokens, runpacks, job state) live in their own crates so each
//! stays focused on one subsystem.

mod intent;
mod policy;
mod result;
mod token;

pub use intent::{
    DelegationEdge, DelegationRef, Intent, IntentBuilder, IntentContext, Script, ScriptStep,
    Target,
};
pub use policy::{Policy, Rule, RuleEffect, RuleMatch, Verdict};
pub use result::{EvalOutcome, StepVerdict, Violation, VerdictSource};
pub use token::{ApprovalToken, DelegationToken, SayToken};

/// Current schema generation for records defined in this crate.
pub const SCHEMA_VERSION: u32 = 1;
