//! Intent: a structured description of a proposed tool call.

use gait_error::GaitError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A concrete thing a tool call acts on: a path, a URL, an API resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Target {
    /// Category of the target, e.g. `"filesystem"`, `"network"`.
    pub kind: String,
    /// The target's identifying value, e.g. a path or host.
    pub value: String,
    /// The operation performed on the target, e.g. `"write"`, `"delete"`.
    pub operation: String,
    /// Optional finer-grained endpoint classification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_class: Option<String>,
    /// Whether this operation is considered destructive.
    #[serde(default)]
    pub destructive: bool,
}

/// One step of a multi-step (script) intent.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ScriptStep {
    /// The tool this step invokes.
    pub tool_name: String,
    /// Step arguments.
    #[serde(default)]
    pub args: serde_json::Value,
    /// Targets touched by this step.
    #[serde(default)]
    pub targets: Vec<Target>,
}

/// A multi-step intent: an ordered sequence of tool invocations evaluated
/// and recorded as a single logical unit.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Script {
    /// The ordered steps. Must be non-empty.
    pub steps: Vec<ScriptStep>,
}

/// One edge in a delegation chain: `delegator` grants `delegate` authority
/// within `scope_class`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct DelegationEdge {
    /// The identity granting authority.
    pub delegator: String,
    /// The identity receiving authority.
    pub delegate: String,
    /// The scope class this edge covers.
    pub scope_class: String,
}

/// A claimed delegation chain accompanying an intent.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct DelegationRef {
    /// The identity ultimately requesting the action.
    pub requester_identity: String,
    /// The scope class being exercised.
    pub scope_class: String,
    /// References to delegation/approval tokens backing this chain.
    #[serde(default)]
    pub token_refs: Vec<String>,
    /// The delegation edges, delegator-to-delegate in order.
    #[serde(default)]
    pub chain: Vec<DelegationEdge>,
}

/// Evaluation context: who is asking, from where, under what session/job.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct IntentContext {
    /// The requesting identity.
    pub identity: String,
    /// Workspace identifier, if applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    /// Declared risk classification for this context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_class: Option<String>,
    /// Owning session, if this intent is part of one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Owning job, if this intent is part of a durable job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    /// Authentication mode in effect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_mode: Option<String>,
    /// Opaque OAuth evidence reference, if auth_mode requires it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_evidence: Option<String>,
}

/// A structured description of a proposed tool call, the unit policy
/// evaluation operates on.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Intent {
    /// The tool being invoked. Ignored when `script` is set, present for
    /// schema uniformity (conventionally the script's entry point name).
    pub tool_name: String,
    /// Tool arguments.
    #[serde(default)]
    pub args: serde_json::Value,
    /// Per-argument provenance labels (e.g. `"user_supplied"`, `"derived"`).
    #[serde(default)]
    pub arg_provenance: Vec<String>,
    /// Targets touched directly by this intent (non-script case).
    #[serde(default)]
    pub targets: Vec<Target>,
    /// Present when this intent represents an ordered multi-step script.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<Script>,
    /// Present when this intent claims delegated authority.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegation: Option<DelegationRef>,
    /// Evaluation context.
    pub context: IntentContext,
}

impl Intent {
    /// Whether this is a multi-step script intent.
    #[must_use]
    pub fn is_script(&self) -> bool {
        self.script.is_some()
    }

    /// Number of operations this intent represents: the sum of step target
    /// counts for a script that declares targets on its steps, the
    /// intent's own target count otherwise, defaulting to 1 when neither
    /// is present.
    #[must_use]
    pub fn operation_count(&self) -> usize {
        if let Some(script) = &self.script {
            let step_targets: usize = script.steps.iter().map(|s| s.targets.len()).sum();
            if step_targets > 0 {
                return step_targets;
            }
            if !self.targets.is_empty() {
                return self.targets.len();
            }
            return script.steps.len().max(1);
        }
        if self.targets.is_empty() { 1 } else { self.targets.len() }
    }

    /// Content digest of this intent's canonical form.
    pub fn digest(&self) -> Result<String, GaitError> {
        gait_canon::digest(self)
    }
}

/// Fluent builder for [`Intent`], mirroring the workspace's other record
/// builders.
#[derive(Debug, Default)]
pub struct IntentBuilder {
    tool_name: String,
    args: serde_json::Value,
    arg_provenance: Vec<String>,
    targets: Vec<Target>,
    script: Option<Script>,
    delegation: Option<DelegationRef>,
    context: Option<IntentContext>,
}

impl IntentBuilder {
    /// Start building an intent for `tool_name`.
    #[must_use]
    pub fn new(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            args: serde_json::Value::Null,
            ..Default::default()
        }
    }

    /// Set the tool arguments.
    #[must_use]
    pub fn args(mut self, args: serde_json::Value) -> Self {
        self.args = args;
        self
    }

    /// Add a target.
    #[must_use]
    pub fn target(mut self, target: Target) -> Self {
        self.targets.push(target);
        self
    }

    /// Set this intent's script steps.
    #[must_use]
    pub fn script(mut self, steps: Vec<ScriptStep>) -> Self {
        self.script = Some(Script { steps });
        self
    }

    /// Attach a delegation claim.
    #[must_use]
    pub fn delegation(mut self, delegation: DelegationRef) -> Self {
        self.delegation = Some(delegation);
        self
    }

    /// Set the evaluation context. Required before [`IntentBuilder::build`].
    #[must_use]
    pub fn context(mut self, context: IntentContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Finish building, failing if `context` was never set.
    pub fn build(self) -> Result<Intent, GaitError> {
        let context = self.context.ok_or_else(|| {
            GaitError::new(gait_error::ErrorCode::SchemaInvalid, "intent requires a context")
        })?;
        Ok(Intent {
            tool_name: self.tool_name,
            args: self.args,
            arg_provenance: self.arg_provenance,
            targets: self.targets,
            script: self.script,
            delegation: self.delegation,
            context,
        })
    }
}
