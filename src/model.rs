//! Core data model.
//!
//! An invocation request carries an action (the opaque unit of work), the
//! parameters it was scheduled with, and the user it was scheduled by.
//! The invoker turns one request into one [`InvokeStatus`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::identity::SecurityContext;
use crate::params;
use crate::stream::StreamProviderHandle;

/// Parameter map handed to an invocation. Values are opaque to the invoker.
pub type Params = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Work item uid
// ---------------------------------------------------------------------------

/// Identifier correlating all lifecycle events of one scheduled run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkItemUid(pub String);

impl std::fmt::Display for WorkItemUid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// What an action sees while it runs.
pub struct ActionContext<'a> {
    /// Identity the action runs as. Also installed as the thread's
    /// current context for the duration of the call.
    pub security: &'a SecurityContext,
    /// Sanitized parameters: no invocation plumbing, locale resolved.
    pub params: &'a Params,
    /// Where to read input and write output, if the job streams data.
    pub stream_provider: Option<&'a StreamProviderHandle>,
}

/// What an action reports back when it completes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    /// The caller must persist new state for this job.
    pub requires_update: bool,
    /// Arbitrary result data. Opaque to the invoker.
    pub details: Option<serde_json::Value>,
}

impl ActionOutcome {
    pub fn unchanged() -> Self {
        Self::default()
    }

    pub fn requires_update() -> Self {
        Self {
            requires_update: true,
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// A schedulable unit of work, already resolved and bound.
pub trait Action: Send + Sync {
    /// Name used in logs and spans.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn execute(&self, ctx: ActionContext<'_>) -> anyhow::Result<ActionOutcome>;
}

// ---------------------------------------------------------------------------
// Action details
// ---------------------------------------------------------------------------

/// One invocation request. Any part may be missing; the invoker rejects
/// incomplete requests before running anything.
#[derive(Clone, Default)]
pub struct ActionDetails {
    pub action: Option<Arc<dyn Action>>,
    pub parameters: Option<Params>,
    /// The user the job was scheduled by. Empty or absent means anonymous.
    pub user_name: Option<String>,
}

impl ActionDetails {
    pub fn new(action: Arc<dyn Action>, parameters: Params) -> Self {
        Self {
            action: Some(action),
            parameters: Some(parameters),
            user_name: None,
        }
    }

    pub fn user(mut self, user_name: impl Into<String>) -> Self {
        self.user_name = Some(user_name.into());
        self
    }

    /// Uid derived from the parameters, if they identify a work item.
    pub fn work_item_uid(&self) -> Option<WorkItemUid> {
        self.parameters.as_ref().and_then(params::extract_uid)
    }
}

impl std::fmt::Debug for ActionDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionDetails")
            .field("action", &self.action.as_ref().map(|a| a.name().to_string()))
            .field("parameters", &self.parameters)
            .field("user_name", &self.user_name)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Invoke status
// ---------------------------------------------------------------------------

/// Why an action did not complete.
#[derive(Debug)]
pub enum ActionFailure {
    /// The action returned an error.
    Error(anyhow::Error),
    /// The action panicked. Holds the panic message.
    Panic(String),
}

impl std::fmt::Display for ActionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionFailure::Error(e) => write!(f, "{e:#}"),
            ActionFailure::Panic(msg) => write!(f, "action panicked: {msg}"),
        }
    }
}

/// Result of one invocation attempt. Owned by the caller.
#[derive(Debug, Default)]
pub struct InvokeStatus {
    /// Set when the action failed. Absent on success.
    pub failure: Option<ActionFailure>,
    /// The caller must persist new state for this job.
    pub requires_update: bool,
    /// Details reported by the action, if any.
    pub details: Option<serde_json::Value>,
}

impl InvokeStatus {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}
