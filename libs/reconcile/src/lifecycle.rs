//! Lifecycle derivation for annotation-driven trace jobs.
//!
//! A trace job is a singleton cluster object used as a mailbox: the operator
//! writes an operation annotation, the gadget reports back through
//! `status.state`, `status.operationError` and `status.output`. Nothing is
//! cached between polls except the previously derived state, which is only
//! used to avoid regressing on ambiguous snapshots.

use serde::{Deserialize, Serialize};

/// Locally derived lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// No run has been observed yet.
    #[default]
    NotStarted,
    /// The gadget is collecting.
    Started,
    /// A run has finished (successfully or not).
    Stopped,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::NotStarted => write!(f, "not_started"),
            LifecycleState::Started => write!(f, "started"),
            LifecycleState::Stopped => write!(f, "stopped"),
        }
    }
}

/// `status.state` as reported by the gadget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteState {
    Pending,
    Started,
    Stopped,
    Completed,
    Terminating,
    Unknown(String),
}

impl RemoteState {
    pub fn parse(state: &str) -> Self {
        match state {
            "Pending" => Self::Pending,
            "Started" => Self::Started,
            "Stopped" => Self::Stopped,
            "Completed" => Self::Completed,
            "Terminating" => Self::Terminating,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// The fields of a trace job snapshot that drive derivation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobSnapshot {
    /// Value of the "running" annotation. Its presence alone signals activity.
    pub running_since: Option<String>,
    /// Value of the start timestamp annotation.
    pub started_at: Option<String>,
    /// Value of the final timestamp annotation.
    pub finished_at: Option<String>,
    pub state: Option<RemoteState>,
    pub operation_error: Option<String>,
    pub output: Option<String>,
}

/// Result of deriving state from one snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Derivation {
    pub state: LifecycleState,
    /// Error to surface as a standing notice.
    pub error: Option<String>,
    /// Output payload captured on completion.
    pub output: Option<String>,
}

impl Derivation {
    fn new(state: LifecycleState) -> Self {
        Self {
            state,
            error: None,
            output: None,
        }
    }

    fn with_error(mut self, error: Option<&String>) -> Self {
        self.error = error.cloned();
        self
    }
}

/// Derive the lifecycle state from a snapshot. First match wins:
///
/// 1. error set, running annotation absent, and no run ever observed
///    (previous is `NotStarted` and no start timestamp): `NotStarted`.
/// 2. running annotation present: `Started`, error surfaced if any.
/// 3. error set: `Stopped`.
/// 4. `Completed` with output, or `Stopped`: `Stopped`, output captured.
/// 5. `Started`: `Started`.
/// 6. otherwise keep `previous`.
pub fn derive_state(previous: LifecycleState, snapshot: &JobSnapshot) -> Derivation {
    let error = snapshot.operation_error.as_ref();
    let running = snapshot.running_since.is_some();

    if error.is_some()
        && !running
        && previous == LifecycleState::NotStarted
        && snapshot.started_at.is_none()
    {
        return Derivation::new(LifecycleState::NotStarted).with_error(error);
    }

    if running {
        return Derivation::new(LifecycleState::Started).with_error(error);
    }

    if error.is_some() {
        return Derivation::new(LifecycleState::Stopped).with_error(error);
    }

    match &snapshot.state {
        Some(RemoteState::Completed) if snapshot.output.is_some() => Derivation {
            state: LifecycleState::Stopped,
            error: None,
            output: snapshot.output.clone(),
        },
        Some(RemoteState::Stopped) => Derivation {
            state: LifecycleState::Stopped,
            error: None,
            output: snapshot.output.clone(),
        },
        Some(RemoteState::Started) => Derivation::new(LifecycleState::Started),
        _ => Derivation::new(previous),
    }
}
