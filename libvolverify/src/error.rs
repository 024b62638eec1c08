//! Error types.
//!
//! Two layers of error exist:
//!
//! * [`ApiError`]: a single collaborator call (provisioning, workload, event,
//!   attach-state or node API) failed.
//! * [`VerifyError`]: the workflow taxonomy the Scenario Driver records
//!   against a scenario.
//!
//! Both derive [`thiserror::Error`] and [`Serialize`] so that scenario results
//! can be reported as JSON by a harness.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::NodeName;

/// Failure of a single call to a cluster collaborator.
#[derive(Debug, Error, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The object does not exist (or no longer exists).
    #[error("{kind} {name} not found")]
    NotFound {
        /// Object kind, e.g. `"claim"`.
        kind: String,
        name: String,
    },

    /// An object with the same name already exists.
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// The backend refused the request outright.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// Command execution inside a workload failed.
    #[error("exec failed: {0}")]
    Exec(String),

    /// Any other backend / transport failure.
    #[error("backend error: {0}")]
    Backend(String),
}

impl ApiError {
    pub fn not_found(kind: &str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.to_owned(),
            name: name.into(),
        }
    }

    /// Create an [`ApiError::Backend`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn backend<E: fmt::Display>(e: E) -> Self {
        Self::Backend(e.to_string())
    }

    /// Create an [`ApiError::Exec`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn exec<E: fmt::Display>(e: E) -> Self {
        Self::Exec(e.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Why a workload could not be brought to a running state.
#[derive(Debug, Error, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[error("workload {} did not start: {reason}", .workload.as_deref().unwrap_or("<not created>"))]
pub struct AttachError {
    /// Name of the workload, if creation got far enough to produce one.
    pub workload: Option<String>,
    /// Node the workload was scheduled onto, if known.
    pub node: Option<NodeName>,
    pub reason: String,
}

/// A step of the teardown sequence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TeardownStep {
    DeleteWorkload,
    AwaitWorkloadGone,
    AwaitDetach,
    DeleteClaim,
}

impl fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DeleteWorkload => "delete workload",
            Self::AwaitWorkloadGone => "await workload removal",
            Self::AwaitDetach => "await volume detach",
            Self::DeleteClaim => "delete claim",
        })
    }
}

/// Failure of one teardown step.
#[derive(Debug, Error, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[error("teardown step '{step}' failed: {reason}")]
pub struct TeardownError {
    pub step: TeardownStep,
    pub reason: String,
}

/// Workflow-level failure recorded against a scenario.
#[derive(Debug, Error, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum VerifyError {
    /// The cluster cannot run the scenario at all.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// A configuration value is out of range.
    #[error("invalid config field {field}: {reason}")]
    Config { field: String, reason: String },

    /// The claim did not reach `Bound` before the deadline.
    #[error("claim {claim} not bound after {waited:?}")]
    ProvisioningTimeout { claim: String, waited: Duration },

    /// The backend rejected the class or claim, or the claim failed.
    #[error("provisioning rejected: {reason}")]
    ProvisioningRejected { reason: String },

    /// The workload did not reach a running state.
    #[error(transparent)]
    Attach(#[from] AttachError),

    /// A volume is not attached to the node its workload runs on.
    #[error("volume {volume_path} not attached to node {node}")]
    NotAttached { volume_path: String, node: NodeName },

    /// A running workload reports no node, so its attachments cannot be
    /// checked.
    #[error("workload {workload} is running without a node assignment")]
    Unscheduled { workload: String },

    /// The observed filesystem type differs from the expected one.
    #[error("fstype mismatch: expected {expected:?}, got {actual:?}")]
    Mismatch { expected: String, actual: String },

    /// The expected diagnostic never appeared after an expected attach failure.
    #[error("expected diagnostic for volume {volume} not found: {expected:?}")]
    ClassificationMiss { volume: String, expected: String },

    /// The workload started although the scenario expected it not to.
    #[error("workload {workload} started but attach was expected to fail")]
    UnexpectedAttach { workload: String },

    /// One or more teardown steps failed.
    #[error("teardown failed: {}", join_teardown(.0))]
    Teardown(Vec<TeardownError>),

    /// A collaborator call failed outside of any wait.
    #[error(transparent)]
    Api(#[from] ApiError),
}

fn join_teardown(errors: &[TeardownError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
