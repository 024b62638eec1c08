//! Core data model: storage classes, claims, volumes, workloads and events.
//!
//! These are the records the verification workflow reads from and writes to
//! the cluster collaborators.  They are all [`Serialize`]/[`Deserialize`] so
//! that results and simulated state can be dumped as JSON by a harness.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Storage class parameter key carrying the requested filesystem type.
pub const FSTYPE_PARAM: &str = "fstype";

/// A filesystem type every supported backend formats with.
pub const EXT4_FSTYPE: &str = "ext4";
/// A valid, non-default filesystem type.
pub const EXT3_FSTYPE: &str = "ext3";
/// A filesystem type no node has a mount helper for.
pub const INVALID_FSTYPE: &str = "ext10";

// ---------------------------------------------------------------------------
// Node identity
// ---------------------------------------------------------------------------

/// Name of a compute node that volumes are attached to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct NodeName(pub String);

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for NodeName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for NodeName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Storage classes
// ---------------------------------------------------------------------------

/// A storage class: a named set of provisioner parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageClassSpec {
    /// Cluster-unique class name.
    pub name: String,
    /// Parameters forwarded to the provisioner, e.g. `{"fstype": "ext3"}`.
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

impl StorageClassSpec {
    pub fn new(name: impl Into<String>, parameters: HashMap<String, String>) -> Self {
        Self {
            name: name.into(),
            parameters,
        }
    }

    /// The requested filesystem type.  `None` and `Some("")` both mean
    /// "use the backend default".
    pub fn fstype(&self) -> Option<&str> {
        self.parameters.get(FSTYPE_PARAM).map(String::as_str)
    }
}

/// Build the parameter map for a class requesting `fstype`.
pub fn fstype_parameters(fstype: &str) -> HashMap<String, String> {
    HashMap::from([(FSTYPE_PARAM.to_owned(), fstype.to_owned())])
}

// ---------------------------------------------------------------------------
// Claims and volumes
// ---------------------------------------------------------------------------

/// Backend-reported phase of a volume claim.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ClaimPhase {
    /// Waiting for the backend to allocate a volume.
    Pending,
    /// A concrete volume has been allocated and bound.
    Bound,
    /// Provisioning failed terminally.
    Failed,
}

/// Request to create a claim against a storage class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimRequest {
    /// Claim name, unique within the namespace.
    pub name: String,
    /// Requested capacity as a quantity string, e.g. `"2Gi"`.
    pub size: String,
    /// Name of the storage class to provision from.
    pub storage_class: String,
}

/// A request for storage and, once bound, its link to a concrete volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeClaim {
    pub name: String,
    pub namespace: String,
    pub size: String,
    pub storage_class: String,
    pub phase: ClaimPhase,
    /// Name of the bound [`Volume`]; set once `phase` is [`ClaimPhase::Bound`].
    #[serde(default)]
    pub volume_name: Option<String>,
}

/// A concrete, backend-owned volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Volume {
    /// Volume name, used in diagnostic messages.
    pub name: String,
    /// Backend handle, e.g. `[datastore1] kubevols/kubernetes-dynamic-pvc-<id>.vmdk`.
    pub volume_path: String,
    /// Claim the volume is bound to, as `namespace/name`.
    #[serde(default)]
    pub claim: Option<String>,
    /// Node the volume is attached to.  `None` means detached.
    #[serde(default)]
    pub attached_node: Option<NodeName>,
}

// ---------------------------------------------------------------------------
// Workloads
// ---------------------------------------------------------------------------

/// Lifecycle phase of a workload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum WorkloadPhase {
    /// Created but not yet running (scheduling, attaching or mounting).
    Pending,
    Running,
    Succeeded,
    /// The workload will never run.
    Failed,
}

/// Request to create a workload that mounts one or more claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadSpec {
    pub name: String,
    pub namespace: String,
    /// Claim names mounted into the workload.
    pub claims: Vec<String>,
    /// Path every claim is mounted under, e.g. `/mnt/volume1`.
    pub mount_path: String,
    /// Shell command the workload runs.
    pub command: String,
    /// Node the workload is pinned to.
    #[serde(default)]
    pub node_affinity: Option<NodeName>,
}

/// A workload as reported by the cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Workload {
    pub name: String,
    pub namespace: String,
    /// Node the scheduler placed the workload on, if any.
    #[serde(default)]
    pub node_name: Option<NodeName>,
    #[serde(default)]
    pub claims: Vec<String>,
    pub command: String,
    pub phase: WorkloadPhase,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// A free-text operational message emitted by the cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiagnosticEvent {
    pub namespace: String,
    /// Name of the object the event is about (workload or volume).
    pub target_name: String,
    /// Short machine-readable reason, e.g. `"FailedMount"`.
    #[serde(default)]
    pub reason: String,
    pub message: String,
}
