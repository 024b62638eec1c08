//! Cluster collaborator traits.
//!
//! The workflow never talks to a storage backend, scheduler or API server
//! directly.  Every remote call goes through one of the traits below, and the
//! Scenario Driver receives an implementation of all of them bundled as a
//! [`Cluster`] inside the [`VerifyContext`](crate::context::VerifyContext).
//!
//! [`MemoryCluster`](crate::backend::memory::MemoryCluster) implements every
//! trait for tests and dry runs.

use async_trait::async_trait;

use crate::error::ApiError;
use crate::types::{
    ClaimRequest, DiagnosticEvent, NodeName, StorageClassSpec, Volume, VolumeClaim, Workload,
    WorkloadSpec,
};

/// Storage class, claim and volume operations.
#[async_trait]
pub trait ProvisioningApi: Send + Sync {
    /// Create a storage class.  Provisioning parameters are validated by the
    /// backend; an unusable class surfaces as [`ApiError::Rejected`].
    async fn create_storage_class(&self, spec: StorageClassSpec) -> Result<(), ApiError>;

    /// Delete a storage class.  Returns [`ApiError::NotFound`] if it is
    /// already gone.
    async fn delete_storage_class(&self, name: &str) -> Result<(), ApiError>;

    /// Create a claim against an existing storage class.
    async fn create_claim(
        &self,
        namespace: &str,
        req: ClaimRequest,
    ) -> Result<VolumeClaim, ApiError>;

    /// Fetch the current state of a claim, including its phase and, once
    /// bound, the name of its volume.
    async fn get_claim(&self, namespace: &str, name: &str) -> Result<VolumeClaim, ApiError>;

    /// Fetch a volume by name.
    async fn get_volume(&self, name: &str) -> Result<Volume, ApiError>;

    /// Delete a claim.  Returns [`ApiError::NotFound`] if it is already gone.
    async fn delete_claim(&self, namespace: &str, name: &str) -> Result<(), ApiError>;
}

/// Workload lifecycle and in-workload command execution.
#[async_trait]
pub trait WorkloadApi: Send + Sync {
    /// Create a workload.  The returned record is usually still
    /// [`Pending`](crate::types::WorkloadPhase::Pending).
    async fn create_workload(&self, spec: WorkloadSpec) -> Result<Workload, ApiError>;

    async fn get_workload(&self, namespace: &str, name: &str) -> Result<Workload, ApiError>;

    /// Request deletion.  Removal may complete asynchronously; poll
    /// [`get_workload`](Self::get_workload) for [`ApiError::NotFound`].
    async fn delete_workload(&self, namespace: &str, name: &str) -> Result<(), ApiError>;

    /// Run `command` inside the workload and return its captured stdout.
    async fn exec_in_workload(
        &self,
        namespace: &str,
        name: &str,
        command: &[String],
    ) -> Result<String, ApiError>;
}

/// Read-only access to the cluster event stream.
#[async_trait]
pub trait EventApi: Send + Sync {
    async fn list_events(&self, namespace: &str) -> Result<Vec<DiagnosticEvent>, ApiError>;
}

/// Backend view of which node a volume is attached to.
#[async_trait]
pub trait AttachStateApi: Send + Sync {
    async fn is_volume_attached(&self, volume_path: &str, node: &NodeName)
    -> Result<bool, ApiError>;
}

/// Node inventory.
#[async_trait]
pub trait NodeApi: Send + Sync {
    /// Nodes that are ready and accept new workloads.
    async fn list_ready_schedulable_nodes(&self) -> Result<Vec<NodeName>, ApiError>;
}

/// Anything implementing all collaborator traits is a
/// `Cluster`.
pub trait Cluster:
    ProvisioningApi + WorkloadApi + EventApi + AttachStateApi + NodeApi
{
}

impl<T> Cluster for T where
    T: ProvisioningApi + WorkloadApi + EventApi + AttachStateApi + NodeApi
{
}
