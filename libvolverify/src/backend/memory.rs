//! In-memory simulated cluster.
//!
//! [`MemoryCluster`] implements every collaborator trait with a vSphere-like
//! behaviour model, so the workflow can be exercised without a real cluster:
//!
//! * claims bind `timing.bind` after creation, formatting the volume with
//!   the class's `fstype` (or the default for `""`);
//! * a scheduled workload attaches its volumes to its node immediately, and
//!   runs `timing.start` later, unless a volume's filesystem has no mount
//!   helper on the node, in which case it stays `Pending` and a `FailedMount`
//!   event appears `timing.event` after creation;
//! * the fstype file becomes readable `timing.fstype_write` after start;
//! * a deleted workload disappears after `timing.delete`, and its volumes
//!   detach `timing.detach` after deletion.
//!
//! State evolves lazily on reads against the Tokio clock, so tests running
//! with paused time advance the simulation by sleeping.  [`Faults`] injects
//! the failure modes the workflow must classify.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::api::{AttachStateApi, EventApi, NodeApi, ProvisioningApi, WorkloadApi};
use crate::error::ApiError;
use crate::types::*;

type ObjectKey = (String, String);

fn key(namespace: &str, name: &str) -> ObjectKey {
    (namespace.to_owned(), name.to_owned())
}

/// Delays of the simulated asynchronous transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub bind: Duration,
    pub start: Duration,
    pub fstype_write: Duration,
    pub event: Duration,
    pub delete: Duration,
    pub detach: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            bind: Duration::from_secs(4),
            start: Duration::from_secs(6),
            fstype_write: Duration::from_secs(2),
            event: Duration::from_secs(3),
            delete: Duration::from_secs(4),
            detach: Duration::from_secs(10),
        }
    }
}

/// Injected failures.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Faults {
    pub reject_storage_classes: bool,
    pub reject_claims: bool,
    /// Claims move to `Failed` instead of `Bound`.
    pub fail_claims: bool,
    /// Claims stay `Pending` forever.
    pub never_bind: bool,
    pub reject_workloads: bool,
    /// Mount failures emit no events.
    pub suppress_events: bool,
    pub fail_workload_delete: bool,
    /// Volumes stay attached after their workload is deleted.
    pub never_detach: bool,
    /// Every volume mounts, whatever its filesystem.
    pub mount_any_fstype: bool,
    /// Report this filesystem from inside workloads instead of the real one.
    pub misreport_fstype: Option<String>,
    /// Only misreport for this long after the fstype file is written, then
    /// report the real filesystem.  `None` misreports forever.
    pub misreport_for: Option<Duration>,
}

/// Static description of the simulated cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemorySettings {
    /// Ready, schedulable nodes.
    pub nodes: Vec<NodeName>,
    /// Filesystems the nodes have mount helpers for.
    pub supported_fstypes: HashSet<String>,
    /// What the provisioner formats with when `fstype` is empty or absent.
    pub default_fstype: String,
    /// Prefix of generated volume paths.
    pub datastore: String,
    pub timing: Timing,
    pub faults: Faults,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            nodes: vec![NodeName::from("node-1"), NodeName::from("node-2")],
            supported_fstypes: ["ext2", "ext3", "ext4", "xfs"]
                .into_iter()
                .map(str::to_owned)
                .collect(),
            default_fstype: EXT4_FSTYPE.to_owned(),
            datastore: "[datastore1] kubevols".to_owned(),
            timing: Timing::default(),
            faults: Faults::default(),
        }
    }
}

/// A mutating call, recorded in order for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    CreateStorageClass(String),
    DeleteStorageClass(String),
    CreateClaim(String),
    DeleteClaim(String),
    CreateWorkload(String),
    DeleteWorkload(String),
}

#[derive(Debug, Clone)]
struct ClaimRecord {
    claim: VolumeClaim,
    /// Filesystem resolved from the class at creation time.
    fstype: String,
    created_at: Instant,
}

#[derive(Debug, Clone)]
struct VolumeRecord {
    volume: Volume,
    fstype: String,
}

#[derive(Debug, Clone)]
struct WorkloadRecord {
    workload: Workload,
    /// Names of the volumes the workload mounts.
    volumes: Vec<String>,
    mountable: bool,
    created_at: Instant,
    deleted_at: Option<Instant>,
}

#[derive(Debug, Clone)]
struct Attachment {
    node: NodeName,
    detach_at: Option<Instant>,
}

#[derive(Debug, Clone)]
struct TimedEvent {
    event: DiagnosticEvent,
    visible_at: Instant,
}

/// Simulated cluster implementing every collaborator trait.
///
/// # Thread safety
///
/// Object state lives in [`DashMap`]s; the event stream and operation log
/// are behind mutexes that are never held across an `.await`.
#[derive(Debug)]
pub struct MemoryCluster {
    settings: MemorySettings,
    storage_classes: DashMap<String, StorageClassSpec>,
    claims: DashMap<ObjectKey, ClaimRecord>,
    volumes: DashMap<String, VolumeRecord>,
    workloads: DashMap<ObjectKey, WorkloadRecord>,
    /// Keyed by volume path.
    attachments: DashMap<String, Attachment>,
    events: Mutex<Vec<TimedEvent>>,
    operations: Mutex<Vec<Operation>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new(MemorySettings::default())
    }
}

impl MemoryCluster {
    pub fn new(settings: MemorySettings) -> Self {
        Self {
            settings,
            storage_classes: DashMap::new(),
            claims: DashMap::new(),
            volumes: DashMap::new(),
            workloads: DashMap::new(),
            attachments: DashMap::new(),
            events: Mutex::new(Vec::new()),
            operations: Mutex::new(Vec::new()),
        }
    }

    /// Default settings with the given faults.
    pub fn with_faults(faults: Faults) -> Self {
        Self::new(MemorySettings {
            faults,
            ..MemorySettings::default()
        })
    }

    pub fn settings(&self) -> &MemorySettings {
        &self.settings
    }

    /// Every mutating call so far, in order.
    pub fn operations(&self) -> Vec<Operation> {
        lock(&self.operations).clone()
    }

    pub fn storage_class_count(&self) -> usize {
        self.storage_classes.len()
    }

    pub fn claim_count(&self) -> usize {
        self.claims.len()
    }

    /// Workloads that exist, including ones whose deletion is in progress.
    pub fn workload_count(&self) -> usize {
        self.workloads.len()
    }

    /// Volume paths currently attached to some node.
    pub fn attached_volume_paths(&self) -> Vec<String> {
        let now = Instant::now();
        self.attachments
            .iter()
            .filter(|a| a.detach_at.is_none_or(|at| now < at))
            .map(|a| a.key().clone())
            .collect()
    }

    fn log(&self, op: Operation) {
        lock(&self.operations).push(op);
    }

    fn emit(&self, event: DiagnosticEvent, visible_at: Instant) {
        debug!(target_name = %event.target_name, message = %event.message, "event recorded");
        lock(&self.events).push(TimedEvent { event, visible_at });
    }

    fn resolve_fstype(&self, class: &StorageClassSpec) -> String {
        match class.fstype() {
            Some(fstype) if !fstype.is_empty() => fstype.to_owned(),
            _ => self.settings.default_fstype.clone(),
        }
    }

    /// Advance a claim's phase and return its current state.
    fn refresh_claim(&self, k: &ObjectKey) -> Option<VolumeClaim> {
        let mut record = self.claims.get_mut(k)?;
        let faults = &self.settings.faults;

        if record.claim.phase == ClaimPhase::Pending
            && !faults.never_bind
            && record.created_at.elapsed() >= self.settings.timing.bind
        {
            if faults.fail_claims {
                record.claim.phase = ClaimPhase::Failed;
            } else {
                let id = uuid::Uuid::new_v4();
                let name = format!("pvc-{id}");
                let volume = Volume {
                    name: name.clone(),
                    volume_path: format!(
                        "{}/kubernetes-dynamic-{name}.vmdk",
                        self.settings.datastore
                    ),
                    claim: Some(format!("{}/{}", k.0, k.1)),
                    attached_node: None,
                };
                info!(claim = %k.1, volume = %name, fstype = %record.fstype, "volume provisioned");
                self.volumes.insert(
                    name.clone(),
                    VolumeRecord {
                        volume,
                        fstype: record.fstype.clone(),
                    },
                );
                record.claim.phase = ClaimPhase::Bound;
                record.claim.volume_name = Some(name);
            }
        }
        Some(record.claim.clone())
    }

    /// Drop a workload whose deletion has completed.  Returns `true` if the
    /// workload still exists.
    fn reap_workload(&self, k: &ObjectKey) -> bool {
        let delete_delay = self.settings.timing.delete;
        let reaped = self.workloads.remove_if(k, |_, rec| {
            rec.deleted_at.is_some_and(|at| at.elapsed() >= delete_delay)
        });
        if reaped.is_some() {
            let (namespace, name) = k;
            lock(&self.events).retain(|e| {
                e.event.namespace != *namespace || e.event.target_name != *name
            });
            return false;
        }
        self.workloads.contains_key(k)
    }

    fn phase_of(&self, record: &WorkloadRecord) -> WorkloadPhase {
        if record.workload.node_name.is_none() || !record.mountable {
            return WorkloadPhase::Pending;
        }
        if record.created_at.elapsed() >= self.settings.timing.start {
            WorkloadPhase::Running
        } else {
            WorkloadPhase::Pending
        }
    }

    fn volume_attached_to(&self, volume_path: &str) -> Option<NodeName> {
        let now = Instant::now();
        let attachment = self.attachments.get(volume_path)?;
        attachment
            .detach_at
            .is_none_or(|at| now < at)
            .then(|| attachment.node.clone())
    }
}

#[async_trait]
impl ProvisioningApi for MemoryCluster {
    async fn create_storage_class(&self, spec: StorageClassSpec) -> Result<(), ApiError> {
        if self.settings.faults.reject_storage_classes {
            return Err(ApiError::Rejected(format!(
                "storage class {} refused by provisioner",
                spec.name
            )));
        }
        if self.storage_classes.contains_key(&spec.name) {
            return Err(ApiError::AlreadyExists(format!("storageclass {}", spec.name)));
        }
        self.log(Operation::CreateStorageClass(spec.name.clone()));
        self.storage_classes.insert(spec.name.clone(), spec);
        Ok(())
    }

    async fn delete_storage_class(&self, name: &str) -> Result<(), ApiError> {
        self.storage_classes
            .remove(name)
            .ok_or_else(|| ApiError::not_found("storageclass", name))?;
        self.log(Operation::DeleteStorageClass(name.to_owned()));
        Ok(())
    }

    async fn create_claim(
        &self,
        namespace: &str,
        req: ClaimRequest,
    ) -> Result<VolumeClaim, ApiError> {
        if self.settings.faults.reject_claims {
            return Err(ApiError::Rejected(format!("claim {} refused", req.name)));
        }
        let fstype = {
            let class = self
                .storage_classes
                .get(&req.storage_class)
                .ok_or_else(|| ApiError::not_found("storageclass", &req.storage_class))?;
            self.resolve_fstype(&class)
        };

        let k = key(namespace, &req.name);
        if self.claims.contains_key(&k) {
            return Err(ApiError::AlreadyExists(format!("claim {}", req.name)));
        }

        let claim = VolumeClaim {
            name: req.name.clone(),
            namespace: namespace.to_owned(),
            size: req.size,
            storage_class: req.storage_class,
            phase: ClaimPhase::Pending,
            volume_name: None,
        };
        self.log(Operation::CreateClaim(req.name));
        self.claims.insert(
            k,
            ClaimRecord {
                claim: claim.clone(),
                fstype,
                created_at: Instant::now(),
            },
        );
        Ok(claim)
    }

    async fn get_claim(&self, namespace: &str, name: &str) -> Result<VolumeClaim, ApiError> {
        self.refresh_claim(&key(namespace, name))
            .ok_or_else(|| ApiError::not_found("claim", name))
    }

    async fn get_volume(&self, name: &str) -> Result<Volume, ApiError> {
        let record = self
            .volumes
            .get(name)
            .ok_or_else(|| ApiError::not_found("volume", name))?;
        let mut volume = record.volume.clone();
        volume.attached_node = self.volume_attached_to(&volume.volume_path);
        Ok(volume)
    }

    async fn delete_claim(&self, namespace: &str, name: &str) -> Result<(), ApiError> {
        let (_, record) = self
            .claims
            .remove(&key(namespace, name))
            .ok_or_else(|| ApiError::not_found("claim", name))?;
        if let Some(volume) = record.claim.volume_name {
            // Reclaim policy Delete: the volume goes with its claim.
            if let Some((_, removed)) = self.volumes.remove(&volume) {
                self.attachments.remove(&removed.volume.volume_path);
            }
        }
        self.log(Operation::DeleteClaim(name.to_owned()));
        Ok(())
    }
}

#[async_trait]
impl WorkloadApi for MemoryCluster {
    async fn create_workload(&self, spec: WorkloadSpec) -> Result<Workload, ApiError> {
        if self.settings.faults.reject_workloads {
            return Err(ApiError::Rejected(format!("workload {} refused", spec.name)));
        }
        let k = key(&spec.namespace, &spec.name);
        if self.workloads.contains_key(&k) {
            return Err(ApiError::AlreadyExists(format!("workload {}", spec.name)));
        }

        let mut volumes = Vec::with_capacity(spec.claims.len());
        for claim in &spec.claims {
            let bound = self
                .refresh_claim(&key(&spec.namespace, claim))
                .ok_or_else(|| ApiError::not_found("claim", claim))?;
            if let Some(volume) = bound.volume_name {
                volumes.push(volume);
            }
        }
        let all_bound = volumes.len() == spec.claims.len();

        let node = match &spec.node_affinity {
            Some(node) => self.settings.nodes.contains(node).then(|| node.clone()),
            None => self.settings.nodes.first().cloned(),
        }
        .filter(|_| all_bound);

        let now = Instant::now();
        let mut mountable = true;
        if let Some(node) = &node {
            for name in &volumes {
                let Some(record) = self.volumes.get(name) else {
                    continue;
                };
                self.attachments.insert(
                    record.volume.volume_path.clone(),
                    Attachment {
                        node: node.clone(),
                        detach_at: None,
                    },
                );
                let supported = self.settings.faults.mount_any_fstype
                    || self.settings.supported_fstypes.contains(&record.fstype);
                if !supported {
                    mountable = false;
                    if !self.settings.faults.suppress_events {
                        self.emit(
                            DiagnosticEvent {
                                namespace: spec.namespace.clone(),
                                target_name: spec.name.clone(),
                                reason: "FailedMount".to_owned(),
                                message: format!(
                                    r#"MountVolume.MountDevice failed for volume "{name}" : executable file not found in $PATH"#
                                ),
                            },
                            now + self.settings.timing.event,
                        );
                    }
                }
            }
        }

        let workload = Workload {
            name: spec.name.clone(),
            namespace: spec.namespace.clone(),
            node_name: node,
            claims: spec.claims,
            command: spec.command,
            phase: WorkloadPhase::Pending,
        };
        self.log(Operation::CreateWorkload(spec.name));
        self.workloads.insert(
            k,
            WorkloadRecord {
                workload: workload.clone(),
                volumes,
                mountable,
                created_at: now,
                deleted_at: None,
            },
        );
        Ok(workload)
    }

    async fn get_workload(&self, namespace: &str, name: &str) -> Result<Workload, ApiError> {
        let k = key(namespace, name);
        if !self.reap_workload(&k) {
            return Err(ApiError::not_found("workload", name));
        }
        let record = self
            .workloads
            .get(&k)
            .ok_or_else(|| ApiError::not_found("workload", name))?;
        let mut workload = record.workload.clone();
        workload.phase = self.phase_of(&record);
        Ok(workload)
    }

    async fn delete_workload(&self, namespace: &str, name: &str) -> Result<(), ApiError> {
        if self.settings.faults.fail_workload_delete {
            return Err(ApiError::Backend(format!(
                "failed to delete workload {name}: api server unavailable"
            )));
        }
        let k = key(namespace, name);
        if !self.reap_workload(&k) {
            return Err(ApiError::not_found("workload", name));
        }
        let mut record = self
            .workloads
            .get_mut(&k)
            .ok_or_else(|| ApiError::not_found("workload", name))?;
        if record.deleted_at.is_some() {
            return Ok(());
        }

        let now = Instant::now();
        record.deleted_at = Some(now);
        if !self.settings.faults.never_detach {
            for volume in &record.volumes {
                let Some(v) = self.volumes.get(volume) else {
                    continue;
                };
                if let Some(mut attachment) = self.attachments.get_mut(&v.volume.volume_path) {
                    attachment.detach_at = Some(now + self.settings.timing.detach);
                }
            }
        }
        drop(record);
        self.log(Operation::DeleteWorkload(name.to_owned()));
        Ok(())
    }

    async fn exec_in_workload(
        &self,
        namespace: &str,
        name: &str,
        command: &[String],
    ) -> Result<String, ApiError> {
        if command.is_empty() {
            return Err(ApiError::exec("empty command"));
        }
        let k = key(namespace, name);
        if !self.reap_workload(&k) {
            return Err(ApiError::not_found("workload", name));
        }
        let record = self
            .workloads
            .get(&k)
            .ok_or_else(|| ApiError::not_found("workload", name))?;

        if self.phase_of(&record) != WorkloadPhase::Running {
            return Err(ApiError::exec(format!("container in workload {name} is not running")));
        }
        let timing = &self.settings.timing;
        let written_at = record.created_at + timing.start + timing.fstype_write;
        if Instant::now() < written_at {
            return Err(ApiError::exec(format!(
                "{}: No such file or directory",
                command.last().map(String::as_str).unwrap_or_default()
            )));
        }

        let faults = &self.settings.faults;
        if let Some(fstype) = &faults.misreport_fstype {
            let misreporting = faults
                .misreport_for
                .is_none_or(|d| written_at.elapsed() < d);
            if misreporting {
                return Ok(format!("{fstype}\n"));
            }
        }
        let fstype = record
            .volumes
            .first()
            .and_then(|v| self.volumes.get(v).map(|r| r.fstype.clone()))
            .unwrap_or_default();
        Ok(format!("{fstype}\n"))
    }
}

#[async_trait]
impl EventApi for MemoryCluster {
    async fn list_events(&self, namespace: &str) -> Result<Vec<DiagnosticEvent>, ApiError> {
        let now = Instant::now();
        Ok(lock(&self.events)
            .iter()
            .filter(|e| e.event.namespace == namespace && e.visible_at <= now)
            .map(|e| e.event.clone())
            .collect())
    }
}

#[async_trait]
impl AttachStateApi for MemoryCluster {
    async fn is_volume_attached(
        &self,
        volume_path: &str,
        node: &NodeName,
    ) -> Result<bool, ApiError> {
        Ok(self.volume_attached_to(volume_path).as_ref() == Some(node))
    }
}

#[async_trait]
impl NodeApi for MemoryCluster {
    async fn list_ready_schedulable_nodes(&self) -> Result<Vec<NodeName>, ApiError> {
        Ok(self.settings.nodes.clone())
    }
}
