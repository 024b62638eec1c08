//! Workload Attacher: run a workload that mounts the claim on a pinned node.

use tracing::{info, instrument, warn};

use crate::context::VerifyContext;
use crate::error::{ApiError, AttachError, VerifyError};
use crate::types::{NodeName, Volume, VolumeClaim, Workload, WorkloadPhase, WorkloadSpec};
use crate::wait::{Probe, WaitError, Waiter};

/// Pick the node workloads are pinned to: the configured node if any,
/// otherwise the first ready, schedulable node.
pub async fn resolve_node(ctx: &VerifyContext) -> Result<NodeName, VerifyError> {
    if let Some(node) = &ctx.config().node_name {
        return Ok(NodeName::from(node.as_str()));
    }
    ctx.cluster()
        .list_ready_schedulable_nodes()
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| {
            VerifyError::Precondition("Unable to find ready and schedulable Node".to_owned())
        })
}

/// Create a workload mounting `claim` and running `command`, then wait for
/// it to reach [`WorkloadPhase::Running`].
///
/// The returned [`AttachError`] names the workload whenever one was created,
/// so the caller can tear it down; whether the error is expected is the
/// caller's decision.
#[instrument(skip(ctx, command), fields(namespace = %ctx.namespace(), claim = %claim.name))]
pub async fn attach_workload(
    ctx: &VerifyContext,
    claim: &VolumeClaim,
    command: &str,
) -> Result<Workload, AttachError> {
    let node = resolve_node(ctx).await.map_err(|e| AttachError {
        workload: None,
        node: None,
        reason: e.to_string(),
    })?;

    let spec = WorkloadSpec {
        name: ctx.generate_name(&ctx.config().workload_prefix),
        namespace: ctx.namespace().to_owned(),
        claims: vec![claim.name.clone()],
        mount_path: ctx.config().mount_path.clone(),
        command: command.to_owned(),
        node_affinity: Some(node.clone()),
    };
    let name = spec.name.clone();

    ctx.cluster()
        .create_workload(spec)
        .await
        .map_err(|e| AttachError {
            workload: None,
            node: None,
            reason: format!("create workload {name}: {e}"),
        })?;
    info!(workload = %name, %node, "workload created");

    let timeouts = &ctx.config().timeouts;
    let waiter = Waiter::new(timeouts.workload_start(), timeouts.poll_interval());
    let started = waiter
        .until("workload running", || probe_running(ctx, &name))
        .await;

    match started {
        Ok(workload) => {
            info!(workload = %name, node = ?workload.node_name, "workload running");
            Ok(workload)
        }
        Err(e) => {
            let reason = match e {
                WaitError::Timeout {
                    waited,
                    last_observed,
                } => format!(
                    "not running after {waited:?} (last phase: {})",
                    last_observed.as_deref().unwrap_or("unknown")
                ),
                WaitError::Failed(reason) => reason,
            };
            let node = scheduled_node(ctx, &name).await;
            warn!(workload = %name, ?node, %reason, "workload did not start");
            Err(AttachError {
                workload: Some(name),
                node,
                reason,
            })
        }
    }
}

async fn probe_running(ctx: &VerifyContext, name: &str) -> Result<Probe<Workload>, String> {
    match ctx.cluster().get_workload(ctx.namespace(), name).await {
        Ok(w) if w.phase == WorkloadPhase::Running => Ok(Probe::Ready(w)),
        Ok(w) if matches!(w.phase, WorkloadPhase::Failed | WorkloadPhase::Succeeded) => {
            Err(format!("workload reached phase {:?}", w.phase))
        }
        Ok(w) => Ok(Probe::NotYet(Some(format!("{:?}", w.phase)))),
        Err(e) if e.is_not_found() => Err(format!("workload {name} disappeared")),
        Err(e) => Ok(Probe::NotYet(Some(e.to_string()))),
    }
}

/// The node the scheduler actually placed the workload on, if it got that far.
async fn scheduled_node(ctx: &VerifyContext, name: &str) -> Option<NodeName> {
    match ctx.cluster().get_workload(ctx.namespace(), name).await {
        Ok(w) => w.node_name,
        Err(ApiError::NotFound { .. }) => None,
        Err(e) => {
            warn!(workload = %name, error = %e, "failed to look up workload node");
            None
        }
    }
}

/// Check that every volume is attached to the node `workload` runs on.
#[instrument(skip_all, fields(workload = %workload.name))]
pub async fn verify_attached(
    ctx: &VerifyContext,
    workload: &Workload,
    volumes: &[Volume],
) -> Result<(), VerifyError> {
    let Some(node) = &workload.node_name else {
        return Err(VerifyError::Unscheduled {
            workload: workload.name.clone(),
        });
    };

    for volume in volumes {
        if !ctx
            .cluster()
            .is_volume_attached(&volume.volume_path, node)
            .await?
        {
            return Err(VerifyError::NotAttached {
                volume_path: volume.volume_path.clone(),
                node: node.clone(),
            });
        }
        info!(volume_path = %volume.volume_path, %node, "volume attached");
    }
    Ok(())
}
