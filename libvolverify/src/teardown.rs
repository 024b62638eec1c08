//! Teardown Sequencer.
//!
//! Releases what a scenario created, in order:
//!
//! 1. delete the workload and wait until it is gone,
//! 2. wait until the volume is no longer attached to the workload's node,
//! 3. delete the claim.
//!
//! Every step is attempted even when an earlier one failed, and an object
//! that is already gone counts as released.  Running teardown twice over the
//! same resources is therefore harmless.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::context::VerifyContext;
use crate::error::{ApiError, TeardownError, TeardownStep, VerifyError};
use crate::types::NodeName;
use crate::wait::{Probe, WaitError, Waiter};

/// Everything a scenario has created so far.  Fields are filled in as the
/// scenario progresses; teardown skips the steps whose inputs are missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScenarioResources {
    pub workload: Option<String>,
    /// Node the workload was scheduled on.  Without it there is nothing to
    /// wait for a detach from.
    pub node: Option<NodeName>,
    pub claim: Option<String>,
    pub volume_path: Option<String>,
}

/// Outcome of a teardown run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TeardownReport {
    pub completed: Vec<TeardownStep>,
    pub skipped: Vec<TeardownStep>,
    pub errors: Vec<TeardownError>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_result(self) -> Result<(), VerifyError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(VerifyError::Teardown(self.errors))
        }
    }

    fn record(&mut self, step: TeardownStep, outcome: Result<(), String>) {
        match outcome {
            Ok(()) => self.completed.push(step),
            Err(reason) => {
                warn!(%step, %reason, "teardown step failed");
                self.errors.push(TeardownError { step, reason });
            }
        }
    }

    fn skip(&mut self, step: TeardownStep) {
        debug!(%step, "nothing to do, skipping");
        self.skipped.push(step);
    }
}

/// Release `resources`.  Never fails early: every error is collected in the
/// returned report.
#[instrument(skip_all, fields(namespace = %ctx.namespace()))]
pub async fn teardown(ctx: &VerifyContext, resources: &ScenarioResources) -> TeardownReport {
    let mut report = TeardownReport::default();
    let timeouts = &ctx.config().timeouts;

    match &resources.workload {
        Some(name) => {
            report.record(TeardownStep::DeleteWorkload, delete_workload(ctx, name).await);
            let waiter = Waiter::new(timeouts.workload_delete(), timeouts.poll_interval());
            report.record(
                TeardownStep::AwaitWorkloadGone,
                await_workload_gone(ctx, &waiter, name).await,
            );
        }
        None => {
            report.skip(TeardownStep::DeleteWorkload);
            report.skip(TeardownStep::AwaitWorkloadGone);
        }
    }

    match (&resources.volume_path, &resources.node) {
        (Some(volume_path), Some(node)) => {
            let waiter = Waiter::new(timeouts.detach(), timeouts.poll_interval());
            report.record(
                TeardownStep::AwaitDetach,
                await_detach(ctx, &waiter, volume_path, node).await,
            );
        }
        _ => report.skip(TeardownStep::AwaitDetach),
    }

    match &resources.claim {
        Some(name) => report.record(TeardownStep::DeleteClaim, delete_claim(ctx, name).await),
        None => report.skip(TeardownStep::DeleteClaim),
    }

    info!(
        completed = report.completed.len(),
        skipped = report.skipped.len(),
        errors = report.errors.len(),
        "teardown finished",
    );
    report
}

fn tolerate_not_found(result: Result<(), ApiError>) -> Result<(), String> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}

async fn delete_workload(ctx: &VerifyContext, name: &str) -> Result<(), String> {
    tolerate_not_found(ctx.cluster().delete_workload(ctx.namespace(), name).await)?;
    info!(workload = %name, "workload deletion requested");
    Ok(())
}

async fn await_workload_gone(
    ctx: &VerifyContext,
    waiter: &Waiter,
    name: &str,
) -> Result<(), String> {
    let result = waiter
        .until("workload removed", || async {
            let probe = match ctx.cluster().get_workload(ctx.namespace(), name).await {
                Err(e) if e.is_not_found() => Probe::Ready(()),
                Err(e) => Probe::NotYet(Some(e.to_string())),
                Ok(w) => Probe::NotYet(Some(format!("{:?}", w.phase))),
            };
            Ok::<_, String>(probe)
        })
        .await;
    finish_wait(result, "workload still present")?;
    info!(workload = %name, "workload removed");
    Ok(())
}

async fn await_detach(
    ctx: &VerifyContext,
    waiter: &Waiter,
    volume_path: &str,
    node: &NodeName,
) -> Result<(), String> {
    let result = waiter
        .until("volume detached", || async {
            let probe = match ctx.cluster().is_volume_attached(volume_path, node).await {
                Ok(false) => Probe::Ready(()),
                Ok(true) => Probe::NotYet(Some("attached".to_owned())),
                Err(e) => Probe::NotYet(Some(e.to_string())),
            };
            Ok::<_, String>(probe)
        })
        .await;
    finish_wait(result, "volume still attached")?;
    info!(%volume_path, %node, "volume detached");
    Ok(())
}

async fn delete_claim(ctx: &VerifyContext, name: &str) -> Result<(), String> {
    tolerate_not_found(ctx.cluster().delete_claim(ctx.namespace(), name).await)?;
    info!(claim = %name, "claim deleted");
    Ok(())
}

fn finish_wait(result: Result<(), WaitError<String>>, what: &str) -> Result<(), String> {
    match result {
        Ok(()) => Ok(()),
        Err(WaitError::Timeout {
            waited,
            last_observed,
        }) => Err(match last_observed {
            Some(observed) => format!("{what} after {waited:?} ({observed})"),
            None => format!("{what} after {waited:?}"),
        }),
        Err(WaitError::Failed(reason)) => Err(reason),
    }
}
