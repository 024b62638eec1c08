//! Volume Provisioner: storage class → claim → bound volume.

use std::collections::HashMap;

use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::context::VerifyContext;
use crate::error::{ApiError, VerifyError};
use crate::types::{ClaimPhase, ClaimRequest, StorageClassSpec, Volume, VolumeClaim};
use crate::wait::{Probe, WaitError, Waiter};

/// Provisioning failed.  `claim` is set when the claim was created before the
/// failure, so the caller can still delete it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{error}")]
pub struct ProvisionFailure {
    pub claim: Option<VolumeClaim>,
    pub error: VerifyError,
}

impl ProvisionFailure {
    fn before_claim(error: VerifyError) -> Self {
        Self { claim: None, error }
    }
}

/// Create a storage class with `parameters`, a claim against it, and wait
/// for the claim to bind.
///
/// The storage class is deleted as soon as the claim exists (or claim
/// creation failed); the claim alone carries its effect from then on.
#[instrument(skip(ctx), fields(namespace = %ctx.namespace()))]
pub async fn create_volume(
    ctx: &VerifyContext,
    parameters: HashMap<String, String>,
) -> Result<(VolumeClaim, Vec<Volume>), ProvisionFailure> {
    let config = ctx.config();
    let class = StorageClassSpec::new(ctx.generate_name(&config.storage_class_prefix), parameters);
    let class_name = class.name.clone();

    ctx.cluster()
        .create_storage_class(class)
        .await
        .map_err(|e| ProvisionFailure::before_claim(rejected("storage class", &class_name, e)))?;
    info!(storage_class = %class_name, "storage class created");

    let request = ClaimRequest {
        name: ctx.generate_name(&config.claim_prefix),
        size: config.claim_size.clone(),
        storage_class: class_name.clone(),
    };
    let claim_name = request.name.clone();
    let created = ctx.cluster().create_claim(ctx.namespace(), request).await;

    delete_storage_class(ctx, &class_name).await;

    let claim = created
        .map_err(|e| ProvisionFailure::before_claim(rejected("claim", &claim_name, e)))?;
    info!(claim = %claim.name, size = %claim.size, "claim created");

    match wait_for_claims_bound(ctx, std::slice::from_ref(&claim)).await {
        Ok(volumes) => Ok((claim, volumes)),
        Err(error) => Err(ProvisionFailure {
            claim: Some(claim),
            error,
        }),
    }
}

/// Wait for every claim to reach [`ClaimPhase::Bound`] and return the bound
/// volumes in claim order.
#[instrument(skip_all, fields(namespace = %ctx.namespace(), claims = claims.len()))]
pub async fn wait_for_claims_bound(
    ctx: &VerifyContext,
    claims: &[VolumeClaim],
) -> Result<Vec<Volume>, VerifyError> {
    let timeouts = &ctx.config().timeouts;
    let waiter = Waiter::new(timeouts.claim_provision(), timeouts.poll_interval());

    let mut volumes = Vec::with_capacity(claims.len());
    for claim in claims {
        let volume_name = waiter
            .until("claim bound", || probe_claim(ctx, &claim.name))
            .await
            .map_err(|e| match e {
                WaitError::Timeout { waited, .. } => VerifyError::ProvisioningTimeout {
                    claim: claim.name.clone(),
                    waited,
                },
                WaitError::Failed(err) => err,
            })?;

        let volume = ctx.cluster().get_volume(&volume_name).await?;
        info!(
            claim = %claim.name,
            volume = %volume.name,
            volume_path = %volume.volume_path,
            "claim bound",
        );
        volumes.push(volume);
    }
    Ok(volumes)
}

async fn probe_claim(ctx: &VerifyContext, name: &str) -> Result<Probe<String>, VerifyError> {
    let claim = match ctx.cluster().get_claim(ctx.namespace(), name).await {
        Ok(claim) => claim,
        Err(e) if e.is_not_found() => {
            return Err(VerifyError::ProvisioningRejected {
                reason: format!("claim {name} disappeared while waiting for bind"),
            });
        }
        // Transient API failures do not end the wait.
        Err(e) => return Ok(Probe::NotYet(Some(e.to_string()))),
    };

    match (claim.phase, claim.volume_name) {
        (ClaimPhase::Bound, Some(volume)) => Ok(Probe::Ready(volume)),
        (ClaimPhase::Failed, _) => Err(VerifyError::ProvisioningRejected {
            reason: format!("claim {name} failed to provision"),
        }),
        (phase, _) => Ok(Probe::NotYet(Some(format!("{phase:?}")))),
    }
}

async fn delete_storage_class(ctx: &VerifyContext, name: &str) {
    match ctx.cluster().delete_storage_class(name).await {
        Ok(()) => info!(storage_class = %name, "storage class deleted"),
        Err(e) if e.is_not_found() => {}
        Err(e) => warn!(storage_class = %name, error = %e, "failed to delete storage class"),
    }
}

fn rejected(kind: &str, name: &str, e: ApiError) -> VerifyError {
    VerifyError::ProvisioningRejected {
        reason: format!("{kind} {name}: {e}"),
    }
}
