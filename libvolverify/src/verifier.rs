//! Mount Verifier: read the detected filesystem type from inside the
//! workload and compare it with the expected label.

use tracing::{debug, info, instrument};

use crate::context::VerifyContext;
use crate::error::VerifyError;
use crate::types::Workload;
use crate::wait::{Probe, WaitError, Waiter};

/// Placeholder for `actual` when nothing was ever read.
pub const NO_OUTPUT: &str = "<no output>";

/// Poll the configured read command inside `workload` until its trimmed
/// output equals `expected`.
///
/// Exec failures and empty output are tolerated until the deadline: the
/// workload's start-up command may not have written the file yet.
#[instrument(skip(ctx, workload), fields(workload = %workload.name))]
pub async fn verify_fstype(
    ctx: &VerifyContext,
    workload: &Workload,
    expected: &str,
) -> Result<(), VerifyError> {
    let config = ctx.config();
    let waiter = Waiter::new(config.timeouts.fstype_read(), config.timeouts.poll_interval());

    let result = waiter
        .until("fstype content", || async {
            let probe = match ctx
                .cluster()
                .exec_in_workload(&workload.namespace, &workload.name, &config.read_command)
                .await
            {
                Ok(stdout) => match stdout.trim() {
                    observed if observed == expected => Probe::Ready(()),
                    "" => Probe::NotYet(None),
                    observed => Probe::NotYet(Some(observed.to_owned())),
                },
                Err(e) => {
                    debug!(error = %e, "exec failed, retrying");
                    Probe::NotYet(None)
                }
            };
            Ok::<_, VerifyError>(probe)
        })
        .await;

    match result {
        Ok(()) => {
            info!(fstype = %expected, "filesystem type verified");
            Ok(())
        }
        Err(WaitError::Timeout { last_observed, .. }) => Err(VerifyError::Mismatch {
            expected: expected.to_owned(),
            actual: last_observed.unwrap_or_else(|| NO_OUTPUT.to_owned()),
        }),
        Err(WaitError::Failed(e)) => Err(e),
    }
}
