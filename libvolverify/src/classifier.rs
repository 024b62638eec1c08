//! Failure Classifier: confirm that an attach failure happened for the
//! expected reason by finding its diagnostic in the namespace's events.
//!
//! A workload that never starts is not, by itself, evidence that the
//! requested filesystem type was the cause.  The classifier requires an event
//! naming both the failed stage and the volume, followed by the root cause:
//!
//! ```text
//! MountVolume.MountDevice failed for volume "<volume-name>" : executable file not found
//! ```

use tracing::{debug, info, instrument};

use crate::config::DiagnosticPattern;
use crate::context::VerifyContext;
use crate::error::{ApiError, VerifyError};
use crate::types::DiagnosticEvent;
use crate::wait::{Probe, WaitError, Waiter};

/// The substring an event message must contain for `volume_name`.
pub fn diagnostic_substring(pattern: &DiagnosticPattern, volume_name: &str) -> String {
    format!(
        r#"{} failed for volume "{}" : {}"#,
        pattern.stage, volume_name, pattern.root_cause
    )
}

fn any_matches(events: &[DiagnosticEvent], substring: &str) -> bool {
    events.iter().any(|event| event.message.contains(substring))
}

/// List the namespace's events once and report whether any message
/// contains `substring`.  An empty event list is a miss.
#[instrument(skip(ctx, substring), fields(namespace = %ctx.namespace()))]
pub async fn confirm_expected_failure(
    ctx: &VerifyContext,
    volume_name: &str,
    substring: &str,
) -> Result<bool, ApiError> {
    let events = ctx.cluster().list_events(ctx.namespace()).await?;
    let found = any_matches(&events, substring);
    debug!(events = events.len(), found, "scanned events");
    Ok(found)
}

/// Re-scan events until the expected diagnostic for `volume_name` shows up,
/// bounded by the diagnostic timeout.
#[instrument(skip(ctx), fields(namespace = %ctx.namespace()))]
pub async fn await_expected_failure(
    ctx: &VerifyContext,
    volume_name: &str,
) -> Result<(), VerifyError> {
    let config = ctx.config();
    let expected = diagnostic_substring(&config.diagnostic, volume_name);
    let waiter = Waiter::new(config.timeouts.diagnostic(), config.timeouts.poll_interval());

    let result = waiter
        .until("expected diagnostic", || async {
            let probe = match confirm_expected_failure(ctx, volume_name, &expected).await {
                Ok(true) => Probe::Ready(()),
                Ok(false) => Probe::NotYet(None),
                // The event pipeline may be briefly unavailable; keep polling.
                Err(e) => Probe::NotYet(Some(e.to_string())),
            };
            Ok::<_, VerifyError>(probe)
        })
        .await;

    match result {
        Ok(()) => {
            info!(volume = %volume_name, "expected mount failure confirmed");
            Ok(())
        }
        Err(WaitError::Timeout { .. }) => Err(VerifyError::ClassificationMiss {
            volume: volume_name.to_owned(),
            expected,
        }),
        Err(WaitError::Failed(e)) => Err(e),
    }
}
