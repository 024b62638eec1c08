//! Bounded-timeout polling.
//!
//! Every asynchronous convergence the workflow depends on (claim binding,
//! workload start, fstype file content, event delivery, workload removal,
//! volume detach) is awaited through [`Waiter::until`].  The caller supplies
//! a probe; the waiter sleeps `interval` between probes and gives up once the
//! deadline is reached.  A condition first observed at or after the deadline
//! is a timeout, never a success.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// Outcome of a single probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe<T> {
    /// The condition holds.
    Ready(T),
    /// Not yet; optionally with what was observed, kept for the timeout
    /// error.
    NotYet(Option<String>),
}

/// Why a wait ended without the condition holding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitError<E> {
    /// The deadline elapsed.
    Timeout {
        waited: Duration,
        /// Most recent observation passed with [`Probe::NotYet`].
        last_observed: Option<String>,
    },
    /// The probe reported a fatal error.
    Failed(E),
}

/// A deadline plus a poll interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Waiter {
    timeout: Duration,
    interval: Duration,
}

impl Waiter {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Probe until the condition holds strictly before the deadline.
    ///
    /// The probe decides which errors are fatal: returning `Err` ends the
    /// wait immediately with [`WaitError::Failed`], while transient failures
    /// should be mapped to [`Probe::NotYet`].
    pub async fn until<T, E, F, Fut>(&self, what: &str, mut probe: F) -> Result<T, WaitError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Probe<T>, E>>,
    {
        let start = Instant::now();
        let deadline = start + self.timeout;
        let mut last_observed = None;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let outcome = probe().await.map_err(WaitError::Failed)?;
            let now = Instant::now();

            match outcome {
                Probe::Ready(value) if now < deadline => {
                    debug!(what, attempts, elapsed = ?(now - start), "condition met");
                    return Ok(value);
                }
                Probe::Ready(_) => {}
                Probe::NotYet(observed) => {
                    if observed.is_some() {
                        last_observed = observed;
                    }
                }
            }

            if now >= deadline {
                debug!(what, attempts, ?last_observed, "wait timed out");
                return Err(WaitError::Timeout {
                    waited: now - start,
                    last_observed,
                });
            }

            debug!(what, attempts, ?last_observed, "condition not met, retrying");
            tokio::time::sleep(self.interval.min(deadline - now)).await;
        }
    }
}
