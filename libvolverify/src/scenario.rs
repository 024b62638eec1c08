//! Scenario Driver.
//!
//! Each scenario is a small state machine:
//!
//! ```text
//! Provisioning → Attaching → Verifying | Classifying → TearingDown → Done
//! ```
//!
//! A failure in any state jumps straight to `TearingDown`; no path reaches
//! `Done` without it.  The primary error (if any) and the teardown report are
//! both kept in the [`ScenarioResult`].

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::attacher::{attach_workload, verify_attached};
use crate::classifier::await_expected_failure;
use crate::config::VerifyConfig;
use crate::context::VerifyContext;
use crate::error::{ApiError, AttachError, TeardownError, VerifyError};
use crate::provisioner::create_volume;
use crate::teardown::{ScenarioResources, TeardownReport, teardown};
use crate::types::{EXT3_FSTYPE, INVALID_FSTYPE, Workload, fstype_parameters};
use crate::verifier::verify_fstype;

/// One of the three verification scenarios.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Scenario {
    /// Request `fstype` and expect the workload to observe `expected_content`.
    ValidType {
        fstype: String,
        expected_content: String,
    },
    /// Request no fstype and expect the configured default label.
    DefaultType,
    /// Request an unsupported `fstype` and expect the mount to fail with the
    /// configured diagnostic.
    InvalidType { fstype: String },
}

impl Scenario {
    pub fn valid_type(fstype: impl Into<String>, expected_content: impl Into<String>) -> Self {
        Self::ValidType {
            fstype: fstype.into(),
            expected_content: expected_content.into(),
        }
    }

    pub fn invalid_type(fstype: impl Into<String>) -> Self {
        Self::InvalidType {
            fstype: fstype.into(),
        }
    }

    /// ext3 formatted volume, default (ext4) volume, invalid `ext10` volume.
    pub fn standard_set() -> Vec<Self> {
        vec![
            Self::valid_type(EXT3_FSTYPE, EXT3_FSTYPE),
            Self::DefaultType,
            Self::invalid_type(INVALID_FSTYPE),
        ]
    }

    /// The `fstype` storage class parameter this scenario requests.
    pub fn fstype(&self) -> &str {
        match self {
            Self::ValidType { fstype, .. } | Self::InvalidType { fstype } => fstype,
            Self::DefaultType => "",
        }
    }

    pub fn name(&self, config: &VerifyConfig) -> String {
        match self {
            Self::ValidType { fstype, .. } => format!("verify fstype - {fstype} formatted volume"),
            Self::DefaultType => format!(
                "verify fstype - default value should be {}",
                config.default_fstype
            ),
            Self::InvalidType { fstype } => format!("verify invalid fstype {fstype}"),
        }
    }
}

/// Final verdict of a scenario.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail,
}

/// States of the scenario state machine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ScenarioState {
    Provisioning,
    Attaching,
    Verifying,
    Classifying,
    TearingDown,
    Done(Verdict),
}

/// Outcome of one scenario run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScenarioResult {
    pub scenario: String,
    pub verdict: Verdict,
    /// States visited, in order.
    pub trace: Vec<ScenarioState>,
    /// The first fatal error.
    pub error: Option<VerifyError>,
    pub teardown: TeardownReport,
}

impl ScenarioResult {
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }

    pub fn teardown_errors(&self) -> &[TeardownError] {
        &self.teardown.errors
    }

    /// The primary error first, then teardown errors as secondary
    /// diagnostics.
    pub fn diagnostics(&self) -> Vec<String> {
        self.error
            .iter()
            .map(ToString::to_string)
            .chain(self.teardown.errors.iter().map(ToString::to_string))
            .collect()
    }
}

struct ScenarioRun {
    trace: Vec<ScenarioState>,
    resources: ScenarioResources,
}

impl ScenarioRun {
    fn enter(&mut self, state: ScenarioState) {
        info!(?state, "scenario state");
        self.trace.push(state);
    }

    fn track_workload(&mut self, workload: &Workload) {
        self.resources.workload = Some(workload.name.clone());
        self.resources.node = workload.node_name.clone();
    }

    fn track_failed_attach(&mut self, err: &AttachError) {
        self.resources.workload = err.workload.clone();
        self.resources.node = err.node.clone();
    }
}

/// Run one scenario to completion.  Never returns early without tearing
/// down what was created.
#[instrument(skip(ctx), fields(namespace = %ctx.namespace()))]
pub async fn run_scenario(ctx: &VerifyContext, scenario: &Scenario) -> ScenarioResult {
    let name = scenario.name(ctx.config());
    info!(scenario = %name, fstype = %scenario.fstype(), "scenario started");

    let mut run = ScenarioRun {
        trace: Vec::new(),
        resources: ScenarioResources::default(),
    };

    let outcome = execute(ctx, scenario, &mut run).await;
    if let Err(e) = &outcome {
        warn!(scenario = %name, error = %e, "scenario step failed");
    }

    run.enter(ScenarioState::TearingDown);
    let report = teardown(ctx, &run.resources).await;

    let verdict = if outcome.is_ok() && report.is_clean() {
        Verdict::Pass
    } else {
        Verdict::Fail
    };
    run.enter(ScenarioState::Done(verdict));
    info!(scenario = %name, ?verdict, "scenario finished");

    ScenarioResult {
        scenario: name,
        verdict,
        trace: run.trace,
        error: outcome.err(),
        teardown: report,
    }
}

async fn execute(
    ctx: &VerifyContext,
    scenario: &Scenario,
    run: &mut ScenarioRun,
) -> Result<(), VerifyError> {
    run.enter(ScenarioState::Provisioning);
    let (claim, volumes) = match create_volume(ctx, fstype_parameters(scenario.fstype())).await {
        Ok(provisioned) => provisioned,
        Err(failure) => {
            run.resources.claim = failure.claim.map(|c| c.name);
            return Err(failure.error);
        }
    };
    run.resources.claim = Some(claim.name.clone());

    let volume = volumes
        .first()
        .ok_or_else(|| VerifyError::ProvisioningRejected {
            reason: format!("claim {} bound without a volume", claim.name),
        })?;
    run.resources.volume_path = Some(volume.volume_path.clone());

    run.enter(ScenarioState::Attaching);
    let attached = attach_workload(ctx, &claim, &ctx.config().workload_command).await;

    match scenario {
        Scenario::ValidType { .. } | Scenario::DefaultType => {
            let workload = attached.inspect_err(|e| run.track_failed_attach(e))?;
            run.track_workload(&workload);

            run.enter(ScenarioState::Verifying);
            verify_attached(ctx, &workload, &volumes).await?;
            let expected = match scenario {
                Scenario::ValidType {
                    expected_content, ..
                } => expected_content.as_str(),
                _ => ctx.config().default_fstype.as_str(),
            };
            verify_fstype(ctx, &workload, expected).await
        }
        Scenario::InvalidType { .. } => {
            match attached {
                Ok(workload) => {
                    run.track_workload(&workload);
                    return Err(VerifyError::UnexpectedAttach {
                        workload: workload.name,
                    });
                }
                Err(e) => {
                    info!(reason = %e.reason, "workload failed to start as expected");
                    run.track_failed_attach(&e);
                }
            }

            run.enter(ScenarioState::Classifying);
            await_expected_failure(ctx, &volume.name).await
        }
    }
}

/// Fail fast when the cluster has nowhere to run workloads.
pub async fn check_preconditions(ctx: &VerifyContext) -> Result<(), VerifyError> {
    let nodes = ctx.cluster().list_ready_schedulable_nodes().await?;
    if nodes.is_empty() {
        return Err(VerifyError::Precondition(
            "Unable to find ready and schedulable Node".to_owned(),
        ));
    }
    info!(nodes = nodes.len(), "found ready schedulable nodes");
    Ok(())
}

/// Results of a suite run, in scenario order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SuiteReport {
    pub results: Vec<ScenarioResult>,
}

impl SuiteReport {
    pub fn passed(&self) -> bool {
        self.results.iter().all(ScenarioResult::passed)
    }

    pub fn failed(&self) -> impl Iterator<Item = &ScenarioResult> {
        self.results.iter().filter(|r| !r.passed())
    }
}

/// Check preconditions, then run every scenario, one after another or each
/// on its own Tokio task.
#[instrument(
    skip(ctx, scenarios),
    fields(namespace = %ctx.namespace(), scenarios = scenarios.len()),
)]
pub async fn run_suite(
    ctx: &VerifyContext,
    scenarios: Vec<Scenario>,
    concurrent: bool,
) -> Result<SuiteReport, VerifyError> {
    check_preconditions(ctx).await?;

    let mut results = Vec::with_capacity(scenarios.len());
    if concurrent {
        let handles: Vec<_> = scenarios
            .into_iter()
            .map(|scenario| {
                let ctx = ctx.clone();
                let name = scenario.name(ctx.config());
                let handle = tokio::spawn(async move { run_scenario(&ctx, &scenario).await });
                (name, handle)
            })
            .collect();

        for (name, handle) in handles {
            results.push(handle.await.unwrap_or_else(|e| aborted(name, &e)));
        }
    } else {
        for scenario in &scenarios {
            results.push(run_scenario(ctx, scenario).await);
        }
    }

    let report = SuiteReport { results };
    info!(passed = report.passed(), "suite finished");
    Ok(report)
}

fn aborted(scenario: String, e: &tokio::task::JoinError) -> ScenarioResult {
    ScenarioResult {
        scenario,
        verdict: Verdict::Fail,
        trace: Vec::new(),
        error: Some(VerifyError::Api(ApiError::backend(format!(
            "scenario task aborted: {e}"
        )))),
        teardown: TeardownReport::default(),
    }
}
