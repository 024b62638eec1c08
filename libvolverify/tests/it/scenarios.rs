use std::time::Duration;

use libvolverify::backend::memory::{Faults, MemorySettings, Operation, Timing};
use libvolverify::error::{TeardownStep, VerifyError};
use libvolverify::scenario::ScenarioState;
use libvolverify::verifier::NO_OUTPUT;
use libvolverify::{Scenario, Verdict, run_scenario};

use crate::common::*;

#[tokio::test(start_paused = true)]
async fn ext3_volume_is_formatted_ext3() {
    let cluster = cluster();
    let ctx = context(&cluster);

    let result = run_scenario(&ctx, &Scenario::valid_type("ext3", "ext3")).await;

    assert!(result.passed(), "{:?}", result.diagnostics());
    assert_eq!(result.scenario, "verify fstype - ext3 formatted volume");
    assert_eq!(
        result.trace,
        vec![
            ScenarioState::Provisioning,
            ScenarioState::Attaching,
            ScenarioState::Verifying,
            ScenarioState::TearingDown,
            ScenarioState::Done(Verdict::Pass),
        ]
    );
    assert_eq!(
        result.teardown.completed,
        vec![
            TeardownStep::DeleteWorkload,
            TeardownStep::AwaitWorkloadGone,
            TeardownStep::AwaitDetach,
            TeardownStep::DeleteClaim,
        ]
    );
    assert_released(&cluster);
}

#[tokio::test(start_paused = true)]
async fn empty_fstype_defaults_to_ext4() {
    let cluster = cluster();
    let ctx = context(&cluster);

    let result = run_scenario(&ctx, &Scenario::DefaultType).await;

    assert!(result.passed(), "{:?}", result.diagnostics());
    assert_eq!(result.scenario, "verify fstype - default value should be ext4");
    assert_released(&cluster);
}

#[tokio::test(start_paused = true)]
async fn unexpected_backend_default_is_a_mismatch() {
    let cluster = cluster_with(MemorySettings {
        default_fstype: "xfs".into(),
        ..MemorySettings::default()
    });
    let ctx = context(&cluster);

    let result = run_scenario(&ctx, &Scenario::DefaultType).await;

    assert_eq!(result.verdict, Verdict::Fail);
    assert_eq!(
        result.error,
        Some(VerifyError::Mismatch {
            expected: "ext4".into(),
            actual: "xfs".into(),
        })
    );
    assert!(result.teardown.is_clean());
    assert_released(&cluster);
}

#[tokio::test(start_paused = true)]
async fn invalid_fstype_fails_to_mount_with_diagnostic() {
    let cluster = cluster();
    let ctx = context(&cluster);

    let result = run_scenario(&ctx, &Scenario::invalid_type("ext10")).await;

    assert!(result.passed(), "{:?}", result.diagnostics());
    assert_eq!(result.scenario, "verify invalid fstype ext10");
    assert_eq!(
        result.trace,
        vec![
            ScenarioState::Provisioning,
            ScenarioState::Attaching,
            ScenarioState::Classifying,
            ScenarioState::TearingDown,
            ScenarioState::Done(Verdict::Pass),
        ]
    );
    // The disk attached before the mount failed, so teardown waited for the
    // detach too.
    assert!(result.teardown.completed.contains(&TeardownStep::AwaitDetach));
    assert_released(&cluster);
}

#[tokio::test(start_paused = true)]
async fn invalid_fstype_without_diagnostic_is_a_miss() {
    let cluster = cluster_with_faults(Faults {
        suppress_events: true,
        ..Faults::default()
    });
    let ctx = context(&cluster);

    let result = run_scenario(&ctx, &Scenario::invalid_type("ext10")).await;

    assert_eq!(result.verdict, Verdict::Fail);
    assert!(
        matches!(result.error, Some(VerifyError::ClassificationMiss { .. })),
        "{:?}",
        result.error
    );
    assert_released(&cluster);
}

#[tokio::test(start_paused = true)]
async fn invalid_fstype_that_mounts_is_unexpected() {
    let cluster = cluster_with_faults(Faults {
        mount_any_fstype: true,
        ..Faults::default()
    });
    let ctx = context(&cluster);

    let result = run_scenario(&ctx, &Scenario::invalid_type("ext10")).await;

    assert_eq!(result.verdict, Verdict::Fail);
    assert!(matches!(
        result.error,
        Some(VerifyError::UnexpectedAttach { .. })
    ));
    assert!(!result.trace.contains(&ScenarioState::Classifying));
    assert_released(&cluster);
}

#[tokio::test(start_paused = true)]
async fn valid_fstype_that_never_mounts_fails_attach() {
    let cluster = cluster();
    let ctx = context(&cluster);

    // The nodes have no mkfs for this type, so the workload never runs.
    let result = run_scenario(&ctx, &Scenario::valid_type("btrfs", "btrfs")).await;

    assert_eq!(result.verdict, Verdict::Fail);
    let Some(VerifyError::Attach(err)) = &result.error else {
        panic!("expected attach error, got {:?}", result.error);
    };
    assert!(err.workload.is_some());
    assert!(err.reason.contains("Pending"), "{}", err.reason);
    assert!(!result.trace.contains(&ScenarioState::Verifying));
    assert_released(&cluster);
}

#[tokio::test(start_paused = true)]
async fn unbound_claim_times_out_and_is_still_deleted() {
    let cluster = cluster_with_faults(Faults {
        never_bind: true,
        ..Faults::default()
    });
    let ctx = context(&cluster);

    let result = run_scenario(&ctx, &Scenario::valid_type("ext3", "ext3")).await;

    assert!(matches!(
        result.error,
        Some(VerifyError::ProvisioningTimeout { .. })
    ));
    assert_eq!(
        result.trace,
        vec![
            ScenarioState::Provisioning,
            ScenarioState::TearingDown,
            ScenarioState::Done(Verdict::Fail),
        ]
    );
    assert_eq!(result.teardown.completed, vec![TeardownStep::DeleteClaim]);
    assert_eq!(
        result.teardown.skipped,
        vec![
            TeardownStep::DeleteWorkload,
            TeardownStep::AwaitWorkloadGone,
            TeardownStep::AwaitDetach,
        ]
    );
    assert_released(&cluster);
}

#[tokio::test(start_paused = true)]
async fn storage_class_is_deleted_right_after_claim_creation() {
    let cluster = cluster();
    let ctx = context(&cluster);

    let result = run_scenario(&ctx, &Scenario::DefaultType).await;
    assert!(result.passed());

    let ops = cluster.operations();
    assert!(matches!(ops[0], Operation::CreateStorageClass(_)));
    assert!(matches!(ops[1], Operation::CreateClaim(_)));
    assert!(matches!(ops[2], Operation::DeleteStorageClass(_)));
    assert!(matches!(ops[3], Operation::CreateWorkload(_)));
    assert!(matches!(ops[4], Operation::DeleteWorkload(_)));
    assert!(matches!(ops[5], Operation::DeleteClaim(_)));
    assert_eq!(ops.len(), 6);
}

#[tokio::test(start_paused = true)]
async fn teardown_errors_do_not_replace_primary_error() {
    let cluster = cluster_with_faults(Faults {
        misreport_fstype: Some("ext2".into()),
        fail_workload_delete: true,
        ..Faults::default()
    });
    let ctx = context(&cluster);

    let result = run_scenario(&ctx, &Scenario::valid_type("ext3", "ext3")).await;

    assert_eq!(result.verdict, Verdict::Fail);
    assert_eq!(
        result.error,
        Some(VerifyError::Mismatch {
            expected: "ext3".into(),
            actual: "ext2".into(),
        })
    );
    let failed: Vec<_> = result.teardown_errors().iter().map(|e| e.step).collect();
    assert_eq!(
        failed,
        vec![
            TeardownStep::DeleteWorkload,
            TeardownStep::AwaitWorkloadGone,
            TeardownStep::AwaitDetach,
        ]
    );
    // The claim is released even though everything before it failed.
    assert_eq!(result.teardown.completed, vec![TeardownStep::DeleteClaim]);

    let diagnostics = result.diagnostics();
    assert_eq!(diagnostics.len(), 4);
    assert!(diagnostics[0].starts_with("fstype mismatch"));
}

#[tokio::test(start_paused = true)]
async fn passing_checks_with_failed_teardown_fail_the_scenario() {
    let cluster = cluster_with_faults(Faults {
        never_detach: true,
        ..Faults::default()
    });
    let ctx = context(&cluster);

    let result = run_scenario(&ctx, &Scenario::valid_type("ext3", "ext3")).await;

    assert!(result.error.is_none());
    assert_eq!(result.verdict, Verdict::Fail);
    assert_eq!(result.teardown_errors().len(), 1);
    assert_eq!(result.teardown_errors()[0].step, TeardownStep::AwaitDetach);
    assert_eq!(result.trace.last(), Some(&ScenarioState::Done(Verdict::Fail)));
}

#[tokio::test(start_paused = true)]
async fn late_diagnostic_inside_window_is_found() {
    // Attach gives up at ~304s; the event shows up at ~334s, before the
    // classifier's deadline at ~364s.
    let cluster = cluster_with_timing(
        Timing {
            event: Duration::from_secs(330),
            ..Timing::default()
        },
        Faults::default(),
    );
    let ctx = context(&cluster);

    let result = run_scenario(&ctx, &Scenario::invalid_type("ext10")).await;

    assert!(result.passed(), "{:?}", result.diagnostics());
    assert!(result.error.is_none());
}

#[tokio::test(start_paused = true)]
async fn diagnostic_after_window_is_a_miss() {
    let cluster = cluster_with_timing(
        Timing {
            event: Duration::from_secs(400),
            ..Timing::default()
        },
        Faults::default(),
    );
    let ctx = context(&cluster);

    let result = run_scenario(&ctx, &Scenario::invalid_type("ext10")).await;

    assert_eq!(result.verdict, Verdict::Fail);
    assert!(
        matches!(result.error, Some(VerifyError::ClassificationMiss { .. })),
        "{:?}",
        result.error
    );
    assert_released(&cluster);
}

#[tokio::test(start_paused = true)]
async fn unreadable_fstype_file_reports_no_output() {
    let cluster = cluster_with_timing(
        Timing {
            fstype_write: Duration::from_secs(1000),
            ..Timing::default()
        },
        Faults::default(),
    );
    let ctx = context(&cluster);

    let result = run_scenario(&ctx, &Scenario::valid_type("ext3", "ext3")).await;

    assert_eq!(
        result.error,
        Some(VerifyError::Mismatch {
            expected: "ext3".into(),
            actual: NO_OUTPUT.into(),
        })
    );
    assert_eq!(NO_OUTPUT, "<no output>");
    assert!(result.teardown.is_clean());
}

#[tokio::test(start_paused = true)]
async fn output_settling_on_expected_value_passes() {
    let cluster = cluster_with_timing(
        Timing::default(),
        Faults {
            misreport_fstype: Some("ext2".into()),
            misreport_for: Some(Duration::from_secs(10)),
            ..Faults::default()
        },
    );
    let ctx = context(&cluster);

    let result = run_scenario(&ctx, &Scenario::valid_type("ext3", "ext3")).await;

    assert!(result.passed(), "{:?}", result.diagnostics());
}

#[tokio::test(start_paused = true)]
async fn mismatch_reports_last_observed_output() {
    // "ext2" first, then the volume's real "xfs"; neither is "ext3".
    let cluster = cluster_with_timing(
        Timing::default(),
        Faults {
            misreport_fstype: Some("ext2".into()),
            misreport_for: Some(Duration::from_secs(10)),
            ..Faults::default()
        },
    );
    let ctx = context(&cluster);

    let result = run_scenario(&ctx, &Scenario::valid_type("xfs", "ext3")).await;

    assert_eq!(
        result.error,
        Some(VerifyError::Mismatch {
            expected: "ext3".into(),
            actual: "xfs".into(),
        })
    );
}
