use libvolverify::backend::memory::MemorySettings;
use libvolverify::error::VerifyError;
use libvolverify::scenario::check_preconditions;
use libvolverify::{Scenario, run_suite};

use crate::common::*;

#[tokio::test(start_paused = true)]
async fn standard_suite_passes_sequentially() {
    let cluster = cluster();
    let ctx = context(&cluster);

    let report = run_suite(&ctx, Scenario::standard_set(), false).await.unwrap();

    assert!(report.passed(), "{:?}", report.failed().collect::<Vec<_>>());
    assert_eq!(report.results.len(), 3);
    assert_released(&cluster);
}

#[tokio::test(start_paused = true)]
async fn standard_suite_passes_concurrently() {
    let cluster = cluster();
    let ctx = context(&cluster);

    let report = run_suite(&ctx, Scenario::standard_set(), true).await.unwrap();

    assert!(report.passed(), "{:?}", report.failed().collect::<Vec<_>>());
    let names: Vec<_> = report.results.iter().map(|r| r.scenario.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "verify fstype - ext3 formatted volume",
            "verify fstype - default value should be ext4",
            "verify invalid fstype ext10",
        ]
    );
    assert_released(&cluster);
}

#[tokio::test(start_paused = true)]
async fn one_failure_does_not_stop_the_suite() {
    let cluster = cluster();
    let ctx = context(&cluster);

    let scenarios = vec![
        Scenario::valid_type("ext3", "ext4"),
        Scenario::valid_type("xfs", "xfs"),
    ];
    let report = run_suite(&ctx, scenarios, true).await.unwrap();

    assert!(!report.passed());
    assert_eq!(report.failed().count(), 1);
    assert!(report.results[1].passed());
}

#[tokio::test(start_paused = true)]
async fn no_schedulable_nodes_fails_preconditions() {
    let cluster = cluster_with(MemorySettings {
        nodes: Vec::new(),
        ..MemorySettings::default()
    });
    let ctx = context(&cluster);

    assert!(matches!(
        check_preconditions(&ctx).await,
        Err(VerifyError::Precondition(_))
    ));
    let err = run_suite(&ctx, Scenario::standard_set(), false)
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "precondition failed: Unable to find ready and schedulable Node"
    );
    assert!(cluster.operations().is_empty());
}
