use std::time::Duration;

use libvolverify::VerifyConfig;
use libvolverify::api::AttachStateApi;
use libvolverify::attacher::{attach_workload, verify_attached};
use libvolverify::backend::memory::{Faults, MemorySettings, Timing};
use libvolverify::error::VerifyError;
use libvolverify::provisioner::create_volume;
use libvolverify::types::{NodeName, Workload, WorkloadPhase, fstype_parameters};

use crate::common::*;

fn short_provision_timeout(secs: u64) -> VerifyConfig {
    let mut config = VerifyConfig::default();
    config.timeouts.claim_provision_secs = secs;
    config
}

#[tokio::test(start_paused = true)]
async fn bind_exactly_at_deadline_is_a_timeout() {
    // Binds at 4s; polls at 0s, 2s, 4s.
    let cluster = cluster();
    let ctx = context_with_config(&cluster, short_provision_timeout(4));

    let failure = create_volume(&ctx, fstype_parameters("ext3"))
        .await
        .unwrap_err();

    assert!(matches!(
        failure.error,
        VerifyError::ProvisioningTimeout { .. }
    ));
    // The claim was created, so the caller can still delete it.
    assert!(failure.claim.is_some());
    assert_eq!(cluster.storage_class_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn bind_before_deadline_succeeds() {
    let cluster = cluster();
    let ctx = context_with_config(&cluster, short_provision_timeout(5));

    let (claim, volumes) = create_volume(&ctx, fstype_parameters("ext3")).await.unwrap();

    assert_eq!(volumes.len(), 1);
    assert!(volumes[0].name.starts_with("pvc-"));
    assert!(claim.name.starts_with("pvc-fstype-"));
    assert_eq!(claim.size, "2Gi");
}

#[tokio::test(start_paused = true)]
async fn failed_claim_is_rejected() {
    let cluster = cluster_with_faults(Faults {
        fail_claims: true,
        ..Faults::default()
    });
    let ctx = context(&cluster);

    let failure = create_volume(&ctx, fstype_parameters("ext3"))
        .await
        .unwrap_err();
    assert!(matches!(
        failure.error,
        VerifyError::ProvisioningRejected { .. }
    ));
    assert!(failure.claim.is_some());
}

#[tokio::test(start_paused = true)]
async fn rejected_storage_class_creates_no_claim() {
    let cluster = cluster_with_faults(Faults {
        reject_storage_classes: true,
        ..Faults::default()
    });
    let ctx = context(&cluster);

    let failure = create_volume(&ctx, fstype_parameters("ext3"))
        .await
        .unwrap_err();
    assert!(matches!(
        failure.error,
        VerifyError::ProvisioningRejected { .. }
    ));
    assert!(failure.claim.is_none());
    assert_eq!(cluster.claim_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn rejected_claim_still_deletes_storage_class() {
    let cluster = cluster_with_faults(Faults {
        reject_claims: true,
        ..Faults::default()
    });
    let ctx = context(&cluster);

    let failure = create_volume(&ctx, fstype_parameters("ext3"))
        .await
        .unwrap_err();
    assert!(failure.claim.is_none());
    assert_eq!(cluster.storage_class_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn volume_path_reported_at_bind_is_the_attached_one() {
    let cluster = cluster();
    let ctx = context(&cluster);

    let (claim, volumes) = create_volume(&ctx, fstype_parameters("ext3")).await.unwrap();
    let workload = attach_workload(&ctx, &claim, &ctx.config().workload_command)
        .await
        .unwrap();
    let node = workload.node_name.clone().unwrap();

    verify_attached(&ctx, &workload, &volumes).await.unwrap();
    assert!(cluster
        .is_volume_attached(&volumes[0].volume_path, &node)
        .await
        .unwrap());
    assert_eq!(cluster.attached_volume_paths(), vec![volumes[0].volume_path.clone()]);
}

#[tokio::test(start_paused = true)]
async fn configured_node_pins_the_workload() {
    let cluster = cluster();
    let mut config = VerifyConfig::default();
    config.node_name = Some("node-2".into());
    let ctx = context_with_config(&cluster, config);

    let (claim, _) = create_volume(&ctx, fstype_parameters("")).await.unwrap();
    let workload = attach_workload(&ctx, &claim, &ctx.config().workload_command)
        .await
        .unwrap();
    assert_eq!(workload.node_name, Some(NodeName::from("node-2")));
}

#[tokio::test(start_paused = true)]
async fn slow_start_within_timeout_is_attached() {
    let cluster = cluster_with(MemorySettings {
        timing: Timing {
            start: Duration::from_secs(120),
            ..Timing::default()
        },
        ..MemorySettings::default()
    });
    let ctx = context(&cluster);

    let (claim, _) = create_volume(&ctx, fstype_parameters("ext3")).await.unwrap();
    let workload = attach_workload(&ctx, &claim, &ctx.config().workload_command).await;
    assert!(workload.is_ok(), "{workload:?}");
}

#[tokio::test(start_paused = true)]
async fn running_workload_without_node_is_unscheduled() {
    let cluster = cluster();
    let ctx = context(&cluster);

    let (claim, volumes) = create_volume(&ctx, fstype_parameters("ext3")).await.unwrap();
    let workload = Workload {
        name: "pvc-tester-detached".into(),
        namespace: NAMESPACE.into(),
        node_name: None,
        claims: vec![claim.name],
        command: ctx.config().workload_command.clone(),
        phase: WorkloadPhase::Running,
    };

    let err = verify_attached(&ctx, &workload, &volumes).await.unwrap_err();
    assert_eq!(
        err,
        VerifyError::Unscheduled {
            workload: "pvc-tester-detached".into(),
        }
    );
}
