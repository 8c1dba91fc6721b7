// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Network provisioning against the mock cloud.

use std::sync::Arc;
use std::time::Duration;

use seckill_core::network::{Ipv6Wait, NetworkProvisioner, ProvisionError, ProvisionRetry};
use seckill_core::provider::mock::{auth_error, limit_error};
use seckill_core::provider::{MockCloud, NetworkApi, ProviderError};
use seckill_core::{AcquisitionTarget, Architecture, ErrorKind};

const COMPARTMENT: &str = "ocid1.compartment.oc1..test";

fn provisioner(cloud: &Arc<MockCloud>) -> NetworkProvisioner {
    NetworkProvisioner::new(cloud.clone(), COMPARTMENT, "ap-singapore-1").with_retry(
        ProvisionRetry {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
        },
    )
}

fn target(architecture: Architecture) -> AcquisitionTarget {
    AcquisitionTarget::new(architecture, "AD-1", "ocid1.image.x", "ssh-ed25519 AAAA")
}

#[tokio::test(start_paused = true)]
async fn test_creates_everything_once() {
    let cloud = Arc::new(MockCloud::new());
    let p = provisioner(&cloud);

    let first = p.ensure_network(&target(Architecture::Arm)).await.unwrap();
    let second = p.ensure_network(&target(Architecture::Arm)).await.unwrap();

    assert_eq!(first, second);
    let counts = cloud.creation_counts().await;
    assert_eq!(counts.vcns, 1);
    assert_eq!(counts.internet_gateways, 1);
    assert_eq!(counts.subnets, 1);
    assert_eq!(counts.network_security_groups, 1);
    assert_eq!(counts.route_updates, 1);
}

#[tokio::test(start_paused = true)]
async fn test_arm_and_amd_share_the_network() {
    let cloud = Arc::new(MockCloud::new());
    let p = provisioner(&cloud);

    let arm = p.ensure_network(&target(Architecture::Arm)).await.unwrap();
    let amd = p.ensure_network(&target(Architecture::Amd)).await.unwrap();

    assert_eq!(arm.vcn_id, amd.vcn_id);
    assert_eq!(arm.subnet_id, amd.subnet_id);
    assert_eq!(cloud.creation_counts().await.vcns, 1);
}

#[tokio::test(start_paused = true)]
async fn test_resources_use_region_names_and_ipv6() {
    let cloud = Arc::new(MockCloud::new());
    let p = provisioner(&cloud);
    let network = p.ensure_network(&target(Architecture::Arm)).await.unwrap();

    let vcns = cloud
        .list_vcns(COMPARTMENT, Some("seckill-singapore"))
        .await
        .unwrap();
    assert_eq!(vcns.len(), 1);
    assert_eq!(vcns[0].id, network.vcn_id);

    let subnets = cloud
        .list_subnets(COMPARTMENT, &network.vcn_id, Some("seckill-singapore-subnet"))
        .await
        .unwrap();
    assert_eq!(subnets[0].cidr_block, "10.0.0.0/24");
    assert_eq!(
        network.subnet_ipv6_cidr.as_deref(),
        Some("2603:c024:1234:5600::/64")
    );

    let table = cloud.get_route_table(&network.route_table_id).await.unwrap();
    let destinations: Vec<_> = table
        .route_rules
        .iter()
        .map(|r| r.destination.as_str())
        .collect();
    assert_eq!(destinations, vec!["0.0.0.0/0", "::/0"]);
    assert!(
        table
            .route_rules
            .iter()
            .all(|r| r.network_entity_id == network.internet_gateway_id)
    );

    assert_eq!(cloud.security_rules(&network.nsg_id).await.len(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_existing_vcn_gets_ipv6_prefix() {
    let cloud = Arc::new(MockCloud::new());
    let seeded = cloud.seed_vcn("seckill-singapore", false).await;

    let network = provisioner(&cloud)
        .ensure_network(&target(Architecture::Arm))
        .await
        .unwrap();

    assert_eq!(network.vcn_id, seeded.id);
    assert!(network.vcn_ipv6_cidr.is_some());
    assert_eq!(cloud.creation_counts().await.vcns, 0);
}

#[tokio::test(start_paused = true)]
async fn test_conflict_adopts_concurrent_creation() {
    let cloud = Arc::new(MockCloud::new());
    cloud.set_concurrent_creator(true);

    let network = provisioner(&cloud)
        .ensure_network(&target(Architecture::Arm))
        .await
        .unwrap();

    let counts = cloud.creation_counts().await;
    assert_eq!(counts.vcns, 1);
    assert_eq!(counts.subnets, 1);
    assert_eq!(counts.network_security_groups, 1);

    let vcns = cloud
        .list_vcns(COMPARTMENT, Some("seckill-singapore"))
        .await
        .unwrap();
    assert_eq!(network.vcn_id, vcns[0].id);
}

#[tokio::test(start_paused = true)]
async fn test_lost_create_response_is_adopted() {
    let cloud = Arc::new(MockCloud::new());
    cloud.lose_responses(1).await;

    let network = provisioner(&cloud)
        .ensure_network(&target(Architecture::Arm))
        .await
        .unwrap();

    assert_eq!(cloud.creation_counts().await.vcns, 1);
    let vcns = cloud
        .list_vcns(COMPARTMENT, Some("seckill-singapore"))
        .await
        .unwrap();
    assert_eq!(vcns.len(), 1);
    assert_eq!(vcns[0].id, network.vcn_id);
}

#[tokio::test(start_paused = true)]
async fn test_every_lost_create_is_adopted() {
    let cloud = Arc::new(MockCloud::new());
    cloud.lose_responses(4).await;

    let network = provisioner(&cloud)
        .ensure_network(&target(Architecture::Arm))
        .await
        .unwrap();

    let counts = cloud.creation_counts().await;
    assert_eq!(counts.vcns, 1);
    assert_eq!(counts.internet_gateways, 1);
    assert_eq!(counts.subnets, 1);
    assert_eq!(counts.network_security_groups, 1);
    assert_eq!(cloud.security_rules(&network.nsg_id).await.len(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_partial_nsg_setup_is_repaired_on_next_run() {
    let cloud = Arc::new(MockCloud::new());
    cloud.fail_security_rule_calls([auth_error()]).await;

    let err = provisioner(&cloud)
        .ensure_network(&target(Architecture::Arm))
        .await
        .unwrap_err();
    assert!(matches!(err, ProvisionError::Api { operation: "add security rules", .. }));
    assert_eq!(err.kind(), ErrorKind::Auth);

    let network = provisioner(&cloud)
        .ensure_network(&target(Architecture::Arm))
        .await
        .unwrap();

    assert_eq!(cloud.creation_counts().await.network_security_groups, 1);
    let rules = cloud.security_rules(&network.nsg_id).await;
    assert_eq!(rules.len(), 5);
    assert!(rules.iter().any(|r| r.source == "::/0"));
}

#[tokio::test(start_paused = true)]
async fn test_complete_nsg_is_left_alone() {
    let cloud = Arc::new(MockCloud::new());
    let p = provisioner(&cloud);

    let network = p.ensure_network(&target(Architecture::Arm)).await.unwrap();
    p.ensure_network(&target(Architecture::Amd)).await.unwrap();

    assert_eq!(cloud.security_rules(&network.nsg_id).await.len(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_existing_vcn_waits_for_ipv6_prefix() {
    let mut cloud = MockCloud::new();
    cloud.ipv6_polls_until_ready = 3;
    let cloud = Arc::new(cloud);
    let seeded = cloud.seed_vcn("seckill-singapore", false).await;

    let network = provisioner(&cloud)
        .with_ipv6_wait(Ipv6Wait {
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(60),
        })
        .ensure_network(&target(Architecture::Arm))
        .await
        .unwrap();

    assert_eq!(network.vcn_id, seeded.id);
    assert_eq!(
        network.vcn_ipv6_cidr.as_deref(),
        Some("2603:c024:1234:5600::/56")
    );
    assert!(network.subnet_ipv6_cidr.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_ipv6_prefix_that_never_appears_times_out() {
    let mut cloud = MockCloud::new();
    cloud.ipv6_polls_until_ready = 100;
    let cloud = Arc::new(cloud);
    cloud.seed_vcn("seckill-singapore", false).await;

    let err = provisioner(&cloud)
        .with_ipv6_wait(Ipv6Wait {
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(20),
        })
        .ensure_network(&target(Architecture::Arm))
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::Ipv6Timeout { .. }));
    assert_eq!(cloud.creation_counts().await.subnets, 0);
}

#[tokio::test(start_paused = true)]
async fn test_transient_errors_are_retried() {
    let cloud = Arc::new(MockCloud::new());
    cloud
        .fail_network_calls([
            ProviderError::Transport("connection reset by peer".to_string()),
            ProviderError::service(503, "ServiceUnavailable", "try later"),
        ])
        .await;

    let network = provisioner(&cloud)
        .ensure_network(&target(Architecture::Arm))
        .await;

    assert!(network.is_ok());
    assert_eq!(cloud.creation_counts().await.vcns, 1);
}

#[tokio::test(start_paused = true)]
async fn test_transient_errors_exhaust_retries() {
    let cloud = Arc::new(MockCloud::new());
    let unavailable = || ProviderError::service(503, "ServiceUnavailable", "try later");
    cloud
        .fail_network_calls([unavailable(), unavailable(), unavailable()])
        .await;

    let err = provisioner(&cloud)
        .ensure_network(&target(Architecture::Arm))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Transient);
}

#[tokio::test(start_paused = true)]
async fn test_fatal_errors_are_not_retried() {
    for (error, kind) in [(auth_error(), ErrorKind::Auth), (limit_error(), ErrorKind::Quota)] {
        let cloud = Arc::new(MockCloud::new());
        cloud.fail_network_calls([error]).await;

        let err = provisioner(&cloud)
            .ensure_network(&target(Architecture::Arm))
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::Api { operation: "create VCN", .. }));
        assert_eq!(err.kind(), kind);
        assert_eq!(cloud.creation_counts().await.vcns, 0);
    }
}
