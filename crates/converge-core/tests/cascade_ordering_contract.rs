//! Architectural Contract Test: Dependency Cascade
//!
//! This test verifies that purging a VPC destroys its dependents in a fixed
//! order and only deletes shared objects the VPC owns.
//!
//! Constraints verified:
//! - Dependents go before the VPC, in group order
//! - Default ACL, default security group and main route table are skipped
//! - An Internet gateway is deleted only with an OwnedByVPC edge
//! - A failure aborts the cascade and leaves the VPC in place
//! - Re-running the purge resumes where it stopped
//!
//! If this test fails, a purge could delete shared resources or strand a VPC.

mod common;

use common::*;
use converge_core::error::{ProviderError, ProviderErrorKind};
use converge_core::reconciler::Phase;
use converge_core::state::{CurrentState, InstanceStatus};
use converge_core::{Error, MemoryProvider, Outcome, VpcReconciler};

fn assert_in_order(actions: &[String], expected: &[&str]) {
    assert_eq!(
        actions.len(),
        expected.len(),
        "Expected {} Actions, got {:#?}",
        expected.len(),
        actions
    );
    for (action, prefix) in actions.iter().zip(expected) {
        assert!(
            action.starts_with(prefix),
            "Expected an Action starting with '{}', got '{}' in {:#?}",
            prefix,
            action,
            actions
        );
    }
}

#[tokio::test]
async fn purge_destroys_dependents_before_the_vpc() {
    let h = Harness::new(MemoryProvider::new(REGION));
    let vpc_id = h.provider.seed_vpc("prod", "10.0.0.0/16").await;
    let sg = h.provider.add_security_group(&vpc_id, "app").await;
    let rtb = h.provider.add_route_table(&vpc_id, &[]).await;
    let igw = h.provider.add_owned_internet_gateway(&vpc_id).await;

    let result = h
        .converger
        .destroy(&VpcReconciler, &vpc_identity("prod"), &purge())
        .await
        .expect("purge succeeds");

    assert_in_order(
        &h.sink.actions(),
        &[
            "delete security group app",
            "delete route table",
            "detach Internet gateway",
            "destroy Internet gateway",
            "delete VPC prod",
        ],
    );
    assert_eq!(result.outcome, Outcome::Absent);
    assert_eq!(
        result.path,
        vec![Phase::Converged, Phase::Destroying, Phase::Absent]
    );
    for id in [&vpc_id, &sg, &rtb, &igw] {
        assert!(!h.provider.exists(id).await, "{id} should be gone");
    }
}

#[tokio::test]
async fn unowned_gateway_is_only_detached() {
    let h = Harness::new(MemoryProvider::new(REGION));
    let vpc_id = h.provider.seed_vpc("prod", "10.0.0.0/16").await;
    let igw = h.provider.add_internet_gateway(tags(&[("team", "net")])).await;
    h.provider.attach_internet_gateway(&igw, &vpc_id).await;

    h.converger
        .destroy(&VpcReconciler, &vpc_identity("prod"), &purge())
        .await
        .expect("purge succeeds");

    assert_in_order(&h.sink.actions(), &["detach Internet gateway", "delete VPC prod"]);
    match h.provider.get(&igw).await {
        Some(CurrentState::InternetGateway(gateway)) => {
            assert_eq!(gateway.attached_vpc_id, None, "gateway must be detached");
        }
        other => panic!("Unowned gateway must survive, got {other:?}"),
    }
}

#[tokio::test]
async fn gateway_owned_by_another_vpc_survives() {
    let h = Harness::new(MemoryProvider::new(REGION));
    let vpc_id = h.provider.seed_vpc("prod", "10.0.0.0/16").await;
    let other = h.provider.seed_vpc("staging", "10.1.0.0/16").await;
    let igw = h
        .provider
        .add_internet_gateway(tags(&[("OwnedByVPC", other.as_str())]))
        .await;
    h.provider.attach_internet_gateway(&igw, &vpc_id).await;

    h.converger
        .destroy(&VpcReconciler, &vpc_identity("prod"), &purge())
        .await
        .expect("purge succeeds");

    assert!(h.provider.exists(&igw).await);
}

#[tokio::test]
async fn subnet_purge_takes_instances_and_interfaces_with_it() {
    let h = Harness::new(MemoryProvider::new(REGION));
    let vpc_id = h.provider.seed_vpc("prod", "10.0.0.0/16").await;
    let subnet = h.provider.add_subnet(&vpc_id, "10.0.1.0/24").await;
    let instance = h.provider.add_instance("web", &vpc_id, &subnet).await;
    let eni = h
        .provider
        .add_network_interface(&vpc_id, &subnet, Some(&instance))
        .await;
    let rtb = h.provider.add_route_table(&vpc_id, &[&subnet]).await;
    let acl = h.provider.add_network_acl(&vpc_id).await;

    h.converger
        .destroy(&VpcReconciler, &vpc_identity("prod"), &purge())
        .await
        .expect("purge succeeds");

    assert_in_order(
        &h.sink.actions(),
        &[
            "terminate instance web",
            "wait until instance web",
            "detach network interface",
            "delete network interface",
            "delete subnet",
            "delete network ACL",
            "delete route table",
            "delete VPC prod",
        ],
    );

    match h.provider.get(&instance).await {
        Some(CurrentState::Instance(i)) => assert_eq!(i.status, InstanceStatus::Terminated),
        other => panic!("terminated instance stays visible, got {other:?}"),
    }
    for id in [&eni, &subnet, &rtb, &acl, &vpc_id] {
        assert!(!h.provider.exists(id).await, "{id} should be gone");
    }
}

#[tokio::test]
async fn failure_aborts_and_rerun_resumes() {
    let h = Harness::new(MemoryProvider::new(REGION));
    let vpc_id = h.provider.seed_vpc("prod", "10.0.0.0/16").await;
    let sg_a = h.provider.add_security_group(&vpc_id, "a").await;
    let sg_b = h.provider.add_security_group(&vpc_id, "b").await;
    let rtb = h.provider.add_route_table(&vpc_id, &[]).await;
    h.provider
        .fail_next("DeleteRouteTable", ProviderError::other("InternalError"))
        .await;

    let err = h
        .converger
        .destroy(&VpcReconciler, &vpc_identity("prod"), &purge())
        .await
        .unwrap_err();

    match &err {
        Error::DependencyCascadeAborted { dependent, source } => {
            assert_eq!(dependent, &format!("route table {rtb}"));
            assert!(matches!(**source, Error::ActionFailed { .. }), "got {source:?}");
        }
        other => panic!("Expected DependencyCascadeAborted, got {other:?}"),
    }
    assert!(h.provider.exists(&vpc_id).await, "VPC must survive an aborted cascade");
    assert!(!h.provider.exists(&sg_a).await);
    assert!(!h.provider.exists(&sg_b).await);
    assert!(!h
        .provider
        .call_names()
        .await
        .contains(&"DeleteVpc"));

    h.sink.clear();
    h.converger
        .destroy(&VpcReconciler, &vpc_identity("prod"), &purge())
        .await
        .expect("re-run succeeds");

    assert_in_order(&h.sink.actions(), &["delete route table", "delete VPC prod"]);
    assert!(!h.provider.exists(&vpc_id).await);
}

#[tokio::test]
async fn destroy_without_purge_hits_dependency_violation() {
    let h = Harness::new(MemoryProvider::new(REGION));
    let vpc_id = h.provider.seed_vpc("prod", "10.0.0.0/16").await;
    let subnet = h.provider.add_subnet(&vpc_id, "10.0.1.0/24").await;

    let err = h
        .converger
        .destroy(&VpcReconciler, &vpc_identity("prod"), &options())
        .await
        .unwrap_err();

    match &err {
        Error::ActionFailed { action, source } => {
            assert!(action.starts_with("delete VPC prod"), "got {action}");
            assert_eq!(source.kind, ProviderErrorKind::Conflict);
        }
        other => panic!("Expected ActionFailed, got {other:?}"),
    }
    assert!(h.provider.exists(&subnet).await, "no purge, no subnet delete");
    assert_eq!(
        h.provider.call_names().await,
        vec!["DeleteVpc"],
        "conflicts are not retried"
    );
}

#[tokio::test]
async fn owned_dhcp_options_are_deleted_after_disassociation() {
    let h = Harness::new(MemoryProvider::new(REGION));
    let vpc_id = h.provider.seed_vpc("prod", "10.0.0.0/16").await;
    let owned = h
        .provider
        .add_dhcp_options(tags(&[("OwnedByVPC", vpc_id.as_str())]))
        .await;
    h.provider.associate_dhcp_options(&owned, &vpc_id).await;

    h.converger
        .destroy(&VpcReconciler, &vpc_identity("prod"), &options())
        .await
        .expect("destroy succeeds");

    assert_in_order(
        &h.sink.actions(),
        &["disassociate DHCP options", "delete DHCP options", "delete VPC prod"],
    );
    assert!(!h.provider.exists(&owned).await);
}

#[tokio::test]
async fn plain_destroy_reports_gateway_failure_as_is() {
    let h = Harness::new(MemoryProvider::new(REGION));
    let vpc_id = h.provider.seed_vpc("prod", "10.0.0.0/16").await;
    let igw = h.provider.add_internet_gateway(tags(&[])).await;
    h.provider.attach_internet_gateway(&igw, &vpc_id).await;
    h.provider
        .fail_next("DetachInternetGateway", ProviderError::other("InternalError"))
        .await;

    let err = h
        .converger
        .destroy(&VpcReconciler, &vpc_identity("prod"), &options())
        .await
        .unwrap_err();

    match &err {
        Error::ActionFailed { action, .. } => {
            assert!(action.starts_with(&format!("detach Internet gateway {igw}")), "got {action}");
        }
        other => panic!("Expected ActionFailed, got {other:?}"),
    }
    assert!(h.provider.exists(&vpc_id).await);
}

#[tokio::test]
async fn purge_wraps_gateway_failure_as_cascade_abort() {
    let h = Harness::new(MemoryProvider::new(REGION));
    let vpc_id = h.provider.seed_vpc("prod", "10.0.0.0/16").await;
    let igw = h.provider.add_owned_internet_gateway(&vpc_id).await;
    h.provider
        .fail_next("DetachInternetGateway", ProviderError::other("InternalError"))
        .await;

    let err = h
        .converger
        .destroy(&VpcReconciler, &vpc_identity("prod"), &purge())
        .await
        .unwrap_err();

    match &err {
        Error::DependencyCascadeAborted { dependent, source } => {
            assert_eq!(dependent, &format!("Internet gateway {igw}"));
            assert!(matches!(**source, Error::ActionFailed { .. }), "got {source:?}");
        }
        other => panic!("Expected DependencyCascadeAborted, got {other:?}"),
    }
    assert!(h.provider.exists(&igw).await);
    assert!(h.provider.exists(&vpc_id).await);
}
