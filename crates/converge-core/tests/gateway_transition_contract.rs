//! Architectural Contract Test: Internet Gateway Transitions
//!
//! This test verifies every row of the gateway table, both as a pure plan
//! and against the provider.
//!
//! | desired      | attached  | result                              |
//! |--------------|-----------|-------------------------------------|
//! | unspecified  | any       | nothing                             |
//! | reference X  | none      | attach X                            |
//! | reference X  | X         | nothing                             |
//! | reference X  | Y         | release Y, attach X                 |
//! | managed      | none      | create, tag OwnedByVPC, attach      |
//! | managed      | any       | nothing                             |
//! | disabled     | Y         | release Y                           |
//! | disabled     | none      | nothing                             |
//!
//! "Release" detaches, and deletes only when the VPC owns the gateway.

mod common;

use common::*;
use converge_core::reconciler::{GatewayTransition, plan_gateway};
use converge_core::state::{CurrentState, InternetGatewayState};
use converge_core::{Error, GatewaySetting, MemoryProvider, VpcReconciler, VpcSpec};

async fn converge_gateway(h: &Harness, setting: GatewaySetting) -> converge_core::Result<Vec<String>> {
    let result = h
        .converger
        .converge(
            &VpcReconciler,
            &vpc_identity("prod"),
            &VpcSpec::new().with_internet_gateway(setting),
            &options(),
        )
        .await?;
    Ok(result.descriptions().into_iter().map(str::to_string).collect())
}

async fn gateway(h: &Harness, id: &str) -> Option<InternetGatewayState> {
    match h.provider.get(id).await {
        Some(CurrentState::InternetGateway(igw)) => Some(igw),
        _ => None,
    }
}

#[test]
fn plan_covers_every_row() {
    let x = "igw-0000000a";
    let y = "igw-0000000b";
    let reference = GatewaySetting::Reference(x.to_string());

    let rows = [
        (GatewaySetting::Unspecified, None, GatewayTransition::NoOp),
        (GatewaySetting::Unspecified, Some(y), GatewayTransition::NoOp),
        (
            reference.clone(),
            None,
            GatewayTransition::Attach { desired: x.to_string() },
        ),
        (reference.clone(), Some(x), GatewayTransition::NoOp),
        (
            reference.clone(),
            Some(y),
            GatewayTransition::Replace {
                current: y.to_string(),
                desired: x.to_string(),
            },
        ),
        (GatewaySetting::Managed, None, GatewayTransition::CreateManaged),
        (GatewaySetting::Managed, Some(y), GatewayTransition::NoOp),
        (
            GatewaySetting::Disabled,
            Some(y),
            GatewayTransition::Detach { current: y.to_string() },
        ),
        (GatewaySetting::Disabled, None, GatewayTransition::NoOp),
    ];

    for (desired, current, expected) in rows {
        assert_eq!(
            plan_gateway(&desired, current),
            expected,
            "desired {:?}, attached {:?}",
            desired,
            current
        );
    }
}

#[tokio::test]
async fn unspecified_leaves_attached_gateway_alone() {
    let h = Harness::new(MemoryProvider::new(REGION));
    let vpc_id = h.provider.seed_vpc("prod", "10.0.0.0/16").await;
    h.provider.add_owned_internet_gateway(&vpc_id).await;

    let actions = converge_gateway(&h, GatewaySetting::Unspecified).await.expect("converge");
    assert!(actions.is_empty(), "got {actions:?}");
}

#[tokio::test]
async fn reference_attaches_when_none_attached() {
    let h = Harness::new(MemoryProvider::new(REGION));
    let vpc_id = h.provider.seed_vpc("prod", "10.0.0.0/16").await;
    let igw = h.provider.add_internet_gateway(tags(&[])).await;

    let actions = converge_gateway(&h, GatewaySetting::Reference(igw.clone()))
        .await
        .expect("converge");

    assert_eq!(actions.len(), 1);
    assert!(actions[0].starts_with(&format!("attach Internet gateway {igw} to VPC prod")));
    assert_eq!(h.vpc(&vpc_id).await.internet_gateway_id, Some(igw.clone()));

    let again = converge_gateway(&h, GatewaySetting::Reference(igw)).await.expect("converge");
    assert!(again.is_empty(), "same reference is a no-op, got {again:?}");
}

#[tokio::test]
async fn reference_replaces_unowned_gateway_without_deleting_it() {
    let h = Harness::new(MemoryProvider::new(REGION));
    let vpc_id = h.provider.seed_vpc("prod", "10.0.0.0/16").await;
    let old = h.provider.add_internet_gateway(tags(&[])).await;
    h.provider.attach_internet_gateway(&old, &vpc_id).await;
    let new = h.provider.add_internet_gateway(tags(&[])).await;

    let actions = converge_gateway(&h, GatewaySetting::Reference(new.clone()))
        .await
        .expect("converge");

    assert_eq!(actions.len(), 2, "got {actions:?}");
    assert!(actions[0].starts_with(&format!("detach Internet gateway {old}")));
    assert!(actions[1].starts_with(&format!("attach Internet gateway {new}")));
    assert!(h.provider.exists(&old).await, "unowned gateway survives");
    assert_eq!(h.vpc(&vpc_id).await.internet_gateway_id, Some(new));
}

#[tokio::test]
async fn reference_replaces_owned_gateway_and_deletes_it() {
    let h = Harness::new(MemoryProvider::new(REGION));
    let vpc_id = h.provider.seed_vpc("prod", "10.0.0.0/16").await;
    let owned = h.provider.add_owned_internet_gateway(&vpc_id).await;
    let new = h.provider.add_internet_gateway(tags(&[])).await;

    let actions = converge_gateway(&h, GatewaySetting::Reference(new.clone()))
        .await
        .expect("converge");

    assert_eq!(actions.len(), 3, "got {actions:?}");
    assert!(actions[0].starts_with("detach Internet gateway"));
    assert!(actions[1].starts_with("destroy Internet gateway"));
    assert!(actions[2].starts_with("attach Internet gateway"));
    assert!(!h.provider.exists(&owned).await);
}

#[tokio::test]
async fn managed_creates_tags_and_attaches() {
    let h = Harness::new(MemoryProvider::new(REGION));
    let vpc_id = h.provider.seed_vpc("prod", "10.0.0.0/16").await;

    let actions = converge_gateway(&h, GatewaySetting::Managed).await.expect("converge");
    assert_eq!(actions.len(), 1, "got {actions:?}");
    assert!(actions[0].starts_with("create Internet gateway for VPC prod"));

    let igw_id = h
        .vpc(&vpc_id)
        .await
        .internet_gateway_id
        .expect("gateway attached");
    let igw = gateway(&h, &igw_id).await.expect("gateway exists");
    assert_eq!(igw.tags.get("OwnedByVPC"), Some(&vpc_id));
    assert!(
        h.sink
            .messages()
            .iter()
            .any(|m| m.starts_with(&format!("tag Internet gateway {igw_id} as OwnedByVPC"))),
        "got {:?}",
        h.sink.messages()
    );

    let again = converge_gateway(&h, GatewaySetting::Managed).await.expect("converge");
    assert!(again.is_empty(), "got {again:?}");
}

#[tokio::test]
async fn managed_accepts_any_attached_gateway() {
    let h = Harness::new(MemoryProvider::new(REGION));
    let vpc_id = h.provider.seed_vpc("prod", "10.0.0.0/16").await;
    let igw = h.provider.add_internet_gateway(tags(&[])).await;
    h.provider.attach_internet_gateway(&igw, &vpc_id).await;

    let actions = converge_gateway(&h, GatewaySetting::Managed).await.expect("converge");
    assert!(actions.is_empty(), "got {actions:?}");
}

#[tokio::test]
async fn disabled_detaches_and_deletes_owned_gateway() {
    let h = Harness::new(MemoryProvider::new(REGION));
    let vpc_id = h.provider.seed_vpc("prod", "10.0.0.0/16").await;
    let owned = h.provider.add_owned_internet_gateway(&vpc_id).await;

    let actions = converge_gateway(&h, GatewaySetting::Disabled).await.expect("converge");

    assert_eq!(actions.len(), 2, "got {actions:?}");
    assert!(actions[0].starts_with("detach Internet gateway"));
    assert!(actions[1].starts_with("destroy Internet gateway"));
    assert!(!h.provider.exists(&owned).await);
    assert_eq!(h.vpc(&vpc_id).await.internet_gateway_id, None);
}

#[tokio::test]
async fn disabled_only_detaches_unowned_gateway() {
    let h = Harness::new(MemoryProvider::new(REGION));
    let vpc_id = h.provider.seed_vpc("prod", "10.0.0.0/16").await;
    let igw = h.provider.add_internet_gateway(tags(&[])).await;
    h.provider.attach_internet_gateway(&igw, &vpc_id).await;

    let actions = converge_gateway(&h, GatewaySetting::Disabled).await.expect("converge");

    assert_eq!(actions.len(), 1, "got {actions:?}");
    assert!(h.provider.exists(&igw).await);
    assert_eq!(gateway(&h, &igw).await.and_then(|g| g.attached_vpc_id), None);
}

#[tokio::test]
async fn disabled_without_gateway_is_a_noop() {
    let h = Harness::new(MemoryProvider::new(REGION));
    h.provider.seed_vpc("prod", "10.0.0.0/16").await;

    let actions = converge_gateway(&h, GatewaySetting::Disabled).await.expect("converge");
    assert!(actions.is_empty());
}

#[tokio::test]
async fn reference_to_missing_gateway_is_invalid_input() {
    let h = Harness::new(MemoryProvider::new(REGION));
    h.provider.seed_vpc("prod", "10.0.0.0/16").await;

    let err = converge_gateway(&h, GatewaySetting::Reference("igw-0fffffff".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)), "got {err:?}");
    assert!(h.provider.calls().await.is_empty());
}

#[tokio::test]
async fn reference_to_gateway_attached_elsewhere_is_invalid_input() {
    let h = Harness::new(MemoryProvider::new(REGION));
    h.provider.seed_vpc("prod", "10.0.0.0/16").await;
    let other = h.provider.seed_vpc("staging", "10.1.0.0/16").await;
    let igw = h.provider.add_internet_gateway(tags(&[])).await;
    h.provider.attach_internet_gateway(&igw, &other).await;

    let err = converge_gateway(&h, GatewaySetting::Reference(igw)).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)), "got {err:?}");
}
