//! Architectural Contract Test: Dry Run
//!
//! This test verifies that dry run reports exactly the Actions a real run
//! would take, without issuing a single mutating call.
//!
//! Constraints verified:
//! - Every Action reaches the ProgressSink flagged as dry run
//! - Audit records are marked Planned
//! - Lookups still happen; mutations never do
//! - A converged resource reports no Actions even in dry run
//!
//! If this test fails, `--dry-run` would change infrastructure.

mod common;

use common::*;
use converge_core::reconciler::Phase;
use converge_core::traits::ProgressEvent;
use converge_core::{
    ActionStatus, GatewaySetting, Identity, InstanceReconciler, InstanceSpec, MemoryProvider,
    Outcome, VpcReconciler, VpcSpec,
};

#[tokio::test]
async fn dry_run_create_plans_without_calls() {
    let h = Harness::new(MemoryProvider::new(REGION));

    let result = h
        .converger
        .converge(
            &VpcReconciler,
            &vpc_identity("prod"),
            &VpcSpec::new().with_cidr_block("10.0.0.0/16"),
            &dry_run(),
        )
        .await
        .expect("dry run succeeds");

    assert_eq!(result.outcome, Outcome::Planned);
    assert_eq!(result.path, vec![Phase::Absent, Phase::Creating]);
    assert!(result.dry_run);
    assert_eq!(
        result.descriptions(),
        vec!["create VPC prod with CIDR 10.0.0.0/16 in us-east-1"]
    );
    assert!(result.actions.iter().all(|a| a.status == ActionStatus::Planned));
    assert!(
        h.provider.calls().await.is_empty(),
        "Dry run must not issue mutating calls"
    );
    assert!(h.provider.find_count().await > 0, "Dry run still reads live state");
}

#[tokio::test]
async fn dry_run_update_reports_each_change() {
    let h = Harness::new(MemoryProvider::new(REGION));
    let vpc_id = h.provider.seed_vpc("prod", "10.0.0.0/16").await;
    let before = h.vpc(&vpc_id).await;

    let result = h
        .converger
        .converge(
            &VpcReconciler,
            &vpc_identity("prod"),
            &VpcSpec::new()
                .with_dns_hostnames(true)
                .with_internet_gateway(GatewaySetting::Managed),
            &dry_run(),
        )
        .await
        .expect("dry run succeeds");

    assert_eq!(result.outcome, Outcome::Planned);
    assert_eq!(result.actions.len(), 2, "got {:?}", result.descriptions());
    assert!(h.provider.calls().await.is_empty());
    assert_eq!(h.vpc(&vpc_id).await, before, "Live state must be untouched");

    let events = h.sink.events();
    assert_eq!(events.len(), 2, "Inner progress of unrun Actions is not reported");
    assert!(events
        .iter()
        .all(|e| matches!(e, ProgressEvent::ActionStarted { dry_run: true, .. })));
}

#[tokio::test]
async fn dry_run_on_converged_resource_is_present() {
    let h = Harness::new(MemoryProvider::new(REGION));
    h.provider.seed_vpc("prod", "10.0.0.0/16").await;

    let result = h
        .converger
        .converge(&VpcReconciler, &vpc_identity("prod"), &VpcSpec::new(), &dry_run())
        .await
        .expect("dry run succeeds");

    assert!(matches!(result.outcome, Outcome::Present(_)));
    assert!(!result.changed());
}

#[tokio::test]
async fn dry_run_purge_lists_the_cascade() {
    let h = Harness::new(MemoryProvider::new(REGION));
    let vpc_id = h.provider.seed_vpc("prod", "10.0.0.0/16").await;
    let subnet = h.provider.add_subnet(&vpc_id, "10.0.1.0/24").await;
    h.provider.add_instance("web", &vpc_id, &subnet).await;
    h.provider.add_security_group(&vpc_id, "app").await;
    h.provider.add_owned_internet_gateway(&vpc_id).await;

    let result = h
        .converger
        .destroy(&VpcReconciler, &vpc_identity("prod"), &purge().with_dry_run(true))
        .await
        .expect("dry run succeeds");

    assert_eq!(result.outcome, Outcome::Planned);
    let actions = result.descriptions();
    assert!(actions[0].starts_with("terminate instance web"), "got {actions:?}");
    assert!(actions.iter().any(|a| a.starts_with("delete subnet")));
    assert!(actions.iter().any(|a| a.starts_with("delete security group app")));
    assert!(actions.iter().any(|a| a.starts_with("destroy Internet gateway")));
    assert!(actions.last().is_some_and(|a| a.starts_with("delete VPC prod")));

    assert!(h.provider.calls().await.is_empty());
    assert!(h.provider.exists(&vpc_id).await);
    assert!(h.provider.exists(&subnet).await);
}

#[tokio::test]
async fn dry_run_purge_plans_what_the_real_purge_does() {
    let h = Harness::new(MemoryProvider::new(REGION));
    let vpc_id = h.provider.seed_vpc("prod", "10.0.0.0/16").await;
    let subnet = h.provider.add_subnet(&vpc_id, "10.0.1.0/24").await;
    let eni = h.provider.add_network_interface(&vpc_id, &subnet, None).await;
    h.provider.add_route_table(&vpc_id, &[&subnet]).await;
    h.provider.add_security_group(&vpc_id, "app").await;
    h.provider.add_owned_internet_gateway(&vpc_id).await;

    let planned = h
        .converger
        .destroy(&VpcReconciler, &vpc_identity("prod"), &purge().with_dry_run(true))
        .await
        .expect("dry run succeeds");
    let applied = h
        .converger
        .destroy(&VpcReconciler, &vpc_identity("prod"), &purge())
        .await
        .expect("purge succeeds");

    assert_eq!(planned.descriptions(), applied.descriptions());
    assert_eq!(
        planned
            .descriptions()
            .iter()
            .filter(|a| a.starts_with(&format!("delete network interface {eni}")))
            .count(),
        1,
        "each dependent is planned once, got {:#?}",
        planned.descriptions()
    );
    assert!(
        !planned.descriptions().iter().any(|a| a.starts_with("disassociate route table")),
        "deleting the subnet already drops its association"
    );
    assert!(!h.provider.exists(&vpc_id).await);
}

#[tokio::test]
async fn dry_run_audit_trail_serializes() {
    let h = Harness::new(MemoryProvider::new(REGION));

    let result = h
        .converger
        .converge(
            &InstanceReconciler,
            &Identity::named("web"),
            &InstanceSpec::new().with_image("ami-0a0a0a0a"),
            &dry_run(),
        )
        .await
        .expect("dry run succeeds");

    let json = result.actions_json().expect("records serialize");
    assert!(json.contains("create instance web from ami-0a0a0a0a in us-east-1"));
    assert!(json.contains("planned"), "got {json}");
}
