//! Architectural Contract Test: Waiting on State Transitions
//!
//! This test verifies that every create waits for the object to become usable,
//! every delete waits for it to disappear, and that waits are bounded.
//!
//! Constraints verified:
//! - A wait with timeout = N intervals polls exactly N times
//! - Transitional states are polled through, never treated as done
//! - Deletion is confirmed by polling until the object is gone
//! - Cancellation and deadlines stop a reconciliation at the next sleep
//!
//! If this test fails, the core either races the provider or hangs.

mod common;

use common::*;
use converge_core::reconciler::Phase;
use converge_core::{
    Error, HostedZoneReconciler, Identity, InstanceReconciler, InstanceSpec, MemoryProvider,
    VpcReconciler, VpcSpec,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn create_prod() -> VpcSpec {
    VpcSpec::new().with_cidr_block("10.0.0.0/16")
}

#[tokio::test]
async fn wait_times_out_after_exactly_n_polls() {
    let h = Harness::new(MemoryProvider::new(REGION).with_settle_polls(100));

    let err = h
        .converger
        .converge(&VpcReconciler, &vpc_identity("prod"), &create_prod(), &options())
        .await
        .unwrap_err();

    match &err {
        Error::WaitTimeout { polls, target, .. } => {
            assert_eq!(*polls, 5, "timeout 5s / interval 1s = 5 polls");
            assert_eq!(target, "available");
        }
        other => panic!("Expected WaitTimeout, got {other:?}"),
    }
    assert_eq!(h.clock.sleeps(), vec![Duration::from_secs(1); 4]);
}

#[tokio::test]
async fn pending_vpc_is_polled_until_available() {
    let h = Harness::new(MemoryProvider::new(REGION).with_settle_polls(2));

    let result = h
        .converger
        .converge(&VpcReconciler, &vpc_identity("prod"), &create_prod(), &options())
        .await
        .expect("converge succeeds once the VPC settles");

    assert!(result.path.contains(&Phase::Created));
    assert_eq!(h.clock.sleeps(), vec![Duration::from_secs(1); 2]);
}

#[tokio::test]
async fn instance_create_waits_for_running() {
    let h = Harness::new(MemoryProvider::new(REGION).with_settle_polls(3));

    let result = h
        .converger
        .converge(
            &InstanceReconciler,
            &Identity::named("web"),
            &InstanceSpec::new().with_image("ami-0a0a0a0a"),
            &options(),
        )
        .await
        .expect("instance reaches running");

    let instance = result.current().expect("present");
    assert_eq!(instance.status.to_string(), "running");
    assert_eq!(h.clock.sleeps().len(), 3);
    assert!(
        h.sink
            .messages()
            .iter()
            .any(|m| m.starts_with("instance web launched as i-")),
        "got {:?}",
        h.sink.messages()
    );
}

#[tokio::test]
async fn deletion_is_confirmed_by_polling() {
    let h = Harness::new(MemoryProvider::new(REGION).with_deletion_lag(2));
    let zone = h.provider.add_hosted_zone("example.com", None).await;

    h.converger
        .destroy(&HostedZoneReconciler, &Identity::named("example.com"), &options())
        .await
        .expect("destroy succeeds");

    assert!(!h.provider.exists(&zone).await);
    assert_eq!(
        h.clock.sleeps(),
        vec![Duration::from_secs(1); 2],
        "two lingering polls, then gone"
    );
}

#[tokio::test]
async fn absence_confirmation_can_be_skipped() {
    let h = Harness::new(MemoryProvider::new(REGION).with_deletion_lag(2));
    h.provider.add_hosted_zone("example.com", None).await;

    h.converger
        .destroy(
            &HostedZoneReconciler,
            &Identity::named("example.com"),
            &options().with_confirm_absence(false),
        )
        .await
        .expect("destroy succeeds");

    assert!(h.clock.sleeps().is_empty());
}

#[tokio::test]
async fn cancelled_reconciliation_makes_no_calls() {
    let h = Harness::new(MemoryProvider::new(REGION));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = h
        .converger
        .converge(
            &VpcReconciler,
            &vpc_identity("prod"),
            &create_prod(),
            &options().with_cancel(cancel),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Cancelled(_)), "got {err:?}");
    assert!(h.provider.calls().await.is_empty());
    assert_eq!(h.provider.find_count().await, 0);
}

#[tokio::test]
async fn deadline_shortens_the_wait() {
    let h = Harness::new(MemoryProvider::new(REGION).with_settle_polls(100));

    let err = h
        .converger
        .converge(
            &VpcReconciler,
            &vpc_identity("prod"),
            &create_prod(),
            &options().with_deadline(Duration::from_millis(2_500)),
        )
        .await
        .unwrap_err();

    match &err {
        Error::WaitTimeout { polls, .. } => assert_eq!(*polls, 3),
        other => panic!("Expected WaitTimeout, got {other:?}"),
    }
    assert!(h.clock.total_slept() <= Duration::from_millis(2_500));
}

#[tokio::test]
async fn deadline_stops_retry_backoff() {
    let h = Harness::new(MemoryProvider::new(REGION));
    for _ in 0..5 {
        h.provider.fail_next("CreateVpc", throttled()).await;
    }

    let err = h
        .converger
        .converge(
            &VpcReconciler,
            &vpc_identity("prod"),
            &create_prod(),
            &options().with_deadline(Duration::from_millis(1_000)),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Cancelled(_)), "got {err:?}");
    assert_eq!(h.clock.sleeps(), vec![ms(500)], "the 1s backoff would overrun");
}
