//! Lease renewal and reconciliation passes
use twirl::listener::maintenance_pass;
use twirl::subscriptions::topics;
use twirl::SubscriptionState;

use super::test_harness::{FakeRegistrar, TestEnvironment};

#[tokio::test]
async fn test_expiring_leases_are_renewed() {
    let env = TestEnvironment::new(
        FakeRegistrar::leased(chrono::Duration::seconds(60)),
        "https://example.com",
    );
    env.manager.add(topics::follows_to("9", 60, |_| {}));
    env.manager.subscribe("follows.to.9").await.unwrap();
    env.manager.handle_verification("follows.to.9", "c").unwrap();

    // Lease ends well outside a short margin
    let report = maintenance_pass(&env.manager, chrono::Duration::seconds(10), false).await;
    assert!(report.is_empty());

    let report = maintenance_pass(&env.manager, chrono::Duration::seconds(120), false).await;
    assert_eq!(report.renewed, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(env.registrar.registrations(), 2);
    assert_eq!(
        env.manager.state("follows.to.9"),
        Some(SubscriptionState::Subscribed)
    );
}

#[tokio::test]
async fn test_errored_subscriptions_are_recreated() {
    let env = TestEnvironment::new(FakeRegistrar::awaiting_verification(), "https://example.com");
    env.manager.add(topics::stream_online("1", |_| {}));
    env.manager.subscribe("stream.online.1").await.unwrap();
    env.manager.handle_verification("stream.online.1", "c").unwrap();
    env.manager.revoke("stream.online.1", "user_removed");

    // Without reconciliation the instance stays errored
    let report = maintenance_pass(&env.manager, chrono::Duration::seconds(60), false).await;
    assert!(report.is_empty());
    assert_eq!(env.manager.state("stream.online.1"), Some(SubscriptionState::Error));

    let report = maintenance_pass(&env.manager, chrono::Duration::seconds(60), true).await;
    assert_eq!(report.resubscribed, 1);
    assert_eq!(env.registrar.registrations(), 2);
    assert_eq!(env.manager.state("stream.online.1"), Some(SubscriptionState::Pending));
    assert!(env.manager.last_error("stream.online.1").is_none());
}
