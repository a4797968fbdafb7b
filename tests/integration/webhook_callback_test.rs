//! Legacy hub deliveries through the listener router
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use twirl::subscriptions::topics;
use twirl::SubscriptionState;

use super::test_harness::{body_text, hub_request, FakeRegistrar, TestEnvironment};

const STREAMS_ID: &str = "streams.9";

async fn subscribed_streams(env: &TestEnvironment) {
    env.manager.add(topics::stream_changes("9", 3600, env.recorder()));
    env.manager.subscribe(STREAMS_ID).await.unwrap();
}

fn challenge(mode: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(format!(
            "/webhooks/streams.9?hub.mode={}&hub.challenge=xyz&hub.lease_seconds=3600",
            mode
        ))
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_hub_challenge_confirms_subscription() {
    let env = TestEnvironment::new(
        FakeRegistrar::leased(chrono::Duration::seconds(3600)),
        "https://example.com",
    );
    subscribed_streams(&env).await;
    assert_eq!(env.manager.state(STREAMS_ID), Some(SubscriptionState::Pending));

    let response = env.router.clone().oneshot(challenge("subscribe")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "xyz");
    assert_eq!(env.manager.state(STREAMS_ID), Some(SubscriptionState::Subscribed));
}

#[tokio::test]
async fn test_hub_challenge_restarts_the_lease() {
    let env = TestEnvironment::new(
        FakeRegistrar::leased(chrono::Duration::seconds(60)),
        "https://example.com",
    );
    subscribed_streams(&env).await;

    let before = chrono::Utc::now();
    let response = env.router.clone().oneshot(challenge("subscribe")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let expires_at = env
        .manager
        .registration(STREAMS_ID)
        .and_then(|registration| registration.lease_expires_at)
        .unwrap();
    assert!(expires_at >= before + chrono::Duration::seconds(3600));
    assert!(env
        .manager
        .expiring_leases(chrono::Duration::seconds(120))
        .is_empty());
}

#[tokio::test]
async fn test_hub_denial_moves_to_error() {
    let env = TestEnvironment::new(
        FakeRegistrar::leased(chrono::Duration::seconds(3600)),
        "https://example.com",
    );
    subscribed_streams(&env).await;

    let request = Request::builder()
        .method("GET")
        .uri("/webhooks/streams.9?hub.mode=denied&hub.reason=unauthorized")
        .body(Body::empty())
        .unwrap();
    let response = env.router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(env.manager.state(STREAMS_ID), Some(SubscriptionState::Error));
}

#[tokio::test]
async fn test_hub_notification_delivers_first_record_once() {
    let env = TestEnvironment::new(
        FakeRegistrar::leased(chrono::Duration::seconds(3600)),
        "https://example.com",
    );
    subscribed_streams(&env).await;
    env.router.clone().oneshot(challenge("subscribe")).await.unwrap();

    let body = json!({"data": [{"id": "stream-1", "user_id": "9", "type": "live"}]});
    for _ in 0..2 {
        let response = env
            .router
            .clone()
            .oneshot(hub_request("/webhooks/streams.9", "n-1", &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    // Offline is an empty data array
    let offline = json!({"data": []});
    env.router
        .clone()
        .oneshot(hub_request("/webhooks/streams.9", "n-2", &offline))
        .await
        .unwrap();

    assert_eq!(
        env.events(),
        vec![
            json!({"id": "stream-1", "user_id": "9", "type": "live"}),
            serde_json::Value::Null
        ]
    );
}

#[tokio::test]
async fn test_unsigned_hub_notification_is_rejected() {
    let env = TestEnvironment::new(
        FakeRegistrar::leased(chrono::Duration::seconds(3600)),
        "https://example.com",
    );
    subscribed_streams(&env).await;
    env.router.clone().oneshot(challenge("subscribe")).await.unwrap();

    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/streams.9")
        .body(Body::from(r#"{"data":[]}"#))
        .unwrap();
    let response = env.router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(env.events().is_empty());
}

#[tokio::test]
async fn test_unknown_hub_mode_is_a_bad_request() {
    let env = TestEnvironment::new(
        FakeRegistrar::leased(chrono::Duration::seconds(3600)),
        "https://example.com",
    );

    let response = env.router.clone().oneshot(challenge("bogus")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
