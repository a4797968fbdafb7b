//! EventSub deliveries through the listener router
use axum::http::StatusCode;
use serde_json::json;
use tower::ServiceExt;

use twirl::listener::{
    MESSAGE_TYPE_NOTIFICATION, MESSAGE_TYPE_REVOCATION, MESSAGE_TYPE_VERIFICATION,
};
use twirl::subscriptions::topics;
use twirl::{SubscriptionError, SubscriptionState};

use super::test_harness::{body_text, eventsub_request, now_rfc3339, FakeRegistrar, TestEnvironment};

const FOLLOW_ID: &str = "channel.follow.123";
const FOLLOW_PATH: &str = "/event/channel.follow.123";

async fn subscribed_follow(env: &TestEnvironment) {
    env.manager.add(topics::channel_follow("123", env.recorder()));
    env.manager.subscribe(FOLLOW_ID).await.unwrap();
}

fn verification_body() -> serde_json::Value {
    json!({
        "challenge": "abc",
        "subscription": {
            "id": "remote-1",
            "status": "webhook_callback_verification_pending",
            "type": "channel.follow",
            "version": "2"
        }
    })
}

#[tokio::test]
async fn test_verification_challenge_is_echoed() {
    let env = TestEnvironment::new(FakeRegistrar::awaiting_verification(), "https://example.com");
    subscribed_follow(&env).await;
    assert_eq!(env.manager.state(FOLLOW_ID), Some(SubscriptionState::Pending));

    let request = eventsub_request(
        FOLLOW_PATH,
        MESSAGE_TYPE_VERIFICATION,
        "msg-1",
        &now_rfc3339(),
        &verification_body(),
    );
    let response = env.router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "abc");
    assert_eq!(env.manager.state(FOLLOW_ID), Some(SubscriptionState::Subscribed));
}

#[tokio::test]
async fn test_verification_for_unknown_id_is_not_found() {
    let env = TestEnvironment::new(FakeRegistrar::awaiting_verification(), "https://example.com");

    let request = eventsub_request(
        "/event/channel.follow.999",
        MESSAGE_TYPE_VERIFICATION,
        "msg-1",
        &now_rfc3339(),
        &verification_body(),
    );
    let response = env.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_notification_is_delivered_once() {
    let env = TestEnvironment::new(FakeRegistrar::awaiting_verification(), "https://example.com");
    subscribed_follow(&env).await;
    env.manager.handle_verification(FOLLOW_ID, "abc").unwrap();

    let body = json!({
        "subscription": {"type": "channel.follow", "version": "2"},
        "event": {"user_id": "42", "user_login": "viewer", "broadcaster_user_id": "123"}
    });
    let timestamp = now_rfc3339();

    for _ in 0..2 {
        let request = eventsub_request(FOLLOW_PATH, MESSAGE_TYPE_NOTIFICATION, "msg-7", &timestamp, &body);
        let response = env.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    assert_eq!(
        env.events(),
        vec![json!({"user_id": "42", "user_login": "viewer", "broadcaster_user_id": "123"})]
    );
}

#[tokio::test]
async fn test_notification_for_unknown_id_is_accepted_and_dropped() {
    let env = TestEnvironment::new(FakeRegistrar::awaiting_verification(), "https://example.com");
    subscribed_follow(&env).await;
    env.manager.handle_verification(FOLLOW_ID, "abc").unwrap();

    let request = eventsub_request(
        "/event/channel.follow.456",
        MESSAGE_TYPE_NOTIFICATION,
        "msg-2",
        &now_rfc3339(),
        &json!({"event": {"user_id": "1"}}),
    );
    let response = env.router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(env.events().is_empty());
}

#[tokio::test]
async fn test_bad_signature_is_rejected() {
    let env = TestEnvironment::new(FakeRegistrar::awaiting_verification(), "https://example.com");
    subscribed_follow(&env).await;
    env.manager.handle_verification(FOLLOW_ID, "abc").unwrap();

    let mut request = eventsub_request(
        FOLLOW_PATH,
        MESSAGE_TYPE_NOTIFICATION,
        "msg-3",
        &now_rfc3339(),
        &json!({"event": {}}),
    );
    request.headers_mut().insert(
        twirl::listener::HEADER_MESSAGE_SIGNATURE,
        "sha256=0000".parse().unwrap(),
    );
    let response = env.router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(env.events().is_empty());
}

#[tokio::test]
async fn test_stale_message_is_rejected() {
    let env = TestEnvironment::new(FakeRegistrar::awaiting_verification(), "https://example.com");
    subscribed_follow(&env).await;
    env.manager.handle_verification(FOLLOW_ID, "abc").unwrap();

    let request = eventsub_request(
        FOLLOW_PATH,
        MESSAGE_TYPE_NOTIFICATION,
        "msg-4",
        "2020-01-01T00:00:00.000000000Z",
        &json!({"event": {}}),
    );
    let response = env.router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(env.events().is_empty());
}

#[tokio::test]
async fn test_missing_headers_are_a_bad_request() {
    let env = TestEnvironment::new(FakeRegistrar::awaiting_verification(), "https://example.com");

    let request = axum::http::Request::builder()
        .method("POST")
        .uri(FOLLOW_PATH)
        .body(axum::body::Body::from("{}"))
        .unwrap();
    let response = env.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_revocation_moves_to_error() {
    let env = TestEnvironment::new(FakeRegistrar::awaiting_verification(), "https://example.com");
    subscribed_follow(&env).await;
    env.manager.handle_verification(FOLLOW_ID, "abc").unwrap();

    let request = eventsub_request(
        FOLLOW_PATH,
        MESSAGE_TYPE_REVOCATION,
        "msg-5",
        &now_rfc3339(),
        &json!({"subscription": {"id": "remote-1", "status": "authorization_revoked"}}),
    );
    let response = env.router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(env.manager.state(FOLLOW_ID), Some(SubscriptionState::Error));
    assert_eq!(
        env.manager.last_error(FOLLOW_ID),
        Some(SubscriptionError::Revoked {
            id: FOLLOW_ID.to_string(),
            reason: "authorization_revoked".to_string(),
        })
    );
}

#[tokio::test]
async fn test_routes_follow_callback_path() {
    let env = TestEnvironment::new(
        FakeRegistrar::awaiting_verification(),
        "https://example.com/twitch/",
    );
    subscribed_follow(&env).await;

    let request = eventsub_request(
        FOLLOW_PATH,
        MESSAGE_TYPE_VERIFICATION,
        "msg-1",
        &now_rfc3339(),
        &verification_body(),
    );
    let response = env.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let request = eventsub_request(
        "/twitch/event/channel.follow.123",
        MESSAGE_TYPE_VERIFICATION,
        "msg-1",
        &now_rfc3339(),
        &verification_body(),
    );
    let response = env.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "abc");
}
