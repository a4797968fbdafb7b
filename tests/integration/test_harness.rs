//! Shared fixtures for the integration tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use axum::Router;
use serde_json::Value;

use twirl::listener::{
    signature, HEADER_HUB_SIGNATURE, HEADER_MESSAGE_ID, HEADER_MESSAGE_SIGNATURE,
    HEADER_MESSAGE_TIMESTAMP, HEADER_MESSAGE_TYPE, HEADER_NOTIFICATION_ID,
};
use twirl::subscriptions::{Registrar, Registration};
use twirl::{Listener, ListenerConfig, Subscription, SubscriptionError, SubscriptionManager};

pub const SECRET: &str = "integration-secret";

/// Registrar that never leaves the process
pub struct FakeRegistrar {
    pub registrations: AtomicUsize,
    pub deregistrations: AtomicUsize,
    verified: bool,
    lease: Option<chrono::Duration>,
}

impl FakeRegistrar {
    /// Registrations wait for a verification challenge
    pub fn awaiting_verification() -> Arc<Self> {
        Arc::new(Self {
            registrations: AtomicUsize::new(0),
            deregistrations: AtomicUsize::new(0),
            verified: false,
            lease: None,
        })
    }

    /// Registrations carry a lease of the given length
    pub fn leased(lease: chrono::Duration) -> Arc<Self> {
        Arc::new(Self {
            registrations: AtomicUsize::new(0),
            deregistrations: AtomicUsize::new(0),
            verified: false,
            lease: Some(lease),
        })
    }

    pub fn registrations(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Registrar for FakeRegistrar {
    async fn register(&self, _subscription: &Subscription) -> Result<Registration, SubscriptionError> {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        Ok(Registration {
            remote_id: Some(format!("remote-{}", self.registrations())),
            verified: self.verified,
            lease_expires_at: self.lease.map(|lease| chrono::Utc::now() + lease),
        })
    }

    async fn deregister(
        &self,
        _subscription: &Subscription,
        _registration: &Registration,
    ) -> Result<(), SubscriptionError> {
        self.deregistrations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Manager, listener router and a sink for delivered events
pub struct TestEnvironment {
    pub registrar: Arc<FakeRegistrar>,
    pub manager: SubscriptionManager,
    pub router: Router,
    pub events: Arc<Mutex<Vec<Value>>>,
}

impl TestEnvironment {
    pub fn new(registrar: Arc<FakeRegistrar>, callback_base_url: &str) -> Self {
        let manager = SubscriptionManager::new(registrar.clone(), Duration::from_secs(600));
        let mut config = ListenerConfig::default();
        config.callback_base_url = callback_base_url.to_string();
        config.secret = SECRET.to_string();
        config.message_window_seconds = 600;

        let router = Listener::new(manager.clone(), config).router();
        Self {
            registrar,
            manager,
            router,
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Handler that records into `events`
    pub fn recorder(&self) -> impl Fn(Value) + Send + Sync + 'static {
        let events = self.events.clone();
        move |event| events.lock().unwrap().push(event)
    }

    pub fn events(&self) -> Vec<Value> {
        self.events.lock().unwrap().clone()
    }
}

/// Signed EventSub request
pub fn eventsub_request(
    path: &str,
    message_type: &str,
    message_id: &str,
    timestamp: &str,
    body: &Value,
) -> Request<Body> {
    let body = body.to_string();
    let signature = signature::sign(
        SECRET.as_bytes(),
        &[message_id.as_bytes(), timestamp.as_bytes(), body.as_bytes()],
    );

    Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .header(HEADER_MESSAGE_ID, message_id)
        .header(HEADER_MESSAGE_TIMESTAMP, timestamp)
        .header(HEADER_MESSAGE_SIGNATURE, signature)
        .header(HEADER_MESSAGE_TYPE, message_type)
        .body(Body::from(body))
        .unwrap()
}

/// Signed hub notification
pub fn hub_request(path: &str, notification_id: &str, body: &Value) -> Request<Body> {
    let body = body.to_string();
    let signature = signature::sign(SECRET.as_bytes(), &[body.as_bytes()]);

    Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .header(HEADER_HUB_SIGNATURE, signature)
        .header(HEADER_NOTIFICATION_ID, notification_id)
        .body(Body::from(body))
        .unwrap()
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}
