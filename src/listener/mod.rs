//! HTTP endpoints the platform delivers verifications and events to.

pub mod signature;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::ListenerConfig;
use crate::error::{Error, Result};
use crate::subscriptions::SubscriptionManager;

pub const HEADER_MESSAGE_ID: &str = "twitch-eventsub-message-id";
pub const HEADER_MESSAGE_TIMESTAMP: &str = "twitch-eventsub-message-timestamp";
pub const HEADER_MESSAGE_SIGNATURE: &str = "twitch-eventsub-message-signature";
pub const HEADER_MESSAGE_TYPE: &str = "twitch-eventsub-message-type";
pub const HEADER_HUB_SIGNATURE: &str = "x-hub-signature";
pub const HEADER_NOTIFICATION_ID: &str = "twitch-notification-id";

pub const MESSAGE_TYPE_VERIFICATION: &str = "webhook_callback_verification";
pub const MESSAGE_TYPE_NOTIFICATION: &str = "notification";
pub const MESSAGE_TYPE_REVOCATION: &str = "revocation";

/// Message ids seen within the window
struct RecentMessages {
    window: Duration,
    seen: DashMap<String, Instant>,
}

impl RecentMessages {
    fn new(window: Duration) -> Self {
        Self {
            window,
            seen: DashMap::new(),
        }
    }

    /// True the first time an id is seen within the window
    fn first_delivery(&self, message_id: &str) -> bool {
        let now = Instant::now();
        self.seen
            .retain(|_, seen_at| now.duration_since(*seen_at) < self.window);

        match self.seen.entry(message_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
        }
    }
}

/// Shared state for the listener handlers
#[derive(Clone)]
struct ListenerState {
    manager: SubscriptionManager,
    secret: Arc<String>,
    recent: Arc<RecentMessages>,
}

impl ListenerState {
    /// EventSub timestamps older than the window are treated as replays
    fn is_fresh(&self, timestamp: &str) -> bool {
        let Ok(sent_at) = DateTime::parse_from_rfc3339(timestamp) else {
            return false;
        };
        let age = Utc::now().signed_duration_since(sent_at.with_timezone(&Utc));
        age.to_std()
            .map(|age| age <= self.recent.window)
            // Slightly in the future is clock skew, not a replay
            .unwrap_or(true)
    }
}

/// Outcome of one renewal/reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub renewed: usize,
    pub resubscribed: usize,
    pub failed: usize,
}

impl MaintenanceReport {
    pub fn is_empty(&self) -> bool {
        *self == MaintenanceReport::default()
    }
}

/// Renew leases ending within `margin` and, if `reconcile` is set, replace
/// errored subscriptions with fresh ones and subscribe them again.
pub async fn maintenance_pass(
    manager: &SubscriptionManager,
    margin: chrono::Duration,
    reconcile: bool,
) -> MaintenanceReport {
    let mut report = MaintenanceReport::default();

    for id in manager.expiring_leases(margin) {
        match manager.renew(&id).await {
            Ok(()) => report.renewed += 1,
            Err(e) => {
                warn!(id = %id, error = %e, "Lease renewal failed");
                report.failed += 1;
            }
        }
    }

    if reconcile {
        for id in manager.errored_ids() {
            if let Err(e) = manager.reset(&id) {
                debug!(id = %id, error = %e, "Skipping reconciliation");
                continue;
            }
            match manager.subscribe(&id).await {
                Ok(()) => report.resubscribed += 1,
                Err(e) => {
                    warn!(id = %id, error = %e, "Resubscribe failed");
                    report.failed += 1;
                }
            }
        }
    }

    report
}

/// Callback listener for EventSub and hub deliveries
pub struct Listener {
    manager: SubscriptionManager,
    config: ListenerConfig,
}

impl Listener {
    pub fn new(manager: SubscriptionManager, config: ListenerConfig) -> Self {
        Self { manager, config }
    }

    pub fn manager(&self) -> &SubscriptionManager {
        &self.manager
    }

    /// Routes, nested under the path of the callback base URL
    pub fn router(&self) -> Router {
        let state = ListenerState {
            manager: self.manager.clone(),
            secret: Arc::new(self.config.secret.clone()),
            recent: Arc::new(RecentMessages::new(self.config.message_window())),
        };

        let routes = Router::new()
            .route("/event/:id", post(eventsub_callback))
            .route("/webhooks/:id", get(hub_challenge).post(hub_notification))
            .with_state(state);

        let prefix = path_prefix(&self.config.callback_base_url);
        let app = if prefix.is_empty() {
            routes
        } else {
            Router::new().nest(&prefix, routes)
        };
        app.layer(TraceLayer::new_for_http())
    }

    /// Start the renewal/reconciliation loop
    pub fn spawn_maintenance(&self) -> JoinHandle<()> {
        let manager = self.manager.clone();
        let period = self.config.renewal_interval();
        let margin = self.config.renewal_margin();
        let reconcile = self.config.reconcile_errored;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let report = maintenance_pass(&manager, margin, reconcile).await;
                if !report.is_empty() {
                    info!(
                        renewed = report.renewed,
                        resubscribed = report.resubscribed,
                        failed = report.failed,
                        "Subscription maintenance pass"
                    );
                }
            }
        })
    }

    /// Bind and serve until the server fails
    pub async fn serve(self) -> Result<()> {
        let address = self.config.bind_address();
        let listener = tokio::net::TcpListener::bind(&address)
            .await
            .map_err(|e| Error::Listener(format!("cannot bind {}: {}", address, e)))?;
        info!(address = %address, callback = %self.config.callback_base_url, "Callback listener started");

        let app = self.router();
        let maintenance = self.spawn_maintenance();

        let result = axum::serve(listener, app)
            .await
            .map_err(|e| Error::Listener(e.to_string()));
        maintenance.abort();
        result
    }
}

/// Path component of the callback base URL, without a trailing slash
fn path_prefix(callback_base_url: &str) -> String {
    reqwest::Url::parse(callback_base_url)
        .map(|url| url.path().trim_end_matches('/').to_string())
        .unwrap_or_default()
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn challenge_response(challenge: String) -> Response {
    (StatusCode::OK, [(CONTENT_TYPE, "text/plain")], challenge).into_response()
}

/// EventSub webhook callback
async fn eventsub_callback(
    State(state): State<ListenerState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let (Some(message_id), Some(timestamp), Some(signature), Some(message_type)) = (
        header(&headers, HEADER_MESSAGE_ID),
        header(&headers, HEADER_MESSAGE_TIMESTAMP),
        header(&headers, HEADER_MESSAGE_SIGNATURE),
        header(&headers, HEADER_MESSAGE_TYPE),
    ) else {
        warn!(id = %id, "EventSub request without message headers");
        return (StatusCode::BAD_REQUEST, "missing EventSub headers").into_response();
    };

    let signed: [&[u8]; 3] = [message_id.as_bytes(), timestamp.as_bytes(), &body[..]];
    if !signature::verify(state.secret.as_bytes(), &signed, signature) {
        warn!(id = %id, message_id = %message_id, "Rejected EventSub message with bad signature");
        return StatusCode::FORBIDDEN.into_response();
    }
    if !state.is_fresh(timestamp) {
        warn!(id = %id, message_id = %message_id, timestamp = %timestamp, "Rejected stale EventSub message");
        return StatusCode::FORBIDDEN.into_response();
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(id = %id, error = %e, "EventSub body is not JSON");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    match message_type {
        MESSAGE_TYPE_VERIFICATION => {
            let Some(challenge) = payload.get("challenge").and_then(Value::as_str) else {
                return (StatusCode::BAD_REQUEST, "missing challenge").into_response();
            };
            match state.manager.handle_verification(&id, challenge) {
                Some(reply) => challenge_response(reply),
                None => StatusCode::NOT_FOUND.into_response(),
            }
        }
        MESSAGE_TYPE_NOTIFICATION => {
            if !state.recent.first_delivery(message_id) {
                debug!(id = %id, message_id = %message_id, "Duplicate EventSub message dropped");
                return StatusCode::NO_CONTENT.into_response();
            }
            state.manager.handle_notification(&id, payload);
            StatusCode::NO_CONTENT.into_response()
        }
        MESSAGE_TYPE_REVOCATION => {
            let reason = payload
                .pointer("/subscription/status")
                .and_then(Value::as_str)
                .unwrap_or("revoked");
            state.manager.revoke(&id, reason);
            StatusCode::NO_CONTENT.into_response()
        }
        other => {
            warn!(id = %id, message_type = %other, "Unknown EventSub message type");
            StatusCode::BAD_REQUEST.into_response()
        }
    }
}

/// Hub verification: subscribe/unsubscribe challenges and denials
async fn hub_challenge(
    State(state): State<ListenerState>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let challenge = params.get("hub.challenge").cloned();

    match params.get("hub.mode").map(String::as_str) {
        Some("subscribe") => {
            let Some(challenge) = challenge else {
                return (StatusCode::BAD_REQUEST, "missing hub.challenge").into_response();
            };
            let Some(reply) = state.manager.handle_verification(&id, &challenge) else {
                return StatusCode::NOT_FOUND.into_response();
            };
            // The hub counts the lease from this challenge
            if let Some(lease) = params
                .get("hub.lease_seconds")
                .and_then(|secs| secs.parse::<i64>().ok())
            {
                state
                    .manager
                    .record_lease(&id, chrono::Duration::seconds(lease));
            }
            challenge_response(reply)
        }
        Some("unsubscribe") => {
            debug!(id = %id, "Hub confirmed unsubscription");
            challenge_response(challenge.unwrap_or_default())
        }
        Some("denied") => {
            let reason = params
                .get("hub.reason")
                .map(String::as_str)
                .unwrap_or("denied");
            state.manager.revoke(&id, reason);
            StatusCode::OK.into_response()
        }
        _ => (StatusCode::BAD_REQUEST, "unknown hub.mode").into_response(),
    }
}

/// Hub event delivery
async fn hub_notification(
    State(state): State<ListenerState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(signature) = header(&headers, HEADER_HUB_SIGNATURE) else {
        warn!(id = %id, "Hub notification without signature");
        return StatusCode::FORBIDDEN.into_response();
    };
    if !signature::verify(state.secret.as_bytes(), &[&body[..]], signature) {
        warn!(id = %id, "Rejected hub notification with bad signature");
        return StatusCode::FORBIDDEN.into_response();
    }

    if let Some(notification_id) = header(&headers, HEADER_NOTIFICATION_ID) {
        if !state.recent.first_delivery(notification_id) {
            debug!(id = %id, notification_id = %notification_id, "Duplicate hub notification dropped");
            return StatusCode::OK.into_response();
        }
    }

    match serde_json::from_slice::<Value>(&body) {
        Ok(payload) => {
            state.manager.handle_notification(&id, payload);
            StatusCode::OK.into_response()
        }
        Err(e) => {
            warn!(id = %id, error = %e, "Hub notification body is not JSON");
            StatusCode::BAD_REQUEST.into_response()
        }
    }
}
