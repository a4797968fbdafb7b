use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::{ApiClient, ApiRequest, TokenSource};
use crate::error::{Error, Result};
use crate::http_client::HttpMethod;

/// Subscription is active
pub const STATUS_ENABLED: &str = "enabled";
/// Subscription waits for the callback to answer the challenge
pub const STATUS_VERIFICATION_PENDING: &str = "webhook_callback_verification_pending";

const SUBSCRIPTIONS_PATH: &str = "/eventsub/subscriptions";

/// Where the platform should deliver events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSubTransport {
    /// Delivery method, `webhook` for HTTP callbacks
    pub method: String,
    /// Callback URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback: Option<String>,
    /// Signing secret; never echoed back by the API
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

impl EventSubTransport {
    /// Webhook transport to a callback URL
    pub fn webhook(callback: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            method: "webhook".to_string(),
            callback: Some(callback.into()),
            secret: Some(secret.into()),
        }
    }
}

/// Body of a create-subscription request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateEventSubSubscription {
    /// Topic name, e.g. `channel.follow`
    #[serde(rename = "type")]
    pub kind: String,
    /// Topic version
    pub version: String,
    /// Topic condition, e.g. `{"broadcaster_user_id": "123"}`
    pub condition: Value,
    pub transport: EventSubTransport,
}

/// A subscription as reported by the API
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EventSubSubscriptionInfo {
    pub id: String,
    pub status: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub version: String,
    pub condition: Value,
    pub transport: EventSubTransport,
    pub created_at: String,
    #[serde(default)]
    pub cost: Option<u64>,
}

impl EventSubSubscriptionInfo {
    /// True once the platform delivers events for it
    pub fn is_enabled(&self) -> bool {
        self.status == STATUS_ENABLED
    }
}

#[derive(Debug, Deserialize)]
struct Pagination {
    #[serde(default)]
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionPage {
    data: Vec<EventSubSubscriptionInfo>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

impl ApiClient {
    /// Create an EventSub subscription. Webhook subscriptions need an app token.
    pub async fn create_eventsub_subscription(
        &self,
        body: &CreateEventSubSubscription,
        token: TokenSource,
    ) -> Result<EventSubSubscriptionInfo> {
        let request = ApiRequest::new(HttpMethod::POST, SUBSCRIPTIONS_PATH, token)
            .json(serde_json::to_value(body)?);

        let page: SubscriptionPage = self.request_json(&request).await?;
        let created = page.data.into_iter().next().ok_or_else(|| {
            Error::Serialization("create subscription response had no data".to_string())
        })?;

        info!(
            remote_id = %created.id,
            kind = %created.kind,
            status = %created.status,
            "Created EventSub subscription"
        );
        Ok(created)
    }

    /// Delete an EventSub subscription by its remote id
    pub async fn delete_eventsub_subscription(&self, remote_id: &str, token: TokenSource) -> Result<()> {
        let request = ApiRequest::new(HttpMethod::DELETE, SUBSCRIPTIONS_PATH, token)
            .query("id", remote_id);
        self.request(&request).await?;
        debug!(remote_id = %remote_id, "Deleted EventSub subscription");
        Ok(())
    }

    /// List EventSub subscriptions, following pagination
    pub async fn list_eventsub_subscriptions(
        &self,
        status: Option<&str>,
        token: TokenSource,
    ) -> Result<Vec<EventSubSubscriptionInfo>> {
        let mut subscriptions = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut request = ApiRequest::new(HttpMethod::GET, SUBSCRIPTIONS_PATH, token.clone());
            if let Some(status) = status {
                request = request.query("status", status);
            }
            if let Some(after) = &cursor {
                request = request.query("after", after.as_str());
            }

            let page: SubscriptionPage = self.request_json(&request).await?;
            subscriptions.extend(page.data);

            cursor = page
                .pagination
                .and_then(|p| p.cursor)
                .filter(|c| !c.is_empty());
            if cursor.is_none() {
                break;
            }
        }

        Ok(subscriptions)
    }
}
