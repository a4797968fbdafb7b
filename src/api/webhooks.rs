use serde::Serialize;
use tracing::info;

use super::{ApiClient, ApiRequest, TokenSource};
use crate::error::Result;
use crate::http_client::HttpMethod;

const HUB_PATH: &str = "/webhooks/hub";

/// Longest lease the hub accepts, in seconds
pub const MAX_LEASE_SECONDS: u64 = 864_000;

/// Hub request mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HubMode {
    Subscribe,
    Unsubscribe,
}

/// Body of a hub (un)subscribe request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HubRequest {
    #[serde(rename = "hub.callback")]
    pub callback: String,
    #[serde(rename = "hub.mode")]
    pub mode: HubMode,
    #[serde(rename = "hub.topic")]
    pub topic: String,
    #[serde(rename = "hub.lease_seconds", skip_serializing_if = "Option::is_none")]
    pub lease_seconds: Option<u64>,
    #[serde(rename = "hub.secret", skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

impl HubRequest {
    /// Subscribe request; the lease is clamped to what the hub accepts
    pub fn subscribe(
        callback: impl Into<String>,
        topic: impl Into<String>,
        lease_seconds: u64,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            callback: callback.into(),
            mode: HubMode::Subscribe,
            topic: topic.into(),
            lease_seconds: Some(lease_seconds.min(MAX_LEASE_SECONDS)),
            secret: Some(secret.into()),
        }
    }

    /// Unsubscribe request for a previously subscribed callback and topic
    pub fn unsubscribe(callback: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            callback: callback.into(),
            mode: HubMode::Unsubscribe,
            topic: topic.into(),
            lease_seconds: None,
            secret: None,
        }
    }
}

impl ApiClient {
    /// Ask the hub to start delivering a topic to a callback.
    ///
    /// The hub answers 202 and then sends a challenge to the callback.
    pub async fn webhook_subscribe(&self, hub: &HubRequest, token: TokenSource) -> Result<()> {
        self.hub_request(hub, token).await?;
        info!(topic = %hub.topic, callback = %hub.callback, "Requested WebHook subscription");
        Ok(())
    }

    /// Ask the hub to stop delivering a topic
    pub async fn webhook_unsubscribe(&self, hub: &HubRequest, token: TokenSource) -> Result<()> {
        self.hub_request(hub, token).await?;
        info!(topic = %hub.topic, "Requested WebHook unsubscription");
        Ok(())
    }

    async fn hub_request(&self, hub: &HubRequest, token: TokenSource) -> Result<()> {
        let request =
            ApiRequest::new(HttpMethod::POST, HUB_PATH, token).json(serde_json::to_value(hub)?);
        self.request(&request).await?;
        Ok(())
    }
}
