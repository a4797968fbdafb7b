//! Authenticated access to the Helix REST API.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::auth::{resolve_intent, AccessToken, AuthProvider};
use crate::error::{Error, Result};
use crate::http_client::{HttpClient, HttpMethod, SimpleHttpResponse};

pub mod eventsub;
pub mod webhooks;

pub use eventsub::{
    CreateEventSubSubscription, EventSubSubscriptionInfo, EventSubTransport,
    STATUS_ENABLED, STATUS_VERIFICATION_PENDING,
};
pub use webhooks::{HubMode, HubRequest};

/// Default Helix base URL
pub const DEFAULT_HELIX_BASE_URL: &str = "https://api.twitch.tv/helix";

/// Which kind of token a request needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSource {
    /// A user token resolved from these intents (fallback appended)
    Intents(Vec<String>),
    /// An app access token
    App,
}

impl TokenSource {
    /// User token for a single intent
    pub fn intent(intent: impl Into<String>) -> Self {
        TokenSource::Intents(vec![intent.into()])
    }
}

/// A request against the Helix API
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: HttpMethod,
    /// Path relative to the base URL, e.g. `/eventsub/subscriptions`
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub token: TokenSource,
    pub scopes: Vec<String>,
}

impl ApiRequest {
    /// Start a request for a method and path
    pub fn new(method: HttpMethod, path: impl Into<String>, token: TokenSource) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            token,
            scopes: Vec::new(),
        }
    }

    /// Add a query parameter
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Attach a JSON body
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Require scopes on the token
    pub fn scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes.extend(scopes.into_iter().map(Into::into));
        self
    }
}

/// Helix API client
#[derive(Clone)]
pub struct ApiClient {
    http: Arc<dyn HttpClient>,
    auth: Arc<dyn AuthProvider>,
    base_url: String,
}

impl ApiClient {
    /// Create a client against the default base URL
    pub fn new(http: Arc<dyn HttpClient>, auth: Arc<dyn AuthProvider>) -> Self {
        Self {
            http,
            auth,
            base_url: DEFAULT_HELIX_BASE_URL.to_string(),
        }
    }

    /// Point the client at a different base URL
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// The auth provider shared by everything built on this client
    pub fn auth_provider(&self) -> &Arc<dyn AuthProvider> {
        &self.auth
    }

    /// Base URL requests are sent to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a request, refreshing once and replaying it if the API answers 401.
    /// A rejected app token is replaced the same way.
    ///
    /// Non-2xx responses come back as `Error::Api`.
    pub async fn request(&self, request: &ApiRequest) -> Result<SimpleHttpResponse> {
        let (intent, token) = self.token_for(request).await?;
        let response = self.send(request, &token).await?;

        if response.status() != 401 {
            return check_status(response);
        }

        let refreshed = match intent {
            Some(intent) => {
                if !token.can_refresh() {
                    return check_status(response);
                }
                info!(path = %request.path, intent = %intent, "Token rejected, refreshing and retrying");
                self.auth.refresh(&intent).await?
            }
            None => {
                warn!(path = %request.path, "App token rejected, fetching a new one and retrying");
                self.auth
                    .refresh_app_access_token(&token, &request.scopes)
                    .await?
            }
        };
        let response = self.send(request, &refreshed).await?;
        check_status(response)
    }

    /// Send a request and decode the JSON body
    pub async fn request_json<T: serde::de::DeserializeOwned>(&self, request: &ApiRequest) -> Result<T> {
        let response = self.request(request).await?;
        response
            .json()
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    async fn token_for(&self, request: &ApiRequest) -> Result<(Option<String>, AccessToken)> {
        match &request.token {
            TokenSource::Intents(intents) => {
                let (intent, token) =
                    resolve_intent(self.auth.as_ref(), intents.as_slice(), &request.scopes).await?;
                Ok((Some(intent), token))
            }
            TokenSource::App => {
                let token = self.auth.app_access_token(&request.scopes).await?;
                Ok((None, token))
            }
        }
    }

    async fn send(&self, request: &ApiRequest, token: &AccessToken) -> Result<SimpleHttpResponse> {
        let url = self.url_for(request)?;
        let mut headers = HashMap::new();
        headers.insert("Client-Id".to_string(), self.auth.client_id().to_string());
        headers.insert(
            "Authorization".to_string(),
            format!("Bearer {}", token.access_token()),
        );
        let body = match &request.body {
            Some(body) => {
                headers.insert("Content-Type".to_string(), "application/json".to_string());
                Some(serde_json::to_string(body)?)
            }
            None => None,
        };

        debug!(method = ?request.method, url = %url, "Sending API request");
        self.http
            .send(request.method, &url, headers, body)
            .await
            .map_err(Error::transport)
    }

    fn url_for(&self, request: &ApiRequest) -> Result<String> {
        let url = format!("{}{}", self.base_url, request.path);
        if request.query.is_empty() {
            return Ok(url);
        }
        reqwest::Url::parse_with_params(&url, &request.query)
            .map(String::from)
            .map_err(|e| Error::config(format!("invalid API URL {}: {}", url, e)))
    }
}

fn check_status(response: SimpleHttpResponse) -> Result<SimpleHttpResponse> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(Error::api(response.status(), response.text()))
    }
}
