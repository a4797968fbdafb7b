//! Client for the platform's OAuth2 token endpoints.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::auth::token::AccessToken;
use crate::error::AuthError;
use crate::http_client::HttpClient;

/// Default OAuth base URL
pub const DEFAULT_OAUTH_BASE_URL: &str = "https://id.twitch.tv/oauth2";

/// Token endpoint response
#[derive(Debug, Clone, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    scope: Option<Vec<String>>,
}

impl TokenResponse {
    fn into_access_token(self) -> AccessToken {
        let mut token = AccessToken::new(self.access_token, self.scope.unwrap_or_default());
        if let Some(refresh_token) = self.refresh_token {
            token = token.with_refresh_token(refresh_token);
        }
        if let Some(expires_in) = self.expires_in {
            token = token.with_expires_in(expires_in);
        }
        token
    }
}

/// What the validate endpoint reports about a token
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenInfo {
    /// Client the token was issued to
    pub client_id: String,
    /// Login name, absent for app tokens
    #[serde(default)]
    pub login: Option<String>,
    /// User id, absent for app tokens
    #[serde(default)]
    pub user_id: Option<String>,
    /// Granted scopes
    #[serde(default, deserialize_with = "null_as_empty")]
    pub scopes: Vec<String>,
    /// Seconds until expiry
    #[serde(default)]
    pub expires_in: Option<u64>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// OAuth endpoint client
#[derive(Clone)]
pub struct OAuthClient {
    http: Arc<dyn HttpClient>,
    base_url: String,
    client_id: String,
    client_secret: Option<String>,
}

impl OAuthClient {
    /// Create a client against the default endpoint
    pub fn new(
        http: Arc<dyn HttpClient>,
        client_id: impl Into<String>,
        client_secret: Option<String>,
    ) -> Self {
        Self {
            http,
            base_url: DEFAULT_OAUTH_BASE_URL.to_string(),
            client_id: client_id.into(),
            client_secret,
        }
    }

    /// Point the client at a different base URL
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Client id used for every grant
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Exchange a refresh token for a new user token
    pub async fn refresh_user_token(&self, refresh_token: &str) -> Result<AccessToken, AuthError> {
        let client_secret = self.require_secret("refresh_token grant")?;
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
            ("client_secret", client_secret),
        ];

        debug!(client_id = %self.client_id, "Refreshing user access token");
        self.token_grant(&params)
            .await
            .map_err(|reason| AuthError::refresh_failed("user token", reason))
    }

    /// Obtain an app access token through the client credentials grant
    pub async fn client_credentials(&self, scopes: &[String]) -> Result<AccessToken, AuthError> {
        let client_secret = self.require_secret("client_credentials grant")?;
        let scope = scopes.join(" ");
        let mut params = vec![
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", client_secret),
        ];
        if !scope.is_empty() {
            params.push(("scope", scope.as_str()));
        }

        debug!(client_id = %self.client_id, "Requesting app access token");
        self.token_grant(&params).await.map_err(AuthError::Request)
    }

    /// Ask the validate endpoint about a token
    pub async fn validate(&self, access_token: &str) -> Result<TokenInfo, AuthError> {
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), format!("OAuth {}", access_token));

        let response = self
            .http
            .get(&format!("{}/validate", self.base_url), headers)
            .await
            .map_err(|e| AuthError::Request(e.to_string()))?;

        if !response.is_success() {
            return Err(AuthError::Request(format!(
                "validate returned HTTP {}",
                response.status()
            )));
        }

        response
            .json::<TokenInfo>()
            .map_err(|e| AuthError::Request(format!("invalid validate response: {}", e)))
    }

    async fn token_grant(&self, params: &[(&str, &str)]) -> Result<AccessToken, String> {
        let body = form_body(params)?;
        let mut headers = HashMap::new();
        headers.insert(
            "Content-Type".to_string(),
            "application/x-www-form-urlencoded".to_string(),
        );

        let response = self
            .http
            .post(&format!("{}/token", self.base_url), headers, body)
            .await
            .map_err(|e| e.to_string())?;

        if !response.is_success() {
            warn!(status = response.status(), "Token endpoint rejected grant");
            return Err(format!(
                "HTTP {} - {}",
                response.status(),
                response.body()
            ));
        }

        response
            .json::<TokenResponse>()
            .map(TokenResponse::into_access_token)
            .map_err(|e| format!("invalid token response: {}", e))
    }

    fn require_secret(&self, grant: &str) -> Result<&str, AuthError> {
        self.client_secret.as_deref().ok_or_else(|| {
            AuthError::Request(format!("client secret is required for the {}", grant))
        })
    }
}

/// Encode key/value pairs as an `application/x-www-form-urlencoded` body
fn form_body(params: &[(&str, &str)]) -> Result<String, String> {
    let url = reqwest::Url::parse_with_params("http://localhost/", params)
        .map_err(|e| e.to_string())?;
    Ok(url.query().unwrap_or_default().to_string())
}
