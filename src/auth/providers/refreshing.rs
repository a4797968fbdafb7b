use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use super::{ensure_scopes, AuthProvider};
use crate::auth::oauth::OAuthClient;
use crate::auth::token::AccessToken;
use crate::error::AuthError;

/// Called with the user id and the new token after every successful refresh
pub type RefreshCallback = Arc<dyn Fn(&str, &AccessToken) + Send + Sync>;

/// Called with the user id and the error after a failed refresh
pub type RefreshFailureCallback = Arc<dyn Fn(&str, &AuthError) + Send + Sync>;

type PendingRefresh = Shared<BoxFuture<'static, Result<AccessToken, AuthError>>>;

/// Keeps one token per user, maps intents to users, and refreshes expired
/// tokens through the OAuth endpoint.
///
/// Concurrent refreshes for the same user share a single token endpoint
/// call. Persistence is left to the application through [`on_refresh`].
///
/// [`on_refresh`]: RefreshingAuthProvider::on_refresh
#[derive(Clone)]
pub struct RefreshingAuthProvider {
    oauth: OAuthClient,
    /// User id to token
    tokens: Arc<DashMap<String, AccessToken>>,
    /// Intent to user id
    intents: Arc<DashMap<String, String>>,
    /// In-flight refreshes by user id
    pending_refreshes: Arc<DashMap<String, PendingRefresh>>,
    app_token: Arc<RwLock<Option<AccessToken>>>,
    refresh_callbacks: Arc<RwLock<Vec<RefreshCallback>>>,
    failure_callbacks: Arc<RwLock<Vec<RefreshFailureCallback>>>,
}

impl RefreshingAuthProvider {
    /// Create a provider that refreshes through the given OAuth client
    pub fn new(oauth: OAuthClient) -> Self {
        Self {
            oauth,
            tokens: Arc::new(DashMap::new()),
            intents: Arc::new(DashMap::new()),
            pending_refreshes: Arc::new(DashMap::new()),
            app_token: Arc::new(RwLock::new(None)),
            refresh_callbacks: Arc::new(RwLock::new(Vec::new())),
            failure_callbacks: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Register a user's token and the intents it should serve
    pub fn add_user<I, S>(&self, user_id: impl Into<String>, token: AccessToken, intents: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let user_id = user_id.into();
        info!(user_id = %user_id, "Adding user to auth provider");
        self.tokens.insert(user_id.clone(), token);
        self.add_intents_to_user(&user_id, intents);
    }

    /// Route additional intents to a user. An intent belongs to one user at a time.
    pub fn add_intents_to_user<I, S>(&self, user_id: &str, intents: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for intent in intents {
            let intent = intent.into();
            if let Some(previous) = self.intents.insert(intent.clone(), user_id.to_string()) {
                if previous != user_id {
                    debug!(intent = %intent, from = %previous, to = %user_id, "Intent reassigned");
                }
            }
        }
    }

    /// Stop routing intents to a user
    pub fn remove_intents_from_user(&self, user_id: &str, intents: &[&str]) {
        for intent in intents {
            self.intents
                .remove_if(*intent, |_, owner| owner.as_str() == user_id);
        }
    }

    /// Drop a user and every intent pointing at them
    pub fn remove_user(&self, user_id: &str) {
        self.tokens.remove(user_id);
        self.intents.retain(|_, owner| owner.as_str() != user_id);
    }

    /// Whether a token is registered for the user
    pub fn has_user(&self, user_id: &str) -> bool {
        self.tokens.contains_key(user_id)
    }

    /// Current token for a user, as stored
    pub fn token_for_user(&self, user_id: &str) -> Option<AccessToken> {
        self.tokens.get(user_id).map(|t| t.clone())
    }

    /// Register a persistence hook for refreshed tokens
    pub async fn on_refresh<F>(&self, callback: F)
    where
        F: Fn(&str, &AccessToken) + Send + Sync + 'static,
    {
        self.refresh_callbacks.write().await.push(Arc::new(callback));
    }

    /// Register a hook for failed refreshes
    pub async fn on_refresh_failure<F>(&self, callback: F)
    where
        F: Fn(&str, &AuthError) + Send + Sync + 'static,
    {
        self.failure_callbacks.write().await.push(Arc::new(callback));
    }

    /// Refresh a user's token, sharing the call with concurrent refreshes
    pub async fn refresh_user(&self, user_id: &str) -> Result<AccessToken, AuthError> {
        let refresh = match self.pending_refreshes.entry(user_id.to_string()) {
            Entry::Occupied(entry) => {
                debug!(user_id = %user_id, "Joining in-flight token refresh");
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                let refresh = self.start_refresh(user_id.to_string()).boxed().shared();
                entry.insert(refresh.clone());
                refresh
            }
        };

        refresh.await
    }

    fn start_refresh(
        &self,
        user_id: String,
    ) -> impl std::future::Future<Output = Result<AccessToken, AuthError>> + Send + 'static {
        let provider = self.clone();
        async move {
            let result = provider.perform_refresh(&user_id).await;
            provider.pending_refreshes.remove(&user_id);
            result
        }
    }

    async fn perform_refresh(&self, user_id: &str) -> Result<AccessToken, AuthError> {
        let current = self
            .token_for_user(user_id)
            .ok_or_else(|| AuthError::NoTokenForIntent {
                intent: user_id.to_string(),
            })?;

        let result = match current.refresh_token().filter(|t| !t.is_empty()) {
            Some(refresh_token) => self.oauth.refresh_user_token(refresh_token).await,
            None => Err(AuthError::refresh_failed(user_id, "no refresh token available")),
        };

        match result {
            Ok(token) => {
                info!(user_id = %user_id, "Refreshed access token");
                self.tokens.insert(user_id.to_string(), token.clone());
                for callback in self.refresh_callbacks.read().await.iter() {
                    callback(user_id, &token);
                }
                Ok(token)
            }
            Err(e) => {
                let e = match e {
                    AuthError::RefreshFailed { reason, .. } => {
                        AuthError::refresh_failed(user_id, reason)
                    }
                    other => other,
                };
                error!(user_id = %user_id, error = %e, "Token refresh failed");
                for callback in self.failure_callbacks.read().await.iter() {
                    callback(user_id, &e);
                }
                Err(e)
            }
        }
    }

    fn user_for_intent(&self, intent: &str) -> Option<String> {
        if let Some(user_id) = self.intents.get(intent) {
            return Some(user_id.clone());
        }
        // A bare user id works as an intent of its own
        self.tokens.contains_key(intent).then(|| intent.to_string())
    }
}

#[async_trait]
impl AuthProvider for RefreshingAuthProvider {
    fn name(&self) -> &str {
        "refreshing"
    }

    fn client_id(&self) -> &str {
        self.oauth.client_id()
    }

    async fn access_token_for_intent(
        &self,
        intent: &str,
        required_scopes: &[String],
    ) -> Result<AccessToken, AuthError> {
        let token = self
            .user_for_intent(intent)
            .and_then(|user_id| self.token_for_user(&user_id))
            .ok_or_else(|| AuthError::NoTokenForIntent {
                intent: intent.to_string(),
            })?;

        ensure_scopes(&token, intent, required_scopes)?;
        Ok(token)
    }

    async fn refresh(&self, intent: &str) -> Result<AccessToken, AuthError> {
        let user_id = self
            .user_for_intent(intent)
            .ok_or_else(|| AuthError::NoTokenForIntent {
                intent: intent.to_string(),
            })?;
        self.refresh_user(&user_id).await
    }

    async fn app_access_token(&self, required_scopes: &[String]) -> Result<AccessToken, AuthError> {
        {
            let cached = self.app_token.read().await;
            if let Some(token) = cached.as_ref() {
                if !token.is_expired() && token.has_scopes(required_scopes) {
                    return Ok(token.clone());
                }
            }
        }

        let mut cached = self.app_token.write().await;
        // Another task may have fetched one while we waited for the lock
        if let Some(token) = cached.as_ref() {
            if !token.is_expired() && token.has_scopes(required_scopes) {
                return Ok(token.clone());
            }
        }

        info!("Fetching new app access token");
        let token = self.oauth.client_credentials(required_scopes).await?;
        *cached = Some(token.clone());
        Ok(token)
    }

    async fn refresh_app_access_token(
        &self,
        rejected: &AccessToken,
        required_scopes: &[String],
    ) -> Result<AccessToken, AuthError> {
        let mut cached = self.app_token.write().await;
        if let Some(token) = cached.as_ref() {
            if token.access_token() != rejected.access_token()
                && !token.is_expired()
                && token.has_scopes(required_scopes)
            {
                return Ok(token.clone());
            }
        }

        // Evicted even if the fetch below fails
        *cached = None;
        info!("App access token rejected, fetching a new one");
        let token = self.oauth.client_credentials(required_scopes).await?;
        *cached = Some(token.clone());
        Ok(token)
    }
}
