use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{ensure_scopes, AuthProvider};
use crate::auth::token::AccessToken;
use crate::error::AuthError;

/// Provider for code running inside an extension, where the host page hands
/// over a token on authorization and renews it on its own schedule.
///
/// Refresh is not possible from inside the extension; an expired token stays
/// unusable until the host delivers a new one through [`set_token`].
///
/// [`set_token`]: ExtensionAuthProvider::set_token
#[derive(Clone)]
pub struct ExtensionAuthProvider {
    client_id: String,
    token: Arc<RwLock<Option<AccessToken>>>,
}

impl ExtensionAuthProvider {
    /// Create a provider with no token yet
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            token: Arc::new(RwLock::new(None)),
        }
    }

    /// Store the token delivered by the host's authorization callback
    pub async fn set_token(&self, token: AccessToken) {
        debug!("Extension host delivered a new token");
        *self.token.write().await = Some(token);
    }

    /// Forget the current token
    pub async fn clear(&self) {
        *self.token.write().await = None;
    }
}

#[async_trait]
impl AuthProvider for ExtensionAuthProvider {
    fn name(&self) -> &str {
        "extension"
    }

    fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn access_token_for_intent(
        &self,
        intent: &str,
        required_scopes: &[String],
    ) -> Result<AccessToken, AuthError> {
        let guard = self.token.read().await;
        let token = guard.as_ref().ok_or_else(|| AuthError::NoTokenForIntent {
            intent: intent.to_string(),
        })?;
        ensure_scopes(token, intent, required_scopes)?;
        Ok(token.clone())
    }

    async fn refresh(&self, _intent: &str) -> Result<AccessToken, AuthError> {
        Err(AuthError::unsupported(self.name(), "token refresh"))
    }
}
