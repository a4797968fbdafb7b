use async_trait::async_trait;

use super::{ensure_scopes, AuthProvider};
use crate::auth::token::AccessToken;
use crate::error::AuthError;

/// Serves one fixed token for every intent. Never refreshes.
#[derive(Debug, Clone)]
pub struct StaticAuthProvider {
    client_id: String,
    token: AccessToken,
}

impl StaticAuthProvider {
    /// Create a provider around an already obtained token
    pub fn new(client_id: impl Into<String>, token: AccessToken) -> Self {
        Self {
            client_id: client_id.into(),
            token,
        }
    }
}

#[async_trait]
impl AuthProvider for StaticAuthProvider {
    fn name(&self) -> &str {
        "static"
    }

    fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn access_token_for_intent(
        &self,
        intent: &str,
        required_scopes: &[String],
    ) -> Result<AccessToken, AuthError> {
        ensure_scopes(&self.token, intent, required_scopes)?;
        Ok(self.token.clone())
    }

    async fn refresh(&self, intent: &str) -> Result<AccessToken, AuthError> {
        Err(AuthError::refresh_failed(
            intent,
            "static tokens cannot be refreshed",
        ))
    }
}
