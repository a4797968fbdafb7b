use async_trait::async_trait;

use crate::auth::token::AccessToken;
use crate::error::AuthError;

pub mod extension;
pub mod refreshing;
pub mod static_provider;

pub use extension::ExtensionAuthProvider;
pub use refreshing::RefreshingAuthProvider;
pub use static_provider::StaticAuthProvider;

/// Source of access tokens, addressed by intent.
///
/// Implementations own token storage. Callers never persist tokens
/// themselves; a provider that refreshes is responsible for keeping the
/// refreshed token (and notifying whoever persists it).
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Provider name, for logs and errors
    fn name(&self) -> &str;

    /// Client id the tokens were issued to
    fn client_id(&self) -> &str;

    /// Return the stored token for an intent.
    ///
    /// The token is returned as stored, even when expired; the caller decides
    /// whether to refresh. Returns `AuthError::ScopeMissing` when the token
    /// lacks any of `required_scopes`.
    async fn access_token_for_intent(
        &self,
        intent: &str,
        required_scopes: &[String],
    ) -> Result<AccessToken, AuthError>;

    /// Refresh the token behind an intent and return the new token
    async fn refresh(&self, intent: &str) -> Result<AccessToken, AuthError>;

    /// App access token (client credentials), for endpoints that need one
    async fn app_access_token(&self, _required_scopes: &[String]) -> Result<AccessToken, AuthError> {
        Err(AuthError::unsupported(self.name(), "app access tokens"))
    }

    /// Replace an app access token the API rejected. A provider that has
    /// already replaced `rejected` returns the newer token instead of
    /// fetching another.
    async fn refresh_app_access_token(
        &self,
        _rejected: &AccessToken,
        _required_scopes: &[String],
    ) -> Result<AccessToken, AuthError> {
        Err(AuthError::unsupported(self.name(), "app access tokens"))
    }
}

/// Check a token against required scopes, attributing failures to `intent`
pub(crate) fn ensure_scopes(
    token: &AccessToken,
    intent: &str,
    required_scopes: &[String],
) -> Result<(), AuthError> {
    let missing = token.missing_scopes(required_scopes);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(AuthError::ScopeMissing {
            intent: intent.to_string(),
            missing,
        })
    }
}

/// Provider variant chosen when the client is constructed
pub enum AnyAuthProvider {
    /// Fixed token
    Static(StaticAuthProvider),
    /// Per-user tokens refreshed through the OAuth endpoint
    Refreshing(RefreshingAuthProvider),
    /// Token supplied by an extension host
    Extension(ExtensionAuthProvider),
}

impl AnyAuthProvider {
    fn inner(&self) -> &dyn AuthProvider {
        match self {
            AnyAuthProvider::Static(p) => p,
            AnyAuthProvider::Refreshing(p) => p,
            AnyAuthProvider::Extension(p) => p,
        }
    }
}

impl From<StaticAuthProvider> for AnyAuthProvider {
    fn from(provider: StaticAuthProvider) -> Self {
        AnyAuthProvider::Static(provider)
    }
}

impl From<RefreshingAuthProvider> for AnyAuthProvider {
    fn from(provider: RefreshingAuthProvider) -> Self {
        AnyAuthProvider::Refreshing(provider)
    }
}

impl From<ExtensionAuthProvider> for AnyAuthProvider {
    fn from(provider: ExtensionAuthProvider) -> Self {
        AnyAuthProvider::Extension(provider)
    }
}

#[async_trait]
impl AuthProvider for AnyAuthProvider {
    fn name(&self) -> &str {
        self.inner().name()
    }

    fn client_id(&self) -> &str {
        self.inner().client_id()
    }

    async fn access_token_for_intent(
        &self,
        intent: &str,
        required_scopes: &[String],
    ) -> Result<AccessToken, AuthError> {
        self.inner()
            .access_token_for_intent(intent, required_scopes)
            .await
    }

    async fn refresh(&self, intent: &str) -> Result<AccessToken, AuthError> {
        self.inner().refresh(intent).await
    }

    async fn app_access_token(&self, required_scopes: &[String]) -> Result<AccessToken, AuthError> {
        self.inner().app_access_token(required_scopes).await
    }

    async fn refresh_app_access_token(
        &self,
        rejected: &AccessToken,
        required_scopes: &[String],
    ) -> Result<AccessToken, AuthError> {
        self.inner()
            .refresh_app_access_token(rejected, required_scopes)
            .await
    }
}
