//! Intent resolution: turn an ordered list of intents into one usable token.

use tracing::{debug, warn};

use crate::auth::providers::{ensure_scopes, AuthProvider};
use crate::auth::token::AccessToken;
use crate::error::AuthError;

/// Intent tried last when every caller-supplied intent fails
pub const FALLBACK_INTENT: &str = "chat";

/// Intents in the order they will be tried: caller order, then the fallback
/// unless the caller already listed it.
pub fn intent_chain<S: AsRef<str>>(intents: &[S]) -> Vec<String> {
    let mut chain: Vec<String> = Vec::with_capacity(intents.len() + 1);
    for intent in intents {
        let intent = intent.as_ref();
        if !chain.iter().any(|seen| seen == intent) {
            chain.push(intent.to_string());
        }
    }
    if !chain.iter().any(|seen| seen == FALLBACK_INTENT) {
        chain.push(FALLBACK_INTENT.to_string());
    }
    chain
}

/// Resolve the first intent that yields a usable, scope-sufficient token.
///
/// An expired token is refreshed once if it carries a refresh token; a
/// failed refresh or missing scopes moves on to the next intent. Intents
/// after the first usable one are never queried.
pub async fn resolve<S: AsRef<str>>(
    provider: &dyn AuthProvider,
    intents: &[S],
    required_scopes: &[String],
) -> Result<AccessToken, AuthError> {
    resolve_intent(provider, intents, required_scopes)
        .await
        .map(|(_, token)| token)
}

/// Like [`resolve`], also returning the intent that produced the token
pub async fn resolve_intent<S: AsRef<str>>(
    provider: &dyn AuthProvider,
    intents: &[S],
    required_scopes: &[String],
) -> Result<(String, AccessToken), AuthError> {
    let chain = intent_chain(intents);
    let mut last_error = None;

    for intent in &chain {
        match token_for_intent(provider, intent, required_scopes).await {
            Ok(token) => {
                debug!(intent = %intent, provider = provider.name(), "Resolved access token");
                return Ok((intent.clone(), token));
            }
            Err(e) => {
                debug!(intent = %intent, error = %e, "Intent did not yield a usable token");
                last_error = Some(e);
            }
        }
    }

    let cause = last_error.unwrap_or_else(|| AuthError::NoTokenForIntent {
        intent: FALLBACK_INTENT.to_string(),
    });
    warn!(tried = ?chain, error = %cause, "Auth resolution failed for every intent");
    Err(AuthError::Resolution {
        tried: chain,
        cause: Box::new(cause),
    })
}

async fn token_for_intent(
    provider: &dyn AuthProvider,
    intent: &str,
    required_scopes: &[String],
) -> Result<AccessToken, AuthError> {
    let token = provider
        .access_token_for_intent(intent, required_scopes)
        .await?;

    if !token.is_expired() {
        return Ok(token);
    }

    if !token.can_refresh() {
        return Err(AuthError::TokenExpired {
            intent: intent.to_string(),
        });
    }

    debug!(intent = %intent, "Token expired, refreshing");
    let refreshed = provider.refresh(intent).await?;
    if refreshed.is_expired() {
        return Err(AuthError::TokenExpired {
            intent: intent.to_string(),
        });
    }
    ensure_scopes(&refreshed, intent, required_scopes)?;
    Ok(refreshed)
}
