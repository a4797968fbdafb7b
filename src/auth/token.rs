use std::collections::BTreeSet;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// An OAuth access token together with what is known about its lifetime.
///
/// Serialized in the camelCase shape that applications typically persist
/// (`accessToken`, `refreshToken`, `expiresIn`, `obtainmentTimestamp`, `scope`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessToken {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    obtainment_timestamp: i64,
    #[serde(default)]
    scope: BTreeSet<String>,
}

impl AccessToken {
    /// Create a token with no refresh token and no known expiry, obtained now
    pub fn new<I, S>(access_token: impl Into<String>, scope: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_in: None,
            obtainment_timestamp: Utc::now().timestamp_millis(),
            scope: scope.into_iter().map(Into::into).collect(),
        }
    }

    /// Attach a refresh token
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    /// Set the lifetime in seconds, counted from the obtainment timestamp
    pub fn with_expires_in(mut self, expires_in: u64) -> Self {
        self.expires_in = Some(expires_in);
        self
    }

    /// Override when the token was obtained (epoch milliseconds)
    pub fn with_obtainment_timestamp(mut self, obtainment_timestamp: i64) -> Self {
        self.obtainment_timestamp = obtainment_timestamp;
        self
    }

    /// The bearer secret
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Refresh token, if the grant issued one
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    /// Lifetime in seconds, if known
    pub fn expires_in(&self) -> Option<u64> {
        self.expires_in
    }

    /// When the token was obtained (epoch milliseconds)
    pub fn obtainment_timestamp(&self) -> i64 {
        self.obtainment_timestamp
    }

    /// Scopes granted to this token
    pub fn scope(&self) -> &BTreeSet<String> {
        &self.scope
    }

    /// Whether a refresh can be attempted at all
    pub fn can_refresh(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Absolute expiry in epoch milliseconds, if the lifetime is known
    pub fn expiry_timestamp(&self) -> Option<i64> {
        // Saturates for absurd persisted lifetimes
        self.expires_in.map(|secs| {
            let lifetime_ms = i64::try_from(secs).unwrap_or(i64::MAX).saturating_mul(1000);
            self.obtainment_timestamp.saturating_add(lifetime_ms)
        })
    }

    /// Absolute expiry as a UTC timestamp
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expiry_timestamp()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    }

    /// True if the lifetime is known and has elapsed
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now().timestamp_millis())
    }

    /// Expiry check against an explicit clock value (epoch milliseconds)
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.expiry_timestamp().is_some_and(|expiry| now_ms > expiry)
    }

    /// Scopes from `required` this token does not carry, in input order
    pub fn missing_scopes<S: AsRef<str>>(&self, required: &[S]) -> Vec<String> {
        required
            .iter()
            .map(|scope| scope.as_ref())
            .filter(|scope| !self.scope.contains(*scope))
            .map(str::to_string)
            .collect()
    }

    /// True if every required scope is present
    pub fn has_scopes<S: AsRef<str>>(&self, required: &[S]) -> bool {
        self.missing_scopes(required).is_empty()
    }
}
