use thiserror::Error;

/// Errors raised while turning an intent into a usable access token
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The provider has no token registered for the intent
    #[error("No token available for intent '{intent}'")]
    NoTokenForIntent {
        /// Intent that was requested
        intent: String,
    },

    /// A token exists but lacks one or more of the required scopes
    #[error("Token for intent '{intent}' is missing scopes: {}", missing.join(", "))]
    ScopeMissing {
        /// Intent that was requested
        intent: String,
        /// Scopes the token does not carry
        missing: Vec<String>,
    },

    /// The token is expired and cannot be refreshed
    #[error("Token for intent '{intent}' is expired")]
    TokenExpired {
        /// Intent that was requested
        intent: String,
    },

    /// Refreshing the token failed
    #[error("Failed to refresh token for '{intent}': {reason}")]
    RefreshFailed {
        /// Intent or user whose token was being refreshed
        intent: String,
        /// Underlying failure
        reason: String,
    },

    /// The provider variant does not implement the requested operation
    #[error("Auth provider '{provider}' does not support {operation}")]
    Unsupported {
        /// Provider name
        provider: String,
        /// Operation that was attempted
        operation: String,
    },

    /// Every intent (fallback included) failed to produce a usable token
    #[error("No intent yielded a usable token (tried {}): {cause}", tried.join(", "))]
    Resolution {
        /// Intents in the order they were tried
        tried: Vec<String>,
        /// Failure of the last intent tried
        cause: Box<AuthError>,
    },

    /// The OAuth endpoint could not be reached or answered with garbage
    #[error("OAuth request failed: {0}")]
    Request(String),
}

impl AuthError {
    /// Build a refresh failure from any displayable cause
    pub fn refresh_failed(intent: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        AuthError::RefreshFailed {
            intent: intent.into(),
            reason: reason.to_string(),
        }
    }

    /// Build an unsupported-operation error
    pub fn unsupported(provider: impl Into<String>, operation: impl Into<String>) -> Self {
        AuthError::Unsupported {
            provider: provider.into(),
            operation: operation.into(),
        }
    }

    /// Returns true for the scope-missing variant
    pub fn is_scope_missing(&self) -> bool {
        matches!(self, AuthError::ScopeMissing { .. })
    }
}

/// Errors raised by the subscription lifecycle
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The remote registration call failed
    #[error("Failed to register subscription '{id}': {reason}")]
    Registration {
        /// Subscription id
        id: String,
        /// Underlying failure
        reason: String,
    },

    /// The remote de-registration call failed
    #[error("Failed to remove subscription '{id}': {reason}")]
    Deregistration {
        /// Subscription id
        id: String,
        /// Underlying failure
        reason: String,
    },

    /// The remote answered with an unexpected payload
    #[error("Unexpected response for subscription '{id}': {reason}")]
    MalformedResponse {
        /// Subscription id
        id: String,
        /// What was wrong with the response
        reason: String,
    },

    /// The verification challenge never arrived
    #[error("Subscription '{id}' was not verified within {timeout_secs}s")]
    VerificationTimeout {
        /// Subscription id
        id: String,
        /// Window that elapsed
        timeout_secs: u64,
    },

    /// The remote revoked the subscription
    #[error("Subscription '{id}' was revoked: {reason}")]
    Revoked {
        /// Subscription id
        id: String,
        /// Revocation status reported by the remote
        reason: String,
    },

    /// The subscription instance is in the terminal error state
    #[error("Subscription '{id}' is in a terminal error state")]
    Terminal {
        /// Subscription id
        id: String,
    },

    /// No subscription with that id is managed
    #[error("Unknown subscription '{0}'")]
    UnknownSubscription(String),

    /// Operation does not apply to this transport
    #[error("Subscription '{id}' does not support {operation}")]
    Unsupported {
        /// Subscription id
        id: String,
        /// Operation that was attempted
        operation: String,
    },

    /// The operation is not valid in the subscription's current state
    #[error("Subscription '{id}': {reason}")]
    InvalidState {
        /// Subscription id
        id: String,
        /// Rejected transition
        reason: String,
    },

    /// Resolving a token for the subscription failed
    #[error("Authentication failed for subscription '{id}': {source}")]
    Auth {
        /// Subscription id
        id: String,
        /// Underlying auth error
        #[source]
        source: AuthError,
    },
}

impl SubscriptionError {
    /// Subscription id the error relates to, if any
    pub fn subscription_id(&self) -> &str {
        match self {
            SubscriptionError::Registration { id, .. }
            | SubscriptionError::Deregistration { id, .. }
            | SubscriptionError::MalformedResponse { id, .. }
            | SubscriptionError::VerificationTimeout { id, .. }
            | SubscriptionError::Revoked { id, .. }
            | SubscriptionError::Terminal { id }
            | SubscriptionError::Unsupported { id, .. }
            | SubscriptionError::InvalidState { id, .. }
            | SubscriptionError::Auth { id, .. } => id,
            SubscriptionError::UnknownSubscription(id) => id,
        }
    }
}

/// Top-level error type for the crate
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Authentication failure
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Subscription lifecycle failure
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    /// API request failure
    #[error("API request failed ({status}): {message}")]
    Api {
        /// HTTP status code, 0 if no response was received
        status: u16,
        /// Response body or transport error
        message: String,
    },

    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization or deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The callback listener could not bind or serve
    #[error("Listener error: {0}")]
    Listener(String),
}

impl Error {
    /// Create an API error for a response that came back with a status
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Error::Api {
            status,
            message: message.into(),
        }
    }

    /// Create an API error for a request that never got a response
    pub fn transport(error: impl std::fmt::Display) -> Self {
        Error::Api {
            status: 0,
            message: error.to_string(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Type alias for results using the crate error
pub type Result<T> = std::result::Result<T, Error>;
