pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod http_client;
pub mod listener;
pub mod logging;
pub mod subscriptions;

// Re-export core components
pub use crate::api::{ApiClient, ApiRequest, TokenSource};
pub use crate::auth::{resolve, AccessToken, AuthProvider, FALLBACK_INTENT};
pub use crate::config::{ClientConfig, Config, ListenerConfig};
pub use crate::error::{AuthError, Error, Result, SubscriptionError};
pub use crate::http_client::{HttpClient, ReqwestHttpClient};
pub use crate::listener::Listener;
pub use crate::subscriptions::{Subscription, SubscriptionManager, SubscriptionState};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
