pub mod oauth;
pub mod providers;
pub mod resolver;
pub mod token;

pub use oauth::{OAuthClient, TokenInfo};
pub use providers::{
    AnyAuthProvider, AuthProvider, ExtensionAuthProvider, RefreshingAuthProvider,
    StaticAuthProvider,
};
pub use resolver::{resolve, resolve_intent, FALLBACK_INTENT};
pub use token::AccessToken;
