use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info};

use crate::api::DEFAULT_HELIX_BASE_URL;
use crate::auth::oauth::DEFAULT_OAUTH_BASE_URL;
use crate::error::{Error, Result};
use crate::subscriptions::DEFAULT_VERIFICATION_TIMEOUT_SECS;

// Default configuration values
const DEFAULT_LISTENER_HOST: &str = "0.0.0.0";
const DEFAULT_LISTENER_PORT: u16 = 8080;
const DEFAULT_RENEWAL_INTERVAL_SECONDS: u64 = 60;
const DEFAULT_RENEWAL_MARGIN_SECONDS: u64 = 300;
const DEFAULT_MESSAGE_WINDOW_SECONDS: u64 = 600;

/// EventSub accepts secrets of 10 to 100 characters
const SECRET_LENGTH: std::ops::RangeInclusive<usize> = 10..=100;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub listener: ListenerConfig,
}

/// Application credentials and API endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Application client id
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Application client secret, needed for refresh and app tokens
    #[serde(default = "default_client_secret")]
    pub client_secret: Option<String>,
    #[serde(default = "default_helix_base_url")]
    pub helix_base_url: String,
    #[serde(default = "default_oauth_base_url")]
    pub oauth_base_url: String,
}

/// Callback listener and subscription lifecycle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Address to bind the listener to
    #[serde(default = "default_listener_host")]
    pub host: String,
    #[serde(default = "default_listener_port")]
    pub port: u16,
    /// Public base URL the platform calls back on
    #[serde(default = "default_callback_base_url")]
    pub callback_base_url: String,
    /// Signing secret shared with the platform (random if unset)
    #[serde(default = "default_secret")]
    pub secret: String,
    #[serde(default = "default_verification_timeout")]
    pub verification_timeout_seconds: u64,
    /// How often leases and errored subscriptions are checked
    #[serde(default = "default_renewal_interval")]
    pub renewal_interval_seconds: u64,
    /// Renew leases that end within this margin
    #[serde(default = "default_renewal_margin")]
    pub renewal_margin_seconds: u64,
    /// Re-create errored subscriptions on each check
    #[serde(default = "default_reconcile_errored")]
    pub reconcile_errored: bool,
    /// How long delivered message ids are remembered for deduplication
    #[serde(default = "default_message_window")]
    pub message_window_seconds: u64,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(default)
}

// Default functions
fn default_client_id() -> String {
    std::env::var("TWITCH_CLIENT_ID").unwrap_or_default()
}

fn default_client_secret() -> Option<String> {
    std::env::var("TWITCH_CLIENT_SECRET")
        .ok()
        .filter(|secret| !secret.is_empty())
}

fn default_helix_base_url() -> String {
    std::env::var("TWIRL_HELIX_URL").unwrap_or_else(|_| DEFAULT_HELIX_BASE_URL.to_string())
}

fn default_oauth_base_url() -> String {
    std::env::var("TWIRL_OAUTH_URL").unwrap_or_else(|_| DEFAULT_OAUTH_BASE_URL.to_string())
}

fn default_listener_host() -> String {
    std::env::var("TWIRL_LISTENER_HOST").unwrap_or_else(|_| DEFAULT_LISTENER_HOST.to_string())
}

fn default_listener_port() -> u16 {
    env_or("TWIRL_LISTENER_PORT", DEFAULT_LISTENER_PORT)
}

fn default_callback_base_url() -> String {
    std::env::var("TWIRL_CALLBACK_URL").unwrap_or_default()
}

fn default_secret() -> String {
    std::env::var("TWIRL_SECRET").unwrap_or_else(|_| uuid::Uuid::new_v4().simple().to_string())
}

fn default_verification_timeout() -> u64 {
    env_or("TWIRL_VERIFICATION_TIMEOUT", DEFAULT_VERIFICATION_TIMEOUT_SECS)
}

fn default_renewal_interval() -> u64 {
    env_or("TWIRL_RENEWAL_INTERVAL", DEFAULT_RENEWAL_INTERVAL_SECONDS)
}

fn default_renewal_margin() -> u64 {
    env_or("TWIRL_RENEWAL_MARGIN", DEFAULT_RENEWAL_MARGIN_SECONDS)
}

fn default_reconcile_errored() -> bool {
    env_or("TWIRL_RECONCILE_ERRORED", true)
}

fn default_message_window() -> u64 {
    env_or("TWIRL_MESSAGE_WINDOW", DEFAULT_MESSAGE_WINDOW_SECONDS)
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_id: default_client_id(),
            client_secret: default_client_secret(),
            helix_base_url: default_helix_base_url(),
            oauth_base_url: default_oauth_base_url(),
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: default_listener_host(),
            port: default_listener_port(),
            callback_base_url: default_callback_base_url(),
            secret: default_secret(),
            verification_timeout_seconds: default_verification_timeout(),
            renewal_interval_seconds: default_renewal_interval(),
            renewal_margin_seconds: default_renewal_margin(),
            reconcile_errored: default_reconcile_errored(),
            message_window_seconds: default_message_window(),
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(Error::config("client_id is required (TWITCH_CLIENT_ID)"));
        }
        for (name, url) in [
            ("helix_base_url", &self.helix_base_url),
            ("oauth_base_url", &self.oauth_base_url),
        ] {
            reqwest::Url::parse(url)
                .map_err(|e| Error::config(format!("{} '{}' is invalid: {}", name, url, e)))?;
        }
        Ok(())
    }
}

impl ListenerConfig {
    pub fn validate(&self) -> Result<()> {
        if !SECRET_LENGTH.contains(&self.secret.len()) {
            return Err(Error::config(format!(
                "secret must be {} to {} characters long",
                SECRET_LENGTH.start(),
                SECRET_LENGTH.end()
            )));
        }

        let url = reqwest::Url::parse(&self.callback_base_url).map_err(|e| {
            Error::config(format!(
                "callback_base_url '{}' is invalid: {}",
                self.callback_base_url, e
            ))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::config("callback_base_url must be an http(s) URL"));
        }

        if self.renewal_interval_seconds == 0 {
            return Err(Error::config("renewal_interval_seconds must be positive"));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn verification_timeout(&self) -> Duration {
        Duration::from_secs(self.verification_timeout_seconds)
    }

    pub fn renewal_interval(&self) -> Duration {
        Duration::from_secs(self.renewal_interval_seconds)
    }

    pub fn renewal_margin(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.renewal_margin_seconds as i64)
    }

    pub fn message_window(&self) -> Duration {
        Duration::from_secs(self.message_window_seconds)
    }
}

impl Config {
    /// Configuration from the environment, reading `.env` first if present
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!("Loaded environment from {}", path.display());
        }
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file; missing fields fall back to the environment
    pub async fn load(path: &Path) -> Result<Self> {
        let config_str = fs::read_to_string(path)
            .await
            .map_err(|e| Error::config(format!("cannot read {}: {}", path.display(), e)))?;
        let config: Config = serde_json::from_str(&config_str)?;
        config.validate()?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Save to a JSON file
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::config(format!("cannot create {}: {}", parent.display(), e)))?;
        }

        let config_str = serde_json::to_string_pretty(self)?;
        fs::write(path, config_str)
            .await
            .map_err(|e| Error::config(format!("cannot write {}: {}", path.display(), e)))?;
        debug!("Saved configuration to {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.client.validate()?;
        self.listener.validate()
    }
}
