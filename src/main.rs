use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn};

use twirl::auth::oauth::OAuthClient;
use twirl::auth::providers::{AnyAuthProvider, RefreshingAuthProvider};
use twirl::subscriptions::{topics, CallbackRegistrar};
use twirl::{ApiClient, Config, Listener, ReqwestHttpClient, SubscriptionManager};

/// Broadcaster ids to watch, comma separated
const BROADCASTERS_VAR: &str = "TWIRL_BROADCASTERS";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    twirl::logging::init(twirl::logging::default_directive());
    info!(version = twirl::VERSION, "twirl starting");

    // Optional JSON config file as the first argument
    let config = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => Config::load(&path).await?,
        None => Config::from_env()?,
    };

    let http = Arc::new(ReqwestHttpClient::new());
    let oauth = OAuthClient::new(
        http.clone(),
        config.client.client_id.clone(),
        config.client.client_secret.clone(),
    )
    .with_base_url(config.client.oauth_base_url.clone());
    let refreshing = RefreshingAuthProvider::new(oauth);
    refreshing
        .on_refresh_failure(|user_id, e| warn!(user_id = %user_id, error = %e, "Token refresh failed"))
        .await;
    let auth = Arc::new(AnyAuthProvider::from(refreshing));

    let api = ApiClient::new(http, auth).with_base_url(config.client.helix_base_url.clone());
    let registrar = CallbackRegistrar::new(
        api,
        config.listener.callback_base_url.clone(),
        config.listener.secret.clone(),
    );
    let manager = SubscriptionManager::new(
        Arc::new(registrar),
        config.listener.verification_timeout(),
    );

    let broadcasters: Vec<String> = std::env::var(BROADCASTERS_VAR)
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(String::from)
        .collect();
    if broadcasters.is_empty() {
        warn!("{} is empty, nothing to subscribe to", BROADCASTERS_VAR);
    }
    for broadcaster in &broadcasters {
        let id = broadcaster.clone();
        manager.add(topics::stream_online(broadcaster, move |event| {
            info!(broadcaster = %id, event = %event, "Stream online");
        }));
        let id = broadcaster.clone();
        manager.add(topics::stream_offline(broadcaster, move |event| {
            info!(broadcaster = %id, event = %event, "Stream offline");
        }));
    }

    let listener = Listener::new(manager.clone(), config.listener.clone());
    let server = tokio::spawn(listener.serve());

    // Registration needs the listener up to answer the challenge
    for id in manager.ids() {
        if let Err(e) = manager.subscribe(&id).await {
            error!(id = %id, error = %e, "Subscribe failed");
        }
    }

    info!("Press Ctrl+C to stop");
    tokio::select! {
        result = server => {
            result??;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, removing subscriptions...");
            for id in manager.active_ids() {
                if let Err(e) = manager.unsubscribe(&id).await {
                    warn!(id = %id, error = %e, "Unsubscribe failed");
                }
            }
        }
    }

    info!("Shutdown complete");
    Ok(())
}
