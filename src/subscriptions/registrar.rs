//! Remote (de)registration of subscriptions.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use super::subscription::{Subscription, Transport};
use crate::api::{
    ApiClient, CreateEventSubSubscription, EventSubTransport, HubRequest, TokenSource,
    STATUS_ENABLED, STATUS_VERIFICATION_PENDING,
};
use crate::error::{Error, SubscriptionError};

/// What the remote returned for a registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// Remote subscription id, when the remote assigns one
    pub remote_id: Option<String>,
    /// The remote already considers the subscription active
    pub verified: bool,
    /// When the lease runs out, for transports with leases
    pub lease_expires_at: Option<DateTime<Utc>>,
}

/// Registers and removes subscriptions with the remote
#[async_trait]
pub trait Registrar: Send + Sync {
    async fn register(&self, subscription: &Subscription) -> Result<Registration, SubscriptionError>;

    async fn deregister(
        &self,
        subscription: &Subscription,
        registration: &Registration,
    ) -> Result<(), SubscriptionError>;
}

/// Callback URL for a subscription: `<base>/<event|webhooks>/<id>`
pub fn callback_url(base: &str, subscription: &Subscription) -> String {
    format!(
        "{}/{}/{}",
        base.trim_end_matches('/'),
        subscription.transport().callback_path(),
        subscription.id()
    )
}

fn registration_error(id: &str, error: Error) -> SubscriptionError {
    match error {
        Error::Auth(source) => SubscriptionError::Auth {
            id: id.to_string(),
            source,
        },
        Error::Serialization(reason) => SubscriptionError::MalformedResponse {
            id: id.to_string(),
            reason,
        },
        other => SubscriptionError::Registration {
            id: id.to_string(),
            reason: other.to_string(),
        },
    }
}

fn deregistration_error(id: &str, error: Error) -> SubscriptionError {
    match error {
        Error::Auth(source) => SubscriptionError::Auth {
            id: id.to_string(),
            source,
        },
        other => SubscriptionError::Deregistration {
            id: id.to_string(),
            reason: other.to_string(),
        },
    }
}

fn wrong_transport(subscription: &Subscription, registrar: &str) -> SubscriptionError {
    SubscriptionError::Unsupported {
        id: subscription.id().to_string(),
        operation: format!("registration through the {} registrar", registrar),
    }
}

/// Registers EventSub topics with webhook transport. EventSub webhooks are
/// created with the app access token.
#[derive(Clone)]
pub struct EventSubRegistrar {
    api: ApiClient,
    callback_base: String,
    secret: String,
}

impl EventSubRegistrar {
    pub fn new(api: ApiClient, callback_base: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            api,
            callback_base: callback_base.into(),
            secret: secret.into(),
        }
    }
}

#[async_trait]
impl Registrar for EventSubRegistrar {
    async fn register(&self, subscription: &Subscription) -> Result<Registration, SubscriptionError> {
        let Transport::EventSub {
            kind,
            version,
            condition,
        } = subscription.transport()
        else {
            return Err(wrong_transport(subscription, "EventSub"));
        };

        let id = subscription.id();
        let body = CreateEventSubSubscription {
            kind: kind.clone(),
            version: version.clone(),
            condition: condition.clone(),
            transport: EventSubTransport::webhook(
                callback_url(&self.callback_base, subscription),
                self.secret.clone(),
            ),
        };

        let created = self
            .api
            .create_eventsub_subscription(&body, TokenSource::App)
            .await
            .map_err(|e| registration_error(id, e))?;

        let verified = match created.status.as_str() {
            STATUS_ENABLED => true,
            STATUS_VERIFICATION_PENDING => false,
            other => {
                return Err(SubscriptionError::MalformedResponse {
                    id: id.to_string(),
                    reason: format!("unexpected subscription status '{}'", other),
                })
            }
        };

        Ok(Registration {
            remote_id: Some(created.id),
            verified,
            lease_expires_at: None,
        })
    }

    async fn deregister(
        &self,
        subscription: &Subscription,
        registration: &Registration,
    ) -> Result<(), SubscriptionError> {
        let id = subscription.id();
        let Some(remote_id) = &registration.remote_id else {
            debug!(id = %id, "No remote id recorded, nothing to delete");
            return Ok(());
        };

        match self
            .api
            .delete_eventsub_subscription(remote_id, TokenSource::App)
            .await
        {
            Ok(()) => Ok(()),
            Err(Error::Api { status: 404, .. }) => {
                warn!(id = %id, remote_id = %remote_id, "Remote subscription already gone");
                Ok(())
            }
            Err(e) => Err(deregistration_error(id, e)),
        }
    }
}

/// Registers legacy hub topics. Hub requests use the token resolved for the
/// subscription's auth user.
#[derive(Clone)]
pub struct WebHookRegistrar {
    api: ApiClient,
    callback_base: String,
    secret: String,
}

impl WebHookRegistrar {
    pub fn new(api: ApiClient, callback_base: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            api,
            callback_base: callback_base.into(),
            secret: secret.into(),
        }
    }

    fn token_source(subscription: &Subscription) -> TokenSource {
        match subscription.auth_user_id() {
            Some(user_id) => TokenSource::intent(user_id),
            None => TokenSource::Intents(Vec::new()),
        }
    }
}

#[async_trait]
impl Registrar for WebHookRegistrar {
    async fn register(&self, subscription: &Subscription) -> Result<Registration, SubscriptionError> {
        let Transport::WebHook {
            topic,
            lease_seconds,
        } = subscription.transport()
        else {
            return Err(wrong_transport(subscription, "WebHook"));
        };

        let hub = HubRequest::subscribe(
            callback_url(&self.callback_base, subscription),
            topic.clone(),
            *lease_seconds,
            self.secret.clone(),
        );
        self.api
            .webhook_subscribe(&hub, Self::token_source(subscription))
            .await
            .map_err(|e| registration_error(subscription.id(), e))?;

        // Provisional; the hub starts the lease at verification, see `SubscriptionManager::record_lease`
        let lease = hub.lease_seconds.unwrap_or(*lease_seconds);
        Ok(Registration {
            remote_id: None,
            verified: false,
            lease_expires_at: Some(Utc::now() + Duration::seconds(lease as i64)),
        })
    }

    async fn deregister(
        &self,
        subscription: &Subscription,
        _registration: &Registration,
    ) -> Result<(), SubscriptionError> {
        let Transport::WebHook { topic, .. } = subscription.transport() else {
            return Err(wrong_transport(subscription, "WebHook"));
        };

        let hub = HubRequest::unsubscribe(callback_url(&self.callback_base, subscription), topic.clone());
        self.api
            .webhook_unsubscribe(&hub, Self::token_source(subscription))
            .await
            .map_err(|e| deregistration_error(subscription.id(), e))
    }
}

/// Routes each subscription to the registrar for its transport
#[derive(Clone)]
pub struct CallbackRegistrar {
    eventsub: EventSubRegistrar,
    webhook: WebHookRegistrar,
}

impl CallbackRegistrar {
    /// Both transports share the client, callback base and signing secret
    pub fn new(api: ApiClient, callback_base: impl Into<String>, secret: impl Into<String>) -> Self {
        let callback_base = callback_base.into();
        let secret = secret.into();
        Self {
            eventsub: EventSubRegistrar::new(api.clone(), callback_base.clone(), secret.clone()),
            webhook: WebHookRegistrar::new(api, callback_base, secret),
        }
    }

    fn for_transport(&self, subscription: &Subscription) -> &dyn Registrar {
        match subscription.transport() {
            Transport::EventSub { .. } => &self.eventsub,
            Transport::WebHook { .. } => &self.webhook,
        }
    }
}

#[async_trait]
impl Registrar for CallbackRegistrar {
    async fn register(&self, subscription: &Subscription) -> Result<Registration, SubscriptionError> {
        self.for_transport(subscription).register(subscription).await
    }

    async fn deregister(
        &self,
        subscription: &Subscription,
        registration: &Registration,
    ) -> Result<(), SubscriptionError> {
        self.for_transport(subscription)
            .deregister(subscription, registration)
            .await
    }
}
