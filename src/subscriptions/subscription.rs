use std::fmt;
use std::sync::Arc;

use serde_json::Value;

/// Callback invoked once per delivered event
pub type EventHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Maps a raw notification body to what the handler receives
pub type PayloadTransform = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// How events for a subscription are delivered
#[derive(Debug, Clone, PartialEq)]
pub enum Transport {
    /// EventSub topic over the webhook transport
    EventSub {
        /// Topic name, e.g. `channel.follow`
        kind: String,
        version: String,
        condition: Value,
    },
    /// Legacy hub topic with a lease
    WebHook {
        /// Topic URL
        topic: String,
        lease_seconds: u64,
    },
}

impl Transport {
    /// Path segment the listener serves this transport under
    pub fn callback_path(&self) -> &'static str {
        match self {
            Transport::EventSub { .. } => "event",
            Transport::WebHook { .. } => "webhooks",
        }
    }

    pub fn is_webhook(&self) -> bool {
        matches!(self, Transport::WebHook { .. })
    }
}

/// Definition of a subscription: identity, transport and handler.
///
/// The definition is immutable; lifecycle state lives in the manager.
#[derive(Clone)]
pub struct Subscription {
    id: String,
    transport: Transport,
    auth_user_id: Option<String>,
    handler: EventHandler,
    transform: Option<PayloadTransform>,
}

impl Subscription {
    pub fn new<F>(id: impl Into<String>, transport: Transport, handler: F) -> Self
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            transport,
            auth_user_id: None,
            handler: Arc::new(handler),
            transform: None,
        }
    }

    /// Intent used to (re)subscribe
    pub fn with_auth_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.auth_user_id = Some(user_id.into());
        self
    }

    /// Transform applied to each payload before the handler sees it
    pub fn with_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn auth_user_id(&self) -> Option<&str> {
        self.auth_user_id.as_deref()
    }

    /// Run the handler on a payload
    pub fn dispatch(&self, payload: Value) {
        let payload = match &self.transform {
            Some(transform) => transform(payload),
            None => payload,
        };
        (self.handler)(payload);
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("transport", &self.transport)
            .field("auth_user_id", &self.auth_user_id)
            .finish_non_exhaustive()
    }
}
