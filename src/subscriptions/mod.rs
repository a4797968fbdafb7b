//! Push-event subscriptions: definitions, lifecycle and remote registration.

pub mod manager;
pub mod registrar;
pub mod state;
pub mod subscription;
pub mod topics;


pub use manager::{SubscriptionManager, DEFAULT_VERIFICATION_TIMEOUT_SECS};
pub use registrar::{
    callback_url, CallbackRegistrar, EventSubRegistrar, Registrar, Registration, WebHookRegistrar,
};
pub use state::{StateMachine, SubscriptionState};
pub use subscription::{EventHandler, PayloadTransform, Subscription, Transport};
