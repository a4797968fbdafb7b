use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Lifecycle state of one subscription instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    #[default]
    Unsubscribed,
    /// Registered (or registering) and waiting for the remote to confirm
    Pending,
    Subscribed,
    /// Terminal for this instance
    Error,
}

impl SubscriptionState {
    /// Pending and subscribed instances make up the active set
    pub fn is_active(self) -> bool {
        matches!(self, SubscriptionState::Pending | SubscriptionState::Subscribed)
    }
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubscriptionState::Unsubscribed => "unsubscribed",
            SubscriptionState::Pending => "pending",
            SubscriptionState::Subscribed => "subscribed",
            SubscriptionState::Error => "error",
        };
        f.write_str(name)
    }
}

/// A transition the state machine refused
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("cannot {action} while {from}")]
pub struct InvalidTransition {
    pub from: SubscriptionState,
    pub action: &'static str,
}

/// Subscription state machine.
///
/// ```text
/// unsubscribed -> pending -> subscribed -> unsubscribed
///                 pending -> unsubscribed
///                 pending -> error
///                            subscribed -> error
/// ```
#[derive(Debug, Clone, Default)]
pub struct StateMachine {
    state: SubscriptionState,
}

impl StateMachine {
    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    /// A registration call is about to go out
    pub fn begin(&mut self) -> Result<SubscriptionState, InvalidTransition> {
        self.transition_from(
            &[SubscriptionState::Unsubscribed],
            SubscriptionState::Pending,
            "subscribe",
        )
    }

    /// The remote confirmed the subscription (enabled status or verification)
    pub fn confirm(&mut self) -> Result<SubscriptionState, InvalidTransition> {
        self.transition_from(
            &[SubscriptionState::Pending],
            SubscriptionState::Subscribed,
            "confirm",
        )
    }

    /// Registration, verification or renewal failed, or the remote revoked it
    pub fn fail(&mut self) -> Result<SubscriptionState, InvalidTransition> {
        self.transition_from(
            &[SubscriptionState::Pending, SubscriptionState::Subscribed],
            SubscriptionState::Error,
            "fail",
        )
    }

    /// The remote registration was removed
    pub fn unsubscribe(&mut self) -> Result<SubscriptionState, InvalidTransition> {
        self.transition_from(
            &[SubscriptionState::Pending, SubscriptionState::Subscribed],
            SubscriptionState::Unsubscribed,
            "unsubscribe",
        )
    }

    fn transition_from(
        &mut self,
        expected: &[SubscriptionState],
        next: SubscriptionState,
        action: &'static str,
    ) -> Result<SubscriptionState, InvalidTransition> {
        if !expected.contains(&self.state) {
            return Err(InvalidTransition {
                from: self.state,
                action,
            });
        }
        self.state = next;
        Ok(next)
    }
}
