use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use dashmap::mapref::one::{Ref, RefMut};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::registrar::{Registrar, Registration};
use super::state::{InvalidTransition, StateMachine, SubscriptionState};
use super::subscription::Subscription;
use crate::error::SubscriptionError;

/// How long a registered subscription may wait for its verification challenge
pub const DEFAULT_VERIFICATION_TIMEOUT_SECS: u64 = 600;

/// One managed subscription instance
struct Entry {
    subscription: Subscription,
    machine: StateMachine,
    registration: Option<Registration>,
    last_error: Option<SubscriptionError>,
    /// Serializes lifecycle operations for this id
    gate: Arc<Mutex<()>>,
    /// Bumped whenever a new registration starts or the instance is reset;
    /// stale verification timers compare against it
    generation: u64,
}

impl Entry {
    fn new(subscription: Subscription) -> Self {
        Self {
            subscription,
            machine: StateMachine::default(),
            registration: None,
            last_error: None,
            gate: Arc::new(Mutex::new(())),
            generation: 0,
        }
    }

    fn id(&self) -> &str {
        self.subscription.id()
    }

    fn fail_with(&mut self, error: SubscriptionError) {
        if let Err(e) = self.machine.fail() {
            warn!(id = %self.id(), error = %e, "Ignoring failure for inactive subscription");
        }
        self.registration = None;
        self.last_error = Some(error);
    }

    fn terminal_error(&self) -> SubscriptionError {
        self.last_error
            .clone()
            .unwrap_or_else(|| SubscriptionError::Terminal {
                id: self.id().to_string(),
            })
    }
}

fn invalid(id: &str, transition: InvalidTransition) -> SubscriptionError {
    SubscriptionError::InvalidState {
        id: id.to_string(),
        reason: transition.to_string(),
    }
}

fn unknown(id: &str) -> SubscriptionError {
    SubscriptionError::UnknownSubscription(id.to_string())
}

struct ManagerInner {
    entries: DashMap<String, Entry>,
    registrar: Arc<dyn Registrar>,
    verification_timeout: Duration,
    generations: AtomicU64,
}

/// Owns every subscription instance and drives its lifecycle.
///
/// Operations on one id are serialized; different ids proceed concurrently.
/// Cloning yields another handle to the same manager.
#[derive(Clone)]
pub struct SubscriptionManager {
    inner: Arc<ManagerInner>,
}

impl SubscriptionManager {
    pub fn new(registrar: Arc<dyn Registrar>, verification_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                entries: DashMap::new(),
                registrar,
                verification_timeout,
                generations: AtomicU64::new(0),
            }),
        }
    }

    pub fn verification_timeout(&self) -> Duration {
        self.inner.verification_timeout
    }

    /// Start managing a subscription. Returns false, leaving the existing
    /// instance untouched, if the id is already managed.
    pub fn add(&self, subscription: Subscription) -> bool {
        let id = subscription.id().to_string();
        match self.inner.entries.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                debug!(id = %slot.key(), "Managing subscription");
                slot.insert(Entry::new(subscription));
                true
            }
        }
    }

    /// Unsubscribe and stop managing the id
    pub async fn remove(&self, id: &str) -> Result<(), SubscriptionError> {
        self.unsubscribe(id).await?;
        self.inner.entries.remove(id);
        Ok(())
    }

    /// Register the subscription with the remote.
    ///
    /// Concurrent calls for the same id share one registration: later callers
    /// wait for it to settle and get its outcome. A subscription that is
    /// already pending or subscribed returns `Ok` without a remote call.
    pub async fn subscribe(&self, id: &str) -> Result<(), SubscriptionError> {
        let gate = self.gate(id).ok_or_else(|| unknown(id))?;
        let guard = gate.lock_owned().await;

        let (subscription, generation) = {
            let mut entry = self.entry_mut(id)?;
            match entry.machine.state() {
                SubscriptionState::Pending | SubscriptionState::Subscribed => {
                    debug!(id = %id, state = %entry.machine.state(), "Subscription already active");
                    return Ok(());
                }
                SubscriptionState::Error => return Err(entry.terminal_error()),
                SubscriptionState::Unsubscribed => {}
            }
            entry.machine.begin().map_err(|e| invalid(id, e))?;
            entry.last_error = None;
            entry.generation = self.next_generation();
            (entry.subscription.clone(), entry.generation)
        };

        // The spawned task owns the gate, so dropping this future does not
        // cancel the registration or release the gate early
        let manager = self.clone();
        let task = tokio::spawn(async move {
            let _guard = guard;
            manager.complete_registration(subscription, generation).await
        });

        match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                let failure = SubscriptionError::Registration {
                    id: id.to_string(),
                    reason: format!("registration task failed: {}", e),
                };
                if let Ok(mut entry) = self.entry_mut(id) {
                    entry.fail_with(failure.clone());
                }
                Err(failure)
            }
        }
    }

    async fn complete_registration(
        &self,
        subscription: Subscription,
        generation: u64,
    ) -> Result<(), SubscriptionError> {
        let id = subscription.id().to_string();
        let result = self.inner.registrar.register(&subscription).await;

        let mut entry = self.entry_mut(&id)?;
        match result {
            Ok(registration) => {
                let verified = registration.verified;
                entry.registration = Some(registration);
                // A challenge may already have confirmed it while the call was in flight
                if verified && entry.machine.state() == SubscriptionState::Pending {
                    entry.machine.confirm().map_err(|e| invalid(&id, e))?;
                }
                let state = entry.machine.state();
                drop(entry);

                info!(id = %id, state = %state, "Subscription registered");
                if state == SubscriptionState::Pending {
                    self.start_verification_timer(&id, generation);
                }
                Ok(())
            }
            Err(e) => {
                error!(id = %id, error = %e, "Subscription registration failed");
                entry.fail_with(e.clone());
                Err(e)
            }
        }
    }

    fn start_verification_timer(&self, id: &str, generation: u64) {
        let inner: Weak<ManagerInner> = Arc::downgrade(&self.inner);
        let timeout = self.inner.verification_timeout;
        let id = id.to_string();

        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = inner.upgrade() {
                SubscriptionManager { inner }
                    .expire_verification(&id, generation)
                    .await;
            }
        });
    }

    /// Fail a registration that was never verified and remove it remotely,
    /// so a later reset and subscribe does not leave it behind
    async fn expire_verification(&self, id: &str, generation: u64) {
        let Some(gate) = self.gate(id) else {
            return;
        };
        let _guard = gate.lock().await;

        let (subscription, registration) = {
            let Some(mut entry) = self.inner.entries.get_mut(id) else {
                return;
            };
            if entry.generation != generation || entry.machine.state() != SubscriptionState::Pending {
                return;
            }

            let timeout_secs = self.inner.verification_timeout.as_secs();
            warn!(id = %id, timeout_secs, "Subscription was not verified in time");
            let registration = entry.registration.take();
            entry.fail_with(SubscriptionError::VerificationTimeout {
                id: id.to_string(),
                timeout_secs,
            });
            (entry.subscription.clone(), registration)
        };

        let Some(registration) = registration else {
            return;
        };
        match self
            .inner
            .registrar
            .deregister(&subscription, &registration)
            .await
        {
            Ok(()) => debug!(id = %id, "Removed unverified registration"),
            // The instance keeps its timeout error; the remote side expires it eventually
            Err(e) => warn!(id = %id, error = %e, "Failed to remove unverified registration"),
        }
    }

    /// Remove the remote registration. Unknown or inactive ids are a no-op.
    ///
    /// Waits for an in-flight subscribe on the same id to settle first.
    pub async fn unsubscribe(&self, id: &str) -> Result<(), SubscriptionError> {
        let Some(gate) = self.gate(id) else {
            debug!(id = %id, "Unsubscribe for unknown subscription ignored");
            return Ok(());
        };
        let _guard = gate.lock().await;

        let (subscription, registration) = {
            let Some(entry) = self.inner.entries.get(id) else {
                return Ok(());
            };
            if !entry.machine.state().is_active() {
                debug!(id = %id, state = %entry.machine.state(), "Already unsubscribed");
                return Ok(());
            }
            (entry.subscription.clone(), entry.registration.clone())
        };

        if let Some(registration) = &registration {
            if let Err(e) = self
                .inner
                .registrar
                .deregister(&subscription, registration)
                .await
            {
                error!(id = %id, error = %e, "Failed to remove subscription");
                if let Some(mut entry) = self.inner.entries.get_mut(id) {
                    entry.last_error = Some(e.clone());
                }
                return Err(e);
            }
        }

        if let Some(mut entry) = self.inner.entries.get_mut(id) {
            // A verification timeout may have fired while deregistering
            if entry.machine.state().is_active() {
                entry.machine.unsubscribe().map_err(|e| invalid(id, e))?;
            }
            entry.registration = None;
            entry.generation = self.next_generation();
        }
        info!(id = %id, "Unsubscribed");
        Ok(())
    }

    /// Re-issue a WebHook registration to extend its lease
    pub async fn renew(&self, id: &str) -> Result<(), SubscriptionError> {
        let gate = self.gate(id).ok_or_else(|| unknown(id))?;
        let _guard = gate.lock().await;

        let subscription = {
            let entry = self.entry(id)?;
            if !entry.subscription.transport().is_webhook() {
                return Err(SubscriptionError::Unsupported {
                    id: id.to_string(),
                    operation: "lease renewal".to_string(),
                });
            }
            match entry.machine.state() {
                SubscriptionState::Subscribed => entry.subscription.clone(),
                SubscriptionState::Error => return Err(entry.terminal_error()),
                state => {
                    return Err(SubscriptionError::InvalidState {
                        id: id.to_string(),
                        reason: format!("cannot renew while {}", state),
                    })
                }
            }
        };

        let result = self.inner.registrar.register(&subscription).await;
        let mut entry = self.entry_mut(id)?;
        match result {
            Ok(registration) => {
                info!(id = %id, expires_at = ?registration.lease_expires_at, "Lease renewed");
                entry.registration = Some(registration);
                Ok(())
            }
            Err(e) => {
                error!(id = %id, error = %e, "Lease renewal failed");
                entry.fail_with(e.clone());
                Err(e)
            }
        }
    }

    /// Replace an errored instance with a fresh, unsubscribed one
    pub fn reset(&self, id: &str) -> Result<(), SubscriptionError> {
        let mut entry = self.entry_mut(id)?;
        let state = entry.machine.state();
        if state != SubscriptionState::Error {
            return Err(SubscriptionError::InvalidState {
                id: id.to_string(),
                reason: format!("cannot reset while {}", state),
            });
        }

        entry.machine = StateMachine::default();
        entry.registration = None;
        entry.last_error = None;
        entry.generation = self.next_generation();
        debug!(id = %id, "Subscription reset");
        Ok(())
    }

    /// The remote revoked an active subscription. Returns true if it was active.
    pub fn revoke(&self, id: &str, reason: &str) -> bool {
        let Some(mut entry) = self.inner.entries.get_mut(id) else {
            debug!(id = %id, "Revocation for unknown subscription ignored");
            return false;
        };
        if !entry.machine.state().is_active() {
            return false;
        }

        warn!(id = %id, reason = %reason, "Subscription revoked");
        entry.fail_with(SubscriptionError::Revoked {
            id: id.to_string(),
            reason: reason.to_string(),
        });
        true
    }

    /// Answer a verification challenge. Returns the challenge to echo back,
    /// or `None` when the id is not awaiting verification.
    pub fn handle_verification(&self, id: &str, challenge: &str) -> Option<String> {
        let Some(mut entry) = self.inner.entries.get_mut(id) else {
            debug!(id = %id, "Verification for unknown subscription");
            return None;
        };

        match entry.machine.state() {
            SubscriptionState::Pending => {
                if let Err(e) = entry.machine.confirm() {
                    warn!(id = %id, error = %e, "Could not confirm subscription");
                    return None;
                }
                info!(id = %id, "Subscription verified");
                Some(challenge.to_string())
            }
            // Lease renewals are verified again
            SubscriptionState::Subscribed => {
                debug!(id = %id, "Subscription re-verified");
                Some(challenge.to_string())
            }
            state => {
                debug!(id = %id, state = %state, "Verification for inactive subscription");
                None
            }
        }
    }

    /// Restart the lease clock of a subscribed WebHook from now. Returns
    /// false if there is no subscribed registration to update.
    pub fn record_lease(&self, id: &str, lease: chrono::Duration) -> bool {
        let Some(mut entry) = self.inner.entries.get_mut(id) else {
            return false;
        };
        if entry.machine.state() != SubscriptionState::Subscribed {
            return false;
        }
        let Some(registration) = entry.registration.as_mut() else {
            return false;
        };

        let expires_at = Utc::now() + lease;
        debug!(id = %id, expires_at = %expires_at, "Lease started");
        registration.lease_expires_at = Some(expires_at);
        true
    }

    /// Deliver an event. Returns true if a handler ran.
    ///
    /// Events for unknown or non-subscribed ids are dropped; they are expected
    /// after an unsubscribe races a delivery.
    pub fn handle_notification(&self, id: &str, payload: Value) -> bool {
        let subscription = match self.inner.entries.get(id) {
            Some(entry) if entry.machine.state() == SubscriptionState::Subscribed => {
                entry.subscription.clone()
            }
            Some(entry) => {
                debug!(id = %id, state = %entry.machine.state(), "Dropping event for inactive subscription");
                return false;
            }
            None => {
                debug!(id = %id, "Dropping event for unknown subscription");
                return false;
            }
        };

        subscription.dispatch(payload);
        true
    }

    pub fn state(&self, id: &str) -> Option<SubscriptionState> {
        self.inner.entries.get(id).map(|entry| entry.machine.state())
    }

    /// Cause of the last failure, if any
    pub fn last_error(&self, id: &str) -> Option<SubscriptionError> {
        self.inner
            .entries
            .get(id)
            .and_then(|entry| entry.last_error.clone())
    }

    pub fn registration(&self, id: &str) -> Option<Registration> {
        self.inner
            .entries
            .get(id)
            .and_then(|entry| entry.registration.clone())
    }

    pub fn subscription(&self, id: &str) -> Option<Subscription> {
        self.inner.entries.get(id).map(|entry| entry.subscription.clone())
    }

    /// All managed ids, sorted
    pub fn ids(&self) -> Vec<String> {
        self.ids_where(|_| true)
    }

    /// Ids that are pending or subscribed
    pub fn active_ids(&self) -> Vec<String> {
        self.ids_where(|entry| entry.machine.state().is_active())
    }

    /// Ids in the terminal error state
    pub fn errored_ids(&self) -> Vec<String> {
        self.ids_where(|entry| entry.machine.state() == SubscriptionState::Error)
    }

    /// Subscribed ids whose lease ends within `margin`
    pub fn expiring_leases(&self, margin: chrono::Duration) -> Vec<String> {
        let deadline = Utc::now() + margin;
        self.ids_where(|entry| {
            entry.machine.state() == SubscriptionState::Subscribed
                && entry
                    .registration
                    .as_ref()
                    .and_then(|r| r.lease_expires_at)
                    .is_some_and(|expires_at| expires_at <= deadline)
        })
    }

    fn ids_where<F>(&self, predicate: F) -> Vec<String>
    where
        F: Fn(&Entry) -> bool,
    {
        let mut ids: Vec<String> = self
            .inner
            .entries
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    fn gate(&self, id: &str) -> Option<Arc<Mutex<()>>> {
        self.inner.entries.get(id).map(|entry| entry.gate.clone())
    }

    fn entry(&self, id: &str) -> Result<Ref<'_, String, Entry>, SubscriptionError> {
        self.inner.entries.get(id).ok_or_else(|| unknown(id))
    }

    fn entry_mut(&self, id: &str) -> Result<RefMut<'_, String, Entry>, SubscriptionError> {
        self.inner.entries.get_mut(id).ok_or_else(|| unknown(id))
    }

    fn next_generation(&self) -> u64 {
        self.inner.generations.fetch_add(1, Ordering::Relaxed) + 1
    }
}
