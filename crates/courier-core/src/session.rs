//! Per-connection session: outbound queue, owned subscriptions, lifecycle.
//!
//! `Active → Draining → Closed`, or straight to `Closed`. Leaving `Active`
//! removes every subscription from the registry; once `Closed` the outbox
//! rejects everything, so a publish racing with teardown is absorbed
//! silently instead of reaching a dead connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::envelope::Envelope;
use crate::errors::{BrokerError, Result};
use crate::filter::Filter;
use crate::ids::SessionId;
use crate::outbox::{Outbox, PushOutcome};
use crate::registry::{Subscription, SubscriptionRegistry};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Active,
    Draining,
    Closed,
}

struct SessionInner {
    state: SessionState,
    subscriptions: Vec<Subscription>,
}

pub struct Session {
    id: SessionId,
    outbox: Arc<Outbox>,
    registry: Arc<SubscriptionRegistry>,
    inner: Mutex<SessionInner>,
    connected_at: Instant,
    last_seen_ms: AtomicU64,
}

impl Session {
    pub fn new(id: SessionId, queue_capacity: usize, registry: Arc<SubscriptionRegistry>) -> Self {
        Self {
            id,
            outbox: Arc::new(Outbox::new(queue_capacity)),
            registry,
            inner: Mutex::new(SessionInner {
                state: SessionState::Active,
                subscriptions: Vec::new(),
            }),
            connected_at: Instant::now(),
            last_seen_ms: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    pub fn outbox(&self) -> &Arc<Outbox> {
        &self.outbox
    }

    /// Subscribe this session to `topic`. Returns `false` when an identical
    /// subscription already exists.
    ///
    /// The state check and the registry insert share the session lock, so a
    /// concurrent [`Session::close`] either runs first (and this fails) or
    /// runs after (and removes what was added).
    pub fn subscribe(&self, topic: &str, filter: Filter) -> Result<bool> {
        let mut inner = self.inner.lock();
        if inner.state != SessionState::Active {
            return Err(BrokerError::SessionClosed(self.id.to_string()));
        }
        let subscription = Subscription::new(self.id.clone(), topic, filter, Arc::clone(&self.outbox));
        if !self.registry.add(subscription.clone()) {
            return Ok(false);
        }
        inner.subscriptions.push(subscription);
        Ok(true)
    }

    /// Drop every subscription this session holds on `topic`.
    pub fn unsubscribe(&self, topic: &str) -> usize {
        let mut inner = self.inner.lock();
        let (dropped, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut inner.subscriptions)
            .into_iter()
            .partition(|s| s.topic() == topic);
        inner.subscriptions = kept;
        dropped.iter().filter(|s| self.registry.remove(s)).count()
    }

    /// Topics this session is subscribed to, deduplicated and sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .inner
            .lock()
            .subscriptions
            .iter()
            .map(|s| s.topic().to_string())
            .collect();
        topics.sort();
        topics.dedup();
        topics
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.lock().subscriptions.len()
    }

    /// Queue an envelope for the writer. Never blocks.
    pub fn deliver(&self, envelope: Arc<Envelope>) -> PushOutcome {
        self.outbox.push(envelope)
    }

    pub fn reply(&self, envelope: Envelope) -> PushOutcome {
        self.deliver(Arc::new(envelope))
    }

    /// `Active → Draining`: stop routing to this session but let the writer
    /// flush what is already queued. Returns `false` if not active.
    pub fn drain(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != SessionState::Active {
            return false;
        }
        inner.state = SessionState::Draining;
        inner.subscriptions.clear();
        let removed = self.registry.remove_all(&self.id);
        self.outbox.seal();
        tracing::debug!(session_id = %self.id, removed, "session draining");
        true
    }

    /// Terminal transition. Idempotent; returns `true` only for the call
    /// that actually closed the session.
    pub fn close(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state == SessionState::Closed {
            return false;
        }
        inner.state = SessionState::Closed;
        inner.subscriptions.clear();
        let removed = self.registry.remove_all(&self.id);
        let discarded = self.outbox.close();
        tracing::debug!(session_id = %self.id, removed, discarded, "session closed");
        true
    }

    /// Record client activity (any inbound frame or pong).
    pub fn touch(&self) {
        self.last_seen_ms
            .store(millis(self.connected_at.elapsed()), Ordering::Relaxed);
    }

    /// Time since the last recorded activity (or since connect).
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_seen_ms.load(Ordering::Relaxed));
        self.connected_at.elapsed().saturating_sub(last)
    }

    pub fn connected_for(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

/// Whole milliseconds, saturating at `u64::MAX`.
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl Drop for Session {
    fn drop(&mut self) {
        // Owners normally close explicitly; this covers a session dropped
        // without teardown.
        if self.inner.get_mut().state != SessionState::Closed {
            let _ = self.registry.remove_all(&self.id);
            let _ = self.outbox.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session(registry: &Arc<SubscriptionRegistry>) -> Session {
        Session::new(SessionId::new(), 8, Arc::clone(registry))
    }

    fn filter(value: serde_json::Value) -> Filter {
        Filter::from_value(Some(&value)).unwrap()
    }

    #[test]
    fn starts_active() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let s = session(&registry);
        assert_eq!(s.state(), SessionState::Active);
        assert!(s.id().as_str().starts_with("sess_"));
    }

    #[test]
    fn subscribe_registers_once() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let s = session(&registry);
        assert!(s.subscribe("events", filter(json!({"processed": false}))).unwrap());
        assert!(!s.subscribe("events", filter(json!({"processed": false}))).unwrap());
        assert_eq!(s.subscription_count(), 1);
        assert_eq!(registry.subscribers_of("events").len(), 1);
    }

    #[test]
    fn unsubscribe_removes_all_filters_for_topic() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let s = session(&registry);
        s.subscribe("events", filter(json!({"a": 1}))).unwrap();
        s.subscribe("events", filter(json!({"a": 2}))).unwrap();
        s.subscribe("orders", Filter::empty()).unwrap();

        assert_eq!(s.unsubscribe("events"), 2);
        assert_eq!(s.topics(), vec!["orders".to_string()]);
        assert!(registry.subscribers_of("events").is_empty());
        assert_eq!(s.unsubscribe("events"), 0);
    }

    #[test]
    fn close_removes_subscriptions_and_is_idempotent() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let s = session(&registry);
        s.subscribe("events", Filter::empty()).unwrap();
        s.reply(Envelope::heartbeat());

        assert!(s.close());
        assert!(!s.close());
        assert_eq!(s.state(), SessionState::Closed);
        assert_eq!(registry.subscription_count(), 0);
        assert!(s.outbox().is_empty());
    }

    #[test]
    fn closed_session_absorbs_deliveries() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let s = session(&registry);
        s.close();
        assert_eq!(s.reply(Envelope::heartbeat()), PushOutcome::Rejected);
        assert!(s.outbox().is_empty());
    }

    #[test]
    fn subscribe_after_close_is_rejected() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let s = session(&registry);
        s.close();
        let err = s.subscribe("events", Filter::empty()).unwrap_err();
        assert_eq!(err.error_kind(), "session_closed");
        assert_eq!(registry.subscription_count(), 0);
    }

    #[tokio::test]
    async fn drain_flushes_queued_then_closes() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let s = session(&registry);
        s.subscribe("events", Filter::empty()).unwrap();
        s.reply(Envelope::heartbeat());

        assert!(s.drain());
        assert!(!s.drain());
        assert_eq!(s.state(), SessionState::Draining);
        assert_eq!(registry.subscription_count(), 0);
        assert_eq!(s.reply(Envelope::heartbeat()), PushOutcome::Rejected);

        assert!(s.outbox().next().await.is_some());
        assert!(s.outbox().next().await.is_none());
        assert!(s.close());
    }

    #[test]
    fn concurrent_close_and_subscribe_leave_registry_clean() {
        for _ in 0..50 {
            let registry = Arc::new(SubscriptionRegistry::new());
            let s = Arc::new(session(&registry));
            let subscriber = {
                let s = Arc::clone(&s);
                std::thread::spawn(move || {
                    for i in 0..20 {
                        let _ = s.subscribe(&format!("t{i}"), Filter::empty());
                    }
                })
            };
            let closer = {
                let s = Arc::clone(&s);
                std::thread::spawn(move || s.close())
            };
            subscriber.join().unwrap();
            closer.join().unwrap();
            assert_eq!(registry.subscription_count(), 0);
        }
    }

    #[test]
    fn dropping_unclosed_session_cleans_registry() {
        let registry = Arc::new(SubscriptionRegistry::new());
        {
            let s = session(&registry);
            s.subscribe("events", Filter::empty()).unwrap();
        }
        assert_eq!(registry.subscription_count(), 0);
    }

    #[test]
    fn touch_resets_idle_time() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let s = session(&registry);
        std::thread::sleep(Duration::from_millis(20));
        assert!(s.idle_for() >= Duration::from_millis(20));
        s.touch();
        assert!(s.idle_for() < Duration::from_millis(20));
    }

    #[test]
    fn millis_saturates_instead_of_wrapping() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }
}
