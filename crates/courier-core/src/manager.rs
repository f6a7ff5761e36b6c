//! Connection manager: session lifecycle and command dispatch.
//!
//! The transport layer calls [`ConnectionManager::on_connect`] once per
//! client, feeds every inbound text frame to [`ConnectionManager::handle_frame`],
//! and calls [`ConnectionManager::on_disconnect`] when the channel is gone.
//! Nothing a client sends can close its own connection: every rejected frame
//! becomes an ERROR envelope on the same session.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use metrics::{counter, gauge};

use crate::envelope::{decode_frame, Command, Envelope};
use crate::errors::{BrokerError, Result};
use crate::ids::SessionId;
use crate::names;
use crate::registry::SubscriptionRegistry;
use crate::router::Router;
use crate::session::Session;

/// Per-broker tunables.
#[derive(Clone, Debug)]
pub struct BrokerConfig {
    /// Outbound queue bound per session; overflow drops the oldest entry.
    pub outbound_queue_capacity: usize,
    /// Send CONNECTED on connect and ACK after each successful command.
    pub acknowledge: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: 1024,
            acknowledge: true,
        }
    }
}

pub struct ConnectionManager {
    sessions: DashMap<SessionId, Arc<Session>>,
    registry: Arc<SubscriptionRegistry>,
    router: Router,
    config: BrokerConfig,
}

impl ConnectionManager {
    pub fn new(registry: Arc<SubscriptionRegistry>, config: BrokerConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            router: Router::new(Arc::clone(&registry)),
            registry,
            config,
        }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Create and register a session for a newly connected client.
    pub fn on_connect(&self) -> Arc<Session> {
        let session = Arc::new(Session::new(
            SessionId::new(),
            self.config.outbound_queue_capacity,
            Arc::clone(&self.registry),
        ));
        let _ = self
            .sessions
            .insert(session.id().clone(), Arc::clone(&session));

        if self.config.acknowledge {
            let _ = session.reply(Envelope::connected(session.id()));
        }
        counter!(names::CONNECTIONS_TOTAL).increment(1);
        gauge!(names::SESSIONS_ACTIVE).set(self.sessions.len() as f64);
        tracing::info!(session_id = %session.id(), "client connected");
        session
    }

    /// Tear down a session: unregister, remove its subscriptions, discard its
    /// queue. Returns `false` if the session was already gone.
    pub fn on_disconnect(&self, id: &SessionId) -> bool {
        let Some((_, session)) = self.sessions.remove(id) else {
            return false;
        };
        let subscriptions = session.subscription_count();
        let _ = session.close();
        counter!(names::DISCONNECTIONS_TOTAL).increment(1);
        gauge!(names::SESSIONS_ACTIVE).set(self.sessions.len() as f64);
        tracing::info!(
            session_id = %id,
            subscriptions,
            connected_secs = session.connected_for().as_secs(),
            "client disconnected"
        );
        true
    }

    /// Decode and execute one inbound text frame.
    pub fn handle_frame(&self, session: &Session, raw: &str) {
        session.touch();
        match decode_frame(raw) {
            Ok(envelope) => self.handle_envelope(session, envelope),
            Err(err) => self.reject(session, &err),
        }
    }

    /// Execute an already-decoded envelope.
    pub fn handle_envelope(&self, session: &Session, envelope: Envelope) {
        let result = Command::decode(envelope).and_then(|command| self.execute(session, command));
        if let Err(err) = result {
            self.reject(session, &err);
        }
    }

    fn execute(&self, session: &Session, command: Command) -> Result<()> {
        let name = command.name();
        let ack = Envelope::ack(name, command.topic());
        match command {
            Command::Subscribe { topic, filter } => {
                let created = session.subscribe(&topic, filter)?;
                tracing::info!(session_id = %session.id(), topic = %topic, created, "client subscribed");
            }
            Command::Unsubscribe { topic } => {
                let removed = session.unsubscribe(&topic);
                tracing::info!(session_id = %session.id(), topic = %topic, removed, "client unsubscribed");
            }
            Command::Publish { topic, content } => {
                if !session.is_active() {
                    return Err(BrokerError::SessionClosed(session.id().to_string()));
                }
                let report = self.router.publish(&topic, content);
                tracing::debug!(
                    session_id = %session.id(),
                    topic = %topic,
                    matched = report.matched,
                    "client published"
                );
            }
            Command::Heartbeat => {
                let _ = session.reply(Envelope::heartbeat());
                return Ok(());
            }
        }
        if self.config.acknowledge {
            let _ = session.reply(ack);
        }
        Ok(())
    }

    fn reject(&self, session: &Session, err: &BrokerError) {
        counter!(names::REJECTED_FRAMES_TOTAL, "kind" => err.error_kind()).increment(1);
        match err {
            BrokerError::SessionClosed(_) => {
                tracing::debug!(session_id = %session.id(), error = %err, "command on closed session");
            }
            _ => {
                tracing::warn!(session_id = %session.id(), kind = err.error_kind(), error = %err, "rejected client frame");
            }
        }
        let _ = session.reply(Envelope::error(err.to_string()));
    }

    pub fn session(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Disconnect sessions with no client activity for longer than `timeout`.
    pub fn reap_idle(&self, timeout: Duration) -> usize {
        let idle: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().idle_for() > timeout)
            .map(|entry| entry.key().clone())
            .collect();

        let mut reaped = 0;
        for id in idle {
            if self.on_disconnect(&id) {
                reaped += 1;
                tracing::info!(session_id = %id, "reaped idle client");
            }
        }
        if reaped > 0 {
            counter!(names::IDLE_REAPED_TOTAL).increment(reaped as u64);
        }
        reaped
    }

    /// Move every session to draining so writers can flush and exit.
    pub fn shutdown(&self) -> usize {
        let sessions: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        sessions.iter().filter(|s| s.drain()).count()
    }

    /// Tear down every remaining session. Used after a drain deadline.
    pub fn disconnect_all(&self) -> usize {
        let ids: Vec<SessionId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.iter().filter(|id| self.on_disconnect(id)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{headers, replies, EnvelopeType};
    use crate::session::SessionState;
    use serde_json::json;

    fn manager(acknowledge: bool) -> ConnectionManager {
        ConnectionManager::new(
            Arc::new(SubscriptionRegistry::new()),
            BrokerConfig {
                outbound_queue_capacity: 16,
                acknowledge,
            },
        )
    }

    fn drain(session: &Session) -> Vec<Arc<Envelope>> {
        std::iter::from_fn(|| session.outbox().try_next()).collect()
    }

    fn command_of(envelope: &Envelope) -> Option<&str> {
        envelope.header(headers::COMMAND)
    }

    const SUBSCRIBE_UNPROCESSED: &str = r#"{"type":"COMMAND","headers":{"command":"SUBSCRIBE","topic":"events"},"content":{"filter":{"processed":false}}}"#;

    fn publish(content: serde_json::Value) -> String {
        json!({
            "type": "COMMAND",
            "headers": {"command": "PUBLISH", "topic": "events"},
            "content": content
        })
        .to_string()
    }

    #[test]
    fn connect_queues_greeting_when_acknowledging() {
        let m = manager(true);
        let s = m.on_connect();
        let frames = drain(&s);
        assert_eq!(frames.len(), 1);
        assert_eq!(command_of(&frames[0]), Some(replies::CONNECTED));
        assert_eq!(m.session_count(), 1);
    }

    #[test]
    fn subscribe_is_acknowledged() {
        let m = manager(true);
        let s = m.on_connect();
        drain(&s);
        m.handle_frame(&s, SUBSCRIBE_UNPROCESSED);
        let frames = drain(&s);
        assert_eq!(frames.len(), 1);
        assert_eq!(command_of(&frames[0]), Some(replies::ACK));
        assert_eq!(frames[0].header(headers::REF), Some("SUBSCRIBE"));
        assert_eq!(s.topics(), vec!["events".to_string()]);
    }

    #[test]
    fn silent_mode_sends_no_acks() {
        let m = manager(false);
        let s = m.on_connect();
        m.handle_frame(&s, SUBSCRIBE_UNPROCESSED);
        assert!(drain(&s).is_empty());
        assert_eq!(s.subscription_count(), 1);
    }

    #[test]
    fn publish_without_content_is_rejected_and_not_routed() {
        let m = manager(false);
        let subscriber = m.on_connect();
        let publisher = m.on_connect();
        m.handle_frame(&subscriber, r#"{"type":"COMMAND","headers":{"command":"SUBSCRIBE","topic":"events"}}"#);

        m.handle_frame(&publisher, r#"{"type":"COMMAND","headers":{"command":"PUBLISH","topic":"events"}}"#);
        assert!(drain(&subscriber).is_empty());
        let frames = drain(&publisher);
        assert_eq!(frames.len(), 1);
        assert_eq!(command_of(&frames[0]), Some(replies::ERROR));
        assert!(frames[0].content["reason"]
            .as_str()
            .unwrap()
            .contains("missing publish content"));
    }

    #[test]
    fn subscribe_with_scalar_content_creates_nothing() {
        let m = manager(true);
        let s = m.on_connect();
        drain(&s);
        m.handle_frame(
            &s,
            r#"{"type":"COMMAND","headers":{"command":"SUBSCRIBE","topic":"events"},"content":"processed=false"}"#,
        );
        let frames = drain(&s);
        assert_eq!(frames.len(), 1);
        assert_eq!(command_of(&frames[0]), Some(replies::ERROR));
        assert_eq!(s.subscription_count(), 0);

        let publisher = m.on_connect();
        m.handle_frame(&publisher, &publish(json!({"id": 2, "processed": true})));
        assert!(drain(&s).is_empty());
    }

    #[test]
    fn malformed_frame_gets_error_and_session_survives() {
        let m = manager(false);
        let s = m.on_connect();
        m.handle_frame(&s, "this is not json");
        let frames = drain(&s);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].kind, EnvelopeType::Command);
        assert_eq!(command_of(&frames[0]), Some(replies::ERROR));
        assert!(frames[0].content["reason"].as_str().unwrap().contains("malformed"));
        assert_eq!(s.state(), SessionState::Active);

        m.handle_frame(&s, SUBSCRIBE_UNPROCESSED);
        assert_eq!(s.subscription_count(), 1);
    }

    #[test]
    fn unknown_command_gets_error() {
        let m = manager(false);
        let s = m.on_connect();
        m.handle_frame(&s, r#"{"type":"COMMAND","headers":{"command":"REPLAY","topic":"events"}}"#);
        let frames = drain(&s);
        assert_eq!(command_of(&frames[0]), Some(replies::ERROR));
        assert!(frames[0].content["reason"].as_str().unwrap().contains("REPLAY"));
    }

    #[test]
    fn heartbeat_is_answered() {
        let m = manager(false);
        let s = m.on_connect();
        m.handle_frame(&s, r#"{"type":"COMMAND","headers":{"command":"HEART_BEAT"}}"#);
        let frames = drain(&s);
        assert_eq!(command_of(&frames[0]), Some(replies::HEARTBEAT));
    }

    #[test]
    fn publish_routes_between_sessions() {
        let m = manager(false);
        let a = m.on_connect();
        let b = m.on_connect();
        m.handle_frame(&a, SUBSCRIBE_UNPROCESSED);

        m.handle_frame(&b, &publish(json!({"id": 1, "processed": false})));
        m.handle_frame(&b, &publish(json!({"id": 2, "processed": true})));

        let received = drain(&a);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].kind, EnvelopeType::Message);
        assert_eq!(received[0].header(headers::TOPIC), Some("events"));
        assert_eq!(received[0].content, json!({"id": 1, "processed": false}));
        assert!(drain(&b).is_empty());
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let m = manager(false);
        let a = m.on_connect();
        let b = m.on_connect();
        m.handle_frame(&a, SUBSCRIBE_UNPROCESSED);
        m.handle_frame(&a, r#"{"type":"COMMAND","headers":{"command":"UNSUBSCRIBE","topic":"events"}}"#);
        m.handle_frame(&b, &publish(json!({"id": 1, "processed": false})));
        assert!(drain(&a).is_empty());
    }

    #[test]
    fn disconnect_removes_subscriptions_and_session() {
        let m = manager(false);
        let a = m.on_connect();
        let b = m.on_connect();
        m.handle_frame(&a, SUBSCRIBE_UNPROCESSED);

        assert!(m.on_disconnect(a.id()));
        assert!(!m.on_disconnect(a.id()));
        assert_eq!(m.session_count(), 1);
        assert!(m.session(a.id()).is_none());
        assert_eq!(a.state(), SessionState::Closed);

        m.handle_frame(&b, &publish(json!({"id": 3, "processed": false})));
        assert!(drain(&a).is_empty());
        assert!(drain(&b).is_empty());
    }

    #[test]
    fn frames_on_closed_session_are_absorbed() {
        let m = manager(true);
        let a = m.on_connect();
        m.on_disconnect(a.id());
        m.handle_frame(&a, SUBSCRIBE_UNPROCESSED);
        assert_eq!(a.subscription_count(), 0);
        assert!(drain(&a).is_empty());
    }

    #[test]
    fn reap_idle_disconnects_quiet_sessions() {
        let m = manager(false);
        let quiet = m.on_connect();
        std::thread::sleep(Duration::from_millis(30));
        let fresh = m.on_connect();

        assert_eq!(m.reap_idle(Duration::from_millis(20)), 1);
        assert_eq!(quiet.state(), SessionState::Closed);
        assert!(fresh.is_active());
    }

    #[test]
    fn shutdown_drains_all_sessions() {
        let m = manager(false);
        let a = m.on_connect();
        let b = m.on_connect();
        a.subscribe("events", crate::filter::Filter::empty()).unwrap();
        assert_eq!(m.shutdown(), 2);
        assert_eq!(a.state(), SessionState::Draining);
        assert_eq!(b.state(), SessionState::Draining);
        assert_eq!(m.shutdown(), 0);
    }

    #[test]
    fn disconnect_all_closes_remaining_sessions() {
        let m = manager(false);
        let a = m.on_connect();
        let b = m.on_connect();
        a.subscribe("events", crate::filter::Filter::empty()).unwrap();
        m.shutdown();

        assert_eq!(m.disconnect_all(), 2);
        assert_eq!(m.session_count(), 0);
        assert_eq!(a.state(), SessionState::Closed);
        assert_eq!(b.state(), SessionState::Closed);
        assert_eq!(m.disconnect_all(), 0);
    }
}
