use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::manager::{BrokerConfig, ConnectionManager};
use crate::registry::SubscriptionRegistry;
use crate::router::PublishReport;

/// Point-in-time counts for `/stats` and health output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BrokerStats {
    pub sessions: usize,
    pub topics: usize,
    pub subscriptions: usize,
}

/// One independent broker instance: its own registry, router and sessions.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Broker {
    registry: Arc<SubscriptionRegistry>,
    manager: Arc<ConnectionManager>,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new());
        let manager = Arc::new(ConnectionManager::new(Arc::clone(&registry), config));
        Self { registry, manager }
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Publish on behalf of the host process rather than a connected client.
    pub fn publish(&self, topic: &str, content: Value) -> PublishReport {
        self.manager.router().publish(topic, content)
    }

    pub fn stats(&self) -> BrokerStats {
        BrokerStats {
            sessions: self.manager.session_count(),
            topics: self.registry.topic_count(),
            subscriptions: self.registry.subscription_count(),
        }
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Filter;
    use serde_json::json;

    #[test]
    fn brokers_are_isolated() {
        let first = Broker::default();
        let second = Broker::default();

        let s = first.manager().on_connect();
        s.subscribe("events", Filter::empty()).unwrap();

        assert_eq!(second.publish("events", json!({"id": 1})).matched, 0);
        assert_eq!(first.publish("events", json!({"id": 1})).matched, 1);
        assert_eq!(second.stats(), BrokerStats::default());
    }

    #[test]
    fn stats_track_sessions_topics_and_subscriptions() {
        let broker = Broker::default();
        let a = broker.manager().on_connect();
        let b = broker.manager().on_connect();
        a.subscribe("events", Filter::empty()).unwrap();
        b.subscribe("events", Filter::empty()).unwrap();
        b.subscribe("orders", Filter::empty()).unwrap();

        assert_eq!(
            broker.stats(),
            BrokerStats {
                sessions: 2,
                topics: 2,
                subscriptions: 3
            }
        );

        broker.manager().on_disconnect(b.id());
        assert_eq!(
            broker.stats(),
            BrokerStats {
                sessions: 1,
                topics: 1,
                subscriptions: 1
            }
        );
    }
}
