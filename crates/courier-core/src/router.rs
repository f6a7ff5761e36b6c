use std::sync::Arc;

use metrics::counter;
use serde_json::Value;

use crate::envelope::Envelope;
use crate::names::{DELIVERIES_TOTAL, PUBLISHES_TOTAL, QUEUE_OVERFLOW_DROPS_TOTAL};
use crate::outbox::PushOutcome;
use crate::registry::SubscriptionRegistry;

/// Outcome of one publish, for logs and metrics. Never sent to the publisher.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Subscriptions whose filter matched.
    pub matched: usize,
    /// Envelopes actually enqueued (matched minus closed sessions).
    pub queued: usize,
    /// Enqueues that evicted an older envelope.
    pub overflowed: usize,
}

/// Fans published content out to the outboxes of matching subscribers.
pub struct Router {
    registry: Arc<SubscriptionRegistry>,
}

impl Router {
    pub fn new(registry: Arc<SubscriptionRegistry>) -> Self {
        Self { registry }
    }

    /// Route `content` to every subscription of `topic` whose filter matches.
    ///
    /// Works on a registry snapshot and never blocks: full outboxes evict
    /// their oldest entry, closed ones discard the delivery. Sequential
    /// publishes reach each subscriber in publish order.
    pub fn publish(&self, topic: &str, content: Value) -> PublishReport {
        counter!(PUBLISHES_TOTAL).increment(1);
        let candidates = self.registry.subscribers_of(topic);
        if candidates.is_empty() {
            tracing::debug!(topic, "publish to topic without subscribers");
            return PublishReport::default();
        }

        let envelope = Arc::new(Envelope::message(topic, content));
        let mut report = PublishReport::default();
        for subscription in candidates.iter() {
            if !subscription.filter().matches(&envelope.content) {
                continue;
            }
            report.matched += 1;
            match subscription.outbox().push(Arc::clone(&envelope)) {
                PushOutcome::Queued => report.queued += 1,
                PushOutcome::DroppedOldest => {
                    report.queued += 1;
                    report.overflowed += 1;
                }
                PushOutcome::Rejected => {}
            }
        }

        counter!(DELIVERIES_TOTAL).increment(report.queued as u64);
        if report.overflowed > 0 {
            counter!(QUEUE_OVERFLOW_DROPS_TOTAL).increment(report.overflowed as u64);
            tracing::warn!(topic, overflowed = report.overflowed, "subscriber queues full, dropped oldest");
        }
        tracing::debug!(
            topic,
            candidates = candidates.len(),
            matched = report.matched,
            queued = report.queued,
            "published"
        );
        report
    }
}
