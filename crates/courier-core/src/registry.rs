//! Topic → subscription index.
//!
//! Each topic's subscriber list is stored as an immutable `Arc<[Subscription]>`
//! and replaced wholesale on mutation, so [`SubscriptionRegistry::subscribers_of`]
//! is a cheap pointer clone that stays valid while other tasks subscribe,
//! unsubscribe or disconnect. Topics exist only while they have subscribers.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::filter::Filter;
use crate::ids::SessionId;
use crate::outbox::Outbox;

/// One (session, topic, filter) registration.
///
/// Holds a handle to the owner's outbox rather than the session itself; the
/// session owns the subscription and the registry only indexes it.
#[derive(Clone)]
pub struct Subscription {
    owner: SessionId,
    topic: Arc<str>,
    filter: Arc<Filter>,
    outbox: Arc<Outbox>,
}

impl Subscription {
    pub fn new(owner: SessionId, topic: &str, filter: Filter, outbox: Arc<Outbox>) -> Self {
        Self {
            owner,
            topic: Arc::from(topic),
            filter: Arc::new(filter),
            outbox,
        }
    }

    pub fn owner(&self) -> &SessionId {
        &self.owner
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    pub fn outbox(&self) -> &Arc<Outbox> {
        &self.outbox
    }

    /// Same owner, topic and filter.
    pub fn same_as(&self, other: &Subscription) -> bool {
        self.owner == other.owner && self.topic == other.topic && self.filter == other.filter
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("owner", &self.owner)
            .field("topic", &self.topic)
            .field("filter", &self.filter)
            .finish()
    }
}

#[derive(Default)]
struct Index {
    topics: HashMap<String, Arc<[Subscription]>>,
    owners: HashMap<SessionId, HashSet<String>>,
}

impl Index {
    /// Rewrite one topic's list without the subscriptions `remove` selects.
    /// Returns how many were removed.
    fn retain_topic(&mut self, topic: &str, remove: impl Fn(&Subscription) -> bool) -> usize {
        let Some(current) = self.topics.get(topic) else {
            return 0;
        };
        let kept: Vec<Subscription> = current.iter().filter(|s| !remove(s)).cloned().collect();
        let removed = current.len() - kept.len();
        if removed == 0 {
            return 0;
        }
        if kept.is_empty() {
            let _ = self.topics.remove(topic);
        } else {
            let _ = self.topics.insert(topic.to_string(), Arc::from(kept));
        }
        removed
    }

    fn owner_still_in(&self, owner: &SessionId, topic: &str) -> bool {
        self.topics
            .get(topic)
            .is_some_and(|subs| subs.iter().any(|s| s.owner() == owner))
    }
}

/// Shared subscription index for one broker instance.
#[derive(Default)]
pub struct SubscriptionRegistry {
    index: RwLock<Index>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription. Returns `false` if an identical one
    /// (same owner, topic and filter) is already present.
    pub fn add(&self, subscription: Subscription) -> bool {
        let mut index = self.index.write();
        let topic = subscription.topic().to_string();
        let owner = subscription.owner().clone();

        let next: Arc<[Subscription]> = match index.topics.get(&topic) {
            Some(current) if current.iter().any(|s| s.same_as(&subscription)) => return false,
            Some(current) => current
                .iter()
                .cloned()
                .chain(std::iter::once(subscription))
                .collect(),
            None => Arc::from(vec![subscription]),
        };
        let _ = index.topics.insert(topic.clone(), next);
        let _ = index.owners.entry(owner).or_default().insert(topic);
        true
    }

    /// Remove one subscription (matched by owner, topic and filter).
    pub fn remove(&self, subscription: &Subscription) -> bool {
        let mut index = self.index.write();
        let topic = subscription.topic();
        let removed = index.retain_topic(topic, |s| s.same_as(subscription));
        if removed == 0 {
            return false;
        }
        let owner = subscription.owner();
        if !index.owner_still_in(owner, topic) {
            let now_empty = match index.owners.get_mut(owner) {
                Some(topics) => {
                    let _ = topics.remove(topic);
                    topics.is_empty()
                }
                None => false,
            };
            if now_empty {
                let _ = index.owners.remove(owner);
            }
        }
        true
    }

    /// Remove every subscription owned by `owner` in one critical section.
    /// Returns how many were removed.
    pub fn remove_all(&self, owner: &SessionId) -> usize {
        let mut index = self.index.write();
        let Some(topics) = index.owners.remove(owner) else {
            return 0;
        };
        topics
            .iter()
            .map(|topic| index.retain_topic(topic, |s| s.owner() == owner))
            .sum()
    }

    /// Point-in-time snapshot of a topic's subscribers. Empty for unknown topics.
    pub fn subscribers_of(&self, topic: &str) -> Arc<[Subscription]> {
        self.index
            .read()
            .topics
            .get(topic)
            .cloned()
            .unwrap_or_else(|| Arc::from(Vec::new()))
    }

    pub fn topic_count(&self) -> usize {
        self.index.read().topics.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.index.read().topics.values().map(|s| s.len()).sum()
    }

    /// Topics that currently have at least one subscriber, sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.index.read().topics.keys().cloned().collect();
        topics.sort();
        topics
    }

    pub fn is_indexed(&self, owner: &SessionId) -> bool {
        self.index.read().owners.contains_key(owner)
    }
}
