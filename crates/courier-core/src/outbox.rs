//! Bounded per-session outbound queue.
//!
//! Producers (the router, the connection manager) push without ever
//! blocking; a single writer task awaits [`Outbox::next`]. When the queue is
//! full the oldest unsent envelope is discarded to make room, so a slow
//! client always receives the most recent traffic.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::envelope::Envelope;

/// Result of a [`Outbox::push`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queued after evicting the oldest unsent envelope.
    DroppedOldest,
    /// The outbox is sealed or closed; the envelope was discarded.
    Rejected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Open,
    /// No new pushes; queued envelopes still flush.
    Sealed,
    Closed,
}

struct OutboxState {
    queue: VecDeque<Arc<Envelope>>,
    phase: Phase,
}

pub struct Outbox {
    state: Mutex<OutboxState>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl Outbox {
    /// Create an outbox holding at most `capacity` envelopes (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(OutboxState {
                queue: VecDeque::with_capacity(capacity.min(64)),
                phase: Phase::Open,
            }),
            notify: Notify::new(),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn push(&self, envelope: Arc<Envelope>) -> PushOutcome {
        let outcome = {
            let mut state = self.state.lock();
            if state.phase != Phase::Open {
                return PushOutcome::Rejected;
            }
            let outcome = if state.queue.len() >= self.capacity {
                let _ = state.queue.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
                PushOutcome::DroppedOldest
            } else {
                PushOutcome::Queued
            };
            state.queue.push_back(envelope);
            outcome
        };
        self.notify.notify_one();
        outcome
    }

    /// Wait for the next envelope. Returns `None` once the outbox is closed,
    /// or sealed with nothing left to flush.
    ///
    /// Intended for a single consumer.
    pub async fn next(&self) -> Option<Arc<Envelope>> {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(envelope) = state.queue.pop_front() {
                    return Some(envelope);
                }
                if state.phase != Phase::Open {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    pub fn try_next(&self) -> Option<Arc<Envelope>> {
        self.state.lock().queue.pop_front()
    }

    /// Stop accepting envelopes but let the writer flush what is queued.
    pub fn seal(&self) {
        {
            let mut state = self.state.lock();
            if state.phase == Phase::Open {
                state.phase = Phase::Sealed;
            }
        }
        self.notify.notify_one();
    }

    /// Discard everything queued and reject all further pushes.
    /// Returns the number of envelopes discarded.
    pub fn close(&self) -> usize {
        let discarded = {
            let mut state = self.state.lock();
            state.phase = Phase::Closed;
            let n = state.queue.len();
            state.queue.clear();
            n
        };
        self.notify.notify_one();
        discarded
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().phase == Phase::Closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Envelopes evicted by the drop-oldest policy over the outbox lifetime.
    pub fn dropped_total(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Outbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Outbox")
            .field("len", &state.queue.len())
            .field("capacity", &self.capacity)
            .field("phase", &state.phase)
            .finish()
    }
}
