//! Topic-based publish/subscribe core with content filters.
//!
//! Transport-agnostic: the server crate adapts WebSocket connections onto
//! [`ConnectionManager`]; everything here is plain shared state guarded by
//! short, non-blocking critical sections.

pub mod broker;
pub mod envelope;
pub mod errors;
pub mod filter;
pub mod ids;
pub mod manager;
pub mod names;
pub mod outbox;
pub mod registry;
pub mod router;
pub mod session;

pub use broker::{Broker, BrokerStats};
pub use envelope::{Command, CommandName, Envelope, EnvelopeType};
pub use errors::BrokerError;
pub use filter::Filter;
pub use ids::SessionId;
pub use manager::{BrokerConfig, ConnectionManager};
pub use outbox::{Outbox, PushOutcome};
pub use registry::{Subscription, SubscriptionRegistry};
pub use router::{PublishReport, Router};
pub use session::{Session, SessionState};
