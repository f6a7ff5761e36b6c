//! WebSocket and HTTP transport for a courier [`Broker`](courier_core::Broker).
//!
//! Routes:
//! - `GET /ws`: broker protocol over WebSocket text frames
//! - `GET /health`: liveness and session count
//! - `GET /stats`: session, topic and subscription counts
//! - `GET /metrics`: Prometheus text, when a recorder is supplied

pub mod connection;
pub mod server;

pub use server::{start, start_with_metrics, AppState, ServerConfig, ServerHandle};
