use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use courier_core::{Broker, ConnectionManager};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::connection;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// WebSocket ping period.
    pub heartbeat_interval: Duration,
    /// Sessions silent for longer than this are reaped.
    pub client_timeout: Duration,
    pub reap_interval: Duration,
    /// How long [`ServerHandle::shutdown`] waits for writers to flush.
    pub drain_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            heartbeat_interval: Duration::from_secs(30),
            client_timeout: Duration::from_secs(90),
            reap_interval: Duration::from_secs(60),
            drain_timeout: Duration::from_secs(5),
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub broker: Broker,
    pub heartbeat_interval: Duration,
    pub metrics: Option<PrometheusHandle>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Start the server without a `/metrics` exporter.
pub async fn start(config: ServerConfig, broker: Broker) -> Result<ServerHandle, std::io::Error> {
    start_with_metrics(config, broker, None).await
}

/// Start the server. Returns a handle to shut it down.
pub async fn start_with_metrics(
    config: ServerConfig,
    broker: Broker,
    metrics: Option<PrometheusHandle>,
) -> Result<ServerHandle, std::io::Error> {
    let reaper = start_reaper_task(
        Arc::clone(broker.manager()),
        config.client_timeout,
        config.reap_interval,
    );

    let state = AppState {
        broker: broker.clone(),
        heartbeat_interval: config.heartbeat_interval,
        metrics,
    };
    let router = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(host = %config.host, port = local_addr.port(), "courier server started");

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "server terminated with error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        broker,
        drain_timeout: config.drain_timeout,
        shutdown_tx: Some(shutdown_tx),
        server,
        reaper,
    })
}

/// Handle returned by `start()`; keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    broker: Broker,
    drain_timeout: Duration,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server: JoinHandle<()>,
    reaper: JoinHandle<()>,
}

impl ServerHandle {
    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    /// Graceful shutdown: drain every session so queued frames flush, wait
    /// up to the drain timeout, then disconnect stragglers and stop the
    /// listener.
    pub async fn shutdown(mut self) {
        let manager = Arc::clone(self.broker.manager());
        let draining = manager.shutdown();
        tracing::info!(sessions = draining, "draining sessions");

        let deadline = tokio::time::Instant::now() + self.drain_timeout;
        while manager.session_count() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let forced = manager.disconnect_all();
        if forced > 0 {
            tracing::warn!(sessions = forced, "drain timeout elapsed, closing remaining sessions");
        }

        self.reaper.abort();
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if tokio::time::timeout(self.drain_timeout, &mut self.server).await.is_err() {
            self.server.abort();
        }
        tracing::info!("courier server stopped");
    }
}

/// Periodically disconnect sessions with no client activity.
pub fn start_reaper_task(
    manager: Arc<ConnectionManager>,
    client_timeout: Duration,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let reaped = manager.reap_idle(client_timeout);
            if reaped > 0 {
                tracing::info!(reaped, "idle client cleanup");
            }
        }
    })
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let manager = Arc::clone(state.broker.manager());
    let heartbeat = state.heartbeat_interval;
    ws.on_upgrade(move |socket| connection::handle_connection(socket, manager, heartbeat))
}

/// Health check HTTP endpoint.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "sessions": state.broker.manager().session_count(),
    }))
}

async fn stats_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.broker.stats())
}

/// Prometheus scrape endpoint. 404 when no recorder is installed.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            courier_telemetry::render(handle),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
