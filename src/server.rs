//! Probe Server
//!
//! Serves liveness, readiness and Prometheus metrics over HTTP.

use crate::error::{Error, Result};
use crate::metrics::ReconcileMetrics;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

// =============================================================================
// Server Configuration
// =============================================================================

/// Configuration for the probe server
#[derive(Debug, Clone)]
pub struct ProbeServerConfig {
    /// Bind address
    pub addr: SocketAddr,
}

impl Default for ProbeServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 8081)),
        }
    }
}

// =============================================================================
// Probe State
// =============================================================================

/// State shared between the operator and the probe handlers
pub struct ProbeState {
    ready: AtomicBool,
    metrics: Arc<ReconcileMetrics>,
}

impl ProbeState {
    pub fn new(metrics: Arc<ReconcileMetrics>) -> Arc<Self> {
        Arc::new(Self {
            ready: AtomicBool::new(false),
            metrics,
        })
    }

    /// Mark the operator ready to reconcile
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

// =============================================================================
// Probe Server
// =============================================================================

/// HTTP server for /healthz, /readyz and /metrics
pub struct ProbeServer {
    config: ProbeServerConfig,
    state: Arc<ProbeState>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ProbeServer {
    pub fn new(config: ProbeServerConfig, state: Arc<ProbeState>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            state,
            shutdown_tx,
        }
    }

    /// Spawn the server on the runtime
    pub fn spawn(&self) -> tokio::task::JoinHandle<Result<()>> {
        let addr = self.config.addr;
        let app = router(self.state.clone());
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
                Error::Internal(format!("Failed to bind probe server on {addr}: {e}"))
            })?;
            info!("Probe server listening on {}", addr);

            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                    info!("Probe server shutting down");
                })
                .await
                .map_err(|e| Error::Internal(format!("Probe server error: {e}")))
        })
    }

    /// Trigger graceful shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Build the probe router
pub fn router(state: Arc<ProbeState>) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/livez", get(health_check))
        .route("/readyz", get(readiness_check))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn readiness_check(State(state): State<Arc<ProbeState>>) -> impl IntoResponse {
    if state.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "controller not started")
    }
}

async fn metrics(State(state): State<Arc<ProbeState>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> Arc<ProbeState> {
        ProbeState::new(Arc::new(ReconcileMetrics::new().unwrap()))
    }

    #[test]
    fn test_default_config() {
        assert_eq!(ProbeServerConfig::default().addr.port(), 8081);
    }

    #[tokio::test]
    async fn test_readiness_follows_state() {
        let state = state();
        let response = readiness_check(State(state.clone())).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        state.set_ready(true);
        let response = readiness_check(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let state = state();
        state
            .metrics
            .observe_reconcile("converged", std::time::Duration::from_millis(5));
        let response = metrics(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/plain; version=0.0.4"
        );
    }

    #[tokio::test]
    async fn test_serve_and_shutdown() {
        let server = ProbeServer::new(
            ProbeServerConfig {
                addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            },
            state(),
        );
        let handle = server.spawn();
        tokio::task::yield_now().await;
        server.shutdown();
        handle.await.unwrap().unwrap();
    }
}
