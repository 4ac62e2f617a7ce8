//! Health endpoint.
//!
//! - `GET /health`: composite status, 200 when ready and 503 otherwise
//! - `GET /health/live`: 200 while the supervisor process is up
//! - `GET /status`: lifecycle state, the composite status and every role handle

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tower_http::trace::TraceLayer;

use crate::health::aggregator::HealthAggregator;
use crate::health::status::HealthStatus;
use crate::lifecycle::LifecycleState;
use crate::supervisor::ProcessHandle;

#[derive(Clone)]
struct ServerState {
    aggregator: Arc<HealthAggregator>,
    lifecycle: watch::Receiver<LifecycleState>,
}

#[derive(Serialize)]
struct SystemStatus {
    version: &'static str,
    lifecycle: LifecycleState,
    health: HealthStatus,
    roles: Vec<ProcessHandle>,
}

/// HTTP server exposing the aggregated health status.
pub struct HealthServer {
    router: Router,
}

impl HealthServer {
    pub fn new(aggregator: Arc<HealthAggregator>, lifecycle: watch::Receiver<LifecycleState>) -> Self {
        let state = ServerState { aggregator, lifecycle };
        let router = Router::new()
            .route("/health", get(health))
            .route("/health/live", get(live))
            .route("/status", get(status))
            .with_state(state)
            .layer(TraceLayer::new_for_http());
        Self { router }
    }

    /// The router, for mounting or in-process testing.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve until the shutdown signal fires.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "Health server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

async fn health(State(state): State<ServerState>) -> impl IntoResponse {
    let status = state.aggregator.current_status();
    let code = if status.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status.as_ref().clone()))
}

async fn live() -> &'static str {
    "ok"
}

async fn status(State(state): State<ServerState>) -> Json<SystemStatus> {
    let lifecycle = *state.lifecycle.borrow();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        lifecycle,
        health: state.aggregator.current_status().as_ref().clone(),
        roles: state.aggregator.supervisor().snapshots(),
    })
}
