//! Liveness and readiness probes
//!
//! - `GET /healthz` → 200 `ok` while the process is up
//! - `GET /readyz` → 200 `ok` once the controller is running, 503 before

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tracing::{error, info};

/// Shared readiness flag flipped by the controller runner
#[derive(Debug, Clone, Default)]
pub struct Readiness(Arc<AtomicBool>);

impl Readiness {
    /// Mark the controller as ready (or not)
    pub fn set(&self, ready: bool) {
        self.0.store(ready, Ordering::SeqCst);
    }

    /// Whether the controller is ready
    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Build the probe router
pub fn health_routes(readiness: Readiness) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readyz))
        .with_state(readiness)
}

async fn readyz(State(readiness): State<Readiness>) -> (StatusCode, &'static str) {
    if readiness.is_ready() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

/// Serve the probes on `addr` until the process exits
pub async fn start_health_server(addr: SocketAddr, readiness: Readiness) {
    serve(addr, health_routes(readiness), "Health probe").await;
}

/// Bind `addr` and serve `app`, logging instead of failing
pub(crate) async fn serve(addr: SocketAddr, app: Router, server: &str) {
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => {
            info!(addr = %addr, "{server} server started");
            l
        }
        Err(e) => {
            error!(error = %e, addr = %addr, "{server} server failed to bind");
            return;
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "{server} server error");
    }
}
