//! Health check endpoints (/healthz, /readyz).

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpListener;
use tracing::info;

/// Shared readiness state. Ready once the controller has started.
#[derive(Clone, Default)]
pub struct HealthState {
    ready: Arc<AtomicBool>,
}

impl HealthState {
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn readyz(State(state): State<HealthState>) -> StatusCode {
    if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

fn router(state: HealthState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(state)
}

/// Start the health server on the given port.
pub async fn serve(port: u16, state: HealthState) -> anyhow::Result<()> {
    let listener = TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    info!("Health server listening on port {}", port);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readiness_flag_is_shared() {
        let state = HealthState::default();
        let handle = state.clone();
        assert!(!state.is_ready());
        handle.set_ready(true);
        assert!(state.is_ready());
    }

    #[tokio::test]
    async fn test_readyz_follows_flag() {
        let state = HealthState::default();
        assert_eq!(readyz(State(state.clone())).await, StatusCode::SERVICE_UNAVAILABLE);
        state.set_ready(true);
        assert_eq!(readyz(State(state)).await, StatusCode::OK);
        assert_eq!(healthz().await, StatusCode::OK);
    }
}
