//! Liveness endpoint for the process supervisor.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use chrono::{DateTime, Utc};
use courier_bridge::bridge::{Bridge, BridgeSnapshot, Readiness};
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    pub bridge: Arc<Bridge>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    worker: &'static str,
    queue: usize,
    messages_processed: u64,
    uptime_seconds: i64,
}

pub fn build_router(state: HealthState) -> Router {
    Router::new().route("/healthz", get(health)).with_state(state)
}

pub async fn serve(addr: SocketAddr, state: HealthState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "health endpoint listening");
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

async fn health(State(state): State<HealthState>) -> impl IntoResponse {
    let snapshot = state.bridge.snapshot().await;
    let uptime_seconds = (Utc::now() - state.started_at).num_seconds();
    let (healthy, response) = health_payload(&snapshot, uptime_seconds);
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
}

fn health_payload(snapshot: &BridgeSnapshot, uptime_seconds: i64) -> (bool, HealthResponse) {
    let healthy = snapshot.worker_connected && snapshot.readiness == Readiness::Ready;
    (
        healthy,
        HealthResponse {
            status: if healthy { "ok" } else { "degraded" },
            worker: snapshot.readiness.as_str(),
            queue: snapshot.queued,
            messages_processed: snapshot.messages_completed,
            uptime_seconds,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(readiness: Readiness, connected: bool) -> BridgeSnapshot {
        BridgeSnapshot {
            readiness,
            processing: false,
            queued: 3,
            messages_completed: 5,
            worker_connected: connected,
        }
    }

    #[test]
    fn ready_and_connected_reports_ok() {
        let (healthy, response) = health_payload(&snapshot(Readiness::Ready, true), 120);
        assert!(healthy);
        assert_eq!(response.status, "ok");
        assert_eq!(response.worker, "ready");
        assert_eq!(response.queue, 3);
        assert_eq!(response.messages_processed, 5);
        assert_eq!(response.uptime_seconds, 120);
    }

    #[test]
    fn disconnected_worker_reports_degraded() {
        let (healthy, response) = health_payload(&snapshot(Readiness::Ready, false), 1);
        assert!(!healthy);
        assert_eq!(response.status, "degraded");
    }

    #[test]
    fn connecting_worker_reports_degraded() {
        let (healthy, response) = health_payload(&snapshot(Readiness::Connecting, true), 1);
        assert!(!healthy);
        assert_eq!(response.worker, "connecting");
    }
}
