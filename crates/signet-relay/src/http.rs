//! `/health`, `/stats`, and `/ws` (§6). Grounded on the teacher's own
//! `rekindle-e2e-server` crate, which already wires `axum` + `tower-http`
//! for a small JSON + upgrade HTTP surface next to a connection-oriented
//! core.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::broker::Broker;
use crate::connection;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: u64,
    uptime: u64,
}

#[derive(Serialize)]
struct StatsResponse {
    connected_clients: usize,
    authenticated_users: usize,
    messages_routed: u64,
    uptime_seconds: u64,
}

async fn health(State(broker): State<Arc<Broker>>) -> impl IntoResponse {
    let stats = broker.stats();
    Json(HealthResponse {
        status: "ok",
        timestamp: unix_timestamp_secs(),
        uptime: stats.uptime_secs,
    })
}

async fn stats(State(broker): State<Arc<Broker>>) -> impl IntoResponse {
    let stats = broker.stats();
    Json(StatsResponse {
        connected_clients: stats.connected_clients,
        authenticated_users: stats.authenticated_users,
        messages_routed: stats.messages_routed,
        uptime_seconds: stats.uptime_secs,
    })
}

async fn ws_upgrade(
    State(broker): State<Arc<Broker>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    upgrade: WebSocketUpgrade,
) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| connection::handle_connection(socket, addr.to_string(), broker))
}

fn unix_timestamp_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub fn router(broker: Arc<Broker>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/ws", get(ws_upgrade))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(broker)
}
