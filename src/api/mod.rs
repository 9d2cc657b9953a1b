// HTTP edge: health, metrics, and the WebSocket upgrade routes.
//
// Transport stays thin here; all protocol handling lives in the
// matchmaking controller and the session runtime.

pub mod ws;

use axum::{
    body::Body,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::matchmaking::Matchmaking;
use crate::metrics;
use crate::room::{LocalQueueNotifier, LocalRooms};
use crate::session::SessionManager;

#[derive(Clone)]
pub struct AppState {
    pub matchmaking: Arc<Matchmaking>,
    pub sessions: Arc<SessionManager>,
    pub rooms: Arc<LocalRooms>,
    pub notifier: Arc<LocalQueueNotifier>,
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "codeduel-backend" }))
}

async fn metrics_handler() -> impl IntoResponse {
    let body = metrics::gather_metrics();
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        body,
    )
}

/// Axum middleware that records per-request metrics (count and duration).
async fn metrics_middleware(req: Request<Body>, next: Next) -> Response {
    let method = req.method().to_string();
    let path = metrics::normalize_path(req.uri().path());

    let start = std::time::Instant::now();
    let response = next.run(req).await;
    let elapsed = start.elapsed().as_secs_f64();

    let status = response.status().as_u16().to_string();

    metrics::API_REQUESTS_TOTAL
        .with_label_values(&[&method, &path, &status])
        .inc();
    metrics::API_REQUEST_DURATION_SECONDS
        .with_label_values(&[&path])
        .observe(elapsed);

    response
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/ws/queue", get(ws::ws_queue))
        .route("/ws/match/{match_id}", get(ws::ws_match))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(axum::middleware::from_fn(metrics_middleware))
}
