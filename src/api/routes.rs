use axum::{
    routing::{get, post},
    Router,
};

use crate::server::AppState;

use super::handlers::{send_file, send_message};
use super::health::{health, stats};
use super::metrics::prometheus_metrics;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health & Stats
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(prometheus_metrics))
        // Ingress
        .route("/send", post(send_message))
        .route("/send-file", post(send_file))
}
