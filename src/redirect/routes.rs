use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers::{health_check, redirect_click, RedirectState};

/// Router serving `GET <route_path>/{payload}?s=<signature>` and `GET /health`.
///
/// `route_path` is expected in the form produced by
/// [`TrackerConfig::normalized_route_path`](crate::config::TrackerConfig::normalized_route_path).
pub fn create_redirect_router(state: Arc<RedirectState>, route_path: &str) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(&format!("{route_path}/{{payload}}"), get(redirect_click))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
