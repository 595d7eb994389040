use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

mod handlers;
mod state;

pub use state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Issue an authorization request under a new session
        .route("/api/sign-in", get(handlers::sign_in))
        // Callback the holder posts its response to
        .route("/api/callback", post(handlers::callback))
        // Status endpoint - check session status
        .route("/api/status/:session_id", get(handlers::get_status))
        // Health check
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
}
