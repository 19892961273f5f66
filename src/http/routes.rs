use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Recording control
        .route("/sessions/start", post(handlers::start_recording))
        .route("/sessions/:session_id/stop", post(handlers::stop_recording))
        // Session queries
        .route("/sessions/current", get(handlers::get_current_session))
        .route(
            "/sessions/:session_id/status",
            get(handlers::get_session_status),
        )
        // Device notifications from external watchers
        .route("/devices/events", post(handlers::post_device_event))
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
