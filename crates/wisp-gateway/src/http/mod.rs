//! HTTP control API.
//!
//! `GET /status` is open; everything else sits behind bearer auth, a per-IP
//! rate limit, and a request body cap.

pub mod auth;
pub mod chat;
pub mod ops;
pub mod sessions;
pub mod status;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::app::AppState;

use auth::AuthState;

/// Assemble the full router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let config = state.config();
    let auth_state = AuthState::new(
        config.gateway.auth_token.clone(),
        config.gateway.rate_per_minute,
    );

    let protected = Router::new()
        .route("/chat", post(chat::chat_handler))
        .route("/notify", post(ops::notify_handler))
        .route("/sessions", get(sessions::list_handler))
        .route("/sessions/{id}/history", get(sessions::history_handler))
        .route("/sessions/reset", post(sessions::reset_handler))
        .route("/cost", get(ops::cost_handler))
        .route("/monitor", get(ops::monitor_handler))
        .route("/evolve", post(ops::evolve_handler))
        .layer(middleware::from_fn_with_state(
            auth_state,
            auth::require_auth,
        ));

    Router::new()
        .route("/status", get(status::status_handler))
        .merge(protected)
        .layer(DefaultBodyLimit::max(config.gateway.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
