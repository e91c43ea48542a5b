//! HTTP routes.

use axum::Router;
use axum::extract::State;
use axum::response::Json;
use axum::routing::{get, post};
use serde_json::{Value, json};

use crate::state::AppState;
use crate::telephony::{media_stream_handler, telnyx_webhook};

/// Build the application router: the call-control webhook, the media
/// WebSocket, and a public health check.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/webhooks/telnyx", post(telnyx_webhook))
        .route("/media", get(media_stream_handler))
        .with_state(state)
}

/// `GET /` - health check with the live session count.
async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "callbridge",
        "version": env!("CARGO_PKG_VERSION"),
        "active_sessions": state.registry.len(),
    }))
}
