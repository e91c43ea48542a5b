//! Inbound call-control webhooks.
//!
//! Telnyx-style envelope: `{data: {event_type, payload: {...}}}`. The
//! bridge reacts to call.initiated, call.ringing, call.answered and
//! call.hangup (or a payload state of `completed`); every other event type
//! is acknowledged with 200 and ignored. Webhooks may be redelivered by the
//! platform, so delivery for an already-known call-control id is a no-op
//! state check, never a second session.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::errors::BridgeError;
use crate::session::{SessionEvent, launch_inbound_call};
use crate::state::AppState;

/// Webhook envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEnvelope {
    pub data: WebhookData,
}

/// Event body inside the envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookData {
    pub event_type: String,
    pub payload: CallPayload,
}

/// Call-control payload fields the bridge consumes.
#[derive(Debug, Clone, Deserialize)]
pub struct CallPayload {
    pub call_control_id: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

/// `POST /webhooks/telnyx`
///
/// Always returns 200 for recognized and unrecognized event types alike;
/// the platform treats anything else as a delivery failure and retries.
pub async fn telnyx_webhook(
    State(state): State<AppState>,
    Json(envelope): Json<WebhookEnvelope>,
) -> StatusCode {
    let event_type = envelope.data.event_type.as_str();
    let payload = envelope.data.payload;
    let session_id = payload.call_control_id.clone();

    match event_type {
        "call.initiated" | "call.ringing" => {
            let from = payload.from.as_deref().unwrap_or("unknown");
            match launch_inbound_call(
                state.ctx.clone(),
                state.registry.clone(),
                &session_id,
                from,
                payload.to.as_deref(),
            )
            .await
            {
                Ok(_) => debug!(session_id, event_type, "webhook accepted"),
                Err(BridgeError::DuplicateEvent(_)) => {
                    // Redelivered webhook; the session already exists.
                    debug!(session_id, event_type, "duplicate webhook ignored");
                }
                Err(e) => warn!(session_id, error = %e, "failed to launch call session"),
            }
        }

        "call.answered" => {
            dispatch(&state, &session_id, SessionEvent::TelephonyAnswered).await;
        }

        "call.hangup" => {
            dispatch(&state, &session_id, SessionEvent::Hangup).await;
        }

        _ => {
            // A payload state of `completed` on any event also means hangup.
            if payload.state.as_deref() == Some("completed") {
                dispatch(&state, &session_id, SessionEvent::Hangup).await;
            } else {
                debug!(session_id, event_type, "unhandled webhook event ignored");
            }
        }
    }

    StatusCode::OK
}

async fn dispatch(state: &AppState, session_id: &str, event: SessionEvent) {
    match state.registry.get(session_id) {
        Some(handle) => {
            if handle.send(event).await.is_err() {
                debug!(session_id, "session already gone");
            }
        }
        None => debug!(session_id, "webhook for unknown session ignored"),
    }
}
