//! Inbound media-stream WebSocket.
//!
//! Connect-style JSON frames: `{type: "start"|"media"|"stop"}`. The `start`
//! frame carries the contact id and caller number; `media` frames carry
//! 8kHz base64 PCM16 payloads. The socket is the telephony audio leg for
//! both entry paths: Amazon Connect dials it directly, and Telnyx streams
//! into it after a `streaming_start` action points at this endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::TelephonyLeg;
use crate::errors::{BridgeError, BridgeResult};
use crate::session::{SessionEvent, SessionHandle, launch_media_call};
use crate::state::AppState;

/// Buffer size for outbound media frames; 50 frames/s at 20ms framing.
const MEDIA_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// Wire frames
// =============================================================================

/// Media-stream frames, both directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MediaStreamFrame {
    /// Stream opened; identifies the call
    Start {
        /// Stream identity
        start: StartInfo,
    },
    /// One audio chunk
    Media {
        /// Audio payload
        media: MediaInfo,
    },
    /// Stream ended
    Stop,
}

/// Identity carried by the start frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartInfo {
    /// Contact or call-control id correlating this stream to a session
    pub contact_id: String,
    /// Caller number
    #[serde(default)]
    pub customer_number: Option<String>,
    /// Platform instance id
    #[serde(default)]
    pub instance_id: Option<String>,
}

/// Audio chunk payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Media type, always "audio"
    #[serde(rename = "type", default = "default_media_type")]
    pub media_type: String,
    /// Base64 PCM16 at 8kHz
    pub payload: String,
    /// Monotonic chunk counter
    #[serde(default)]
    pub chunk: u64,
}

fn default_media_type() -> String {
    "audio".to_string()
}

// =============================================================================
// Telephony leg over the socket
// =============================================================================

enum MediaOut {
    Audio(String),
    Close,
}

/// Send side of the media socket, handed to the session as its telephony
/// leg once the start frame arrives.
pub struct WsTelephonyLeg {
    tx: mpsc::Sender<MediaOut>,
}

#[async_trait]
impl TelephonyLeg for WsTelephonyLeg {
    async fn send_audio(&self, payload: String) -> BridgeResult<()> {
        self.tx
            .send(MediaOut::Audio(payload))
            .await
            .map_err(|_| BridgeError::WebSocket("media socket closed".to_string()))
    }

    async fn close(&self) {
        let _ = self.tx.send(MediaOut::Close).await;
    }
}

// =============================================================================
// Handler
// =============================================================================

/// `GET /media` - upgrade to the media-stream WebSocket.
pub async fn media_stream_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_media_socket(socket, state))
}

async fn handle_media_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<MediaOut>(MEDIA_CHANNEL_CAPACITY);

    // Writer task: audio back to the caller, in arrival order.
    let mut chunk: u64 = 0;
    let writer = tokio::spawn(async move {
        while let Some(out) = out_rx.recv().await {
            match out {
                MediaOut::Audio(payload) => {
                    chunk += 1;
                    let frame = MediaStreamFrame::Media {
                        media: MediaInfo {
                            media_type: "audio".to_string(),
                            payload,
                            chunk,
                        },
                    };
                    let json = match serde_json::to_string(&frame) {
                        Ok(j) => j,
                        Err(e) => {
                            warn!("failed to serialize media frame: {e}");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                MediaOut::Close => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    let mut session: Option<SessionHandle> = None;

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let frame: MediaStreamFrame = match serde_json::from_str(&text) {
                    Ok(f) => f,
                    Err(e) => {
                        // One malformed frame must not end the call.
                        warn!("undecodable media frame dropped: {e}");
                        continue;
                    }
                };
                match frame {
                    MediaStreamFrame::Start { start } => {
                        match attach_session(&state, &start, out_tx.clone()).await {
                            Ok(handle) => {
                                info!(session_id = %handle.session_id(), "media stream attached");
                                session = Some(handle);
                            }
                            Err(e) => {
                                warn!(contact_id = %start.contact_id, error = %e,
                                    "failed to attach media stream");
                                break;
                            }
                        }
                    }
                    MediaStreamFrame::Media { media } => {
                        if let Some(handle) = &session {
                            if handle
                                .send(SessionEvent::MediaFrame {
                                    payload: media.payload,
                                })
                                .await
                                .is_err()
                            {
                                break;
                            }
                        } else {
                            debug!("media frame before start frame dropped");
                        }
                    }
                    MediaStreamFrame::Stop => break,
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }

    if let Some(handle) = &session {
        let _ = handle.send(SessionEvent::MediaStopped).await;
    }
    writer.abort();
    debug!("media socket closed");
}

/// Find the session this stream belongs to, creating one for the Connect
/// entry path where no webhook preceded the stream.
async fn attach_session(
    state: &AppState,
    start: &StartInfo,
    out_tx: mpsc::Sender<MediaOut>,
) -> BridgeResult<SessionHandle> {
    let handle = match state.registry.get(&start.contact_id) {
        Some(existing) => existing,
        None => {
            let from = start.customer_number.as_deref().unwrap_or("unknown");
            launch_media_call(
                state.ctx.clone(),
                state.registry.clone(),
                &start.contact_id,
                from,
            )
            .await?
        }
    };

    let leg: Arc<dyn TelephonyLeg> = Arc::new(WsTelephonyLeg { tx: out_tx });
    handle
        .send(SessionEvent::MediaConnected(leg))
        .await
        .map_err(|_| BridgeError::WebSocket("session queue closed".to_string()))?;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_frame_deserialization() {
        let json = r#"{
            "type": "start",
            "start": {
                "contactId": "contact-1",
                "customerNumber": "+14165550123",
                "instanceId": "inst-9"
            }
        }"#;
        match serde_json::from_str::<MediaStreamFrame>(json).unwrap() {
            MediaStreamFrame::Start { start } => {
                assert_eq!(start.contact_id, "contact-1");
                assert_eq!(start.customer_number.as_deref(), Some("+14165550123"));
            }
            _ => panic!("wrong frame type"),
        }
    }

    #[test]
    fn test_media_frame_round_trip() {
        let frame = MediaStreamFrame::Media {
            media: MediaInfo {
                media_type: "audio".to_string(),
                payload: "AAAA".to_string(),
                chunk: 3,
            },
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"type\":\"media\""));
        match serde_json::from_str::<MediaStreamFrame>(&json).unwrap() {
            MediaStreamFrame::Media { media } => {
                assert_eq!(media.payload, "AAAA");
                assert_eq!(media.chunk, 3);
            }
            _ => panic!("wrong frame type"),
        }
    }

    #[test]
    fn test_stop_frame() {
        let frame: MediaStreamFrame = serde_json::from_str(r#"{"type": "stop"}"#).unwrap();
        assert!(matches!(frame, MediaStreamFrame::Stop));
    }
}
