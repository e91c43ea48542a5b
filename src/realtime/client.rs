//! Realtime API client: the AI leg of a bridged call.
//!
//! One client per call session. The socket is split into a writer task fed
//! by an mpsc of [`ClientEvent`] and a reader task that translates server
//! events into [`AiEvent`]s on the session's ordered event queue. The
//! session state machine is the only consumer; the client itself carries no
//! conversation state beyond the call_id -> function-name map needed to
//! complete function calls.
//!
//! Transport failures are fatal for the call: the reader emits a single
//! [`AiEvent::Disconnected`] and stops. A malformed individual event is
//! logged and dropped, since one bad delta must not end a live call.

use std::collections::HashMap;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, error, info, warn};
use url::Url;

use super::messages::{ClientEvent, ServerEvent};
use super::{AiEvent, AiLeg};
use crate::errors::{BridgeError, BridgeResult};

/// Channel capacity for the outbound event queue. Sized for audio
/// workloads: 20ms telephony frames arrive 50/s.
const WS_CHANNEL_CAPACITY: usize = 256;

/// How long close waits for the relay task to flush its Close frame and
/// exit before aborting it.
const CLOSE_GRACE: std::time::Duration = std::time::Duration::from_millis(500);

/// Connection parameters for the realtime API.
#[derive(Debug, Clone)]
pub struct RealtimeConnectConfig {
    /// WebSocket endpoint, e.g. `wss://api.openai.com/v1/realtime`
    pub url: String,
    /// Bearer API key
    pub api_key: String,
    /// Model appended as a query parameter
    pub model: String,
}

impl RealtimeConnectConfig {
    fn ws_url(&self) -> String {
        format!("{}?model={}", self.url, self.model)
    }
}

/// Handle to a connected AI leg. Dropping the handle or calling
/// [`RealtimeHandle::close`] tears the socket down.
pub struct RealtimeHandle {
    tx: parking_lot::Mutex<Option<mpsc::Sender<ClientEvent>>>,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl RealtimeHandle {
    /// Open the WebSocket and spawn the relay task. Decoded server events
    /// arrive on `events`; when the transport dies the task emits
    /// [`AiEvent::Disconnected`] once and exits.
    pub async fn connect(
        config: RealtimeConnectConfig,
        events: mpsc::Sender<AiEvent>,
    ) -> BridgeResult<Self> {
        let ws_url = config.ws_url();
        let host = Url::parse(&ws_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .ok_or_else(|| BridgeError::AiLegDisconnected(format!("invalid url {ws_url}")))?;

        let request = http::Request::builder()
            .uri(&ws_url)
            .header("Authorization", format!("Bearer {}", config.api_key))
            .header("OpenAI-Beta", "realtime=v1")
            .header(
                "Sec-WebSocket-Key",
                tungstenite::handshake::client::generate_key(),
            )
            .header("Sec-WebSocket-Version", "13")
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Host", host)
            .body(())
            .map_err(|e| BridgeError::AiLegDisconnected(e.to_string()))?;

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| BridgeError::AiLegDisconnected(e.to_string()))?;

        info!("connected to realtime API");

        let (mut ws_sink, mut ws_source) = ws_stream.split();
        let (tx, mut rx) = mpsc::channel::<ClientEvent>(WS_CHANNEL_CAPACITY);

        let task = tokio::spawn(async move {
            // call_id -> function name, filled by output_item.added before
            // the arguments.done event arrives without a name.
            let mut pending_calls: HashMap<String, String> = HashMap::new();
            let mut disconnect_reason = "closed".to_string();

            loop {
                tokio::select! {
                    outgoing = rx.recv() => {
                        let Some(event) = outgoing else {
                            // Handle dropped: intentional close.
                            let _ = ws_sink.send(Message::Close(None)).await;
                            return;
                        };
                        let json = match serde_json::to_string(&event) {
                            Ok(j) => j,
                            Err(e) => {
                                error!("failed to serialize client event: {e}");
                                continue;
                            }
                        };
                        if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                            disconnect_reason = e.to_string();
                            break;
                        }
                    }

                    incoming = ws_source.next() => {
                        match incoming {
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<ServerEvent>(&text) {
                                    Ok(event) => {
                                        if let Some(ai_event) =
                                            translate(event, &mut pending_calls)
                                            && events.send(ai_event).await.is_err()
                                        {
                                            // Session gone, stop relaying.
                                            return;
                                        }
                                    }
                                    Err(e) => {
                                        // Non-fatal: drop the event, keep the call.
                                        warn!("undecodable server event dropped: {e}");
                                    }
                                }
                            }
                            Some(Ok(Message::Ping(data))) => {
                                if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                    disconnect_reason = e.to_string();
                                    break;
                                }
                            }
                            Some(Ok(Message::Close(_))) => {
                                disconnect_reason = "closed by server".to_string();
                                break;
                            }
                            Some(Err(e)) => {
                                disconnect_reason = e.to_string();
                                break;
                            }
                            None => break,
                            _ => {}
                        }
                    }
                }
            }

            let _ = events
                .send(AiEvent::Disconnected {
                    reason: disconnect_reason,
                })
                .await;
        });

        Ok(Self {
            tx: parking_lot::Mutex::new(Some(tx)),
            task: parking_lot::Mutex::new(Some(task)),
        })
    }
}

#[async_trait]
impl AiLeg for RealtimeHandle {
    async fn send(&self, event: ClientEvent) -> BridgeResult<()> {
        let sender = self.tx.lock().clone();
        match sender {
            Some(tx) => tx
                .send(event)
                .await
                .map_err(|_| BridgeError::AiLegDisconnected("send channel closed".to_string())),
            None => Err(BridgeError::AiLegDisconnected("leg closed".to_string())),
        }
    }

    async fn close(&self) {
        // Dropping the sender makes the relay task send a Close frame and
        // exit. Wait for that to actually happen; abort only a task wedged
        // on a dead sink past the grace period.
        self.tx.lock().take();
        let task = self.task.lock().take();
        if let Some(task) = task {
            let abort = task.abort_handle();
            if tokio::time::timeout(CLOSE_GRACE, task).await.is_err() {
                warn!("realtime relay task did not exit within grace, aborting");
                abort.abort();
            }
        }
    }
}

/// Map a decoded server event onto the session queue, or `None` for events
/// the bridge ignores.
fn translate(
    event: ServerEvent,
    pending_calls: &mut HashMap<String, String>,
) -> Option<AiEvent> {
    match event {
        ServerEvent::SessionCreated { session } => {
            info!(session_id = %session.id, "realtime session created");
            Some(AiEvent::SessionCreated)
        }
        ServerEvent::SessionUpdated { session } => {
            debug!(session_id = %session.id, "realtime session configured");
            Some(AiEvent::SessionUpdated)
        }
        ServerEvent::AudioDelta { delta } => Some(AiEvent::AudioDelta { delta }),
        ServerEvent::OutputItemAdded { item } => {
            if item.item_type == "function_call"
                && let (Some(call_id), Some(name)) = (item.call_id, item.name)
            {
                debug!(call_id = %call_id, name = %name, "tracking function call");
                pending_calls.insert(call_id, name);
            }
            None
        }
        ServerEvent::FunctionCallArgumentsDone {
            call_id,
            arguments,
            name,
        } => {
            let name = name
                .or_else(|| pending_calls.remove(&call_id))
                .unwrap_or_else(|| {
                    warn!(call_id = %call_id, "function call without a tracked name");
                    String::new()
                });
            Some(AiEvent::FunctionCall {
                call_id,
                name,
                arguments,
            })
        }
        ServerEvent::AudioTranscriptDone { transcript } => {
            Some(AiEvent::AssistantTranscript(transcript))
        }
        ServerEvent::TranscriptionCompleted { transcript } => {
            Some(AiEvent::CallerTranscript(transcript))
        }
        ServerEvent::Error { error } => {
            error!(error_type = %error.error_type, "realtime API error: {}", error.message);
            Some(AiEvent::ApiError(error.message))
        }
        ServerEvent::Other(value) => {
            debug!(event = %value["type"], "unhandled server event");
            None
        }
    }
}
