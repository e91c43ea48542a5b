//! Call session manager.
//!
//! One tokio task per call. The telephony leg, the AI leg, and tool
//! execution all feed a single ordered event queue consumed by that task,
//! so every state transition happens in one place and frame order is
//! preserved per leg. Tool calls are spawned off the queue and their
//! results re-enter it as later events; audio relay never waits on a tool.
//!
//! Session states:
//!
//! ```text
//! created -> answering -> streaming -> active -> ending -> ended
//!                                  \-> failed (from any non-terminal state)
//! ```
//!
//! Closing either leg promptly closes the other, finalizes the call log
//! with a terminal status and `ended_at`, and removes the session from the
//! registry. Tool results arriving after that point are discarded.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendError;
use tracing::{debug, info, warn};

use crate::audio::{AudioFrame, REALTIME_SAMPLE_RATE, TELEPHONY_SAMPLE_RATE};
use crate::errors::{BridgeError, BridgeResult};
use crate::realtime::{
    AdapterState, AiEvent, AiLeg, ClientEvent, RealtimeConnectConfig, RealtimeHandle, VadSettings,
    build_session_config, tool_result_events,
};
use crate::store::{
    AgentConfig, AgentConfigProvider, CallLogEntry, CallStatus, SharedStore,
};
use crate::telephony::{CallControlApi, TelephonyLeg};
use crate::tools::{ToolCall, ToolDispatcher, ToolResult};

/// Queue depth per session. Audio frames dominate; 20ms framing means
/// 50 events/s per leg in steady state.
const SESSION_QUEUE_CAPACITY: usize = 512;

// =============================================================================
// States and events
// =============================================================================

/// Lifecycle states of one call session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Answering,
    Streaming,
    Active,
    Ending,
    Ended,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Ended | SessionState::Failed)
    }
}

/// Events serialized onto a session's queue.
pub enum SessionEvent {
    /// Telephony platform confirmed the answer action
    TelephonyAnswered,
    /// Media stream attached; the session now owns the telephony leg
    MediaConnected(Arc<dyn TelephonyLeg>),
    /// One caller audio chunk, base64 PCM16 at 8kHz
    MediaFrame { payload: String },
    /// Media stream closed from the telephony side
    MediaStopped,
    /// Caller hung up
    Hangup,
    /// Event from the AI leg
    Ai(AiEvent),
    /// A spawned tool call finished
    ToolCompleted {
        call_id: String,
        payload: Value,
        transfer: bool,
    },
    /// Configuration handshake deadline passed
    HandshakeExpired,
}

// =============================================================================
// Handles and registry
// =============================================================================

/// Cheap clonable handle used to queue events onto a session.
#[derive(Clone)]
pub struct SessionHandle {
    session_id: Arc<str>,
    tx: mpsc::Sender<SessionEvent>,
}

impl SessionHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Queue an event. Fails once the session has ended and its queue is
    /// gone, which callers treat as "discard".
    pub async fn send(&self, event: SessionEvent) -> Result<(), SendError<SessionEvent>> {
        self.tx.send(event).await
    }
}

/// Concurrency-safe map of live sessions keyed by session id. Each session
/// owns its own legs and queue; nothing reaches into another session's
/// state through this map.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, SessionHandle>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions.get(session_id).map(|h| h.clone())
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn remove(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    /// Insert unless the id is already live. Redelivered webhooks race
    /// here, so the check and insert are one atomic entry operation.
    fn try_insert(&self, handle: SessionHandle) -> BridgeResult<()> {
        match self.sessions.entry(handle.session_id().to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(BridgeError::DuplicateEvent(
                handle.session_id().to_string(),
            )),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(handle);
                Ok(())
            }
        }
    }
}

// =============================================================================
// AI connector seam
// =============================================================================

/// Opens the AI leg for a session. Production connects the realtime API;
/// tests substitute channel-backed legs.
#[async_trait]
pub trait AiConnector: Send + Sync {
    async fn connect(&self, events: mpsc::Sender<AiEvent>) -> BridgeResult<Arc<dyn AiLeg>>;
}

/// Connector for the OpenAI realtime API.
pub struct OpenAiConnector {
    config: RealtimeConnectConfig,
}

impl OpenAiConnector {
    pub fn new(config: RealtimeConnectConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl AiConnector for OpenAiConnector {
    async fn connect(&self, events: mpsc::Sender<AiEvent>) -> BridgeResult<Arc<dyn AiLeg>> {
        let handle = RealtimeHandle::connect(self.config.clone(), events).await?;
        Ok(Arc::new(handle))
    }
}

// =============================================================================
// Shared context
// =============================================================================

/// Collaborators shared by all sessions.
pub struct SessionContext {
    pub store: SharedStore,
    pub agent_configs: Arc<dyn AgentConfigProvider>,
    pub call_control: Arc<dyn CallControlApi>,
    pub ai: Arc<dyn AiConnector>,
    pub tools: Arc<ToolDispatcher>,
    pub vad: VadSettings,
    /// Public WebSocket URL the telephony platform streams media to
    pub stream_url: String,
    /// Upper bound on the session.created -> configured handshake
    pub handshake_timeout: Duration,
}

/// How the call reached the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryPath {
    /// Call-control webhook; the bridge must answer and start streaming
    Webhook,
    /// Media stream arrived directly; the platform already answered
    MediaStream,
}

// =============================================================================
// Launch
// =============================================================================

/// Start a session for a webhook-initiated call. Returns `DuplicateEvent`
/// when the session id is already live, so redelivered webhooks are a
/// no-op state check rather than a second session.
pub async fn launch_inbound_call(
    ctx: Arc<SessionContext>,
    registry: Arc<SessionRegistry>,
    session_id: &str,
    from: &str,
    to: Option<&str>,
) -> BridgeResult<SessionHandle> {
    launch(ctx, registry, session_id, from, to, EntryPath::Webhook).await
}

/// Start a session for a call whose media stream arrived without a
/// preceding webhook (Connect entry path). No call-control actions are
/// issued; the platform has already answered.
pub async fn launch_media_call(
    ctx: Arc<SessionContext>,
    registry: Arc<SessionRegistry>,
    session_id: &str,
    from: &str,
) -> BridgeResult<SessionHandle> {
    launch(ctx, registry, session_id, from, None, EntryPath::MediaStream).await
}

async fn launch(
    ctx: Arc<SessionContext>,
    registry: Arc<SessionRegistry>,
    session_id: &str,
    from: &str,
    to: Option<&str>,
    entry: EntryPath,
) -> BridgeResult<SessionHandle> {
    let (tx, rx) = mpsc::channel(SESSION_QUEUE_CAPACITY);
    let handle = SessionHandle {
        session_id: Arc::from(session_id),
        tx: tx.clone(),
    };
    registry.try_insert(handle.clone())?;

    // The log entry exists before the launch returns, so two deliveries of
    // the same webhook can never produce two entries.
    let log = CallLogEntry::new(session_id, from, to);
    if let Err(e) = ctx.store.create_or_update_call_log(log.clone()).await {
        registry.remove(session_id);
        return Err(e);
    }

    info!(session_id, from, ?entry, "call session created");

    let session = Session {
        id: session_id.to_string(),
        ctx,
        registry,
        agent: AgentConfig::default(),
        state: SessionState::Created,
        adapter: AdapterState::default(),
        telephony: None,
        ai: None,
        log,
        tx,
    };
    tokio::spawn(session.run(rx, entry));

    Ok(handle)
}

// =============================================================================
// The session task
// =============================================================================

struct Session {
    id: String,
    ctx: Arc<SessionContext>,
    registry: Arc<SessionRegistry>,
    agent: AgentConfig,
    state: SessionState,
    adapter: AdapterState,
    telephony: Option<Arc<dyn TelephonyLeg>>,
    ai: Option<Arc<dyn AiLeg>>,
    log: CallLogEntry,
    tx: mpsc::Sender<SessionEvent>,
}

impl Session {
    async fn run(mut self, mut rx: mpsc::Receiver<SessionEvent>, entry: EntryPath) {
        self.load_agent_config().await;

        self.state = SessionState::Answering;
        if entry == EntryPath::Webhook && !self.answer_and_stream().await {
            return;
        }

        if !self.connect_ai_leg().await {
            return;
        }
        self.arm_handshake_timer();

        while let Some(event) = rx.recv().await {
            self.handle_event(event).await;
            if self.state.is_terminal() {
                break;
            }
        }
    }

    /// A missing or unreadable configuration degrades to the generic
    /// identity; it never fails the call.
    async fn load_agent_config(&mut self) {
        match self.ctx.agent_configs.load_active_agent_config().await {
            Ok(Some(config)) => self.agent = config,
            Ok(None) => {
                info!(
                    session_id = %self.id,
                    "no active agent configuration, using default identity"
                );
            }
            Err(e) => {
                warn!(
                    session_id = %self.id,
                    error = %e,
                    "agent configuration unavailable, using default identity"
                );
            }
        }
    }

    /// Webhook entry path: answer the call, then point its media stream at
    /// this server. Both are single-shot remote calls; either failing fails
    /// the call, since a ringing phone cannot wait out a retry loop.
    async fn answer_and_stream(&mut self) -> bool {
        if let Err(e) = self.ctx.call_control.answer(&self.id).await {
            self.fail(&format!("answer failed: {e}")).await;
            return false;
        }
        self.log.status = CallStatus::Answered;
        self.log.answered_at = Some(OffsetDateTime::now_utc());
        self.persist_log().await;

        if let Err(e) = self
            .ctx
            .call_control
            .start_streaming(&self.id, &self.ctx.stream_url)
            .await
        {
            self.fail(&format!("streaming_start failed: {e}")).await;
            return false;
        }
        self.state = SessionState::Streaming;
        self.log.status = CallStatus::Streaming;
        self.persist_log().await;
        true
    }

    async fn connect_ai_leg(&mut self) -> bool {
        let (ai_tx, mut ai_rx) = mpsc::channel::<AiEvent>(SESSION_QUEUE_CAPACITY);
        let queue = self.tx.clone();
        tokio::spawn(async move {
            while let Some(event) = ai_rx.recv().await {
                if queue.send(SessionEvent::Ai(event)).await.is_err() {
                    break;
                }
            }
        });

        match self.ctx.ai.connect(ai_tx).await {
            Ok(leg) => {
                self.ai = Some(leg);
                true
            }
            Err(e) => {
                self.fail(&format!("AI leg connect failed: {e}")).await;
                false
            }
        }
    }

    fn arm_handshake_timer(&self) {
        let queue = self.tx.clone();
        let timeout = self.ctx.handshake_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = queue.send(SessionEvent::HandshakeExpired).await;
        });
    }

    async fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::TelephonyAnswered => {
                if self.log.answered_at.is_none() {
                    self.log.answered_at = Some(OffsetDateTime::now_utc());
                    if self.log.status == CallStatus::Initiated {
                        self.log.status = CallStatus::Answered;
                    }
                    self.persist_log().await;
                }
            }

            SessionEvent::MediaConnected(leg) => {
                self.telephony = Some(leg);
                if matches!(self.state, SessionState::Created | SessionState::Answering) {
                    self.state = SessionState::Streaming;
                }
                if self.log.answered_at.is_none() {
                    self.log.answered_at = Some(OffsetDateTime::now_utc());
                }
                if !self.log.status.is_terminal() {
                    self.log.status = CallStatus::Streaming;
                }
                self.persist_log().await;
                debug!(session_id = %self.id, "telephony leg attached");
            }

            SessionEvent::MediaFrame { payload } => {
                self.relay_caller_audio(payload).await;
            }

            SessionEvent::MediaStopped | SessionEvent::Hangup => {
                self.finish(CallStatus::Completed).await;
            }

            SessionEvent::Ai(ai_event) => {
                self.handle_ai_event(ai_event).await;
            }

            SessionEvent::ToolCompleted {
                call_id,
                payload,
                transfer,
            } => {
                self.handle_tool_completed(call_id, payload, transfer).await;
            }

            SessionEvent::HandshakeExpired => {
                if !self.adapter.audio_ready() {
                    self.fail("AI session configuration handshake timed out")
                        .await;
                }
            }
        }
    }

    async fn handle_ai_event(&mut self, event: AiEvent) {
        match event {
            AiEvent::SessionCreated => {
                self.adapter = AdapterState::SessionCreated;
                let config = build_session_config(&self.agent, self.ctx.vad);
                self.ai_send(ClientEvent::SessionUpdate { session: config })
                    .await;
            }

            AiEvent::SessionUpdated => {
                self.adapter = AdapterState::Configured;
                debug!(session_id = %self.id, "AI leg configured");
            }

            AiEvent::AudioDelta { delta } => {
                self.relay_model_audio(delta).await;
            }

            AiEvent::FunctionCall {
                call_id,
                name,
                arguments,
            } => {
                self.spawn_tool_call(call_id, name, arguments);
            }

            AiEvent::AssistantTranscript(text) => {
                self.log.transcript.push(format!("assistant: {text}"));
            }

            AiEvent::CallerTranscript(text) => {
                self.log.transcript.push(format!("caller: {text}"));
            }

            AiEvent::ApiError(message) => {
                warn!(session_id = %self.id, "realtime API error: {message}");
            }

            AiEvent::Disconnected { reason } => {
                // Fatal: the call cannot continue without the AI leg.
                self.ai = None;
                self.fail(&format!("AI leg disconnected: {reason}")).await;
            }
        }
    }

    /// Caller audio: 8kHz base64 PCM16 in, 24kHz out on the AI leg. A
    /// malformed frame is dropped; audio before the AI leg is configured
    /// is dropped rather than buffered.
    async fn relay_caller_audio(&mut self, payload: String) {
        if !self.adapter.audio_ready() {
            debug!(session_id = %self.id, "caller audio before configuration dropped");
            return;
        }
        let frame = match AudioFrame::from_base64(&payload, TELEPHONY_SAMPLE_RATE) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "undecodable caller frame dropped");
                return;
            }
        };
        let audio = frame.resampled(REALTIME_SAMPLE_RATE).to_base64();
        self.ai_send(ClientEvent::InputAudioBufferAppend { audio })
            .await;
        self.mark_active();
    }

    /// Model audio: 24kHz base64 PCM16 in, 8kHz out on the telephony leg.
    async fn relay_model_audio(&mut self, delta: String) {
        if !self.adapter.audio_ready() {
            return;
        }
        let Some(leg) = self.telephony.clone() else {
            debug!(session_id = %self.id, "model audio with no telephony leg dropped");
            return;
        };
        let frame = match AudioFrame::from_base64(&delta, REALTIME_SAMPLE_RATE) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "undecodable model frame dropped");
                return;
            }
        };
        let payload = frame.resampled(TELEPHONY_SAMPLE_RATE).to_base64();
        if let Err(e) = leg.send_audio(payload).await {
            // The media socket will report its own stop event.
            debug!(session_id = %self.id, error = %e, "telephony leg rejected audio");
            return;
        }
        self.mark_active();
    }

    fn mark_active(&mut self) {
        if self.state == SessionState::Streaming {
            self.state = SessionState::Active;
            info!(session_id = %self.id, "call session active");
        }
        if self.adapter == AdapterState::Configured {
            self.adapter = AdapterState::Active;
        }
    }

    /// Tool calls run off the queue so a slow lookup never stalls audio;
    /// the result re-enters the queue as `ToolCompleted`.
    fn spawn_tool_call(&self, call_id: String, name: String, arguments: String) {
        let tools = self.ctx.tools.clone();
        let queue = self.tx.clone();
        let session_id = self.id.clone();
        tokio::spawn(async move {
            let result = match ToolCall::parse(&name, &arguments) {
                Ok(call) => tools.dispatch(&session_id, call).await,
                Err(payload) => ToolResult {
                    payload,
                    transfer_requested: false,
                },
            };
            // Send fails once the session has ended; the result is then
            // discarded by design of the queue lifetime.
            let _ = queue
                .send(SessionEvent::ToolCompleted {
                    call_id,
                    payload: result.payload,
                    transfer: result.transfer_requested,
                })
                .await;
        });
    }

    async fn handle_tool_completed(&mut self, call_id: String, payload: Value, transfer: bool) {
        if let Some(job_id) = payload["appointment"]["jobId"].as_str() {
            self.log.appointment_job_id = Some(job_id.to_string());
            self.persist_log().await;
        }

        for event in tool_result_events(&call_id, &payload) {
            self.ai_send(event).await;
        }

        if transfer {
            self.log.transfer_reason = payload["reason"].as_str().map(str::to_string);
            self.finish(CallStatus::Transferred).await;
        }
    }

    async fn ai_send(&mut self, event: ClientEvent) {
        if !self.adapter.can_send() {
            return;
        }
        if let Some(leg) = &self.ai
            && let Err(e) = leg.send(event).await
        {
            // Transport death surfaces separately as a Disconnected event.
            debug!(session_id = %self.id, error = %e, "AI leg rejected event");
        }
    }

    async fn persist_log(&self) {
        if let Err(e) = self.ctx.store.create_or_update_call_log(self.log.clone()).await {
            warn!(session_id = %self.id, error = %e, "call log write failed");
        }
    }

    async fn fail(&mut self, reason: &str) {
        warn!(session_id = %self.id, reason, "call session failed");
        self.finish(CallStatus::Failed).await;
    }

    /// Close both legs, finalize the log, release the session. Taking the
    /// legs out of the session guarantees no frame is relayed after close.
    async fn finish(&mut self, status: CallStatus) {
        if self.state.is_terminal() {
            return;
        }
        self.state = SessionState::Ending;
        self.adapter = AdapterState::Closing;

        if let Some(ai) = self.ai.take() {
            ai.close().await;
        }
        if let Some(telephony) = self.telephony.take() {
            telephony.close().await;
        }
        self.adapter = AdapterState::Closed;

        self.log.status = status;
        self.log.ended_at = Some(OffsetDateTime::now_utc());
        self.persist_log().await;
        self.registry.remove(&self.id);
        self.ctx.tools.forget_session(&self.id);

        info!(
            session_id = %self.id,
            ?status,
            duration_seconds = self.log.duration_seconds(),
            "call session ended"
        );
        self.state = if status == CallStatus::Failed {
            SessionState::Failed
        } else {
            SessionState::Ended
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(id: &str) -> SessionHandle {
        let (tx, _rx) = mpsc::channel(4);
        SessionHandle {
            session_id: Arc::from(id),
            tx,
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(SessionState::Ended.is_terminal());
        assert!(SessionState::Failed.is_terminal());
        assert!(!SessionState::Created.is_terminal());
        assert!(!SessionState::Active.is_terminal());
        assert!(!SessionState::Ending.is_terminal());
    }

    #[test]
    fn test_registry_insert_and_lookup() {
        let registry = SessionRegistry::new();
        assert!(registry.is_empty());

        registry.try_insert(handle("cc-1")).unwrap();
        assert!(registry.contains("cc-1"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("cc-1").unwrap().session_id(), "cc-1");

        registry.remove("cc-1");
        assert!(registry.get("cc-1").is_none());
    }

    #[test]
    fn test_registry_rejects_duplicate_id() {
        let registry = SessionRegistry::new();
        registry.try_insert(handle("cc-1")).unwrap();

        let err = registry.try_insert(handle("cc-1")).unwrap_err();
        assert!(matches!(err, BridgeError::DuplicateEvent(id) if id == "cc-1"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_handle_send_fails_after_receiver_drop() {
        let (tx, rx) = mpsc::channel(4);
        let handle = SessionHandle {
            session_id: Arc::from("cc-1"),
            tx,
        };
        drop(rx);
        assert!(handle.send(SessionEvent::Hangup).await.is_err());
    }
}
