//! AI realtime adapter: the outbound leg to the realtime speech API.
//!
//! The adapter owns the WebSocket ([`client`]), the wire event types
//! ([`messages`]), and the per-session adapter state machine:
//!
//! ```text
//! connecting -> session_created -> configured -> active -> closing -> closed
//! ```
//!
//! `session_created` arrives from the API; the adapter answers with a
//! session.update built from the agent configuration; the first audio frame
//! in either direction moves the leg to `active`. Either leg closing drives
//! `closing -> closed`, after which no further sends are attempted.

pub mod client;
pub mod messages;

use async_trait::async_trait;
use serde_json::Value;

pub use client::{RealtimeConnectConfig, RealtimeHandle};
pub use messages::{ClientEvent, ConversationItem, ServerEvent, SessionConfig, TurnDetection};

use crate::errors::BridgeResult;
use crate::store::AgentConfig;
use crate::tools::tool_schemas;

/// Decoded events from the AI leg, queued onto the session's event loop.
#[derive(Debug, Clone)]
pub enum AiEvent {
    /// The API created the session; the adapter should configure it
    SessionCreated,
    /// The API acknowledged session.update
    SessionUpdated,
    /// Model audio, base64 PCM16 at 24kHz
    AudioDelta { delta: String },
    /// Complete function call to dispatch
    FunctionCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    /// Assistant transcript line for the call log
    AssistantTranscript(String),
    /// Caller transcript line for the call log
    CallerTranscript(String),
    /// In-band API error event (non-fatal)
    ApiError(String),
    /// Transport closed or errored (fatal for the call)
    Disconnected { reason: String },
}

/// Send side of the AI leg. [`RealtimeHandle`] is the production
/// implementation; tests drive sessions through channel-backed fakes.
#[async_trait]
pub trait AiLeg: Send + Sync {
    /// Queue an event for the API.
    async fn send(&self, event: ClientEvent) -> BridgeResult<()>;
    /// Tear the socket down. Idempotent.
    async fn close(&self);
}

/// Adapter lifecycle states for the AI leg of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdapterState {
    /// Socket opening, session.created not yet seen
    #[default]
    Connecting,
    /// session.created received, session.update sent
    SessionCreated,
    /// session.updated acknowledged; ready for audio
    Configured,
    /// Audio has been exchanged in at least one direction
    Active,
    /// Teardown started
    Closing,
    /// Fully closed; no further sends permitted
    Closed,
}

impl AdapterState {
    /// Whether the leg accepts outbound events in this state.
    pub fn can_send(&self) -> bool {
        !matches!(self, AdapterState::Closing | AdapterState::Closed)
    }

    /// Whether audio may flow. Audio before configuration is structurally
    /// rejected here rather than trusted to arrival order.
    pub fn audio_ready(&self) -> bool {
        matches!(self, AdapterState::Configured | AdapterState::Active)
    }
}

/// Server-VAD turn detection parameters, configurable per deployment.
#[derive(Debug, Clone, Copy)]
pub struct VadSettings {
    pub threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 500,
        }
    }
}

/// Build the session.update configuration from the agent snapshot: system
/// instructions, voice, pcm16 formats, server VAD, and the tool schema.
pub fn build_session_config(agent: &AgentConfig, vad: VadSettings) -> SessionConfig {
    SessionConfig {
        modalities: Some(vec!["audio".to_string(), "text".to_string()]),
        instructions: Some(build_instructions(agent)),
        voice: Some(agent.voice.clone()),
        input_audio_format: Some("pcm16".to_string()),
        output_audio_format: Some("pcm16".to_string()),
        turn_detection: Some(TurnDetection::ServerVad {
            threshold: Some(vad.threshold),
            prefix_padding_ms: Some(vad.prefix_padding_ms),
            silence_duration_ms: Some(vad.silence_duration_ms),
        }),
        tools: Some(tool_schemas()),
        tool_choice: Some("auto".to_string()),
    }
}

/// Interpolate the system prompt from the agent configuration.
fn build_instructions(agent: &AgentConfig) -> String {
    let mut instructions = format!(
        "You are {agent}, the phone receptionist for {company}, a {niche} business. \
         Answer warmly and keep responses short and conversational; you are on a live phone call. \
         A diagnostic visit costs ${diagnostic:.2}. Emergency callouts add a ${surcharge:.2} surcharge. \
         Use lookup_client to recognize returning callers, schedule_appointment to book service, \
         and transfer_to_agent when the caller asks for a human or you cannot help.",
        agent = agent.agent_name,
        company = agent.company_name,
        niche = agent.business_niche,
        diagnostic = agent.diagnostic_price,
        surcharge = agent.emergency_surcharge,
    );
    if let Some(custom) = &agent.custom_instructions {
        instructions.push_str("\n\n");
        instructions.push_str(custom);
    }
    instructions
}

/// Build the tool-result injection pair: a function_call_output item
/// followed by a response.create trigger.
pub fn tool_result_events(call_id: &str, payload: &Value) -> [ClientEvent; 2] {
    [
        ClientEvent::ConversationItemCreate {
            item: ConversationItem::function_output(call_id, payload),
        },
        ClientEvent::ResponseCreate,
    ]
}
