//! Realtime API WebSocket message types.
//!
//! JSON events exchanged with the OpenAI Realtime API over WebSocket.
//!
//! Client events sent by the bridge:
//! - session.update - session configuration (instructions, voice, tools)
//! - input_audio_buffer.append - caller audio, base64 PCM16 at 24kHz
//! - conversation.item.create - function_call_output injection
//! - response.create - trigger a model turn after a tool result
//!
//! Server events the bridge reacts to:
//! - session.created / session.updated
//! - response.audio.delta - model audio, base64 PCM16 at 24kHz
//! - response.output_item.added - carries the function name for a call_id
//! - response.function_call_arguments.done - complete tool invocation
//! - response.audio_transcript.done - assistant transcript line
//! - conversation.item.input_audio_transcription.completed - caller line
//! - error
//!
//! Anything else deserializes into the `Other` catch-all and is dropped;
//! one unmodeled event must never end a call.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// Session configuration
// =============================================================================

/// Session configuration sent in session.update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Response modalities (audio, text)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,

    /// System instructions for the agent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Voice for audio output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    /// Input audio format (always pcm16 here)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_format: Option<String>,

    /// Output audio format (always pcm16 here)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_format: Option<String>,

    /// Server-side voice-activity turn detection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<TurnDetection>,

    /// Tool definitions (JSON schema per tool)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,

    /// Tool choice strategy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
}

/// Turn detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetection {
    /// Server-side VAD
    #[serde(rename = "server_vad")]
    ServerVad {
        /// Activation threshold
        #[serde(skip_serializing_if = "Option::is_none")]
        threshold: Option<f32>,
        /// Audio prefix padding in ms
        #[serde(skip_serializing_if = "Option::is_none")]
        prefix_padding_ms: Option<u32>,
        /// Silence duration before end of turn in ms
        #[serde(skip_serializing_if = "Option::is_none")]
        silence_duration_ms: Option<u32>,
    },
    /// No turn detection
    #[serde(rename = "none")]
    None {},
}

/// Conversation item, used here for function_call_output injection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationItem {
    /// Item type (function_call_output, message, function_call)
    #[serde(rename = "type")]
    pub item_type: String,
    /// Call ID this output answers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    /// Function name (present on function_call items)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Function output as a JSON string
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl ConversationItem {
    /// Build a function_call_output item answering `call_id`.
    pub fn function_output(call_id: &str, output: &Value) -> Self {
        Self {
            item_type: "function_call_output".to_string(),
            call_id: Some(call_id.to_string()),
            name: None,
            output: Some(output.to_string()),
        }
    }
}

// =============================================================================
// Client events (sent to the API)
// =============================================================================

/// Client events sent to the realtime API.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Update session configuration
    #[serde(rename = "session.update")]
    SessionUpdate {
        /// Session configuration
        session: SessionConfig,
    },

    /// Append audio to the input buffer
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend {
        /// Base64-encoded PCM16 audio
        audio: String,
    },

    /// Create a conversation item
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate {
        /// Item to create
        item: ConversationItem,
    },

    /// Trigger a model response
    #[serde(rename = "response.create")]
    ResponseCreate,
}

// =============================================================================
// Server events (received from the API)
// =============================================================================

/// Server events received from the realtime API.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Error occurred
    #[serde(rename = "error")]
    Error {
        /// Error details
        error: ApiError,
    },

    /// Session created
    #[serde(rename = "session.created")]
    SessionCreated {
        /// Session information
        session: SessionInfo,
    },

    /// Session configuration acknowledged
    #[serde(rename = "session.updated")]
    SessionUpdated {
        /// Session information
        session: SessionInfo,
    },

    /// Audio data chunk
    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        /// Base64-encoded PCM16 audio delta
        delta: String,
    },

    /// Output item added; carries the function name for a call_id before
    /// the arguments arrive
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded {
        /// Item
        item: ConversationItem,
    },

    /// Function call arguments complete
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        /// Call ID
        call_id: String,
        /// Full JSON arguments
        arguments: String,
        /// Function name (some API versions include it here)
        #[serde(default)]
        name: Option<String>,
    },

    /// Assistant transcript complete for one response
    #[serde(rename = "response.audio_transcript.done")]
    AudioTranscriptDone {
        /// Full transcript
        transcript: String,
    },

    /// Caller transcript complete for one utterance
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted {
        /// Transcript text
        transcript: String,
    },

    /// Any event type the bridge does not react to
    #[serde(untagged)]
    Other(Value),
}

/// API error information.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    /// Error type
    #[serde(rename = "type")]
    pub error_type: String,
    /// Error message
    pub message: String,
    /// Error code
    #[serde(default)]
    pub code: Option<String>,
}

/// Session information from session.created/updated.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionInfo {
    /// Session ID
    pub id: String,
    /// Model in use
    #[serde(default)]
    pub model: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_audio_append_serialization() {
        let event = ClientEvent::InputAudioBufferAppend {
            audio: "AAAA".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("input_audio_buffer.append"));
        assert!(json.contains("AAAA"));
    }

    #[test]
    fn test_session_update_serialization() {
        let event = ClientEvent::SessionUpdate {
            session: SessionConfig {
                modalities: Some(vec!["audio".into(), "text".into()]),
                instructions: Some("You are Alex".into()),
                voice: Some("alloy".into()),
                input_audio_format: Some("pcm16".into()),
                output_audio_format: Some("pcm16".into()),
                turn_detection: Some(TurnDetection::ServerVad {
                    threshold: Some(0.5),
                    prefix_padding_ms: Some(300),
                    silence_duration_ms: Some(500),
                }),
                tools: None,
                tool_choice: Some("auto".into()),
            },
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("session.update"));
        assert!(json.contains("server_vad"));
        assert!(json.contains("pcm16"));
    }

    #[test]
    fn test_function_output_item() {
        let item =
            ConversationItem::function_output("call-7", &serde_json::json!({"found": false}));
        let event = ClientEvent::ConversationItemCreate { item };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("conversation.item.create"));
        assert!(json.contains("function_call_output"));
        assert!(json.contains("call-7"));
    }

    #[test]
    fn test_server_event_deserialization() {
        let json = r#"{
            "type": "response.function_call_arguments.done",
            "call_id": "call-1",
            "arguments": "{\"phone\": \"+14165550123\"}"
        }"#;
        match serde_json::from_str::<ServerEvent>(json).unwrap() {
            ServerEvent::FunctionCallArgumentsDone { call_id, arguments, name } => {
                assert_eq!(call_id, "call-1");
                assert!(arguments.contains("+14165550123"));
                assert!(name.is_none());
            }
            _ => panic!("wrong event type"),
        }
    }

    #[test]
    fn test_unmodeled_event_is_tolerated() {
        let json = r#"{"type": "rate_limits.updated", "rate_limits": []}"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(event, ServerEvent::Other(_)));
    }

    #[test]
    fn test_session_created_deserialization() {
        let json = r#"{
            "type": "session.created",
            "session": {"id": "sess_123", "model": "gpt-4o-realtime-preview"}
        }"#;
        match serde_json::from_str::<ServerEvent>(json).unwrap() {
            ServerEvent::SessionCreated { session } => assert_eq!(session.id, "sess_123"),
            _ => panic!("wrong event type"),
        }
    }
}
