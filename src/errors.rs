//! Error taxonomy for the voice bridge.
//!
//! Errors split into two classes with different propagation rules:
//!
//! - Absorbed at the component boundary and surfaced only as structured
//!   results inside the conversation: [`BridgeError::Codec`] (drop the
//!   frame), [`BridgeError::ToolExecution`] (returned to the model as a
//!   JSON error payload).
//! - Fatal for the call and propagated to the session manager, which is the
//!   single place that ends the call and finalizes the log:
//!   [`BridgeError::TelephonyActionFailed`], [`BridgeError::AiLegDisconnected`].
//!
//! Nothing here should escape a session task as a panic; an unexpected
//! error in one call must not affect other concurrent calls.

use thiserror::Error;

use crate::audio::CodecError;

/// Errors that can occur while bridging a call.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A required configuration value is absent. For agent configuration
    /// this is recoverable: the session falls back to the default agent
    /// identity instead of failing the call. For startup configuration
    /// (the OpenAI key) it aborts startup.
    #[error("missing configuration: {0}")]
    ConfigMissing(String),

    /// Malformed audio payload. Non-fatal: the frame is dropped.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A business operation behind a tool call failed. Non-fatal: reported
    /// to the model as a JSON error payload, the call continues.
    #[error("tool execution failed: {0}")]
    ToolExecution(String),

    /// A call-control action (answer, stream start) failed. Fatal: the call
    /// cannot proceed and is terminated without retry.
    #[error("telephony action failed: {0}")]
    TelephonyActionFailed(String),

    /// The AI WebSocket closed or errored mid-call. Fatal: the call cannot
    /// continue without the AI leg.
    #[error("AI leg disconnected: {0}")]
    AiLegDisconnected(String),

    /// Redelivered webhook for an already-known session. Ignored, not an
    /// error condition.
    #[error("duplicate event for session {0}")]
    DuplicateEvent(String),

    /// The session.created -> configured handshake did not complete within
    /// the configured bound.
    #[error("session configuration timed out after {0}ms")]
    HandshakeTimeout(u64),

    /// Failure writing to or reading from the record store.
    #[error("store error: {0}")]
    Store(String),

    /// WebSocket transport error on either leg.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// Serialization error on a wire event.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl BridgeError {
    /// Whether this error ends the call when it reaches the session manager.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BridgeError::TelephonyActionFailed(_)
                | BridgeError::AiLegDisconnected(_)
                | BridgeError::HandshakeTimeout(_)
        )
    }
}

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(BridgeError::AiLegDisconnected("closed".into()).is_fatal());
        assert!(BridgeError::TelephonyActionFailed("500".into()).is_fatal());
        assert!(BridgeError::HandshakeTimeout(10_000).is_fatal());
        assert!(!BridgeError::ConfigMissing("agent".into()).is_fatal());
        assert!(!BridgeError::ToolExecution("boom".into()).is_fatal());
        assert!(!BridgeError::DuplicateEvent("abc".into()).is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = BridgeError::AiLegDisconnected("reset by peer".into());
        assert!(err.to_string().contains("AI leg disconnected"));

        let err = BridgeError::DuplicateEvent("cc-1".into());
        assert!(err.to_string().contains("cc-1"));
    }
}
