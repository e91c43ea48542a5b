//! Telephony side of the bridge: call-control actions, inbound webhooks,
//! and the media-stream WebSocket that carries call audio.

pub mod actions;
pub mod media;
pub mod webhook;

use async_trait::async_trait;

pub use actions::{CallControlApi, CallControlClient};
pub use media::{MediaStreamFrame, media_stream_handler};
pub use webhook::telnyx_webhook;

use crate::errors::BridgeResult;

/// Send side of the telephony audio leg. The production implementation
/// wraps the media WebSocket; tests use channel-backed fakes.
#[async_trait]
pub trait TelephonyLeg: Send + Sync {
    /// Send one base64 PCM16 chunk at 8kHz toward the caller.
    async fn send_audio(&self, payload: String) -> BridgeResult<()>;
    /// Close the leg. Idempotent.
    async fn close(&self);
}
