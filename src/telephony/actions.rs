//! Outbound call-control actions.
//!
//! Answering a call and starting its media stream are synchronous remote
//! calls against the telephony vendor API. Both are idempotent per
//! call-control id on the vendor side and neither is retried here: a phone
//! call cannot tolerate a multi-second retry loop, so a single failure
//! fails the call.

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};

use crate::errors::{BridgeError, BridgeResult};

/// Call-control actions the session manager invokes on the telephony
/// platform. Trait seam so sessions can be driven by fakes in tests.
#[async_trait]
pub trait CallControlApi: Send + Sync {
    /// Answer an inbound call.
    async fn answer(&self, call_control_id: &str) -> BridgeResult<()>;

    /// Start bidirectional media streaming to `stream_url`.
    async fn start_streaming(&self, call_control_id: &str, stream_url: &str) -> BridgeResult<()>;
}

/// Telnyx Call Control client.
pub struct CallControlClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
}

impl CallControlClient {
    pub fn new(api_base: &str, api_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    async fn post_action(
        &self,
        call_control_id: &str,
        action: &str,
        body: serde_json::Value,
    ) -> BridgeResult<()> {
        let url = format!(
            "{}/calls/{}/actions/{}",
            self.api_base, call_control_id, action
        );
        debug!(call_control_id, action, "call-control action");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| BridgeError::TelephonyActionFailed(format!("{action}: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(BridgeError::TelephonyActionFailed(format!(
                "{action} returned {status}: {text}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl CallControlApi for CallControlClient {
    async fn answer(&self, call_control_id: &str) -> BridgeResult<()> {
        info!(call_control_id, "answering call");
        self.post_action(call_control_id, "answer", json!({})).await
    }

    async fn start_streaming(&self, call_control_id: &str, stream_url: &str) -> BridgeResult<()> {
        info!(call_control_id, stream_url, "starting media stream");
        self.post_action(
            call_control_id,
            "streaming_start",
            json!({
                "stream_url": stream_url,
                "stream_track": "inbound_track",
                "stream_bidirectional_mode": "rtp",
            }),
        )
        .await
    }
}
