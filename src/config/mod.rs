//! Server configuration.
//!
//! Loaded from environment variables with defaults for everything except
//! the OpenAI API key. A `.env` file is read in `main.rs` before this
//! module runs, so values there behave like ordinary environment variables.

use std::env;
use std::time::Duration;

use crate::errors::{BridgeError, BridgeResult};
use crate::realtime::VadSettings;

/// Default realtime endpoint.
const DEFAULT_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";
/// Default realtime model.
const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview";
/// Default Telnyx API base.
const DEFAULT_TELNYX_API_BASE: &str = "https://api.telnyx.com/v2";

/// Runtime configuration for the bridge server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,

    /// OpenAI API key (required)
    pub openai_api_key: String,
    /// Realtime WebSocket endpoint
    pub realtime_url: String,
    /// Realtime model name
    pub realtime_model: String,

    /// Telnyx API key; empty disables call-control actions in practice
    pub telnyx_api_key: String,
    /// Telnyx API base URL
    pub telnyx_api_base: String,

    /// Public WebSocket URL the telephony platform streams media to,
    /// e.g. `wss://bridge.example.com/media`
    pub stream_url: String,

    /// Upper bound on the AI session configuration handshake, in ms
    pub handshake_timeout_ms: u64,

    /// Server-VAD turn detection parameters
    pub vad: VadSettings,
}

impl ServerConfig {
    /// Load configuration from the environment. Missing optional values
    /// fall back to defaults; a missing OpenAI key is a startup error.
    pub fn from_env() -> BridgeResult<Self> {
        let openai_api_key = env::var("OPENAI_API_KEY")
            .map_err(|_| BridgeError::ConfigMissing("OPENAI_API_KEY".to_string()))?;

        let vad = VadSettings {
            threshold: var_or("VAD_THRESHOLD", VadSettings::default().threshold),
            prefix_padding_ms: var_or("VAD_PREFIX_PADDING_MS", 300),
            silence_duration_ms: var_or("VAD_SILENCE_DURATION_MS", 500),
        };

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = var_or("PORT", 8080u16);

        Ok(Self {
            stream_url: env::var("STREAM_URL")
                .unwrap_or_else(|_| format!("ws://{host}:{port}/media")),
            host,
            port,
            openai_api_key,
            realtime_url: env::var("REALTIME_URL")
                .unwrap_or_else(|_| DEFAULT_REALTIME_URL.to_string()),
            realtime_model: env::var("REALTIME_MODEL")
                .unwrap_or_else(|_| DEFAULT_REALTIME_MODEL.to_string()),
            telnyx_api_key: env::var("TELNYX_API_KEY").unwrap_or_default(),
            telnyx_api_base: env::var("TELNYX_API_BASE")
                .unwrap_or_else(|_| DEFAULT_TELNYX_API_BASE.to_string()),
            handshake_timeout_ms: var_or("HANDSHAKE_TIMEOUT_MS", 10_000u64),
            vad,
        })
    }

    /// Server address as "host:port".
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

/// Read an env var and parse it, falling back to `default` when unset or
/// unparsable.
fn var_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_or_falls_back() {
        assert_eq!(var_or("CALLBRIDGE_TEST_UNSET_VAR", 42u16), 42);
    }

    #[test]
    fn test_address_format() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 9000,
            openai_api_key: "sk-test".to_string(),
            realtime_url: DEFAULT_REALTIME_URL.to_string(),
            realtime_model: DEFAULT_REALTIME_MODEL.to_string(),
            telnyx_api_key: String::new(),
            telnyx_api_base: DEFAULT_TELNYX_API_BASE.to_string(),
            stream_url: "wss://bridge.example.com/media".to_string(),
            handshake_timeout_ms: 10_000,
            vad: VadSettings::default(),
        };
        assert_eq!(config.address(), "127.0.0.1:9000");
        assert_eq!(config.handshake_timeout(), Duration::from_secs(10));
    }
}
