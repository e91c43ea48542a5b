//! Shared application state.

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::realtime::RealtimeConnectConfig;
use crate::session::{OpenAiConnector, SessionContext, SessionRegistry};
use crate::store::MemoryStore;
use crate::telephony::CallControlClient;
use crate::tools::ToolDispatcher;

/// State shared by all routes. Cloning is cheap; everything is behind an
/// `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub registry: Arc<SessionRegistry>,
    pub ctx: Arc<SessionContext>,
}

impl AppState {
    /// Wire the default production collaborators from configuration. The
    /// in-process store backs standalone runs; deployments with an external
    /// record store build [`SessionContext`] directly.
    pub fn new(config: ServerConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let ctx = SessionContext {
            store: store.clone(),
            agent_configs: store.clone(),
            call_control: Arc::new(CallControlClient::new(
                &config.telnyx_api_base,
                &config.telnyx_api_key,
            )),
            ai: Arc::new(OpenAiConnector::new(RealtimeConnectConfig {
                url: config.realtime_url.clone(),
                api_key: config.openai_api_key.clone(),
                model: config.realtime_model.clone(),
            })),
            tools: Arc::new(ToolDispatcher::new(store)),
            vad: config.vad,
            stream_url: config.stream_url.clone(),
            handshake_timeout: config.handshake_timeout(),
        };

        Self {
            config: Arc::new(config),
            registry: Arc::new(SessionRegistry::new()),
            ctx: Arc::new(ctx),
        }
    }
}
