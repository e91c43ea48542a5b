pub mod audio;
pub mod config;
pub mod errors;
pub mod realtime;
pub mod routes;
pub mod session;
pub mod state;
pub mod store;
pub mod telephony;
pub mod tools;

// Re-export commonly used items for convenience
pub use config::ServerConfig;
pub use errors::{BridgeError, BridgeResult};
pub use session::{SessionContext, SessionRegistry};
pub use state::AppState;
