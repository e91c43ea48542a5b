//! Tool dispatch for function calls emitted by the realtime model.
//!
//! The model's free-form JSON arguments are parsed into a closed set of
//! typed invocation variants at this boundary. A tool name outside the
//! declared set yields an `unknown_tool` error payload instead of failing
//! the call, so a single bad tool call never aborts the conversation.
//!
//! Side effects (client/job writes) commit before the JSON result is handed
//! back, so the model's next turn reflects durable state.

use serde::Deserialize;
use serde_json::{Value, json};
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::store::{SharedStore, ToolOutcome, normalize_phone};

/// Tool names declared to the realtime API.
pub const TOOL_LOOKUP_CLIENT: &str = "lookup_client";
pub const TOOL_SCHEDULE_APPOINTMENT: &str = "schedule_appointment";
pub const TOOL_TRANSFER_TO_AGENT: &str = "transfer_to_agent";

/// Arguments for `lookup_client`.
#[derive(Debug, Clone, Deserialize)]
pub struct LookupClientArgs {
    pub phone: String,
}

/// Arguments for `schedule_appointment`.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleAppointmentArgs {
    pub client_name: String,
    pub phone: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    pub service_type: String,
    #[serde(default)]
    pub preferred_date: Option<String>,
    #[serde(default)]
    pub preferred_time: Option<String>,
    pub description: String,
    #[serde(default)]
    pub is_emergency: bool,
}

/// Arguments for `transfer_to_agent`.
#[derive(Debug, Clone, Deserialize)]
pub struct TransferToAgentArgs {
    pub reason: String,
    #[serde(default)]
    pub urgency: Option<String>,
}

/// A function call parsed into its typed variant.
#[derive(Debug, Clone)]
pub enum ToolCall {
    LookupClient(LookupClientArgs),
    ScheduleAppointment(ScheduleAppointmentArgs),
    TransferToAgent(TransferToAgentArgs),
}

impl ToolCall {
    /// Parse a named tool call's JSON argument string. `Err` carries a
    /// result payload to hand straight back to the model.
    pub fn parse(name: &str, arguments: &str) -> Result<ToolCall, Value> {
        let parse_err = |e: serde_json::Error| json!({"error": format!("invalid_arguments: {e}")});
        match name {
            TOOL_LOOKUP_CLIENT => serde_json::from_str(arguments)
                .map(ToolCall::LookupClient)
                .map_err(parse_err),
            TOOL_SCHEDULE_APPOINTMENT => serde_json::from_str(arguments)
                .map(ToolCall::ScheduleAppointment)
                .map_err(parse_err),
            TOOL_TRANSFER_TO_AGENT => serde_json::from_str(arguments)
                .map(ToolCall::TransferToAgent)
                .map_err(parse_err),
            other => {
                warn!(tool = other, "unknown tool call");
                Err(json!({"error": "unknown_tool"}))
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::LookupClient(_) => TOOL_LOOKUP_CLIENT,
            ToolCall::ScheduleAppointment(_) => TOOL_SCHEDULE_APPOINTMENT,
            ToolCall::TransferToAgent(_) => TOOL_TRANSFER_TO_AGENT,
        }
    }
}

/// Outcome of dispatching a tool call.
#[derive(Debug, Clone)]
pub struct ToolResult {
    /// JSON payload returned to the model
    pub payload: Value,
    /// Set when the session manager should begin a telephony transfer
    pub transfer_requested: bool,
}

/// Executes tool calls against the record store.
pub struct ToolDispatcher {
    store: SharedStore,
    /// Appointments already created, keyed by (session, phone, service).
    /// The model may retry a tool call mid-conversation; a repeat returns
    /// the original appointment instead of creating a duplicate job.
    scheduled: parking_lot::Mutex<std::collections::HashMap<(String, String, String), Value>>,
}

impl ToolDispatcher {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            scheduled: parking_lot::Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// Drop a session's dedupe entries. Called on session teardown so the
    /// map holds keys only for live calls.
    pub fn forget_session(&self, session_id: &str) {
        self.scheduled
            .lock()
            .retain(|(sid, _, _), _| sid != session_id);
    }

    /// Execute a parsed tool call. Business failures come back as JSON error
    /// payloads, never as session-fatal errors.
    pub async fn dispatch(&self, session_id: &str, call: ToolCall) -> ToolResult {
        let name = call.name();
        let result = match call {
            ToolCall::LookupClient(args) => self.lookup_client(args).await,
            ToolCall::ScheduleAppointment(args) => {
                self.schedule_appointment_deduped(session_id, args).await
            }
            ToolCall::TransferToAgent(args) => {
                let payload = json!({
                    "success": true,
                    "message": "Transferring you to a team member now.",
                    "reason": args.reason,
                    "urgency": args.urgency,
                });
                self.record_outcome(session_id, name, &payload).await;
                return ToolResult {
                    payload,
                    transfer_requested: true,
                };
            }
        };

        let payload = result.unwrap_or_else(|e| {
            warn!(tool = name, error = %e, "tool execution failed");
            json!({"success": false, "error": e})
        });
        self.record_outcome(session_id, name, &payload).await;
        ToolResult {
            payload,
            transfer_requested: false,
        }
    }

    async fn lookup_client(&self, args: LookupClientArgs) -> Result<Value, String> {
        let phone = normalize_phone(&args.phone);
        debug!(phone = %phone, "looking up client");

        let client = self
            .store
            .find_client_by_phone(&phone)
            .await
            .map_err(|e| e.to_string())?;

        // Absence of a match is success, not an error.
        let Some(client) = client else {
            return Ok(json!({"found": false}));
        };

        let jobs = self
            .store
            .recent_jobs_for_client(&client.id)
            .await
            .map_err(|e| e.to_string())?;

        Ok(json!({
            "found": true,
            "client": {
                "id": client.id,
                "name": client.name,
                "phone": client.phone,
                "email": client.email,
                "address": client.address,
            },
            "recentJobs": jobs.iter().map(|j| json!({
                "jobId": j.id,
                "serviceType": j.service_type,
                "description": j.description,
            })).collect::<Vec<_>>(),
        }))
    }

    async fn schedule_appointment_deduped(
        &self,
        session_id: &str,
        args: ScheduleAppointmentArgs,
    ) -> Result<Value, String> {
        let key = (
            session_id.to_string(),
            normalize_phone(&args.phone),
            args.service_type.clone(),
        );
        if let Some(existing) = self.scheduled.lock().get(&key).cloned() {
            debug!(session_id, "duplicate schedule_appointment, returning original");
            return Ok(existing);
        }
        let payload = self.schedule_appointment(args).await?;
        self.scheduled.lock().insert(key, payload.clone());
        Ok(payload)
    }

    async fn schedule_appointment(&self, args: ScheduleAppointmentArgs) -> Result<Value, String> {
        let phone = normalize_phone(&args.phone);

        // Reuse the existing client record when the caller is already known.
        let client = match self
            .store
            .find_client_by_phone(&phone)
            .await
            .map_err(|e| e.to_string())?
        {
            Some(existing) => existing,
            None => self
                .store
                .create_client(
                    &args.client_name,
                    &args.phone,
                    args.email.as_deref(),
                    args.address.as_deref(),
                )
                .await
                .map_err(|e| e.to_string())?,
        };

        let job = self
            .store
            .create_job(
                &client.id,
                &args.service_type,
                &args.description,
                args.preferred_date.as_deref(),
                args.preferred_time.as_deref(),
                args.is_emergency,
            )
            .await
            .map_err(|e| e.to_string())?;

        Ok(json!({
            "success": true,
            "appointment": {
                "jobId": job.id,
                "clientId": client.id,
                "serviceType": job.service_type,
                "preferredDate": job.preferred_date,
                "preferredTime": job.preferred_time,
                "isEmergency": job.is_emergency,
            }
        }))
    }

    async fn record_outcome(&self, session_id: &str, tool_name: &str, payload: &Value) {
        let outcome = ToolOutcome {
            tool_name: tool_name.to_string(),
            result: payload.clone(),
            recorded_at: OffsetDateTime::now_utc(),
        };
        if let Err(e) = self.store.append_tool_outcome(session_id, outcome).await {
            warn!(session_id, error = %e, "failed to record tool outcome");
        }
    }
}

/// JSON schema for the three declared tools, sent in session.update.
pub fn tool_schemas() -> Vec<Value> {
    vec![
        json!({
            "type": "function",
            "name": TOOL_LOOKUP_CLIENT,
            "description": "Look up an existing client by phone number before scheduling. Returns recent jobs when found.",
            "parameters": {
                "type": "object",
                "properties": {
                    "phone": {"type": "string", "description": "Caller phone number"}
                },
                "required": ["phone"]
            }
        }),
        json!({
            "type": "function",
            "name": TOOL_SCHEDULE_APPOINTMENT,
            "description": "Schedule a service appointment. Creates the client record if one does not exist.",
            "parameters": {
                "type": "object",
                "properties": {
                    "client_name": {"type": "string"},
                    "phone": {"type": "string"},
                    "email": {"type": "string"},
                    "address": {"type": "string"},
                    "service_type": {"type": "string", "description": "Kind of service requested, e.g. HVAC Repair"},
                    "preferred_date": {"type": "string", "description": "YYYY-MM-DD"},
                    "preferred_time": {"type": "string", "description": "Preferred time window"},
                    "description": {"type": "string", "description": "What the caller reported"},
                    "is_emergency": {"type": "boolean"}
                },
                "required": ["client_name", "phone", "service_type", "description"]
            }
        }),
        json!({
            "type": "function",
            "name": TOOL_TRANSFER_TO_AGENT,
            "description": "Transfer the caller to a human team member.",
            "parameters": {
                "type": "object",
                "properties": {
                    "reason": {"type": "string"},
                    "urgency": {"type": "string", "enum": ["low", "normal", "high"]}
                },
                "required": ["reason"]
            }
        }),
    ]
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::{CallStore, MemoryStore};

    fn dispatcher() -> (Arc<MemoryStore>, ToolDispatcher) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), ToolDispatcher::new(store))
    }

    #[test]
    fn test_parse_unknown_tool() {
        let err = ToolCall::parse("reboot_server", "{}").unwrap_err();
        assert_eq!(err["error"], "unknown_tool");
    }

    #[test]
    fn test_parse_invalid_arguments() {
        let err = ToolCall::parse(TOOL_LOOKUP_CLIENT, "{not json").unwrap_err();
        assert!(err["error"].as_str().unwrap().starts_with("invalid_arguments"));
    }

    #[test]
    fn test_parse_typed_variants() {
        let call = ToolCall::parse(TOOL_LOOKUP_CLIENT, r#"{"phone": "+14165550123"}"#).unwrap();
        assert!(matches!(call, ToolCall::LookupClient(_)));

        let call = ToolCall::parse(
            TOOL_TRANSFER_TO_AGENT,
            r#"{"reason": "customer requested human", "urgency": "high"}"#,
        )
        .unwrap();
        match call {
            ToolCall::TransferToAgent(args) => {
                assert_eq!(args.reason, "customer requested human");
                assert_eq!(args.urgency.as_deref(), Some("high"));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[tokio::test]
    async fn test_lookup_miss_is_success() {
        let (_, dispatcher) = dispatcher();
        let call = ToolCall::parse(TOOL_LOOKUP_CLIENT, r#"{"phone": "+14165550123"}"#).unwrap();
        let result = dispatcher.dispatch("cc-1", call).await;
        assert_eq!(result.payload["found"], false);
        assert!(!result.transfer_requested);
    }

    #[tokio::test]
    async fn test_schedule_creates_client_and_job() {
        let (store, dispatcher) = dispatcher();
        let call = ToolCall::parse(
            TOOL_SCHEDULE_APPOINTMENT,
            r#"{
                "client_name": "Dana Whitfield",
                "phone": "+14165550123",
                "service_type": "HVAC Repair",
                "description": "Furnace not heating"
            }"#,
        )
        .unwrap();
        let result = dispatcher.dispatch("cc-1", call).await;
        assert_eq!(result.payload["success"], true);
        assert!(result.payload["appointment"]["jobId"].is_string());
        assert_eq!(store.client_count(), 1);
        assert_eq!(store.job_count(), 1);
    }

    #[tokio::test]
    async fn test_schedule_reuses_existing_client() {
        let (store, dispatcher) = dispatcher();
        store
            .create_client("Dana Whitfield", "+14165550123", None, None)
            .await
            .unwrap();

        let call = ToolCall::parse(
            TOOL_SCHEDULE_APPOINTMENT,
            r#"{
                "client_name": "Dana",
                "phone": "4165550123",
                "service_type": "Plumbing",
                "description": "Leaky faucet"
            }"#,
        )
        .unwrap();
        let result = dispatcher.dispatch("cc-1", call).await;
        assert_eq!(result.payload["success"], true);
        assert_eq!(store.client_count(), 1);
        assert_eq!(store.job_count(), 1);
    }

    #[tokio::test]
    async fn test_transfer_signals_session() {
        let (_, dispatcher) = dispatcher();
        let call = ToolCall::parse(
            TOOL_TRANSFER_TO_AGENT,
            r#"{"reason": "billing dispute"}"#,
        )
        .unwrap();
        let result = dispatcher.dispatch("cc-1", call).await;
        assert!(result.transfer_requested);
        assert_eq!(result.payload["reason"], "billing dispute");
    }

    #[tokio::test]
    async fn test_schedule_retry_is_deduped() {
        let (store, dispatcher) = dispatcher();
        let args = r#"{
            "client_name": "Dana Whitfield",
            "phone": "+14165550123",
            "service_type": "HVAC Repair",
            "description": "Furnace not heating"
        }"#;

        let first = dispatcher
            .dispatch("cc-1", ToolCall::parse(TOOL_SCHEDULE_APPOINTMENT, args).unwrap())
            .await;
        let second = dispatcher
            .dispatch("cc-1", ToolCall::parse(TOOL_SCHEDULE_APPOINTMENT, args).unwrap())
            .await;

        assert_eq!(
            first.payload["appointment"]["jobId"],
            second.payload["appointment"]["jobId"]
        );
        assert_eq!(store.job_count(), 1);
        assert_eq!(store.client_count(), 1);
    }

    #[tokio::test]
    async fn test_forget_session_clears_dedupe_entries() {
        let (store, dispatcher) = dispatcher();
        let args = r#"{
            "client_name": "Dana Whitfield",
            "phone": "+14165550123",
            "service_type": "HVAC Repair",
            "description": "Furnace not heating"
        }"#;

        dispatcher
            .dispatch("cc-1", ToolCall::parse(TOOL_SCHEDULE_APPOINTMENT, args).unwrap())
            .await;
        assert_eq!(dispatcher.scheduled.lock().len(), 1);

        dispatcher.forget_session("cc-1");
        assert!(dispatcher.scheduled.lock().is_empty());

        // With the entry evicted a later dispatch creates a fresh job.
        dispatcher
            .dispatch("cc-1", ToolCall::parse(TOOL_SCHEDULE_APPOINTMENT, args).unwrap())
            .await;
        assert_eq!(store.job_count(), 2);
    }

    #[tokio::test]
    async fn test_forget_session_leaves_other_sessions_alone() {
        let (store, dispatcher) = dispatcher();
        let args = r#"{
            "client_name": "Dana Whitfield",
            "phone": "+14165550123",
            "service_type": "HVAC Repair",
            "description": "Furnace not heating"
        }"#;

        dispatcher
            .dispatch("cc-1", ToolCall::parse(TOOL_SCHEDULE_APPOINTMENT, args).unwrap())
            .await;
        dispatcher
            .dispatch("cc-2", ToolCall::parse(TOOL_SCHEDULE_APPOINTMENT, args).unwrap())
            .await;
        assert_eq!(dispatcher.scheduled.lock().len(), 2);

        dispatcher.forget_session("cc-1");
        assert_eq!(dispatcher.scheduled.lock().len(), 1);

        // cc-2's entry still dedupes its own retry.
        dispatcher
            .dispatch("cc-2", ToolCall::parse(TOOL_SCHEDULE_APPOINTMENT, args).unwrap())
            .await;
        assert_eq!(store.job_count(), 2);
    }

    #[test]
    fn test_tool_schemas_cover_declared_tools() {
        let schemas = tool_schemas();
        let names: Vec<&str> = schemas.iter().map(|s| s["name"].as_str().unwrap()).collect();
        assert_eq!(
            names,
            vec![
                TOOL_LOOKUP_CLIENT,
                TOOL_SCHEDULE_APPOINTMENT,
                TOOL_TRANSFER_TO_AGENT
            ]
        );
        assert!(schemas.iter().all(|s| s["type"] == "function"));
    }
}
