//! Record-store interface and the business agent configuration provider.
//!
//! The real record store (clients, jobs, call logs) is an external
//! collaborator; the bridge depends only on the [`CallStore`] trait. The
//! in-process [`MemoryStore`] backs tests and standalone runs.
//!
//! Call log entries are append-only and keyed by session id: created on the
//! first inbound event, updated on each state transition, never deleted by
//! this subsystem. Writes must be safe for concurrent sessions.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::errors::{BridgeError, BridgeResult};

// =============================================================================
// Agent configuration
// =============================================================================

/// Immutable snapshot of the business AI-agent configuration, taken once at
/// session start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Name the agent introduces itself with
    pub agent_name: String,
    /// Company name used in the greeting and instructions
    pub company_name: String,
    /// Trade the business operates in (e.g. "HVAC", "plumbing")
    pub business_niche: String,
    /// Voice id for the realtime API
    pub voice: String,
    /// Price quoted for a diagnostic visit, in dollars
    pub diagnostic_price: f64,
    /// Surcharge added for emergency callouts, in dollars
    pub emergency_surcharge: f64,
    /// Free-form extra instructions appended to the system prompt
    pub custom_instructions: Option<String>,
    /// Whether this configuration is the active one
    pub active: bool,
    /// Last-updated timestamp, used to break ties between active rows
    pub updated_at: OffsetDateTime,
}

impl Default for AgentConfig {
    /// Safe generic identity used when no configuration is active. A missing
    /// config must degrade the greeting, never fail the call.
    fn default() -> Self {
        Self {
            agent_name: "Alex".to_string(),
            company_name: "our service team".to_string(),
            business_niche: "home services".to_string(),
            voice: "alloy".to_string(),
            diagnostic_price: 89.0,
            emergency_surcharge: 50.0,
            custom_instructions: None,
            active: false,
            updated_at: OffsetDateTime::UNIX_EPOCH,
        }
    }
}

/// Read-only lookup of the active agent configuration.
#[async_trait]
pub trait AgentConfigProvider: Send + Sync {
    /// Return the active configuration, or `None` when nothing is configured.
    /// With more than one active row, the most recently updated wins so the
    /// selection is deterministic.
    async fn load_active_agent_config(&self) -> BridgeResult<Option<AgentConfig>>;
}

// =============================================================================
// Records
// =============================================================================

/// Lifecycle status of a call log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Initiated,
    Answered,
    Streaming,
    Completed,
    Transferred,
    Failed,
}

impl CallStatus {
    /// Terminal statuses finalize the entry.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallStatus::Completed | CallStatus::Transferred | CallStatus::Failed
        )
    }
}

/// Append-only call record keyed by session id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallLogEntry {
    /// Session correlation id (call-control id or contact id)
    pub session_id: String,
    /// Caller phone number
    pub from_number: String,
    /// Called phone number, when known
    pub to_number: Option<String>,
    pub status: CallStatus,
    pub started_at: OffsetDateTime,
    pub answered_at: Option<OffsetDateTime>,
    pub ended_at: Option<OffsetDateTime>,
    /// Job id when an appointment was scheduled during the call
    pub appointment_job_id: Option<String>,
    /// Reason recorded by a transfer_to_agent tool call
    pub transfer_reason: Option<String>,
    /// Conversation transcript lines captured during the call
    pub transcript: Vec<String>,
}

impl CallLogEntry {
    pub fn new(session_id: &str, from_number: &str, to_number: Option<&str>) -> Self {
        Self {
            session_id: session_id.to_string(),
            from_number: from_number.to_string(),
            to_number: to_number.map(str::to_string),
            status: CallStatus::Initiated,
            started_at: OffsetDateTime::now_utc(),
            answered_at: None,
            ended_at: None,
            appointment_job_id: None,
            transfer_reason: None,
            transcript: Vec::new(),
        }
    }

    /// Billing-relevant call duration, available once the entry is final.
    pub fn duration_seconds(&self) -> Option<i64> {
        self.ended_at
            .map(|end| (end - self.started_at).whole_seconds())
    }
}

/// A client record in the business database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRecord {
    pub id: String,
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub address: Option<String>,
}

/// A job/appointment record linked to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub client_id: String,
    pub service_type: String,
    pub description: String,
    pub preferred_date: Option<String>,
    pub preferred_time: Option<String>,
    pub is_emergency: bool,
    pub created_at: OffsetDateTime,
}

/// Outcome of a tool call recorded against the call log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub tool_name: String,
    pub result: serde_json::Value,
    pub recorded_at: OffsetDateTime,
}

// =============================================================================
// Store trait
// =============================================================================

/// The persistence surface the bridge depends on from the excluded data
/// layer. Implementations must be safe for concurrent writes keyed by
/// session id.
#[async_trait]
pub trait CallStore: Send + Sync {
    /// Upsert the call log entry for a session. Creating twice for the same
    /// session id must not produce a second entry.
    async fn create_or_update_call_log(&self, entry: CallLogEntry) -> BridgeResult<()>;

    /// Fetch the current call log entry for a session, if any.
    async fn get_call_log(&self, session_id: &str) -> BridgeResult<Option<CallLogEntry>>;

    /// Record a tool outcome against the session's call log.
    async fn append_tool_outcome(&self, session_id: &str, outcome: ToolOutcome)
    -> BridgeResult<()>;

    /// Exact or suffix match against the client store; `None` is success.
    async fn find_client_by_phone(&self, phone: &str) -> BridgeResult<Option<ClientRecord>>;

    /// Recent jobs for a client, newest first.
    async fn recent_jobs_for_client(&self, client_id: &str) -> BridgeResult<Vec<JobRecord>>;

    /// Create a client record, returning it with its assigned id.
    async fn create_client(
        &self,
        name: &str,
        phone: &str,
        email: Option<&str>,
        address: Option<&str>,
    ) -> BridgeResult<ClientRecord>;

    /// Create a job record linked to a client.
    #[allow(clippy::too_many_arguments)]
    async fn create_job(
        &self,
        client_id: &str,
        service_type: &str,
        description: &str,
        preferred_date: Option<&str>,
        preferred_time: Option<&str>,
        is_emergency: bool,
    ) -> BridgeResult<JobRecord>;
}

/// Shared handle to a call store.
pub type SharedStore = Arc<dyn CallStore>;

// =============================================================================
// In-memory implementation
// =============================================================================

#[derive(Default)]
struct MemoryInner {
    call_logs: HashMap<String, CallLogEntry>,
    tool_outcomes: HashMap<String, Vec<ToolOutcome>>,
    clients: Vec<ClientRecord>,
    jobs: Vec<JobRecord>,
    agent_configs: Vec<AgentConfig>,
}

/// In-process store used by tests and standalone runs.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an agent configuration row.
    pub fn insert_agent_config(&self, config: AgentConfig) {
        self.inner.lock().agent_configs.push(config);
    }

    /// Number of client rows (test observability).
    pub fn client_count(&self) -> usize {
        self.inner.lock().clients.len()
    }

    /// Number of job rows (test observability).
    pub fn job_count(&self) -> usize {
        self.inner.lock().jobs.len()
    }

    /// Number of call log entries (test observability).
    pub fn call_log_count(&self) -> usize {
        self.inner.lock().call_logs.len()
    }
}

#[async_trait]
impl CallStore for MemoryStore {
    async fn create_or_update_call_log(&self, entry: CallLogEntry) -> BridgeResult<()> {
        self.inner
            .lock()
            .call_logs
            .insert(entry.session_id.clone(), entry);
        Ok(())
    }

    async fn get_call_log(&self, session_id: &str) -> BridgeResult<Option<CallLogEntry>> {
        Ok(self.inner.lock().call_logs.get(session_id).cloned())
    }

    async fn append_tool_outcome(
        &self,
        session_id: &str,
        outcome: ToolOutcome,
    ) -> BridgeResult<()> {
        self.inner
            .lock()
            .tool_outcomes
            .entry(session_id.to_string())
            .or_default()
            .push(outcome);
        Ok(())
    }

    async fn find_client_by_phone(&self, phone: &str) -> BridgeResult<Option<ClientRecord>> {
        let digits = normalize_phone(phone);
        let inner = self.inner.lock();
        // Exact match first, then a last-10-digit match to tolerate country
        // code differences between caller id and stored records.
        let exact = inner
            .clients
            .iter()
            .find(|c| normalize_phone(&c.phone) == digits);
        if let Some(c) = exact {
            return Ok(Some(c.clone()));
        }
        let suffix = if digits.len() > 10 {
            &digits[digits.len() - 10..]
        } else {
            digits.as_str()
        };
        if suffix.len() < 7 {
            return Ok(None);
        }
        Ok(inner
            .clients
            .iter()
            .find(|c| normalize_phone(&c.phone).ends_with(suffix))
            .cloned())
    }

    async fn recent_jobs_for_client(&self, client_id: &str) -> BridgeResult<Vec<JobRecord>> {
        let inner = self.inner.lock();
        let mut jobs: Vec<JobRecord> = inner
            .jobs
            .iter()
            .filter(|j| j.client_id == client_id)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(5);
        Ok(jobs)
    }

    async fn create_client(
        &self,
        name: &str,
        phone: &str,
        email: Option<&str>,
        address: Option<&str>,
    ) -> BridgeResult<ClientRecord> {
        let client = ClientRecord {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            phone: phone.to_string(),
            email: email.map(str::to_string),
            address: address.map(str::to_string),
        };
        self.inner.lock().clients.push(client.clone());
        Ok(client)
    }

    async fn create_job(
        &self,
        client_id: &str,
        service_type: &str,
        description: &str,
        preferred_date: Option<&str>,
        preferred_time: Option<&str>,
        is_emergency: bool,
    ) -> BridgeResult<JobRecord> {
        let exists = self
            .inner
            .lock()
            .clients
            .iter()
            .any(|c| c.id == client_id);
        if !exists {
            return Err(BridgeError::Store(format!("unknown client {client_id}")));
        }
        let job = JobRecord {
            id: Uuid::new_v4().to_string(),
            client_id: client_id.to_string(),
            service_type: service_type.to_string(),
            description: description.to_string(),
            preferred_date: preferred_date.map(str::to_string),
            preferred_time: preferred_time.map(str::to_string),
            is_emergency,
            created_at: OffsetDateTime::now_utc(),
        };
        self.inner.lock().jobs.push(job.clone());
        Ok(job)
    }
}

#[async_trait]
impl AgentConfigProvider for MemoryStore {
    async fn load_active_agent_config(&self) -> BridgeResult<Option<AgentConfig>> {
        let inner = self.inner.lock();
        Ok(inner
            .agent_configs
            .iter()
            .filter(|c| c.active)
            .max_by_key(|c| c.updated_at)
            .cloned())
    }
}

/// Strip a phone number down to its digits (keeps a leading country code).
pub fn normalize_phone(phone: &str) -> String {
    phone.chars().filter(|c| c.is_ascii_digit()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_phone() {
        assert_eq!(normalize_phone("+1 (416) 555-0123"), "14165550123");
        assert_eq!(normalize_phone("416.555.0123"), "4165550123");
        assert_eq!(normalize_phone(""), "");
    }

    #[test]
    fn test_call_status_terminal() {
        assert!(CallStatus::Completed.is_terminal());
        assert!(CallStatus::Transferred.is_terminal());
        assert!(CallStatus::Failed.is_terminal());
        assert!(!CallStatus::Streaming.is_terminal());
        assert!(!CallStatus::Initiated.is_terminal());
    }

    #[tokio::test]
    async fn test_call_log_upsert_is_idempotent() {
        let store = MemoryStore::new();
        let entry = CallLogEntry::new("cc-1", "+14165550123", Some("+14165559999"));
        store.create_or_update_call_log(entry.clone()).await.unwrap();
        store.create_or_update_call_log(entry).await.unwrap();
        assert_eq!(store.call_log_count(), 1);
    }

    #[tokio::test]
    async fn test_find_client_suffix_match() {
        let store = MemoryStore::new();
        store
            .create_client("Dana", "(416) 555-0123", None, None)
            .await
            .unwrap();

        let found = store.find_client_by_phone("+14165550123").await.unwrap();
        assert!(found.is_some());
        assert_eq!(found.unwrap().name, "Dana");

        let missing = store.find_client_by_phone("+14165550999").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_create_job_requires_client() {
        let store = MemoryStore::new();
        let err = store
            .create_job("nope", "HVAC Repair", "no heat", None, None, false)
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_active_config_selection_is_deterministic() {
        let store = MemoryStore::new();
        assert!(store.load_active_agent_config().await.unwrap().is_none());

        let older = AgentConfig {
            agent_name: "Old".into(),
            active: true,
            updated_at: OffsetDateTime::UNIX_EPOCH,
            ..Default::default()
        };
        let newer = AgentConfig {
            agent_name: "New".into(),
            active: true,
            updated_at: OffsetDateTime::now_utc(),
            ..Default::default()
        };
        let inactive = AgentConfig {
            agent_name: "Inactive".into(),
            active: false,
            updated_at: OffsetDateTime::now_utc(),
            ..Default::default()
        };
        store.insert_agent_config(older);
        store.insert_agent_config(inactive);
        store.insert_agent_config(newer);

        let picked = store.load_active_agent_config().await.unwrap().unwrap();
        assert_eq!(picked.agent_name, "New");
    }

    #[test]
    fn test_duration_requires_end() {
        let mut entry = CallLogEntry::new("cc-1", "+14165550123", None);
        assert!(entry.duration_seconds().is_none());
        entry.ended_at = Some(entry.started_at + time::Duration::seconds(42));
        assert_eq!(entry.duration_seconds(), Some(42));
    }
}
