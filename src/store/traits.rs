//! `CallStore` trait — single async interface for all persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::flow::model::FlowState;
use crate::store::model::{CallEvent, CallSession, CallStatus, DigitEvent, WebhookTask};

/// Backend-agnostic store covering call sessions, flow state, event logs,
/// and the webhook delivery queue.
#[async_trait]
pub trait CallStore: Send + Sync {
    // ── Sessions ────────────────────────────────────────────────────

    /// Insert a new session together with its initial flow state.
    async fn create_session(
        &self,
        session: &CallSession,
        state: &FlowState,
    ) -> Result<(), DatabaseError>;

    /// Fetch a session's metadata (without the flow-state blob).
    async fn get_session(&self, call_id: &str) -> Result<Option<CallSession>, DatabaseError>;

    /// Most recent sessions, newest first.
    async fn list_sessions(&self, limit: usize) -> Result<Vec<CallSession>, DatabaseError>;

    /// Update the lifecycle status.
    async fn update_status(&self, call_id: &str, status: CallStatus) -> Result<(), DatabaseError>;

    /// Record a terminal status with end timestamp and duration.
    async fn finish_session(
        &self,
        call_id: &str,
        status: CallStatus,
        ended_at: DateTime<Utc>,
        duration_secs: Option<i64>,
    ) -> Result<(), DatabaseError>;

    /// Store the recording URL reported by the provider.
    async fn set_recording_url(&self, call_id: &str, url: &str) -> Result<(), DatabaseError>;

    // ── Flow state ──────────────────────────────────────────────────
    //
    // Writes go through single-row UPDATEs keyed by call_id, so concurrent
    // callbacks for one call cannot interleave a read-modify-write at the
    // row level. `None` is an expected state (unknown call, or flow already
    // terminated), not an error.

    /// Load the flow state for a call, if the flow is still live.
    async fn load_flow_state(&self, call_id: &str) -> Result<Option<FlowState>, DatabaseError>;

    /// Persist the flow state for a call.
    async fn save_flow_state(
        &self,
        call_id: &str,
        state: &FlowState,
    ) -> Result<(), DatabaseError>;

    /// Clear the flow state (terminal step reached).
    async fn clear_flow_state(&self, call_id: &str) -> Result<(), DatabaseError>;

    // ── Event logs (append-only) ────────────────────────────────────

    /// Append a digit event to the audit trail.
    async fn append_digit_event(
        &self,
        call_id: &str,
        digits: &str,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    /// Digit events for a call, in timestamp order (ties by insertion).
    async fn digit_events(&self, call_id: &str) -> Result<Vec<DigitEvent>, DatabaseError>;

    /// Append a raw provider event.
    async fn append_call_event(
        &self,
        call_id: &str,
        kind: &str,
        payload: &serde_json::Value,
    ) -> Result<(), DatabaseError>;

    /// Provider events for a call, oldest first.
    async fn call_events(&self, call_id: &str) -> Result<Vec<CallEvent>, DatabaseError>;

    // ── Webhook queue ───────────────────────────────────────────────

    /// Durably enqueue an outbound delivery task. Returns the task id.
    async fn enqueue_webhook(
        &self,
        kind: &str,
        url: &str,
        payload: &serde_json::Value,
        max_attempts: u32,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<i64, DatabaseError>;

    /// Pending tasks whose retry time has passed, oldest first.
    async fn due_webhooks(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WebhookTask>, DatabaseError>;

    /// Mark a task delivered.
    async fn mark_webhook_delivered(&self, id: i64) -> Result<(), DatabaseError>;

    /// Record a failed attempt and schedule the next one.
    async fn reschedule_webhook(
        &self,
        id: i64,
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    /// Mark a task permanently failed; it is never attempted again.
    async fn mark_webhook_exhausted(&self, id: i64) -> Result<(), DatabaseError>;

    /// Fetch a single task (operational visibility, tests).
    async fn get_webhook(&self, id: i64) -> Result<Option<WebhookTask>, DatabaseError>;
}
