//! Persisted entities: call sessions, digit/call event logs, and the
//! outbound webhook delivery queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a call session, driven by provider events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Initiated,
    Ringing,
    Answered,
    Completed,
    Failed,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Initiated => "initiated",
            CallStatus::Ringing => "ringing",
            CallStatus::Answered => "answered",
            CallStatus::Completed => "completed",
            CallStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "ringing" => CallStatus::Ringing,
            "answered" => CallStatus::Answered,
            "completed" => CallStatus::Completed,
            "failed" => CallStatus::Failed,
            _ => CallStatus::Initiated,
        }
    }

    /// Terminal statuses stamp `ended_at` and stop further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallStatus::Completed | CallStatus::Failed)
    }
}

/// One outbound call attempt. The row persists indefinitely as history;
/// only the `flow_state` blob (managed through the store's flow-state
/// methods) is ever cleared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSession {
    /// Provider-assigned call identifier; immutable once assigned.
    pub call_id: String,
    pub phone_number: String,
    pub locale: String,
    /// Synthesis voice model selected for the call.
    pub voice_profile: String,
    pub recording_enabled: bool,
    pub caller_id: String,
    pub status: CallStatus,
    pub recording_url: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<i64>,
}

/// Append-only audit record of digits received on a call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigitEvent {
    pub id: i64,
    pub call_id: String,
    pub digits: String,
    pub at: DateTime<Utc>,
}

/// Append-only log of raw provider events for a call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallEvent {
    pub id: i64,
    pub call_id: String,
    pub kind: String,
    pub payload: serde_json::Value,
    pub at: DateTime<Utc>,
}

/// Status of an outbound delivery task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookStatus {
    Pending,
    Delivered,
    Exhausted,
}

impl WebhookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookStatus::Pending => "pending",
            WebhookStatus::Delivered => "delivered",
            WebhookStatus::Exhausted => "exhausted",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "delivered" => WebhookStatus::Delivered,
            "exhausted" => WebhookStatus::Exhausted,
            _ => WebhookStatus::Pending,
        }
    }
}

/// One notification owed to an external endpoint. Created on enqueue,
/// thereafter mutated only by the delivery worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookTask {
    pub id: i64,
    pub kind: String,
    pub url: String,
    pub payload: serde_json::Value,
    pub attempts: u32,
    pub max_attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub status: WebhookStatus,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_status_round_trip() {
        for status in [
            CallStatus::Initiated,
            CallStatus::Ringing,
            CallStatus::Answered,
            CallStatus::Completed,
            CallStatus::Failed,
        ] {
            assert_eq!(CallStatus::parse(status.as_str()), status);
        }
        assert_eq!(CallStatus::parse("garbage"), CallStatus::Initiated);
    }

    #[test]
    fn terminal_statuses() {
        assert!(CallStatus::Completed.is_terminal());
        assert!(CallStatus::Failed.is_terminal());
        assert!(!CallStatus::Answered.is_terminal());
    }
}
