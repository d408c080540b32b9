//! libSQL backend — async `CallStore` implementation.
//!
//! Supports local file and in-memory databases. All flow-state mutation is
//! a single-row UPDATE keyed by `call_id`, which is what serializes
//! concurrent callbacks for the same call.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::info;

use crate::error::DatabaseError;
use crate::flow::model::FlowState;
use crate::store::migrations;
use crate::store::model::{
    CallEvent, CallSession, CallStatus, DigitEvent, WebhookStatus, WebhookTask,
};
use crate::store::traits::CallStore;

const SESSION_COLUMNS: &str = "call_id, phone_number, locale, voice_profile, recording_enabled, \
     caller_id, status, recording_url, started_at, ended_at, duration_secs";

const WEBHOOK_COLUMNS: &str =
    "id, kind, url, payload, attempts, max_attempts, next_attempt_at, status, created_at";

/// libSQL call store.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(&store.conn).await?;
        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(&store.conn).await?;
        Ok(store)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<i64>` to libsql Value.
fn opt_int(v: Option<i64>) -> libsql::Value {
    match v {
        Some(v) => libsql::Value::Integer(v),
        None => libsql::Value::Null,
    }
}

fn query_err(e: libsql::Error) -> DatabaseError {
    DatabaseError::Query(e.to_string())
}

fn row_to_session(row: &libsql::Row) -> Result<CallSession, libsql::Error> {
    let call_id: String = row.get(0)?;
    let phone_number: String = row.get(1)?;
    let locale: String = row.get(2)?;
    let voice_profile: String = row.get(3)?;
    let recording_enabled: i64 = row.get(4)?;
    let caller_id: String = row.get(5)?;
    let status: String = row.get(6)?;
    let recording_url: Option<String> = row.get::<String>(7).ok();
    let started_at: String = row.get(8)?;
    let ended_at: Option<String> = row.get::<String>(9).ok();
    let duration_secs: Option<i64> = row.get::<i64>(10).ok();

    Ok(CallSession {
        call_id,
        phone_number,
        locale,
        voice_profile,
        recording_enabled: recording_enabled != 0,
        caller_id,
        status: CallStatus::parse(&status),
        recording_url,
        started_at: parse_datetime(&started_at),
        ended_at: ended_at.as_deref().map(parse_datetime),
        duration_secs,
    })
}

fn row_to_webhook(row: &libsql::Row) -> Result<WebhookTask, libsql::Error> {
    let id: i64 = row.get(0)?;
    let kind: String = row.get(1)?;
    let url: String = row.get(2)?;
    let payload_raw: String = row.get(3)?;
    let attempts: i64 = row.get(4)?;
    let max_attempts: i64 = row.get(5)?;
    let next_attempt_at: String = row.get(6)?;
    let status: String = row.get(7)?;
    let created_at: String = row.get(8)?;

    Ok(WebhookTask {
        id,
        kind,
        url,
        payload: serde_json::from_str(&payload_raw).unwrap_or(serde_json::Value::Null),
        attempts: attempts as u32,
        max_attempts: max_attempts as u32,
        next_attempt_at: parse_datetime(&next_attempt_at),
        status: WebhookStatus::parse(&status),
        created_at: parse_datetime(&created_at),
    })
}

#[async_trait]
impl CallStore for LibSqlStore {
    // ── Sessions ────────────────────────────────────────────────────

    async fn create_session(
        &self,
        session: &CallSession,
        state: &FlowState,
    ) -> Result<(), DatabaseError> {
        let blob = state.encode()?;
        self.conn()
            .execute(
                "INSERT INTO calls (call_id, phone_number, locale, voice_profile, \
                 recording_enabled, caller_id, status, flow_state, started_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    session.call_id.clone(),
                    session.phone_number.clone(),
                    session.locale.clone(),
                    session.voice_profile.clone(),
                    session.recording_enabled as i64,
                    session.caller_id.clone(),
                    session.status.as_str(),
                    blob,
                    session.started_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn get_session(&self, call_id: &str) -> Result<Option<CallSession>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {SESSION_COLUMNS} FROM calls WHERE call_id = ?1"),
                params![call_id],
            )
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_session(&row).map_err(query_err)?)),
            None => Ok(None),
        }
    }

    async fn list_sessions(&self, limit: usize) -> Result<Vec<CallSession>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM calls ORDER BY started_at DESC, id DESC \
                     LIMIT ?1"
                ),
                params![limit as i64],
            )
            .await
            .map_err(query_err)?;

        let mut sessions = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            sessions.push(row_to_session(&row).map_err(query_err)?);
        }
        Ok(sessions)
    }

    async fn update_status(&self, call_id: &str, status: CallStatus) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE calls SET status = ?1 WHERE call_id = ?2",
                params![status.as_str(), call_id],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn finish_session(
        &self,
        call_id: &str,
        status: CallStatus,
        ended_at: DateTime<Utc>,
        duration_secs: Option<i64>,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE calls SET status = ?1, ended_at = ?2, duration_secs = ?3 \
                 WHERE call_id = ?4",
                params![
                    status.as_str(),
                    ended_at.to_rfc3339(),
                    opt_int(duration_secs),
                    call_id
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn set_recording_url(&self, call_id: &str, url: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE calls SET recording_url = ?1 WHERE call_id = ?2",
                params![url, call_id],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    // ── Flow state ──────────────────────────────────────────────────

    async fn load_flow_state(&self, call_id: &str) -> Result<Option<FlowState>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT flow_state FROM calls WHERE call_id = ?1",
                params![call_id],
            )
            .await
            .map_err(query_err)?;

        let row = match rows.next().await.map_err(query_err)? {
            Some(row) => row,
            None => return Ok(None),
        };

        match row.get::<String>(0).ok() {
            Some(blob) => Ok(Some(FlowState::decode(&blob)?)),
            None => Ok(None),
        }
    }

    async fn save_flow_state(
        &self,
        call_id: &str,
        state: &FlowState,
    ) -> Result<(), DatabaseError> {
        let blob = state.encode()?;
        let changed = self
            .conn()
            .execute(
                "UPDATE calls SET flow_state = ?1 WHERE call_id = ?2",
                params![blob, call_id],
            )
            .await
            .map_err(query_err)?;
        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "call".into(),
                id: call_id.into(),
            });
        }
        Ok(())
    }

    async fn clear_flow_state(&self, call_id: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE calls SET flow_state = NULL WHERE call_id = ?1",
                params![call_id],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    // ── Event logs ──────────────────────────────────────────────────

    async fn append_digit_event(
        &self,
        call_id: &str,
        digits: &str,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO digit_events (call_id, digits, at) VALUES (?1, ?2, ?3)",
                params![call_id, digits, at.to_rfc3339()],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn digit_events(&self, call_id: &str) -> Result<Vec<DigitEvent>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, call_id, digits, at FROM digit_events \
                 WHERE call_id = ?1 ORDER BY at, id",
                params![call_id],
            )
            .await
            .map_err(query_err)?;

        let mut events = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            let id: i64 = row.get(0).map_err(query_err)?;
            let call_id: String = row.get(1).map_err(query_err)?;
            let digits: String = row.get(2).map_err(query_err)?;
            let at: String = row.get(3).map_err(query_err)?;
            events.push(DigitEvent {
                id,
                call_id,
                digits,
                at: parse_datetime(&at),
            });
        }
        Ok(events)
    }

    async fn append_call_event(
        &self,
        call_id: &str,
        kind: &str,
        payload: &serde_json::Value,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO call_events (call_id, kind, payload, at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    call_id,
                    kind,
                    payload.to_string(),
                    Utc::now().to_rfc3339()
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn call_events(&self, call_id: &str) -> Result<Vec<CallEvent>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, call_id, kind, payload, at FROM call_events \
                 WHERE call_id = ?1 ORDER BY at, id",
                params![call_id],
            )
            .await
            .map_err(query_err)?;

        let mut events = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            let id: i64 = row.get(0).map_err(query_err)?;
            let call_id: String = row.get(1).map_err(query_err)?;
            let kind: String = row.get(2).map_err(query_err)?;
            let payload_raw: String = row.get(3).map_err(query_err)?;
            let at: String = row.get(4).map_err(query_err)?;
            events.push(CallEvent {
                id,
                call_id,
                kind,
                payload: serde_json::from_str(&payload_raw).unwrap_or(serde_json::Value::Null),
                at: parse_datetime(&at),
            });
        }
        Ok(events)
    }

    // ── Webhook queue ───────────────────────────────────────────────

    async fn enqueue_webhook(
        &self,
        kind: &str,
        url: &str,
        payload: &serde_json::Value,
        max_attempts: u32,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<i64, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "INSERT INTO webhook_queue \
                 (kind, url, payload, max_attempts, next_attempt_at, status, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6) RETURNING id",
                params![
                    kind,
                    url,
                    payload.to_string(),
                    max_attempts as i64,
                    next_attempt_at.to_rfc3339(),
                    Utc::now().to_rfc3339()
                ],
            )
            .await
            .map_err(query_err)?;

        let row = rows
            .next()
            .await
            .map_err(query_err)?
            .ok_or_else(|| DatabaseError::Query("insert returned no id".into()))?;
        row.get(0).map_err(query_err)
    }

    async fn due_webhooks(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WebhookTask>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {WEBHOOK_COLUMNS} FROM webhook_queue \
                     WHERE status = 'pending' AND next_attempt_at <= ?1 \
                     ORDER BY next_attempt_at, id LIMIT ?2"
                ),
                params![now.to_rfc3339(), limit as i64],
            )
            .await
            .map_err(query_err)?;

        let mut tasks = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            tasks.push(row_to_webhook(&row).map_err(query_err)?);
        }
        Ok(tasks)
    }

    async fn mark_webhook_delivered(&self, id: i64) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE webhook_queue SET status = 'delivered' WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn reschedule_webhook(
        &self,
        id: i64,
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE webhook_queue SET attempts = ?1, next_attempt_at = ?2 WHERE id = ?3",
                params![attempts as i64, next_attempt_at.to_rfc3339(), id],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn mark_webhook_exhausted(&self, id: i64) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE webhook_queue SET status = 'exhausted' WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn get_webhook(&self, id: i64) -> Result<Option<WebhookTask>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {WEBHOOK_COLUMNS} FROM webhook_queue WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_webhook(&row).map_err(query_err)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::model::{FlowScript, FlowStep, VoiceSource};

    fn make_session(call_id: &str) -> CallSession {
        CallSession {
            call_id: call_id.into(),
            phone_number: "+15551234567".into(),
            locale: "en-US".into(),
            voice_profile: "aura-asteria-en".into(),
            recording_enabled: false,
            caller_id: "+15557654321".into(),
            status: CallStatus::Ringing,
            recording_url: None,
            started_at: Utc::now(),
            ended_at: None,
            duration_secs: None,
        }
    }

    fn make_state() -> FlowState {
        FlowState::new(
            FlowScript {
                steps: vec![FlowStep::new("Enter code", 6)],
                final_message: "Goodbye.".into(),
            },
            VoiceSource::BuiltIn,
            "en-US",
            false,
        )
    }

    #[tokio::test]
    async fn session_create_and_get() {
        let store = LibSqlStore::new_memory().await.unwrap();
        store
            .create_session(&make_session("call-1"), &make_state())
            .await
            .unwrap();

        let session = store.get_session("call-1").await.unwrap().unwrap();
        assert_eq!(session.phone_number, "+15551234567");
        assert_eq!(session.status, CallStatus::Ringing);
        assert!(store.get_session("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn flow_state_save_load_clear() {
        let store = LibSqlStore::new_memory().await.unwrap();
        store
            .create_session(&make_session("call-1"), &make_state())
            .await
            .unwrap();

        let mut state = store.load_flow_state("call-1").await.unwrap().unwrap();
        assert_eq!(state.current_step, 0);

        state.digit_buffer.push_str("123");
        store.save_flow_state("call-1", &state).await.unwrap();

        let reloaded = store.load_flow_state("call-1").await.unwrap().unwrap();
        assert_eq!(reloaded.digit_buffer, "123");

        store.clear_flow_state("call-1").await.unwrap();
        assert!(store.load_flow_state("call-1").await.unwrap().is_none());

        // The session row itself persists as history.
        assert!(store.get_session("call-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn flow_state_absent_for_unknown_call() {
        let store = LibSqlStore::new_memory().await.unwrap();
        assert!(store.load_flow_state("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_flow_state_unknown_call_is_not_found() {
        let store = LibSqlStore::new_memory().await.unwrap();
        let err = store.save_flow_state("nope", &make_state()).await;
        assert!(matches!(err, Err(DatabaseError::NotFound { .. })));
    }

    #[tokio::test]
    async fn digit_events_keep_insertion_order() {
        let store = LibSqlStore::new_memory().await.unwrap();
        let at = Utc::now();
        store.append_digit_event("call-1", "1", at).await.unwrap();
        store.append_digit_event("call-1", "2", at).await.unwrap();
        store.append_digit_event("call-1", "3", at).await.unwrap();

        let events = store.digit_events("call-1").await.unwrap();
        let digits: Vec<&str> = events.iter().map(|e| e.digits.as_str()).collect();
        assert_eq!(digits, ["1", "2", "3"]);
    }

    #[tokio::test]
    async fn finish_session_stamps_end() {
        let store = LibSqlStore::new_memory().await.unwrap();
        store
            .create_session(&make_session("call-1"), &make_state())
            .await
            .unwrap();

        let ended = Utc::now();
        store
            .finish_session("call-1", CallStatus::Completed, ended, Some(42))
            .await
            .unwrap();

        let session = store.get_session("call-1").await.unwrap().unwrap();
        assert_eq!(session.status, CallStatus::Completed);
        assert_eq!(session.duration_secs, Some(42));
        assert!(session.ended_at.is_some());
    }

    #[tokio::test]
    async fn webhook_enqueue_and_due_filter() {
        let store = LibSqlStore::new_memory().await.unwrap();
        let now = Utc::now();

        let due_id = store
            .enqueue_webhook("call.completed", "http://x/hook", &serde_json::json!({}), 3, now)
            .await
            .unwrap();
        let future_id = store
            .enqueue_webhook(
                "call.completed",
                "http://x/hook",
                &serde_json::json!({}),
                3,
                now + chrono::Duration::minutes(5),
            )
            .await
            .unwrap();

        let due = store.due_webhooks(now, 10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, due_id);
        assert_ne!(due[0].id, future_id);
    }

    #[tokio::test]
    async fn webhook_status_transitions() {
        let store = LibSqlStore::new_memory().await.unwrap();
        let now = Utc::now();
        let id = store
            .enqueue_webhook("recording.ready", "http://x/hook", &serde_json::json!({}), 3, now)
            .await
            .unwrap();

        store.reschedule_webhook(id, 1, now).await.unwrap();
        let task = store.get_webhook(id).await.unwrap().unwrap();
        assert_eq!(task.attempts, 1);
        assert_eq!(task.status, WebhookStatus::Pending);

        store.mark_webhook_exhausted(id).await.unwrap();
        let task = store.get_webhook(id).await.unwrap().unwrap();
        assert_eq!(task.status, WebhookStatus::Exhausted);

        // Exhausted tasks are never due again.
        assert!(store.due_webhooks(now, 10).await.unwrap().is_empty());
    }
}
