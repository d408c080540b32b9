//! Provider callback handlers.
//!
//! The answer and DTMF callbacks must always answer 200 with a valid
//! instruction array — an HTTP error here would make the provider retry or
//! drop the live call. The sequencer guarantees that; these handlers just
//! unwrap the transport.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::AppState;
use crate::store::CallStatus;

/// Answer callback body. The provider identifies the call in the payload.
#[derive(Debug, Deserialize)]
pub struct AnswerCallback {
    #[serde(alias = "call_uuid")]
    pub uuid: String,
}

pub async fn answer(
    State(state): State<AppState>,
    Json(body): Json<AnswerCallback>,
) -> impl IntoResponse {
    info!(call_id = %body.uuid, "Answer callback");
    Json(state.sequencer.on_answer(&body.uuid).await)
}

/// DTMF callback body. `dtmf` may be empty when the input timed out.
#[derive(Debug, Deserialize)]
pub struct DtmfCallback {
    #[serde(default)]
    pub dtmf: String,
}

pub async fn dtmf(
    State(state): State<AppState>,
    Path(call_id): Path<String>,
    Json(body): Json<DtmfCallback>,
) -> impl IntoResponse {
    info!(call_id = %call_id, digits = %body.dtmf, "DTMF callback");
    Json(state.sequencer.on_digits(&call_id, &body.dtmf).await)
}

/// Recording-ready callback body.
#[derive(Debug, Deserialize)]
pub struct RecordingCallback {
    #[serde(alias = "call_uuid")]
    pub uuid: String,
    pub recording_url: String,
}

pub async fn recording_ready(
    State(state): State<AppState>,
    Json(body): Json<RecordingCallback>,
) -> impl IntoResponse {
    info!(call_id = %body.uuid, url = %body.recording_url, "Recording ready");

    if let Err(e) = state
        .store
        .set_recording_url(&body.uuid, &body.recording_url)
        .await
    {
        warn!(call_id = %body.uuid, error = %e, "Failed to store recording URL");
    }

    if let Err(e) = state
        .webhooks
        .notify(
            "recording.ready",
            serde_json::json!({
                "call_id": body.uuid,
                "recording_url": body.recording_url,
            }),
        )
        .await
    {
        warn!(call_id = %body.uuid, error = %e, "Failed to enqueue recording webhook");
    }

    StatusCode::NO_CONTENT
}

/// Provider lifecycle event: logged verbatim, and known statuses update
/// the session row. Unknown shapes are still logged — the payload is
/// opaque by contract.
pub async fn call_event(
    State(state): State<AppState>,
    Json(payload): Json<serde_json::Value>,
) -> impl IntoResponse {
    let Some(call_id) = payload
        .get("uuid")
        .or_else(|| payload.get("call_uuid"))
        .and_then(|v| v.as_str())
        .map(String::from)
    else {
        debug!(?payload, "Event callback without a call id");
        return StatusCode::NO_CONTENT;
    };

    let status = payload
        .get("status")
        .and_then(|v| v.as_str())
        .unwrap_or("event")
        .to_string();

    info!(call_id = %call_id, status = %status, "Call event");

    if let Err(e) = state
        .store
        .append_call_event(&call_id, &status, &payload)
        .await
    {
        warn!(call_id = %call_id, error = %e, "Failed to log call event");
    }

    let update = match status.as_str() {
        "ringing" | "started" => Some((CallStatus::Ringing, false)),
        "answered" => Some((CallStatus::Answered, false)),
        "completed" => Some((CallStatus::Completed, true)),
        "failed" | "busy" | "timeout" | "rejected" | "unanswered" | "cancelled" => {
            Some((CallStatus::Failed, true))
        }
        _ => None,
    };

    match update {
        Some((status, true)) => {
            let duration_secs = payload
                .get("duration")
                .and_then(|v| v.as_str().and_then(|s| s.parse().ok()).or(v.as_i64()));
            if let Err(e) = state
                .store
                .finish_session(&call_id, status, Utc::now(), duration_secs)
                .await
            {
                warn!(call_id = %call_id, error = %e, "Failed to finish session");
            }
        }
        Some((status, false)) => {
            if let Err(e) = state.store.update_status(&call_id, status).await {
                warn!(call_id = %call_id, error = %e, "Failed to update call status");
            }
        }
        None => {}
    }

    StatusCode::NO_CONTENT
}
