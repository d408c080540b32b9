//! Operator API — call placement, history views, audio serving, health.

use axum::{
    Json,
    extract::{Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::AppState;
use crate::flow::model::{FlowScript, FlowState};
use crate::store::model::{CallSession, CallStatus};
use crate::telephony::PlaceCall;

fn default_locale() -> String {
    "en-US".to_string()
}

/// Request body for placing a call.
#[derive(Debug, Deserialize)]
pub struct PlaceCallRequest {
    pub phone_number: String,
    #[serde(default = "default_locale")]
    pub locale: String,
    /// Synthesis voice model; falls back to the configured default.
    pub voice: Option<String>,
    /// Caller number; falls back to the configured default.
    pub caller_id: Option<String>,
    #[serde(default)]
    pub recording_enabled: bool,
    pub flow: FlowScript,
}

pub async fn place_call(
    State(state): State<AppState>,
    Json(req): Json<PlaceCallRequest>,
) -> impl IntoResponse {
    // Capability check per attempt: a misconfigured instance keeps serving
    // read-only routes instead of crashing at startup.
    let Some(telephony) = state.telephony.clone() else {
        warn!("Call placement refused: telephony not configured");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"error": "Telephony credentials are not configured"})),
        );
    };

    if req.flow.steps.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "Flow must have at least one step"})),
        );
    }

    let Some(from) = req.caller_id.clone().or_else(|| state.default_from.clone()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "No caller number configured or supplied"})),
        );
    };

    let voice_profile = req
        .voice
        .clone()
        .unwrap_or_else(|| state.default_voice_profile.clone());

    // Synthesis is attempted once, for the first step only, before the
    // call is placed — the audio must be streamable by answer time.
    let media_ref = Uuid::new_v4().to_string();
    let resolved = state
        .voice
        .resolve_call_start(&media_ref, &req.flow.steps[0].prompt, &voice_profile)
        .await;

    let mut flow_state = FlowState::new(
        req.flow.clone(),
        resolved.source,
        &req.locale,
        req.recording_enabled,
    );
    if let Some(url) = resolved.first_step_audio {
        flow_state.steps[0].audio = Some(url);
    }

    let placement = PlaceCall {
        to: req.phone_number.clone(),
        from: from.clone(),
        answer_url: state.urls.answer(),
        event_url: state.urls.event(),
    };

    let call_id = match telephony.place_call(&placement).await {
        Ok(id) => id,
        Err(e) => {
            error!(to = %req.phone_number, error = %e, "Call placement failed");
            return (
                StatusCode::BAD_GATEWAY,
                Json(serde_json::json!({"error": e.to_string()})),
            );
        }
    };

    let session = CallSession {
        call_id: call_id.clone(),
        phone_number: req.phone_number,
        locale: req.locale,
        voice_profile,
        recording_enabled: req.recording_enabled,
        caller_id: from,
        status: CallStatus::Ringing,
        recording_url: None,
        started_at: Utc::now(),
        ended_at: None,
        duration_secs: None,
    };

    if let Err(e) = state.store.create_session(&session, &flow_state).await {
        error!(call_id = %call_id, error = %e, "Failed to persist call session");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": "Failed to persist call session"})),
        );
    }

    info!(call_id = %call_id, steps = flow_state.steps.len(), "Call placed");
    (
        StatusCode::OK,
        Json(serde_json::json!({"success": true, "call_uuid": call_id})),
    )
}

pub async fn list_calls(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.list_sessions(100).await {
        Ok(sessions) => (StatusCode::OK, Json(serde_json::json!(sessions))),
        Err(e) => {
            error!(error = %e, "Failed to list calls");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "Failed to fetch call history"})),
            )
        }
    }
}

pub async fn call_detail(
    State(state): State<AppState>,
    Path(call_id): Path<String>,
) -> impl IntoResponse {
    let session = match state.store.get_session(&call_id).await {
        Ok(Some(session)) => session,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({"error": "Call not found"})),
            );
        }
        Err(e) => {
            error!(call_id = %call_id, error = %e, "Failed to fetch call");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "Failed to fetch call details"})),
            );
        }
    };

    let digits = state.store.digit_events(&call_id).await.unwrap_or_default();
    let events = state.store.call_events(&call_id).await.unwrap_or_default();

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "call": session,
            "digits": digits,
            "events": events,
        })),
    )
}

/// Serve a synthesized audio file to the provider.
pub async fn serve_audio(
    State(state): State<AppState>,
    Path(file): Path<String>,
) -> impl IntoResponse {
    let Some(path) = state.media.resolve(&file) else {
        return (StatusCode::NOT_FOUND, "not found").into_response();
    };

    match tokio::fs::read(&path).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, "audio/wav")], bytes).into_response(),
        Err(_) => (StatusCode::NOT_FOUND, "not found").into_response(),
    }
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "dialplan",
        "telephony_configured": state.telephony.is_some(),
        "synthesis_configured": state.synthesis_enabled,
    }))
}
