//! HTTP surface — provider callbacks, operator API, live monitoring WS,
//! and synthesized-audio serving.

pub mod api;
pub mod callbacks;
pub mod ws;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;

use crate::flow::sequencer::{CallbackUrls, StepSequencer};
use crate::flow::voice::VoiceResolver;
use crate::monitor::CallMonitor;
use crate::store::CallStore;
use crate::synthesis::MediaStore;
use crate::telephony::CallControl;
use crate::webhook::WebhookDispatcher;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn CallStore>,
    pub sequencer: Arc<StepSequencer>,
    pub monitor: Arc<CallMonitor>,
    pub webhooks: Arc<WebhookDispatcher>,
    /// Call placement client; `None` when credentials are not configured,
    /// in which case `POST /api/calls` refuses with 503.
    pub telephony: Option<Arc<dyn CallControl>>,
    pub voice: Arc<VoiceResolver>,
    pub media: Arc<MediaStore>,
    pub urls: CallbackUrls,
    /// Default caller number used when a request doesn't supply one.
    pub default_from: Option<String>,
    /// Default synthesis voice model.
    pub default_voice_profile: String,
    /// Whether a synthesis provider is configured (for /health).
    pub synthesis_enabled: bool,
}

/// Build the full application router.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/ws", get(ws::ws_handler))
        .route("/api/calls", post(api::place_call).get(api::list_calls))
        .route("/api/calls/{call_id}", get(api::call_detail))
        .route("/audio/{file}", get(api::serve_audio))
        .route("/callbacks/answer", post(callbacks::answer))
        .route("/callbacks/dtmf/{call_id}", post(callbacks::dtmf))
        .route("/callbacks/recording", post(callbacks::recording_ready))
        .route("/callbacks/event", post(callbacks::call_event))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
