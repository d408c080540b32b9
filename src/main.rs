use std::sync::Arc;

use dialplan::config::AppConfig;
use dialplan::flow::sequencer::{CallbackUrls, StepSequencer};
use dialplan::flow::voice::VoiceResolver;
use dialplan::http::{AppState, app_router};
use dialplan::monitor::CallMonitor;
use dialplan::store::{CallStore, LibSqlStore};
use dialplan::synthesis::{DeepgramSynthesizer, MediaStore, Synthesizer};
use dialplan::telephony::{CallControl, HttpCallControl};
use dialplan::webhook::{HttpTransport, WebhookDispatcher, spawn_delivery_worker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env()?;

    eprintln!("☎️  dialplan v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Base URL: {}", config.base_url);
    eprintln!("   Monitor WS: ws://{}:{}/ws", config.bind_host, config.port);
    eprintln!("   API: http://{}:{}/api/calls", config.bind_host, config.port);

    // ── Database ─────────────────────────────────────────────────────────
    let store: Arc<dyn CallStore> = Arc::new(LibSqlStore::new_local(&config.db_path).await?);
    eprintln!("   Database: {}", config.db_path.display());

    // ── Media + synthesis ───────────────────────────────────────────────
    let media = Arc::new(MediaStore::new(
        config.media_dir.clone(),
        config.base_url.clone(),
    ));

    let synthesizer: Option<Arc<dyn Synthesizer>> = config
        .synthesis
        .clone()
        .map(|cfg| Arc::new(DeepgramSynthesizer::new(cfg)) as Arc<dyn Synthesizer>);
    let synthesis_timeout = config
        .synthesis
        .as_ref()
        .map(|s| s.timeout)
        .unwrap_or_else(|| std::time::Duration::from_secs(5));
    let default_voice_profile = config
        .synthesis
        .as_ref()
        .map(|s| s.default_voice.clone())
        .unwrap_or_else(|| "aura-asteria-en".to_string());

    eprintln!(
        "   Synthesis: {}",
        if synthesizer.is_some() {
            "enabled"
        } else {
            "disabled (built-in speech only)"
        }
    );

    let voice = Arc::new(VoiceResolver::new(
        synthesizer.clone(),
        Arc::clone(&media),
        synthesis_timeout,
    ));

    // ── Telephony ───────────────────────────────────────────────────────
    let telephony: Option<Arc<dyn CallControl>> = config
        .telephony
        .clone()
        .map(|cfg| Arc::new(HttpCallControl::new(cfg)) as Arc<dyn CallControl>);
    let default_from = config.telephony.as_ref().map(|t| t.from_number.clone());

    if telephony.is_none() {
        // Not fatal: history, monitoring, and callbacks keep working.
        eprintln!("   Telephony: NOT configured — call placement disabled");
    } else {
        eprintln!("   Telephony: configured");
    }

    // ── Live monitor ────────────────────────────────────────────────────
    let monitor = CallMonitor::new(config.broadcast_capacity);

    // ── Webhook delivery ────────────────────────────────────────────────
    let webhooks = Arc::new(WebhookDispatcher::new(
        Arc::clone(&store),
        Arc::new(HttpTransport::new()),
        config.webhook.clone(),
    ));
    let _delivery_handle = spawn_delivery_worker(Arc::clone(&webhooks));
    eprintln!(
        "   Webhooks: {} (poll every {:?}, max {} attempts)",
        config
            .webhook
            .notify_url
            .as_deref()
            .unwrap_or("no notify URL"),
        config.webhook.poll_interval,
        config.webhook.max_attempts,
    );

    // ── Sequencer + HTTP ────────────────────────────────────────────────
    let urls = CallbackUrls::new(config.base_url.clone());
    let sequencer = Arc::new(StepSequencer::new(
        Arc::clone(&store),
        Arc::clone(&monitor),
        Arc::clone(&webhooks),
        urls.clone(),
    ));

    let state = AppState {
        store,
        sequencer,
        monitor,
        webhooks,
        telephony,
        voice,
        media,
        urls,
        default_from,
        default_voice_profile,
        synthesis_enabled: synthesizer.is_some(),
    };

    let app = app_router(state);
    let addr = format!("{}:{}", config.bind_host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "Server started");
    axum::serve(listener, app).await?;

    Ok(())
}
