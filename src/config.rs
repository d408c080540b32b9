//! Configuration types — everything is driven by `DIALPLAN_*` environment
//! variables so the same binary runs in dev and behind a tunnel.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Top-level service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Address the HTTP server binds to.
    pub bind_host: String,
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Public base URL the telephony provider can reach us on
    /// (callback URLs and audio stream URLs are built from this).
    pub base_url: String,
    /// Path of the libSQL database file.
    pub db_path: PathBuf,
    /// Directory synthesized audio files are written to and served from.
    pub media_dir: PathBuf,
    /// Capacity of the live-event broadcast channel.
    pub broadcast_capacity: usize,
    /// Telephony provider credentials. `None` means call placement is
    /// refused (read-only surfaces keep working).
    pub telephony: Option<TelephonyConfig>,
    /// Speech-synthesis provider. `None` means every call uses the
    /// provider's built-in voice engine.
    pub synthesis: Option<SynthesisConfig>,
    /// Outbound webhook delivery settings.
    pub webhook: WebhookConfig,
}

/// Credentials and defaults for the call-control provider.
#[derive(Debug, Clone)]
pub struct TelephonyConfig {
    pub api_key: SecretString,
    pub api_secret: SecretString,
    pub application_id: String,
    /// Default caller number when a request doesn't supply one.
    pub from_number: String,
    /// Call-placement API endpoint.
    pub api_url: String,
}

/// Speech-synthesis provider settings.
#[derive(Debug, Clone)]
pub struct SynthesisConfig {
    pub api_key: SecretString,
    /// Synthesis voice model used when a request doesn't pick one.
    pub default_voice: String,
    /// Hard bound on the single synthesis attempt made at call placement.
    pub timeout: Duration,
    pub api_url: String,
}

/// Outbound webhook delivery settings.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Third-party endpoint notified of recording/completion events.
    /// `None` disables the producers; the delivery worker still drains
    /// whatever is already queued.
    pub notify_url: Option<String>,
    /// How often the delivery worker polls for due tasks.
    pub poll_interval: Duration,
    /// First retry delay; doubles on every subsequent failure.
    pub base_delay: Duration,
    /// Attempts before a task is marked exhausted.
    pub max_attempts: u32,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            notify_url: None,
            poll_interval: Duration::from_secs(15),
            base_delay: Duration::from_secs(30),
            max_attempts: 3,
        }
    }
}

impl AppConfig {
    /// Load configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_host = env_or("DIALPLAN_HOST", "0.0.0.0");
        let port: u16 = parse_env("DIALPLAN_PORT", 8080)?;

        let base_url = std::env::var("DIALPLAN_BASE_URL")
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|_| format!("http://127.0.0.1:{port}"));

        let db_path = PathBuf::from(env_or("DIALPLAN_DB_PATH", "./data/dialplan.db"));
        let media_dir = PathBuf::from(env_or("DIALPLAN_MEDIA_DIR", "./data/media"));

        let broadcast_capacity = parse_env("DIALPLAN_BROADCAST_CAPACITY", 256usize)?;

        let telephony = TelephonyConfig::from_env()?;
        let synthesis = SynthesisConfig::from_env()?;

        let webhook = WebhookConfig {
            notify_url: std::env::var("DIALPLAN_NOTIFY_URL").ok().filter(|u| !u.is_empty()),
            poll_interval: Duration::from_secs(parse_env("DIALPLAN_WEBHOOK_POLL_SECS", 15u64)?),
            base_delay: Duration::from_secs(parse_env("DIALPLAN_WEBHOOK_BASE_DELAY_SECS", 30u64)?),
            max_attempts: parse_env("DIALPLAN_WEBHOOK_MAX_ATTEMPTS", 3u32)?,
        };

        Ok(Self {
            bind_host,
            port,
            base_url,
            db_path,
            media_dir,
            broadcast_capacity,
            telephony,
            synthesis,
            webhook,
        })
    }

    /// Whether this instance can place outbound calls.
    ///
    /// Checked per placement attempt, not at startup — a misconfigured
    /// instance still serves history and live monitoring.
    pub fn can_place_calls(&self) -> bool {
        self.telephony.is_some()
    }
}

impl TelephonyConfig {
    /// Build from `DIALPLAN_TELEPHONY_*` variables. Returns `Ok(None)` when
    /// the API key is absent; partial credentials are an error.
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        let api_key = match std::env::var("DIALPLAN_TELEPHONY_API_KEY") {
            Ok(k) if !k.is_empty() => k,
            _ => return Ok(None),
        };

        let api_secret = require("DIALPLAN_TELEPHONY_API_SECRET", "set the provider API secret")?;
        let application_id =
            require("DIALPLAN_TELEPHONY_APP_ID", "set the provider application id")?;
        let from_number = require(
            "DIALPLAN_TELEPHONY_FROM_NUMBER",
            "set the default caller number in E.164 form",
        )?;

        Ok(Some(Self {
            api_key: SecretString::from(api_key),
            api_secret: SecretString::from(api_secret),
            application_id,
            from_number,
            api_url: env_or("DIALPLAN_TELEPHONY_API_URL", "https://api.nexmo.com/v1/calls"),
        }))
    }
}

impl SynthesisConfig {
    /// Build from `DIALPLAN_SYNTHESIS_*` variables. Absent key means the
    /// provider is disabled and every call falls back to built-in speech.
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        let api_key = match std::env::var("DIALPLAN_SYNTHESIS_API_KEY") {
            Ok(k) if !k.is_empty() => k,
            _ => return Ok(None),
        };

        Ok(Some(Self {
            api_key: SecretString::from(api_key),
            default_voice: env_or("DIALPLAN_SYNTHESIS_VOICE", "aura-asteria-en"),
            timeout: Duration::from_secs(parse_env("DIALPLAN_SYNTHESIS_TIMEOUT_SECS", 5u64)?),
            api_url: env_or("DIALPLAN_SYNTHESIS_API_URL", "https://api.deepgram.com/v1/speak"),
        }))
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn require(key: &str, hint: &str) -> Result<String, ConfigError> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::MissingRequired {
            key: key.to_string(),
            hint: hint.to_string(),
        })
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("cannot parse {raw:?}"),
        }),
        Err(_) => Ok(default),
    }
}
