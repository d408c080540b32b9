//! Speech synthesis — external TTS provider client plus the media store
//! that turns returned audio bytes into a streamable URL.

use std::path::PathBuf;

use async_trait::async_trait;
use secrecy::ExposeSecret;

use crate::config::SynthesisConfig;
use crate::error::SynthesisError;

/// Narrow interface to the speech-synthesis provider.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize `text` with the given voice model, returning raw audio
    /// bytes (linear16 WAV). One attempt; the caller bounds it with a
    /// timeout and treats any failure as a fallback signal.
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>, SynthesisError>;
}

/// Deepgram-style REST synthesis client.
pub struct DeepgramSynthesizer {
    config: SynthesisConfig,
    client: reqwest::Client,
}

impl DeepgramSynthesizer {
    pub fn new(config: SynthesisConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Synthesizer for DeepgramSynthesizer {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>, SynthesisError> {
        let url = format!(
            "{}?model={voice}&encoding=linear16&sample_rate=16000",
            self.config.api_url
        );

        let resp = self
            .client
            .post(&url)
            .header(
                "Authorization",
                format!("Token {}", self.config.api_key.expose_secret()),
            )
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .map_err(|e| SynthesisError::RequestFailed {
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            return Err(SynthesisError::InvalidResponse {
                reason: format!("status {}", resp.status()),
            });
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| SynthesisError::InvalidResponse {
                reason: e.to_string(),
            })?;

        if bytes.is_empty() {
            return Err(SynthesisError::InvalidResponse {
                reason: "empty audio body".into(),
            });
        }

        Ok(bytes.to_vec())
    }
}

/// Writes synthesized audio into the served media directory and hands back
/// the public stream URL the provider will fetch.
pub struct MediaStore {
    dir: PathBuf,
    public_base: String,
}

impl MediaStore {
    pub fn new(dir: PathBuf, public_base: impl Into<String>) -> Self {
        Self {
            dir,
            public_base: public_base.into(),
        }
    }

    /// Persist `bytes` as `{name}.wav` and return its stream URL.
    pub async fn save_wav(&self, name: &str, bytes: &[u8]) -> Result<String, SynthesisError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let file_name = format!("{name}.wav");
        tokio::fs::write(self.dir.join(&file_name), bytes).await?;
        Ok(format!("{}/audio/{file_name}", self.public_base))
    }

    /// Resolve a served file name to its on-disk path, rejecting anything
    /// that could escape the media directory.
    pub fn resolve(&self, file_name: &str) -> Option<PathBuf> {
        if file_name.is_empty()
            || file_name.contains("..")
            || file_name.contains('/')
            || file_name.contains('\\')
        {
            return None;
        }
        Some(self.dir.join(file_name))
    }
}
