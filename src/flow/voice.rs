//! Voice-source resolution.
//!
//! The built-in voice for a locale is a pure lookup. The synthesized path
//! is attempted exactly once per call, for the first step only, at call
//! placement — a bounded network call whose failure latches the call onto
//! built-in speech permanently.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::flow::model::VoiceSource;
use crate::synthesis::{MediaStore, Synthesizer};

/// Default built-in voice for unknown locales.
pub const DEFAULT_VOICE: &str = "Joey";

/// Supported locales and their built-in voice. One voice per locale.
static BUILTIN_VOICES: &[(&str, &str)] = &[
    ("en-US", "Joey"),
    ("en-GB", "Amy"),
    ("es-ES", "Lucia"),
    ("es-MX", "Mia"),
    ("fr-FR", "Celine"),
    ("de-DE", "Marlene"),
    ("it-IT", "Carla"),
];

/// Built-in voice name for a locale; unknown locales get the default.
pub fn builtin_voice(locale: &str) -> &'static str {
    BUILTIN_VOICES
        .iter()
        .find(|(l, _)| *l == locale)
        .map(|(_, v)| *v)
        .unwrap_or(DEFAULT_VOICE)
}

/// Outcome of resolving a call's voice source at placement time.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedVoice {
    pub source: VoiceSource,
    /// Stream URL for the first step, present only on the synthesized path.
    pub first_step_audio: Option<String>,
}

impl ResolvedVoice {
    fn built_in() -> Self {
        Self {
            source: VoiceSource::BuiltIn,
            first_step_audio: None,
        }
    }
}

/// Resolves the voice source for new calls.
pub struct VoiceResolver {
    synthesizer: Option<Arc<dyn Synthesizer>>,
    media: Arc<MediaStore>,
    timeout: Duration,
}

impl VoiceResolver {
    pub fn new(
        synthesizer: Option<Arc<dyn Synthesizer>>,
        media: Arc<MediaStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            synthesizer,
            media,
            timeout,
        }
    }

    /// Attempt synthesis for the first step of a new call.
    ///
    /// Only the first step is synthesized eagerly — that keeps call-setup
    /// latency bounded by a single attempt. Any failure (provider disabled,
    /// error, timeout, media write) resolves to built-in speech; the
    /// decision is stored in FlowState and never revisited mid-call.
    pub async fn resolve_call_start(
        &self,
        call_ref: &str,
        first_prompt: &str,
        voice_profile: &str,
    ) -> ResolvedVoice {
        let Some(synthesizer) = &self.synthesizer else {
            return ResolvedVoice::built_in();
        };

        let attempt = synthesizer.synthesize(first_prompt, voice_profile);
        let bytes = match tokio::time::timeout(self.timeout, attempt).await {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                warn!(call_ref, error = %e, "Synthesis failed, falling back to built-in speech");
                return ResolvedVoice::built_in();
            }
            Err(_) => {
                warn!(
                    call_ref,
                    timeout = ?self.timeout,
                    "Synthesis timed out, falling back to built-in speech"
                );
                return ResolvedVoice::built_in();
            }
        };

        match self
            .media
            .save_wav(&format!("{call_ref}-step0"), &bytes)
            .await
        {
            Ok(url) => ResolvedVoice {
                source: VoiceSource::Synthesized,
                first_step_audio: Some(url),
            },
            Err(e) => {
                warn!(call_ref, error = %e, "Failed to store synthesized audio, falling back");
                ResolvedVoice::built_in()
            }
        }
    }
}
