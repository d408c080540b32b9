//! Flow data model — the ordered step script and the per-call mutable
//! FlowState that is persisted between provider callbacks.

use serde::{Deserialize, Serialize};

use crate::error::DatabaseError;

fn default_expected_digits() -> usize {
    1
}

fn default_timeout_secs() -> u32 {
    30
}

fn default_final_message() -> String {
    "Thank you. Goodbye.".to_string()
}

/// One prompt-and-collect unit within a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowStep {
    /// Text spoken (or synthesized) when the step starts.
    pub prompt: String,
    /// Digits the caller must enter before the flow advances.
    #[serde(default = "default_expected_digits")]
    pub expected_digits: usize,
    /// Input-collection timeout handed to the provider.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u32,
    /// Pre-synthesized audio stream URL, set only when synthesis succeeded
    /// for this step at call placement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
}

impl FlowStep {
    pub fn new(prompt: impl Into<String>, expected_digits: usize) -> Self {
        Self {
            prompt: prompt.into(),
            expected_digits: expected_digits.max(1),
            timeout_secs: default_timeout_secs(),
            audio: None,
        }
    }
}

/// The ordered script a call executes: steps plus a closing message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowScript {
    pub steps: Vec<FlowStep>,
    #[serde(default = "default_final_message")]
    pub final_message: String,
}

/// How prompts for this call are rendered. Decided once at call placement
/// and never re-evaluated — a failed synthesis latches `BuiltIn` for the
/// remainder of the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceSource {
    /// Stream pre-synthesized audio where a step carries a handle.
    Synthesized,
    /// Speak prompt text with the provider's built-in voice engine.
    BuiltIn,
}

/// Durable per-call flow progress. Present on a session iff the flow has
/// not reached a terminal step; the sequencer is its only writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowState {
    /// Index into `steps` of the step currently collecting input.
    pub current_step: usize,
    pub steps: Vec<FlowStep>,
    pub final_message: String,
    /// Digits accumulated for the current step.
    pub digit_buffer: String,
    pub voice_source: VoiceSource,
    pub locale: String,
    pub recording: bool,
}

/// Versioned on-disk wrapper. The blob is opaque to everything but this
/// module; the tag lets future step-type additions coexist with in-flight
/// calls instead of silently corrupting them.
#[derive(Serialize, Deserialize)]
#[serde(tag = "version")]
enum VersionedFlowState {
    #[serde(rename = "1")]
    V1(FlowState),
}

impl FlowState {
    pub fn new(script: FlowScript, voice_source: VoiceSource, locale: &str, recording: bool) -> Self {
        Self {
            current_step: 0,
            steps: script.steps,
            final_message: script.final_message,
            digit_buffer: String::new(),
            voice_source,
            locale: locale.to_string(),
            recording,
        }
    }

    /// The step currently collecting input, if the index is in range.
    pub fn current(&self) -> Option<&FlowStep> {
        self.steps.get(self.current_step)
    }

    /// Serialize to the versioned blob format.
    pub fn encode(&self) -> Result<String, DatabaseError> {
        serde_json::to_string(&VersionedFlowState::V1(self.clone()))
            .map_err(|e| DatabaseError::Serialization(e.to_string()))
    }

    /// Deserialize from the versioned blob format.
    pub fn decode(raw: &str) -> Result<Self, DatabaseError> {
        let VersionedFlowState::V1(state) = serde_json::from_str(raw)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        Ok(state)
    }
}
