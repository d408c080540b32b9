//! Call-control instruction objects, serialized exactly as the provider's
//! wire shape: a JSON array of `{action: …}` objects returned synchronously
//! from the answer and input callbacks.

use serde::{Deserialize, Serialize};

/// One call-control instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Instruction {
    /// Speak text with the provider's built-in voice engine.
    Talk {
        text: String,
        #[serde(rename = "voiceName")]
        voice_name: String,
        language: String,
    },
    /// Play a pre-synthesized audio stream.
    Stream {
        #[serde(rename = "streamUrl")]
        stream_url: Vec<String>,
    },
    /// Record the call, posting the result to `event_url`.
    Record {
        #[serde(rename = "eventUrl")]
        event_url: Vec<String>,
        #[serde(rename = "endOnSilence")]
        end_on_silence: u32,
        format: String,
    },
    /// Collect DTMF input, posting digits to `event_url`.
    Input {
        #[serde(rename = "eventUrl")]
        event_url: Vec<String>,
        dtmf: DtmfSettings,
    },
}

/// DTMF collection settings nested inside an input instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DtmfSettings {
    #[serde(rename = "maxDigits")]
    pub max_digits: usize,
    #[serde(rename = "timeOut")]
    pub time_out: u32,
}

impl Instruction {
    pub fn talk(text: impl Into<String>, voice_name: impl Into<String>, language: impl Into<String>) -> Self {
        Instruction::Talk {
            text: text.into(),
            voice_name: voice_name.into(),
            language: language.into(),
        }
    }

    pub fn stream(url: impl Into<String>) -> Self {
        Instruction::Stream {
            stream_url: vec![url.into()],
        }
    }

    pub fn record(event_url: impl Into<String>) -> Self {
        Instruction::Record {
            event_url: vec![event_url.into()],
            end_on_silence: 3,
            format: "mp3".into(),
        }
    }

    pub fn input(event_url: impl Into<String>, max_digits: usize, time_out: u32) -> Self {
        Instruction::Input {
            event_url: vec![event_url.into()],
            dtmf: DtmfSettings {
                max_digits,
                time_out,
            },
        }
    }
}
