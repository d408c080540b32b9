//! Call-flow core: the step script model, voice-source resolution, and the
//! callback-driven state machine.

pub mod model;
pub mod sequencer;
pub mod voice;

pub use model::{FlowScript, FlowState, FlowStep, VoiceSource};
pub use sequencer::{CallbackUrls, StepSequencer};
pub use voice::{ResolvedVoice, VoiceResolver, builtin_voice};
