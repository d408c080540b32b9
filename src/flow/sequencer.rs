//! Step sequencer — the per-call state machine driven by provider
//! callbacks.
//!
//! Every callback reconstructs the call's position from the store, applies
//! one transition, and answers with the next instruction set. The public
//! methods are infallible by design: whatever goes wrong internally, the
//! provider always gets a valid instruction array back, because an empty
//! or error response would leave the remote call in an undefined state.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::flow::model::{FlowState, FlowStep, VoiceSource};
use crate::flow::voice::{DEFAULT_VOICE, builtin_voice};
use crate::monitor::{CallMonitor, MonitorEvent};
use crate::ncco::Instruction;
use crate::store::CallStore;
use crate::webhook::WebhookDispatcher;

/// Spoken when an answer callback arrives for a call we have no state for.
const STATE_NOT_FOUND_MESSAGE: &str = "Call state not found.";
/// Spoken when digits arrive for a call whose flow already terminated.
const SESSION_EXPIRED_MESSAGE: &str = "Session expired.";
/// Spoken when an internal failure forces us to end the call early.
const UNAVAILABLE_MESSAGE: &str = "We are unable to continue this call. Goodbye.";

/// Builds the callback URLs handed to the provider inside instructions.
#[derive(Debug, Clone)]
pub struct CallbackUrls {
    base: String,
}

impl CallbackUrls {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base: String = base_url.into();
        while base.ends_with('/') {
            base.pop();
        }
        Self { base }
    }

    /// The provider posts the call id in the answer body, so one static
    /// answer URL serves every call.
    pub fn answer(&self) -> String {
        format!("{}/callbacks/answer", self.base)
    }

    pub fn dtmf(&self, call_id: &str) -> String {
        format!("{}/callbacks/dtmf/{call_id}", self.base)
    }

    pub fn recording(&self) -> String {
        format!("{}/callbacks/recording", self.base)
    }

    pub fn event(&self) -> String {
        format!("{}/callbacks/event", self.base)
    }
}

/// The call-flow state machine.
pub struct StepSequencer {
    store: Arc<dyn CallStore>,
    monitor: Arc<CallMonitor>,
    webhooks: Arc<WebhookDispatcher>,
    urls: CallbackUrls,
}

impl StepSequencer {
    pub fn new(
        store: Arc<dyn CallStore>,
        monitor: Arc<CallMonitor>,
        webhooks: Arc<WebhookDispatcher>,
        urls: CallbackUrls,
    ) -> Self {
        Self {
            store,
            monitor,
            webhooks,
            urls,
        }
    }

    /// Handle the provider's answer callback: re-emit the current step's
    /// instruction set. Never mutates flow state, so a repeated answer
    /// callback is harmless.
    pub async fn on_answer(&self, call_id: &str) -> Vec<Instruction> {
        let state = match self.store.load_flow_state(call_id).await {
            Ok(Some(state)) => state,
            Ok(None) => {
                warn!(call_id, "Answer callback with no flow state");
                return vec![Instruction::talk(
                    STATE_NOT_FOUND_MESSAGE,
                    DEFAULT_VOICE,
                    "en-US",
                )];
            }
            Err(e) => {
                error!(call_id, error = %e, "Failed to load flow state on answer");
                return vec![Instruction::talk(UNAVAILABLE_MESSAGE, DEFAULT_VOICE, "en-US")];
            }
        };

        let Some(step) = state.current() else {
            // Step index past the end with the blob still present should be
            // unreachable; close the call rather than answer with nothing.
            error!(call_id, step = state.current_step, "Flow state past last step");
            return vec![self.closing_instruction(&state)];
        };

        let mut ncco = vec![prompt_instruction(&state, step)];
        if state.recording {
            ncco.push(Instruction::record(self.urls.recording()));
        }
        ncco.push(Instruction::input(
            self.urls.dtmf(call_id),
            step.expected_digits,
            step.timeout_secs,
        ));
        ncco
    }

    /// Handle a digits-received callback: audit, broadcast, then advance
    /// the flow. Returns the next instruction set, or an empty list while
    /// the current step is still collecting.
    pub async fn on_digits(&self, call_id: &str, digits: &str) -> Vec<Instruction> {
        let mut state = match self.store.load_flow_state(call_id).await {
            Ok(Some(state)) => state,
            Ok(None) => {
                info!(call_id, "Digits for a call with no live flow");
                return vec![Instruction::talk(
                    SESSION_EXPIRED_MESSAGE,
                    DEFAULT_VOICE,
                    "en-US",
                )];
            }
            Err(e) => {
                error!(call_id, error = %e, "Failed to load flow state on digits");
                return vec![Instruction::talk(UNAVAILABLE_MESSAGE, DEFAULT_VOICE, "en-US")];
            }
        };

        // Audit trail first, broadcast second, flow mutation last — the log
        // must be a superset of whatever influenced the transition below.
        let now = Utc::now();
        if let Err(e) = self.store.append_digit_event(call_id, digits, now).await {
            warn!(call_id, error = %e, "Failed to append digit event");
        }
        self.monitor.publish(MonitorEvent::Digit {
            call_id: call_id.to_string(),
            digits: digits.to_string(),
            timestamp: now,
        });

        state.digit_buffer.push_str(digits);
        // A step asking for zero digits still needs one to move on.
        let expected = state
            .current()
            .map(|s| s.expected_digits.max(1))
            .unwrap_or(1);

        if state.digit_buffer.len() < expected {
            // Still collecting; the provider keeps the input session open.
            if let Err(e) = self.store.save_flow_state(call_id, &state).await {
                error!(call_id, error = %e, "Failed to persist digit buffer");
                return vec![self.closing_instruction(&state)];
            }
            return Vec::new();
        }

        // A buffer longer than expected still satisfies the step: the
        // provider may deliver more digits than requested and dropping
        // them would stall the call.
        state.digit_buffer.clear();
        state.current_step += 1;

        if state.current_step >= state.steps.len() {
            return self.terminate(call_id, &state).await;
        }

        let step = &state.steps[state.current_step];
        let prompt = prompt_instruction(&state, step);
        let input = Instruction::input(
            self.urls.dtmf(call_id),
            step.expected_digits,
            step.timeout_secs,
        );

        if let Err(e) = self.store.save_flow_state(call_id, &state).await {
            error!(call_id, error = %e, "Failed to persist advanced flow state");
            return vec![self.closing_instruction(&state)];
        }

        info!(call_id, step = state.current_step, "Flow advanced");
        vec![prompt, input]
    }

    /// Clear the flow state and emit only the closing message. The clear
    /// happens before the response is returned, so a terminal step is
    /// reached exactly once even if the provider retries the callback.
    async fn terminate(&self, call_id: &str, state: &FlowState) -> Vec<Instruction> {
        if let Err(e) = self.store.clear_flow_state(call_id).await {
            // Still answer with the closing message; the provider call has
            // to end cleanly even if the store is unhappy.
            error!(call_id, error = %e, "Failed to clear flow state at termination");
        }

        info!(call_id, "Flow terminated");

        if let Err(e) = self
            .webhooks
            .notify(
                "call.completed",
                serde_json::json!({
                    "call_id": call_id,
                    "completed_at": Utc::now().to_rfc3339(),
                }),
            )
            .await
        {
            warn!(call_id, error = %e, "Failed to enqueue completion webhook");
        }

        vec![self.closing_instruction(state)]
    }

    fn closing_instruction(&self, state: &FlowState) -> Instruction {
        Instruction::talk(
            &state.final_message,
            builtin_voice(&state.locale),
            &state.locale,
        )
    }
}

/// Stream pre-synthesized audio where the call is latched onto synthesis
/// and this step carries a handle; otherwise speak the prompt text.
fn prompt_instruction(state: &FlowState, step: &FlowStep) -> Instruction {
    match (&state.voice_source, &step.audio) {
        (VoiceSource::Synthesized, Some(url)) => Instruction::stream(url.clone()),
        _ => Instruction::talk(
            &step.prompt,
            builtin_voice(&state.locale),
            &state.locale,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::config::WebhookConfig;
    use crate::error::WebhookError;
    use crate::flow::model::{FlowScript, FlowStep};
    use crate::store::model::{CallSession, CallStatus};
    use crate::store::{LibSqlStore, WebhookStatus};
    use crate::webhook::DeliveryTransport;

    struct NullTransport;

    #[async_trait::async_trait]
    impl DeliveryTransport for NullTransport {
        async fn deliver(
            &self,
            _url: &str,
            _payload: &serde_json::Value,
        ) -> Result<(), WebhookError> {
            Ok(())
        }
    }

    struct Harness {
        sequencer: StepSequencer,
        store: Arc<dyn CallStore>,
        monitor: Arc<CallMonitor>,
    }

    async fn harness(notify_url: Option<&str>) -> Harness {
        let store: Arc<dyn CallStore> = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let monitor = CallMonitor::new(64);
        let webhooks = Arc::new(WebhookDispatcher::new(
            Arc::clone(&store),
            Arc::new(NullTransport),
            WebhookConfig {
                notify_url: notify_url.map(String::from),
                ..WebhookConfig::default()
            },
        ));
        let sequencer = StepSequencer::new(
            Arc::clone(&store),
            Arc::clone(&monitor),
            webhooks,
            CallbackUrls::new("http://example.test"),
        );
        Harness {
            sequencer,
            store,
            monitor,
        }
    }

    fn session(call_id: &str, recording: bool) -> CallSession {
        CallSession {
            call_id: call_id.into(),
            phone_number: "+15551234567".into(),
            locale: "en-US".into(),
            voice_profile: "aura-asteria-en".into(),
            recording_enabled: recording,
            caller_id: "+15557654321".into(),
            status: CallStatus::Ringing,
            recording_url: None,
            started_at: Utc::now(),
            ended_at: None,
            duration_secs: None,
        }
    }

    async fn seed(h: &Harness, call_id: &str, state: FlowState, recording: bool) {
        h.store
            .create_session(&session(call_id, recording), &state)
            .await
            .unwrap();
    }

    fn code_flow() -> FlowState {
        FlowState::new(
            FlowScript {
                steps: vec![FlowStep::new("Enter code", 6)],
                final_message: "Goodbye".into(),
            },
            VoiceSource::BuiltIn,
            "en-US",
            false,
        )
    }

    fn two_step_flow() -> FlowState {
        FlowState::new(
            FlowScript {
                steps: vec![
                    FlowStep::new("Enter your account number", 4),
                    FlowStep::new("Press 1 to confirm", 1),
                ],
                final_message: "Thank you. Goodbye.".into(),
            },
            VoiceSource::BuiltIn,
            "en-US",
            false,
        )
    }

    // ── Answer callback ─────────────────────────────────────────────

    #[tokio::test]
    async fn answer_emits_prompt_and_input() {
        let h = harness(None).await;
        seed(&h, "c1", code_flow(), false).await;

        let ncco = h.sequencer.on_answer("c1").await;
        assert_eq!(ncco.len(), 2);
        assert_eq!(ncco[0], Instruction::talk("Enter code", "Joey", "en-US"));
        assert_eq!(
            ncco[1],
            Instruction::input("http://example.test/callbacks/dtmf/c1", 6, 30)
        );

        // Answer never mutates state.
        let state = h.store.load_flow_state("c1").await.unwrap().unwrap();
        assert_eq!(state.current_step, 0);
        assert!(state.digit_buffer.is_empty());
    }

    #[tokio::test]
    async fn answer_includes_record_when_enabled() {
        let h = harness(None).await;
        seed(
            &h,
            "c1",
            FlowState::new(
                FlowScript {
                    steps: vec![FlowStep::new("Say something", 1)],
                    final_message: "Bye".into(),
                },
                VoiceSource::BuiltIn,
                "en-US",
                true,
            ),
            true,
        )
        .await;

        let ncco = h.sequencer.on_answer("c1").await;
        assert_eq!(ncco.len(), 3);
        assert_eq!(
            ncco[1],
            Instruction::record("http://example.test/callbacks/recording")
        );
    }

    #[tokio::test]
    async fn answer_without_state_fails_open() {
        let h = harness(None).await;
        let ncco = h.sequencer.on_answer("ghost").await;
        assert_eq!(
            ncco,
            vec![Instruction::talk("Call state not found.", "Joey", "en-US")]
        );
    }

    #[tokio::test]
    async fn answer_streams_synthesized_audio_when_latched() {
        let h = harness(None).await;
        let mut state = code_flow();
        state.voice_source = VoiceSource::Synthesized;
        state.steps[0].audio = Some("http://example.test/audio/c1-step0.wav".into());
        seed(&h, "c1", state, false).await;

        let ncco = h.sequencer.on_answer("c1").await;
        assert_eq!(
            ncco[0],
            Instruction::stream("http://example.test/audio/c1-step0.wav")
        );
    }

    #[tokio::test]
    async fn built_in_latch_ignores_audio_handles() {
        // A call that fell back never streams, even if a handle exists.
        let h = harness(None).await;
        let mut state = code_flow();
        state.steps[0].audio = Some("http://example.test/audio/c1-step0.wav".into());
        seed(&h, "c1", state, false).await;

        let ncco = h.sequencer.on_answer("c1").await;
        assert_eq!(ncco[0], Instruction::talk("Enter code", "Joey", "en-US"));
    }

    #[tokio::test]
    async fn answer_uses_locale_voice() {
        let h = harness(None).await;
        let mut state = code_flow();
        state.locale = "es-ES".into();
        state.steps[0].prompt = "Ingrese el codigo".into();
        seed(&h, "c1", state, false).await;

        let ncco = h.sequencer.on_answer("c1").await;
        assert_eq!(
            ncco[0],
            Instruction::talk("Ingrese el codigo", "Lucia", "es-ES")
        );
    }

    // ── Digits callback ─────────────────────────────────────────────

    #[tokio::test]
    async fn partial_digits_buffer_and_wait() {
        let h = harness(None).await;
        seed(&h, "c1", code_flow(), false).await;

        let ncco = h.sequencer.on_digits("c1", "123").await;
        assert!(ncco.is_empty());

        let state = h.store.load_flow_state("c1").await.unwrap().unwrap();
        assert_eq!(state.current_step, 0);
        assert_eq!(state.digit_buffer, "123");

        // Idempotent: reloading without new input shows the same buffer.
        let again = h.store.load_flow_state("c1").await.unwrap().unwrap();
        assert_eq!(again.digit_buffer, "123");
    }

    #[tokio::test]
    async fn completing_last_step_terminates_with_final_message() {
        let h = harness(None).await;
        seed(&h, "c1", code_flow(), false).await;

        assert!(h.sequencer.on_digits("c1", "123").await.is_empty());
        let ncco = h.sequencer.on_digits("c1", "456").await;
        assert_eq!(ncco, vec![Instruction::talk("Goodbye", "Joey", "en-US")]);

        // Terminal: flow state cleared exactly once, session row kept.
        assert!(h.store.load_flow_state("c1").await.unwrap().is_none());
        assert!(h.store.get_session("c1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn digits_after_termination_get_expired_message() {
        let h = harness(None).await;
        seed(&h, "c1", code_flow(), false).await;
        h.sequencer.on_digits("c1", "123456").await;

        let ncco = h.sequencer.on_digits("c1", "9").await;
        assert_eq!(
            ncco,
            vec![Instruction::talk("Session expired.", "Joey", "en-US")]
        );

        // No writes after expiry: the audit trail still has only the
        // digits received while the flow was live.
        let events = h.store.digit_events("c1").await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].digits, "123456");
    }

    #[tokio::test]
    async fn mid_flow_advance_emits_next_prompt_and_input() {
        let h = harness(None).await;
        seed(&h, "c1", two_step_flow(), false).await;

        let ncco = h.sequencer.on_digits("c1", "1234").await;
        assert_eq!(ncco.len(), 2);
        assert_eq!(
            ncco[0],
            Instruction::talk("Press 1 to confirm", "Joey", "en-US")
        );
        assert_eq!(
            ncco[1],
            Instruction::input("http://example.test/callbacks/dtmf/c1", 1, 30)
        );

        let state = h.store.load_flow_state("c1").await.unwrap().unwrap();
        assert_eq!(state.current_step, 1);
        assert!(state.digit_buffer.is_empty());
    }

    #[tokio::test]
    async fn excess_digits_satisfy_step_without_spill() {
        let h = harness(None).await;
        seed(&h, "c1", two_step_flow(), false).await;

        // 6 digits against an expected 4: the step completes, nothing
        // spills into the next step's buffer.
        let ncco = h.sequencer.on_digits("c1", "123456").await;
        assert_eq!(ncco.len(), 2);

        let state = h.store.load_flow_state("c1").await.unwrap().unwrap();
        assert_eq!(state.current_step, 1);
        assert!(state.digit_buffer.is_empty());
    }

    #[tokio::test]
    async fn every_digit_callback_appends_exactly_one_event() {
        let h = harness(None).await;
        seed(&h, "c1", code_flow(), false).await;

        h.sequencer.on_digits("c1", "12").await;
        h.sequencer.on_digits("c1", "34").await;
        h.sequencer.on_digits("c1", "56").await;

        let events = h.store.digit_events("c1").await.unwrap();
        let digits: Vec<&str> = events.iter().map(|e| e.digits.as_str()).collect();
        assert_eq!(digits, ["12", "34", "56"]);
    }

    #[tokio::test]
    async fn digit_events_are_broadcast_live() {
        let h = harness(None).await;
        seed(&h, "c1", code_flow(), false).await;

        let mut rx = h.monitor.subscribe();
        h.sequencer.on_digits("c1", "7").await;

        match rx.recv().await.unwrap() {
            MonitorEvent::Digit {
                call_id, digits, ..
            } => {
                assert_eq!(call_id, "c1");
                assert_eq!(digits, "7");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn termination_enqueues_completion_webhook() {
        let h = harness(Some("http://partner.test/hook")).await;
        seed(&h, "c1", code_flow(), false).await;

        h.sequencer.on_digits("c1", "123456").await;

        let due = h.store.due_webhooks(Utc::now(), 10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].kind, "call.completed");
        assert_eq!(due[0].status, WebhookStatus::Pending);
        assert_eq!(due[0].payload["call_id"], "c1");
    }

    #[tokio::test]
    async fn exact_total_digits_walk_the_whole_flow() {
        // Exactly the expected digits per step walk the call to the end.
        let h = harness(None).await;
        seed(&h, "c1", two_step_flow(), false).await;

        assert_eq!(h.sequencer.on_digits("c1", "1234").await.len(), 2);
        let ncco = h.sequencer.on_digits("c1", "1").await;
        assert_eq!(
            ncco,
            vec![Instruction::talk("Thank you. Goodbye.", "Joey", "en-US")]
        );
        assert!(h.store.load_flow_state("c1").await.unwrap().is_none());
    }
}
