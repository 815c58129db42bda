//! Phone-menu call handler. Each webhook maps to one flow event; the handler
//! loads the call session, applies the transition, executes its actions and
//! saves the session back.

use std::sync::Arc;

use chrono::Duration;
use tracing::{info, warn};

use helpline_core::audit::{AuditContext, AuditSink};
use helpline_core::clock::Clock;
use helpline_core::domain::session::{Session, SessionKey, SessionState};
use helpline_core::errors::{ApplicationError, DomainError};
use helpline_core::flows::{
    CallAction, CallCategory, CallEvent, CallState, FlowEngine, IvrFlow, TransitionOutcome,
};
use helpline_core::retrieval::Retriever;
use helpline_db::repositories::SessionStore;

use crate::llm::ReplyGenerator;
use crate::locks::SessionLocks;

pub const MENU_PROMPT: &str = "Welcome to our support system. Press 1 for technical support, press 2 \
for account issues, or press 3 for other inquiries.";
pub const FOLLOW_UP_PROMPT: &str =
    "Press 1 if you need more help, or press 2 if your issue is resolved.";
const PROCESSING_FALLBACK: &str =
    "We encountered an issue processing your request. Please try again later.";

/// What the telephony layer should do next.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallResponse {
    pub session_key: SessionKey,
    pub state: CallState,
    pub actions: Vec<CallAction>,
    /// Lines to speak, in order.
    pub prompts: Vec<String>,
    pub reply: Option<String>,
    pub duration: Option<Duration>,
}

pub struct CallHandler {
    sessions: Arc<dyn SessionStore>,
    retriever: Arc<dyn Retriever>,
    generator: Arc<dyn ReplyGenerator>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    engine: FlowEngine<IvrFlow>,
    locks: SessionLocks,
    ttl: Duration,
    top_k: usize,
}

impl CallHandler {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        retriever: Arc<dyn Retriever>,
        generator: Arc<dyn ReplyGenerator>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        top_k: usize,
    ) -> Self {
        Self {
            sessions,
            retriever,
            generator,
            audit,
            clock,
            engine: FlowEngine::default(),
            locks: SessionLocks::default(),
            ttl,
            top_k,
        }
    }

    pub async fn start_call(&self, call_sid: &str, caller: Option<&str>) -> CallResponse {
        let key = SessionKey::call(call_sid);
        let _call = self.locks.acquire(&key).await;

        let mut session = Session::new_call(key.clone(), caller.map(str::to_string), self.clock.now());
        session.state = SessionState::Call(self.engine.initial_state());
        self.save(&session, call_sid).await;

        info!(
            event_name = "agent.call.started",
            correlation_id = call_sid,
            session_key = %key,
            "inbound call started"
        );
        CallResponse {
            session_key: key,
            state: CallState::Menu,
            actions: Vec::new(),
            prompts: vec![MENU_PROMPT.to_string()],
            reply: None,
            duration: None,
        }
    }

    /// `digits = None` means the menu gather timed out.
    pub async fn menu_selection(
        &self,
        call_sid: &str,
        digits: Option<&str>,
    ) -> Result<CallResponse, ApplicationError> {
        let key = SessionKey::call(call_sid);
        let _call = self.locks.acquire(&key).await;

        let (mut session, persistable) = self.load_call(&key, CallState::Menu, call_sid).await;
        let outcome = self.transition(&mut session, gather_event(digits), call_sid)?;
        if outcome.category.is_some() {
            session.category = outcome.category;
        }
        session.touch(self.clock.now());
        if persistable {
            self.save(&session, call_sid).await;
        }

        let prompts = outcome.actions.iter().filter_map(spoken_line).collect();
        Ok(CallResponse {
            session_key: key,
            state: outcome.to,
            actions: outcome.actions,
            prompts,
            reply: None,
            duration: None,
        })
    }

    /// Runs retrieval and generation over the caller's transcribed recording.
    pub async fn recording_finished(
        &self,
        call_sid: &str,
        transcription: &str,
    ) -> Result<CallResponse, ApplicationError> {
        let key = SessionKey::call(call_sid);
        let _call = self.locks.acquire(&key).await;

        let (mut session, persistable) = self.load_call(&key, CallState::Recording, call_sid).await;
        let outcome = self.transition(&mut session, CallEvent::RecordingFinished, call_sid)?;
        session.push_user(transcription, self.clock.now());

        let category = session.category.unwrap_or(CallCategory::DEFAULT);
        let reply = self.answer(&session, transcription, category, call_sid).await;
        session.push_assistant(reply.clone(), Vec::new(), self.clock.now());
        if persistable {
            self.save(&session, call_sid).await;
        }

        let mut prompts = vec![reply.clone()];
        prompts.extend(outcome.actions.iter().filter_map(spoken_line));
        Ok(CallResponse {
            session_key: key,
            state: outcome.to,
            actions: outcome.actions,
            prompts,
            reply: Some(reply),
            duration: None,
        })
    }

    /// Follow-up gather after a reply: `1` records again, anything else ends the call.
    pub async fn follow_up(
        &self,
        call_sid: &str,
        digits: Option<&str>,
    ) -> Result<CallResponse, ApplicationError> {
        let key = SessionKey::call(call_sid);
        let _call = self.locks.acquire(&key).await;

        let (mut session, persistable) = self.load_call(&key, CallState::Processing, call_sid).await;
        let outcome = self.transition(&mut session, gather_event(digits), call_sid)?;
        let now = self.clock.now();
        session.touch(now);

        let duration = outcome.actions.contains(&CallAction::ReportCallDuration).then(|| {
            let duration = session.elapsed(now);
            info!(
                event_name = "agent.call.completed",
                correlation_id = call_sid,
                session_key = %key,
                duration_ms = duration.num_milliseconds(),
                "call completed"
            );
            duration
        });
        if persistable {
            self.save(&session, call_sid).await;
        }

        let prompts = outcome.actions.iter().filter_map(spoken_line).collect();
        Ok(CallResponse {
            session_key: key,
            state: outcome.to,
            actions: outcome.actions,
            prompts,
            reply: None,
            duration,
        })
    }

    fn transition(
        &self,
        session: &mut Session,
        event: CallEvent,
        call_sid: &str,
    ) -> Result<TransitionOutcome, ApplicationError> {
        let current = session.call_state().ok_or_else(|| {
            DomainError::InvariantViolation(format!("session {} is not a call session", session.key))
        })?;
        let audit = AuditContext::new(None, Some(session.key.clone()), call_sid, "ivr");
        let outcome = self
            .engine
            .apply_with_audit(&current, &event, self.audit.as_ref(), &audit)
            .map_err(DomainError::from)?;
        session.state = SessionState::Call(outcome.to);
        Ok(outcome)
    }

    async fn answer(
        &self,
        session: &Session,
        transcription: &str,
        category: CallCategory,
        call_sid: &str,
    ) -> String {
        let documents = match self.retriever.retrieve(transcription, self.top_k).await {
            Ok(documents) => documents,
            Err(error) => {
                warn!(
                    event_name = "agent.call.retrieval_failed",
                    correlation_id = call_sid,
                    session_key = %session.key,
                    error = %error,
                    "retrieval failed; answering without documentation"
                );
                Vec::new()
            }
        };

        let context = voice_context(category);
        let history = &session.transcript[..session.transcript.len().saturating_sub(1)];
        match self.generator.generate(transcription, &documents, history, Some(&context)).await {
            Ok(reply) => reply,
            Err(error) => {
                warn!(
                    event_name = "agent.call.generation_failed",
                    correlation_id = call_sid,
                    session_key = %session.key,
                    error = %error,
                    "generation failed; using fallback prompt"
                );
                PROCESSING_FALLBACK.to_string()
            }
        }
    }

    /// A missing or unreadable session is replaced by a fresh one in `expected`
    /// state. Only a lookup that reached the backend allows saving it back.
    async fn load_call(&self, key: &SessionKey, expected: CallState, call_sid: &str) -> (Session, bool) {
        let recovered = |persistable| {
            let mut session = Session::new_call(key.clone(), None, self.clock.now());
            session.state = SessionState::Call(expected);
            (session, persistable)
        };
        match self.sessions.load(key).await {
            Ok(Some(session)) => (session, true),
            Ok(None) => {
                warn!(
                    event_name = "agent.call.session_missing",
                    correlation_id = call_sid,
                    session_key = %key,
                    state = expected.as_str(),
                    "no stored call session; starting a new one"
                );
                recovered(true)
            }
            Err(error) => {
                warn!(
                    event_name = "agent.call.session_load_failed",
                    correlation_id = call_sid,
                    session_key = %key,
                    error = %error,
                    "session backend unavailable; using a transient call session"
                );
                recovered(false)
            }
        }
    }

    async fn save(&self, session: &Session, call_sid: &str) {
        if let Err(error) = self.sessions.save(session, self.ttl).await {
            warn!(
                event_name = "agent.call.session_save_failed",
                correlation_id = call_sid,
                session_key = %session.key,
                error = %error,
                "call session save failed"
            );
        }
    }
}

fn gather_event(digits: Option<&str>) -> CallEvent {
    match digits.map(str::trim).filter(|digits| !digits.is_empty()) {
        Some(digits) => CallEvent::DigitsEntered(digits.to_string()),
        None => CallEvent::GatherTimedOut,
    }
}

fn voice_context(category: CallCategory) -> String {
    format!(
        "You are a helpful customer support agent for {}. Keep your responses concise and clear \
         for voice communication. If you need more information, ask a specific question. If you \
         cannot help, offer to connect to a human agent.",
        category.label()
    )
}

fn spoken_line(action: &CallAction) -> Option<String> {
    let line = match action {
        CallAction::AnnounceCategory(CallCategory::TechnicalSupport) => {
            "You selected technical support. Please describe your issue after the beep."
        }
        CallAction::AnnounceCategory(CallCategory::AccountIssues) => {
            "You selected account support. Please describe your issue after the beep."
        }
        CallAction::AnnounceCategory(CallCategory::GeneralInquiries) => {
            "You selected general inquiries. Please describe your question after the beep."
        }
        CallAction::AnnounceInvalidSelection => {
            "Invalid selection. Please describe your issue after the beep."
        }
        CallAction::PromptFollowUp => FOLLOW_UP_PROMPT,
        CallAction::AskForMoreDetails => "Please provide more details about your issue after the beep.",
        CallAction::ThankAndHangUp => "Thank you for contacting our support. Have a great day!",
        CallAction::StartRecording | CallAction::ProcessRecording | CallAction::ReportCallDuration => {
            return None
        }
    };
    Some(line.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::Duration;

    use helpline_core::audit::InMemoryAuditSink;
    use helpline_core::clock::{Clock, ManualClock};
    use helpline_core::domain::session::{Role, SessionKey, TranscriptEntry};
    use helpline_core::errors::{ApplicationError, CapabilityError, DomainError};
    use helpline_core::flows::{CallAction, CallCategory, CallState, FlowTransitionError};
    use helpline_core::retrieval::Retriever;
    use helpline_db::repositories::{InMemorySessionStore, SessionStore};

    use super::{CallHandler, FOLLOW_UP_PROMPT, MENU_PROMPT};
    use crate::llm::ReplyGenerator;

    struct NoDocs;

    #[async_trait]
    impl Retriever for NoDocs {
        async fn retrieve(&self, _query: &str, _top_k: usize) -> Result<Vec<String>, ApplicationError> {
            Ok(Vec::new())
        }

        fn remote_active(&self) -> bool {
            false
        }
    }

    #[derive(Default)]
    struct ContextEcho {
        contexts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ReplyGenerator for ContextEcho {
        async fn generate(
            &self,
            _query: &str,
            _documents: &[String],
            _history: &[TranscriptEntry],
            context: Option<&str>,
        ) -> Result<String, CapabilityError> {
            if let (Ok(mut contexts), Some(context)) = (self.contexts.lock(), context) {
                contexts.push(context.to_string());
            }
            Ok("Open Settings and choose Members.".to_string())
        }
    }

    struct Fixture {
        handler: CallHandler,
        sessions: Arc<InMemorySessionStore>,
        generator: Arc<ContextEcho>,
        audit: InMemoryAuditSink,
        clock: ManualClock,
    }

    fn fixture() -> Fixture {
        let clock = ManualClock::default();
        let sessions = Arc::new(InMemorySessionStore::with_clock(Arc::new(clock.clone())));
        let generator = Arc::new(ContextEcho::default());
        let audit = InMemoryAuditSink::default();
        let handler = CallHandler::new(
            sessions.clone(),
            Arc::new(NoDocs),
            generator.clone(),
            Arc::new(audit.clone()),
            Arc::new(clock.clone()) as Arc<dyn Clock>,
            Duration::seconds(3_600),
            3,
        );
        Fixture { handler, sessions, generator, audit, clock }
    }

    #[tokio::test]
    async fn full_call_walks_menu_recording_and_completion() {
        let f = fixture();

        let started = f.handler.start_call("CA100", Some("+15550100")).await;
        assert_eq!(started.prompts, vec![MENU_PROMPT.to_string()]);

        let selected = f.handler.menu_selection("CA100", Some("2")).await.expect("menu");
        assert_eq!(selected.state, CallState::Recording);
        assert!(selected.prompts[0].contains("account support"));

        f.clock.advance(Duration::seconds(40));
        let answered = f.handler.recording_finished("CA100", "I can't add a teammate").await.expect("recording");
        assert_eq!(answered.state, CallState::Processing);
        assert_eq!(answered.prompts.last().map(String::as_str), Some(FOLLOW_UP_PROMPT));
        assert!(f.generator.contexts.lock().expect("lock")[0].contains("account issues"));

        let again = f.handler.follow_up("CA100", Some("1")).await.expect("more help");
        assert_eq!(again.state, CallState::Recording);
        assert!(again.duration.is_none());
        f.handler.recording_finished("CA100", "still can't").await.expect("second recording");

        f.clock.advance(Duration::seconds(20));
        let done = f.handler.follow_up("CA100", Some("2")).await.expect("resolved");
        assert_eq!(done.state, CallState::Completed);
        assert!(done.actions.contains(&CallAction::ThankAndHangUp));
        assert_eq!(done.duration, Some(Duration::seconds(60)));

        let session = f.sessions.load(&SessionKey::call("CA100")).await.expect("load").expect("stored");
        assert_eq!(session.caller.as_deref(), Some("+15550100"));
        assert_eq!(session.category, Some(CallCategory::AccountIssues));
        let roles: Vec<Role> = session.transcript.iter().map(|entry| entry.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User, Role::Assistant]);
        assert_eq!(f.audit.events().len(), 5);
    }

    #[tokio::test]
    async fn menu_timeout_defaults_to_technical_support() {
        let f = fixture();
        f.handler.start_call("CA200", None).await;

        let selected = f.handler.menu_selection("CA200", None).await.expect("timeout");
        assert_eq!(selected.state, CallState::Recording);

        let session = f.sessions.load(&SessionKey::call("CA200")).await.expect("load").expect("stored");
        assert_eq!(session.category, Some(CallCategory::TechnicalSupport));
    }

    #[tokio::test]
    async fn events_after_completion_are_rejected() {
        let f = fixture();
        f.handler.start_call("CA300", None).await;
        f.handler.menu_selection("CA300", Some("3")).await.expect("menu");
        f.handler.recording_finished("CA300", "question").await.expect("recording");
        f.handler.follow_up("CA300", Some("2")).await.expect("done");

        let error = f.handler.follow_up("CA300", Some("1")).await.expect_err("terminal");
        assert!(matches!(
            error,
            ApplicationError::Domain(DomainError::FlowTransition(FlowTransitionError::TerminalState { .. }))
        ));
    }

    #[tokio::test]
    async fn recording_without_stored_session_uses_default_category() {
        let f = fixture();

        let answered = f.handler.recording_finished("CA400", "my screen share is black").await.expect("recording");
        assert_eq!(answered.state, CallState::Processing);
        assert!(f.generator.contexts.lock().expect("lock")[0].contains("technical support"));
    }
}
