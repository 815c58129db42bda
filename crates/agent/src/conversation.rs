//! Multi-turn chat driver.
//!
//! A turn loads (or lazily creates) the session, appends the user entry,
//! resolves the intent once per session, retrieves documentation, generates a
//! reply, handles the control markers the generator may emit and appends the
//! assistant entry. Session backend failures never fail the turn.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use serde::Serialize;
use tracing::{info, warn};

use helpline_core::cache::SupportCache;
use helpline_core::clock::Clock;
use helpline_core::domain::session::{Session, SessionKey};
use helpline_core::domain::ticket::Intent;
use helpline_core::errors::CapabilityError;
use helpline_core::retrieval::Retriever;
use helpline_db::repositories::SessionStore;

use crate::llm::{IntentClassifier, ReplyGenerator};
use crate::locks::SessionLocks;

pub const VISUAL_AID_MARKER: &str = "[NEED_SCREENSHOTS]";
pub const ESCALATION_MARKER: &str = "[ESCALATE]";
pub const ESCALATION_NOTICE: &str =
    "I'm transferring you to a human agent who will assist you shortly. Thank you for your patience.";

const CHAT_CONTEXT: &str = "You are a helpful customer support agent for Notion. Keep replies short \
and friendly for a messaging app. If you need screenshots or visual guides, include \
[NEED_SCREENSHOTS] in your response. If you cannot help, include [ESCALATE] in your response.";

const GENERATION_FALLBACK: &str =
    "Sorry, I'm having trouble answering right now. Please try again in a few minutes.";

/// Out-of-band message to the user, e.g. the escalation notice.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, key: &SessionKey, message: &str) -> Result<(), CapabilityError>;
}

/// Logs outbound notices instead of delivering them; used when no messaging transport is wired.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, key: &SessionKey, message: &str) -> Result<(), CapabilityError> {
        info!(
            event_name = "agent.chat.notification",
            correlation_id = key.as_str(),
            session_key = %key,
            notice = message,
            "notification recorded"
        );
        Ok(())
    }
}

/// Produces visual material (screenshot references) for an intent.
#[async_trait]
pub trait VisualAidProvider: Send + Sync {
    async fn capture(&self, intent: Intent, key: &SessionKey) -> Result<Vec<String>, CapabilityError>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChatReply {
    pub session_key: SessionKey,
    pub reply: String,
    pub intent: Intent,
    pub attachments: Vec<String>,
    pub escalated: bool,
    /// False when the session backend was unavailable and the turn ran on a throwaway session.
    pub persisted: bool,
}

pub struct ChatConversation {
    sessions: Arc<dyn SessionStore>,
    cache: Arc<SupportCache>,
    classifier: Arc<dyn IntentClassifier>,
    generator: Arc<dyn ReplyGenerator>,
    retriever: Arc<dyn Retriever>,
    notifier: Arc<dyn Notifier>,
    visual_aids: Option<Arc<dyn VisualAidProvider>>,
    clock: Arc<dyn Clock>,
    locks: SessionLocks,
    ttl: Duration,
    top_k: usize,
}

pub struct ChatDependencies {
    pub sessions: Arc<dyn SessionStore>,
    pub cache: Arc<SupportCache>,
    pub classifier: Arc<dyn IntentClassifier>,
    pub generator: Arc<dyn ReplyGenerator>,
    pub retriever: Arc<dyn Retriever>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
}

impl ChatConversation {
    pub fn new(dependencies: ChatDependencies, ttl: Duration, top_k: usize) -> Self {
        let ChatDependencies { sessions, cache, classifier, generator, retriever, notifier, clock } =
            dependencies;
        Self {
            sessions,
            cache,
            classifier,
            generator,
            retriever,
            notifier,
            visual_aids: None,
            clock,
            locks: SessionLocks::default(),
            ttl,
            top_k,
        }
    }

    pub fn with_visual_aids(mut self, provider: Arc<dyn VisualAidProvider>) -> Self {
        self.visual_aids = Some(provider);
        self
    }

    pub async fn handle_turn(
        &self,
        transport: &str,
        user_id: &str,
        text: &str,
        correlation_id: &str,
    ) -> ChatReply {
        let key = SessionKey::chat(transport, user_id);
        let _turn = self.locks.acquire(&key).await;

        let (mut session, persistable) = self.load_session(&key, correlation_id).await;
        session.push_user(text, self.clock.now());

        let intent = match session.intent {
            Some(intent) => intent,
            None => {
                let intent = self.resolve_intent(text, &key, correlation_id).await;
                session.intent = Some(intent);
                intent
            }
        };

        let documents = match self.retriever.retrieve(text, self.top_k).await {
            Ok(documents) => documents,
            Err(error) => {
                warn!(
                    event_name = "agent.chat.retrieval_failed",
                    correlation_id,
                    session_key = %key,
                    error = %error,
                    "retrieval failed; generating without documentation"
                );
                Vec::new()
            }
        };

        let history = &session.transcript[..session.transcript.len() - 1];
        let mut reply = match self.generator.generate(text, &documents, history, Some(CHAT_CONTEXT)).await {
            Ok(reply) => reply,
            Err(error) => {
                warn!(
                    event_name = "agent.chat.generation_failed",
                    correlation_id,
                    session_key = %key,
                    error = %error,
                    "generation failed; sending fallback reply"
                );
                GENERATION_FALLBACK.to_string()
            }
        };

        let mut attachments = Vec::new();
        if reply.contains(VISUAL_AID_MARKER) {
            reply = reply.replace(VISUAL_AID_MARKER, "");
            attachments = self.visual_aid(intent, &key, correlation_id).await;
        }

        let escalated = reply.contains(ESCALATION_MARKER);
        if escalated {
            reply = reply.replace(ESCALATION_MARKER, "");
            self.escalate(&key, correlation_id).await;
        }
        let reply = reply.trim().to_string();

        session.push_assistant(reply.clone(), attachments.clone(), self.clock.now());
        if persistable {
            if let Err(error) = self.sessions.save(&session, self.ttl).await {
                warn!(
                    event_name = "agent.chat.session_save_failed",
                    correlation_id,
                    session_key = %key,
                    error = %error,
                    "session save failed; continuity for this session may be lost"
                );
            }
        }

        info!(
            event_name = "agent.chat.turn_completed",
            correlation_id,
            session_key = %key,
            intent = intent.as_str(),
            turns = session.user_turns(),
            escalated,
            "chat turn completed"
        );
        ChatReply { session_key: key, reply, intent, attachments, escalated, persisted: persistable }
    }

    async fn load_session(&self, key: &SessionKey, correlation_id: &str) -> (Session, bool) {
        match self.sessions.load(key).await {
            Ok(Some(session)) => (session, true),
            Ok(None) => (Session::new_chat(key.clone(), self.clock.now()), true),
            Err(error) => {
                warn!(
                    event_name = "agent.chat.session_load_failed",
                    correlation_id,
                    session_key = %key,
                    error = %error,
                    "session backend unavailable; using a transient session"
                );
                (Session::new_chat(key.clone(), self.clock.now()), false)
            }
        }
    }

    async fn resolve_intent(&self, text: &str, key: &SessionKey, correlation_id: &str) -> Intent {
        if let Some(intent) = self.cache.get_intent(text) {
            return intent;
        }
        match self.classifier.classify(text).await {
            Ok(intent) => {
                self.cache.put_intent(text, intent);
                intent
            }
            Err(error) => {
                warn!(
                    event_name = "agent.chat.classification_failed",
                    correlation_id,
                    session_key = %key,
                    error = %error,
                    "classification failed; using intent other"
                );
                Intent::Other
            }
        }
    }

    async fn visual_aid(&self, intent: Intent, key: &SessionKey, correlation_id: &str) -> Vec<String> {
        let Some(provider) = self.visual_aids.as_ref().filter(|_| intent.supports_visual_aid()) else {
            return Vec::new();
        };
        match provider.capture(intent, key).await {
            Ok(attachments) => attachments,
            Err(error) => {
                warn!(
                    event_name = "agent.chat.visual_aid_failed",
                    correlation_id,
                    session_key = %key,
                    error = %error,
                    "visual aid capture failed"
                );
                Vec::new()
            }
        }
    }

    async fn escalate(&self, key: &SessionKey, correlation_id: &str) {
        info!(
            event_name = "agent.chat.escalated",
            correlation_id,
            session_key = %key,
            "escalating conversation to a human agent"
        );
        if let Err(error) = self.notifier.notify(key, ESCALATION_NOTICE).await {
            warn!(
                event_name = "agent.chat.escalation_notice_failed",
                correlation_id,
                session_key = %key,
                error = %error,
                "escalation notice could not be delivered"
            );
        }
    }
}
