//! Request orchestrator: guardrails, response cache, intent resolution,
//! retrieval and generation, with every downstream failure degraded to a
//! canned reply.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use helpline_core::cache::{CachedReply, SupportCache};
use helpline_core::clock::Clock;
use helpline_core::domain::ticket::{Intent, NewTicket, TicketId, TicketPatch, TicketSource, TicketStatus};
use helpline_core::errors::{ApplicationError, InterfaceError};
use helpline_core::retrieval::Retriever;
use helpline_db::repositories::TicketRepository;

use crate::guardrails::{GuardrailDecision, GuardrailPolicy, SupportRequest, ValidatedRequest};
use crate::llm::{IntentClassifier, ReplyGenerator};

pub const REFUND_REPLY: &str = "I see you're asking about a refund. This request has been escalated \
to our billing team who will contact you shortly.";
pub const MISSING_INFO_REPLY: &str = "Thank you for your message. Could you please provide more \
details about your issue so we can better assist you?";
pub const TEMPLATE_FALLBACK_REPLY: &str = "I see you're having trouble with your Notion template. \
Try these steps: 1) Make sure you selected 'Include content' when duplicating. 2) Check your \
internet connection. 3) Clear your browser cache. 4) Try using a different browser. If the issue \
persists, please provide more details about the specific problem you're experiencing.";

/// Generic acknowledgement quoting the start of the request.
pub fn acknowledgement_reply(content: &str) -> String {
    let preview: String = content.chars().take(30).collect();
    format!(
        "Thank you for your message about \"{preview}...\". Our team will review your request and \
         get back to you soon."
    )
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportReply {
    pub ticket_id: TicketId,
    pub reply: String,
    pub status: TicketStatus,
    pub intent: Intent,
    pub remote_index_active: bool,
    pub cached: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEmail {
    pub from: String,
    pub subject: Option<String>,
    pub body: String,
    pub received_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailOutcome {
    pub ticket_id: TicketId,
    pub reply: SupportReply,
    /// False when the reply could not be written back to the ticket.
    pub ticket_updated: bool,
}

pub struct SupportRuntime {
    tickets: Arc<dyn TicketRepository>,
    cache: Arc<SupportCache>,
    classifier: Arc<dyn IntentClassifier>,
    generator: Arc<dyn ReplyGenerator>,
    retriever: Arc<dyn Retriever>,
    clock: Arc<dyn Clock>,
    guardrails: GuardrailPolicy,
    top_k: usize,
}

impl SupportRuntime {
    pub fn new(
        tickets: Arc<dyn TicketRepository>,
        cache: Arc<SupportCache>,
        classifier: Arc<dyn IntentClassifier>,
        generator: Arc<dyn ReplyGenerator>,
        retriever: Arc<dyn Retriever>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tickets,
            cache,
            classifier,
            generator,
            retriever,
            clock,
            guardrails: GuardrailPolicy::default(),
            top_k: 3,
        }
    }

    pub fn with_guardrails(mut self, guardrails: GuardrailPolicy) -> Self {
        self.guardrails = guardrails;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn cache(&self) -> &SupportCache {
        &self.cache
    }

    pub fn tickets(&self) -> &Arc<dyn TicketRepository> {
        &self.tickets
    }

    pub fn retriever(&self) -> &Arc<dyn Retriever> {
        &self.retriever
    }

    pub async fn handle_request(
        &self,
        request: SupportRequest,
        correlation_id: &str,
    ) -> Result<SupportReply, InterfaceError> {
        let started = Instant::now();
        self.cache.begin_request();

        let request = match self.guardrails.evaluate(request, self.clock.now()) {
            GuardrailDecision::Allow(request) => request,
            GuardrailDecision::Reject { reason_code, errors } => {
                self.cache.record_failure();
                warn!(
                    event_name = "agent.request.rejected",
                    correlation_id,
                    reason_code,
                    errors = %errors.join("; "),
                    "support request failed validation"
                );
                return Err(InterfaceError::BadRequest {
                    message: errors.join("; "),
                    correlation_id: correlation_id.to_string(),
                });
            }
        };

        if let Some(cached) = self.cache.get_response(&request.content) {
            self.cache.record_success(started.elapsed());
            info!(
                event_name = "agent.request.cache_hit",
                correlation_id,
                ticket_id = %request.ticket_id,
                "returning cached reply"
            );
            return Ok(SupportReply {
                ticket_id: request.ticket_id,
                reply: cached.reply,
                status: cached.status,
                intent: cached.intent,
                remote_index_active: self.retriever.remote_active(),
                cached: true,
            });
        }

        let intent = self.resolve_intent(&request, correlation_id).await;
        let (reply, status) = match intent {
            Intent::Refund => (REFUND_REPLY.to_string(), TicketStatus::Escalated),
            Intent::MissingInfo => (MISSING_INFO_REPLY.to_string(), TicketStatus::NeedsInfo),
            _ => (self.answer(&request, intent, correlation_id).await, TicketStatus::Processed),
        };

        self.cache.put_response(&request.content, CachedReply { reply: reply.clone(), status, intent });
        self.cache.record_success(started.elapsed());
        info!(
            event_name = "agent.request.handled",
            correlation_id,
            ticket_id = %request.ticket_id,
            intent = intent.as_str(),
            status = status.as_str(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "support request handled"
        );

        Ok(SupportReply {
            ticket_id: request.ticket_id,
            reply,
            status,
            intent,
            remote_index_active: self.retriever.remote_active(),
            cached: false,
        })
    }

    /// Creates an email ticket, answers it and writes the outcome back to the ticket.
    pub async fn process_inbound_email(
        &self,
        email: InboundEmail,
        correlation_id: &str,
    ) -> Result<EmailOutcome, InterfaceError> {
        let mut new_ticket = NewTicket::new(email.body.trim(), email.from.trim(), TicketSource::Email)
            .with_metadata("received_at", email.received_at.to_rfc3339());
        if let Some(subject) = email.subject.filter(|subject| !subject.trim().is_empty()) {
            new_ticket = new_ticket.with_subject(subject);
        }

        let ticket = self.tickets.create(new_ticket).await.map_err(|error| {
            error!(
                event_name = "agent.email.ticket_create_failed",
                correlation_id,
                error = %error,
                "could not create ticket for inbound email"
            );
            ApplicationError::from(error).into_interface(correlation_id)
        })?;

        let reply = self
            .handle_request(
                SupportRequest::new(ticket.query.clone()).with_ticket_id(ticket.id.as_str()),
                correlation_id,
            )
            .await?;

        let patch = TicketPatch::default()
            .ai_reply(reply.reply.clone())
            .intent(reply.intent)
            .status(reply.status);
        let ticket_updated = match self.tickets.update(&ticket.id, patch).await {
            Ok(Some(_)) => true,
            Ok(None) => {
                warn!(
                    event_name = "agent.email.ticket_missing",
                    correlation_id,
                    ticket_id = %ticket.id,
                    "ticket disappeared before the reply was stored"
                );
                false
            }
            Err(error) => {
                warn!(
                    event_name = "agent.email.ticket_update_failed",
                    correlation_id,
                    ticket_id = %ticket.id,
                    error = %error,
                    "reply generated but not stored on the ticket"
                );
                false
            }
        };

        Ok(EmailOutcome { ticket_id: ticket.id, reply, ticket_updated })
    }

    async fn resolve_intent(&self, request: &ValidatedRequest, correlation_id: &str) -> Intent {
        if let Some(intent) = self.cache.get_intent(&request.content) {
            return intent;
        }
        match self.classifier.classify(&request.content).await {
            Ok(intent) => {
                self.cache.put_intent(&request.content, intent);
                intent
            }
            Err(error) => {
                warn!(
                    event_name = "agent.request.classification_failed",
                    correlation_id,
                    ticket_id = %request.ticket_id,
                    error = %error,
                    "classification failed; using intent other"
                );
                Intent::Other
            }
        }
    }

    async fn answer(&self, request: &ValidatedRequest, intent: Intent, correlation_id: &str) -> String {
        let generated = async {
            let documents = self.retriever.retrieve(&request.content, self.top_k).await?;
            let reply = self.generator.generate(&request.content, &documents, &[], None).await?;
            Ok::<_, ApplicationError>(reply)
        }
        .await;

        match generated {
            Ok(reply) => reply,
            Err(error) => {
                warn!(
                    event_name = "agent.request.generation_degraded",
                    correlation_id,
                    ticket_id = %request.ticket_id,
                    intent = intent.as_str(),
                    error = %error,
                    "retrieval or generation failed; using fallback reply"
                );
                if intent == Intent::TemplateIssue {
                    TEMPLATE_FALLBACK_REPLY.to_string()
                } else {
                    acknowledgement_reply(&request.content)
                }
            }
        }
    }
}
