//! Support agent runtime.
//!
//! Composes the stores in `helpline-db` with the language-model capabilities
//! into the three conversation surfaces:
//!
//! - [`runtime::SupportRuntime`] answers one-shot requests (API, email).
//! - [`conversation::ChatConversation`] drives multi-turn chat sessions.
//! - [`voice::CallHandler`] drives the phone menu.
//!
//! The model only classifies and writes replies. Ticket status, escalation and
//! fallback replies are decided here.

pub mod conversation;
pub mod guardrails;
pub mod llm;
pub mod locks;
pub mod runtime;
pub mod voice;

pub use conversation::{
    ChatConversation, ChatDependencies, ChatReply, Notifier, TracingNotifier, VisualAidProvider,
};
pub use guardrails::{GuardrailDecision, GuardrailPolicy, SupportRequest, ValidatedRequest};
pub use llm::{IntentClassifier, OpenAiCompatibleClient, ReplyGenerator};
pub use runtime::{EmailOutcome, InboundEmail, SupportReply, SupportRuntime};
pub use voice::{CallHandler, CallResponse};
