use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;

const LOCAL_ID_PREFIX: &str = "local-";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(pub String);

impl TicketId {
    /// Identifier shape used by the primary store: a bare v4 UUID.
    pub fn mint_primary() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Identifier shape used by the file-backed fallback store. The prefix keeps
    /// it disjoint from primary identifiers.
    pub fn mint_local(now: DateTime<Utc>) -> Self {
        Self(format!("{LOCAL_ID_PREFIX}{}-{}", now.timestamp_millis(), Uuid::new_v4().simple()))
    }

    /// Ad-hoc identifier for requests that arrive without a ticket.
    pub fn mint_request(now: DateTime<Utc>) -> Self {
        Self(format!("ticket-{}", now.timestamp_millis()))
    }

    pub fn is_local(&self) -> bool {
        self.0.starts_with(LOCAL_ID_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TicketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketSource {
    Email,
    Voice,
    Whatsapp,
    Api,
}

impl TicketSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Voice => "voice",
            Self::Whatsapp => "whatsapp",
            Self::Api => "api",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "email" => Some(Self::Email),
            "voice" => Some(Self::Voice),
            "whatsapp" => Some(Self::Whatsapp),
            "api" => Some(Self::Api),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    Processed,
    Escalated,
    NeedsInfo,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Processed => "processed",
            Self::Escalated => "escalated",
            Self::NeedsInfo => "needs_info",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "open" => Some(Self::Open),
            "processed" => Some(Self::Processed),
            "escalated" => Some(Self::Escalated),
            "needs_info" => Some(Self::NeedsInfo),
            _ => None,
        }
    }

    /// Terminal for the automated pipeline. Reopening is a human action.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Processed | Self::Escalated)
    }

    pub fn can_transition_to(&self, next: TicketStatus) -> bool {
        !self.is_terminal() || *self == next
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    TemplateIssue,
    Refund,
    MultiLang,
    MissingInfo,
    NotionBasics,
    VpnConnection,
    ScreenShareIssue,
    Other,
}

impl Intent {
    pub const ALL: [Intent; 8] = [
        Self::TemplateIssue,
        Self::Refund,
        Self::MultiLang,
        Self::MissingInfo,
        Self::NotionBasics,
        Self::VpnConnection,
        Self::ScreenShareIssue,
        Self::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TemplateIssue => "template_issue",
            Self::Refund => "refund",
            Self::MultiLang => "multi_lang",
            Self::MissingInfo => "missing_info",
            Self::NotionBasics => "notion_basics",
            Self::VpnConnection => "vpn_connection",
            Self::ScreenShareIssue => "screen_share_issue",
            Self::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|intent| intent.as_str() == value)
    }

    /// Maps free-form classifier output onto the closed label set.
    pub fn from_label(raw: &str) -> Self {
        let normalized = raw.trim().trim_matches(|c: char| c == '"' || c == '.').to_ascii_lowercase();
        Self::parse(&normalized).unwrap_or(Self::Other)
    }

    /// Intents for which a visual walkthrough can be produced.
    pub fn supports_visual_aid(&self) -> bool {
        matches!(
            self,
            Self::TemplateIssue | Self::VpnConnection | Self::ScreenShareIssue | Self::NotionBasics
        )
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub query: String,
    pub email: String,
    pub subject: Option<String>,
    pub source: TicketSource,
    pub status: TicketStatus,
    pub ai_reply: Option<String>,
    pub intent: Option<Intent>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTicket {
    pub query: String,
    pub email: String,
    pub subject: Option<String>,
    pub source: TicketSource,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl NewTicket {
    pub fn new(query: impl Into<String>, email: impl Into<String>, source: TicketSource) -> Self {
        Self {
            query: query.into(),
            email: email.into(),
            subject: None,
            source,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.query.trim().is_empty() {
            return Err(DomainError::MissingField("query"));
        }
        if self.email.trim().is_empty() {
            return Err(DomainError::MissingField("email"));
        }
        Ok(())
    }

    pub fn into_ticket(self, id: TicketId, now: DateTime<Utc>) -> Ticket {
        Ticket {
            id,
            query: self.query,
            email: self.email,
            subject: self.subject,
            source: self.source,
            status: TicketStatus::Open,
            ai_reply: None,
            intent: None,
            metadata: self.metadata,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketPatch {
    pub status: Option<TicketStatus>,
    pub ai_reply: Option<String>,
    pub intent: Option<Intent>,
    pub subject: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl TicketPatch {
    pub fn status(mut self, status: TicketStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn ai_reply(mut self, reply: impl Into<String>) -> Self {
        self.ai_reply = Some(reply.into());
        self
    }

    pub fn intent(mut self, intent: Intent) -> Self {
        self.intent = Some(intent);
        self
    }
}

impl Ticket {
    /// Merges `patch` into the ticket. `updated_at` always moves strictly forward.
    pub fn apply_patch(&mut self, patch: TicketPatch, now: DateTime<Utc>) -> Result<(), DomainError> {
        if let Some(next) = patch.status {
            if !self.status.can_transition_to(next) {
                return Err(DomainError::InvalidTicketTransition { from: self.status, to: next });
            }
            self.status = next;
        }
        if let Some(reply) = patch.ai_reply {
            self.ai_reply = Some(reply);
        }
        if let Some(intent) = patch.intent {
            self.intent = Some(intent);
        }
        if let Some(subject) = patch.subject {
            self.subject = Some(subject);
        }
        self.metadata.extend(patch.metadata);

        self.updated_at = if now > self.updated_at {
            now
        } else {
            self.updated_at + Duration::microseconds(1)
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{Intent, NewTicket, Ticket, TicketId, TicketPatch, TicketSource, TicketStatus};
    use crate::errors::DomainError;

    fn open_ticket() -> Ticket {
        NewTicket::new("How do I create a page?", "a@b.com", TicketSource::Api)
            .into_ticket(TicketId("T-1".to_string()), Utc::now())
    }

    #[test]
    fn new_ticket_requires_query_and_email() {
        let missing_query = NewTicket::new("   ", "a@b.com", TicketSource::Email);
        assert_eq!(missing_query.validate(), Err(DomainError::MissingField("query")));

        let missing_email = NewTicket::new("help", "", TicketSource::Email);
        assert_eq!(missing_email.validate(), Err(DomainError::MissingField("email")));
    }

    #[test]
    fn patch_merges_fields_and_advances_updated_at() {
        let mut ticket = open_ticket();
        let created_at = ticket.created_at;

        ticket
            .apply_patch(
                TicketPatch::default().status(TicketStatus::Processed).intent(Intent::NotionBasics),
                created_at,
            )
            .expect("open -> processed");

        assert_eq!(ticket.status, TicketStatus::Processed);
        assert_eq!(ticket.intent, Some(Intent::NotionBasics));
        assert!(ticket.updated_at > ticket.created_at);
        assert_eq!(ticket.query, "How do I create a page?");
    }

    #[test]
    fn terminal_status_cannot_reopen() {
        let mut ticket = open_ticket();
        ticket
            .apply_patch(TicketPatch::default().status(TicketStatus::Escalated), Utc::now())
            .expect("open -> escalated");

        let error = ticket
            .apply_patch(TicketPatch::default().status(TicketStatus::Open), Utc::now())
            .expect_err("escalated is terminal");
        assert!(matches!(error, DomainError::InvalidTicketTransition { .. }));
        assert_eq!(ticket.status, TicketStatus::Escalated);
    }

    #[test]
    fn local_and_primary_ids_are_distinguishable() {
        let local = TicketId::mint_local(Utc::now());
        let primary = TicketId::mint_primary();

        assert!(local.is_local());
        assert!(!primary.is_local());
        assert_ne!(TicketId::mint_local(Utc::now()), local);
    }

    #[test]
    fn classifier_labels_fall_back_to_other() {
        assert_eq!(Intent::from_label(" Refund\n"), Intent::Refund);
        assert_eq!(Intent::from_label("\"vpn_connection\""), Intent::VpnConnection);
        assert_eq!(Intent::from_label("billing question"), Intent::Other);
        assert!(Intent::TemplateIssue.supports_visual_aid());
        assert!(!Intent::Refund.supports_visual_aid());
    }
}
