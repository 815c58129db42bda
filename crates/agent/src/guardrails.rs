use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use helpline_core::domain::ticket::TicketId;

/// Raw inbound support request as received from a channel.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportRequest {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, alias = "ticketId")]
    pub ticket_id: Option<String>,
    #[serde(default, alias = "userEmail")]
    pub user_email: Option<String>,
}

impl SupportRequest {
    pub fn new(content: impl Into<String>) -> Self {
        Self { content: Some(content.into()), ticket_id: None, user_email: None }
    }

    pub fn with_ticket_id(mut self, ticket_id: impl Into<String>) -> Self {
        self.ticket_id = Some(ticket_id.into());
        self
    }

    pub fn with_user_email(mut self, email: impl Into<String>) -> Self {
        self.user_email = Some(email.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedRequest {
    pub content: String,
    pub ticket_id: TicketId,
    pub user_email: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow(ValidatedRequest),
    Reject { reason_code: &'static str, errors: Vec<String> },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardrailPolicy {
    pub max_content_chars: usize,
}

impl Default for GuardrailPolicy {
    fn default() -> Self {
        Self { max_content_chars: 5_000 }
    }
}

impl GuardrailPolicy {
    /// Validates and sanitizes `request`. The length limit applies to the raw content.
    pub fn evaluate(&self, request: SupportRequest, now: DateTime<Utc>) -> GuardrailDecision {
        let mut errors = Vec::new();

        let content = match request.content.as_deref() {
            None | Some("") => {
                errors.push("Content is required".to_string());
                String::new()
            }
            Some(raw) => {
                if raw.chars().count() > self.max_content_chars {
                    errors.push(format!(
                        "Content is too long (max {} characters)",
                        self.max_content_chars
                    ));
                }
                let sanitized = strip_tags(raw).trim().to_string();
                if sanitized.is_empty() && errors.is_empty() {
                    errors.push("Content is required".to_string());
                }
                sanitized
            }
        };

        let user_email = request.user_email.filter(|email| !email.is_empty());
        if let Some(email) = &user_email {
            if !looks_like_email(email) {
                errors.push("UserEmail must be a valid email address".to_string());
            }
        }

        if !errors.is_empty() {
            return GuardrailDecision::Reject { reason_code: "validation_failed", errors };
        }

        let ticket_id = match request.ticket_id.filter(|id| !id.trim().is_empty()) {
            Some(id) => TicketId(id),
            None => TicketId::mint_request(now),
        };
        GuardrailDecision::Allow(ValidatedRequest { content, ticket_id, user_email })
    }
}

/// Removes `<...>` tags. An unclosed `<` drops the rest of the input.
pub fn strip_tags(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut in_tag = false;
    for ch in input.chars() {
        match (in_tag, ch) {
            (false, '<') => in_tag = true,
            (false, _) => output.push(ch),
            (true, '>') => in_tag = false,
            (true, _) => {}
        }
    }
    output
}

/// `local@domain.tld` with no whitespace and a single `@`.
pub fn looks_like_email(value: &str) -> bool {
    if value.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    domain
        .char_indices()
        .any(|(index, ch)| ch == '.' && index > 0 && index + 1 < domain.len())
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{looks_like_email, strip_tags, GuardrailDecision, GuardrailPolicy, SupportRequest};

    fn allowed(decision: GuardrailDecision) -> super::ValidatedRequest {
        match decision {
            GuardrailDecision::Allow(request) => request,
            GuardrailDecision::Reject { errors, .. } => panic!("expected allow, got {errors:?}"),
        }
    }

    #[test]
    fn html_is_stripped_and_whitespace_trimmed() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("timestamp");
        let request = allowed(
            GuardrailPolicy::default()
                .evaluate(SupportRequest::new("  <b>Template</b> won't <i>duplicate</i>  "), now),
        );
        assert_eq!(request.content, "Template won't duplicate");
        assert_eq!(request.ticket_id.as_str(), format!("ticket-{}", now.timestamp_millis()));
    }

    #[test]
    fn provided_ticket_id_is_kept() {
        let request = allowed(GuardrailPolicy::default().evaluate(
            SupportRequest::new("help").with_ticket_id("T-42").with_user_email("a@b.com"),
            Utc::now(),
        ));
        assert_eq!(request.ticket_id.as_str(), "T-42");
        assert_eq!(request.user_email.as_deref(), Some("a@b.com"));
    }

    #[test]
    fn missing_overlong_and_bad_email_are_rejected_together() {
        let policy = GuardrailPolicy { max_content_chars: 10 };

        let decision = policy.evaluate(SupportRequest::default(), Utc::now());
        assert!(matches!(decision, GuardrailDecision::Reject { ref errors, .. } if errors == &["Content is required"]));

        let decision = policy.evaluate(
            SupportRequest::new("this is far too long").with_user_email("not-an-email"),
            Utc::now(),
        );
        let GuardrailDecision::Reject { reason_code, errors } = decision else {
            panic!("expected reject");
        };
        assert_eq!(reason_code, "validation_failed");
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn content_that_is_only_markup_is_rejected() {
        let decision = GuardrailPolicy::default().evaluate(SupportRequest::new("<br/>  "), Utc::now());
        assert!(matches!(decision, GuardrailDecision::Reject { .. }));
    }

    #[test]
    fn unclosed_tag_swallows_the_remainder() {
        assert_eq!(strip_tags("keep <this is cut"), "keep ");
    }

    #[test]
    fn email_shape() {
        assert!(looks_like_email("a@b.com"));
        assert!(looks_like_email("first.last@sub.example.io"));
        assert!(!looks_like_email("a@b"));
        assert!(!looks_like_email("a@.com"));
        assert!(!looks_like_email("a@b."));
        assert!(!looks_like_email("@b.com"));
        assert!(!looks_like_email("a b@c.com"));
        assert!(!looks_like_email("a@b@c.com"));
    }
}
