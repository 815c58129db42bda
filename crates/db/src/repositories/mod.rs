use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use thiserror::Error;

use helpline_core::domain::session::{Session, SessionKey};
use helpline_core::domain::ticket::{NewTicket, Ticket, TicketId, TicketPatch};
use helpline_core::errors::{ApplicationError, DomainError};

pub mod fallback;
pub mod file;
pub mod memory;
pub mod session;
pub mod ticket;

pub use fallback::FallbackTicketStore;
pub use file::JsonFileTicketRepository;
pub use memory::{InMemorySessionStore, InMemoryTicketRepository};
pub use session::SqlSessionStore;
pub use ticket::SqlTicketRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("{operation} timed out after {millis} ms")]
    Timeout { operation: &'static str, millis: u64 },
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("remote index error: {0}")]
    Http(String),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Domain(error) => Self::Domain(error),
            other => Self::Persistence(other.to_string()),
        }
    }
}

#[async_trait]
pub trait TicketRepository: Send + Sync {
    /// Short backend label used in logs and health output.
    fn backend(&self) -> &'static str;

    async fn create(&self, ticket: NewTicket) -> Result<Ticket, RepositoryError>;

    async fn find_by_id(&self, id: &TicketId) -> Result<Option<Ticket>, RepositoryError>;

    /// Merges `patch` into the stored ticket. `Ok(None)` when the id is unknown.
    async fn update(
        &self,
        id: &TicketId,
        patch: TicketPatch,
    ) -> Result<Option<Ticket>, RepositoryError>;

    async fn ping(&self) -> Result<(), RepositoryError>;
}

/// Expiring key-value store for conversation sessions. Expired entries read as absent.
#[async_trait]
pub trait SessionStore: Send + Sync {
    fn backend(&self) -> &'static str;

    async fn load(&self, key: &SessionKey) -> Result<Option<Session>, RepositoryError>;

    async fn save(&self, session: &Session, ttl: Duration) -> Result<(), RepositoryError>;
}

/// `now + ttl`, saturating at the last instant with a four-digit RFC 3339 year.
pub(crate) fn session_expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    let ceiling = NaiveDate::from_ymd_opt(9999, 12, 31)
        .and_then(|day| day.and_hms_opt(23, 59, 59))
        .map(|at| at.and_utc())
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    now.checked_add_signed(ttl).map_or(ceiling, |at| at.min(ceiling))
}

#[cfg(test)]
mod tests {
    use helpline_core::errors::{ApplicationError, DomainError};

    use super::RepositoryError;

    #[test]
    fn domain_errors_keep_their_kind_at_the_application_layer() {
        let error = ApplicationError::from(RepositoryError::Domain(DomainError::MissingField("email")));
        assert_eq!(error, ApplicationError::Domain(DomainError::MissingField("email")));

        let error = ApplicationError::from(RepositoryError::Timeout { operation: "create", millis: 50 });
        assert!(matches!(error, ApplicationError::Persistence(ref message) if message.contains("create")));
    }
}
