//! Ticket store that tries the primary backend first and the file store second.
//!
//! Backend selection happens on every call, so a primary that comes back is
//! used again on the next operation. Identifiers minted by the file store
//! (`local-*`) only ever live there and skip the primary entirely.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, warn};

use helpline_core::domain::ticket::{NewTicket, Ticket, TicketId, TicketPatch};

use super::{RepositoryError, TicketRepository};

enum Attempt<T> {
    Settled(Result<T, RepositoryError>),
    FellThrough(RepositoryError),
}

pub struct FallbackTicketStore {
    primary: Option<Arc<dyn TicketRepository>>,
    fallback: Arc<dyn TicketRepository>,
    primary_timeout: Duration,
}

impl FallbackTicketStore {
    pub fn new(
        primary: Option<Arc<dyn TicketRepository>>,
        fallback: Arc<dyn TicketRepository>,
        primary_timeout: Duration,
    ) -> Self {
        Self { primary, fallback, primary_timeout }
    }

    pub fn has_primary(&self) -> bool {
        self.primary.is_some()
    }

    /// Whether the primary answers a ping in time. False when none is configured.
    pub async fn primary_reachable(&self) -> bool {
        match &self.primary {
            Some(primary) => {
                matches!(tokio::time::timeout(self.primary_timeout, primary.ping()).await, Ok(Ok(())))
            }
            None => false,
        }
    }

    pub async fn fallback_reachable(&self) -> bool {
        self.fallback.ping().await.is_ok()
    }

    async fn attempt_primary<T, F>(&self, operation: &'static str, call: F) -> Attempt<T>
    where
        F: Future<Output = Result<T, RepositoryError>>,
    {
        match tokio::time::timeout(self.primary_timeout, call).await {
            Ok(Ok(value)) => Attempt::Settled(Ok(value)),
            Ok(Err(RepositoryError::Domain(domain))) => {
                Attempt::Settled(Err(RepositoryError::Domain(domain)))
            }
            Ok(Err(primary_error)) => {
                warn!(
                    event_name = "persistence.ticket.primary_failed",
                    operation,
                    error = %primary_error,
                    "primary ticket store failed; using file fallback"
                );
                Attempt::FellThrough(primary_error)
            }
            Err(_) => {
                let millis = self.primary_timeout.as_millis() as u64;
                if operation == "create" || operation == "update" {
                    warn!(
                        event_name = "persistence.ticket.primary_timeout",
                        operation,
                        timeout_ms = millis,
                        "primary write timed out and may still land; possible duplicate"
                    );
                } else {
                    warn!(
                        event_name = "persistence.ticket.primary_timeout",
                        operation,
                        timeout_ms = millis,
                        "primary read timed out; using file fallback"
                    );
                }
                Attempt::FellThrough(RepositoryError::Timeout { operation, millis })
            }
        }
    }

    async fn run_fallback<T, F>(
        &self,
        operation: &'static str,
        primary_error: Option<RepositoryError>,
        call: F,
    ) -> Result<T, RepositoryError>
    where
        F: Future<Output = Result<T, RepositoryError>>,
    {
        match call.await {
            Ok(value) => Ok(value),
            Err(RepositoryError::Domain(domain)) => Err(RepositoryError::Domain(domain)),
            Err(fallback_error) => match primary_error {
                Some(primary_error) => {
                    error!(
                        event_name = "persistence.ticket.double_failure",
                        operation,
                        primary_error = %primary_error,
                        fallback_error = %fallback_error,
                        "both ticket stores failed"
                    );
                    Err(primary_error)
                }
                None => {
                    error!(
                        event_name = "persistence.ticket.fallback_failed",
                        operation,
                        error = %fallback_error,
                        "file ticket store failed"
                    );
                    Err(fallback_error)
                }
            },
        }
    }
}

#[async_trait::async_trait]
impl TicketRepository for FallbackTicketStore {
    fn backend(&self) -> &'static str {
        "fallback"
    }

    async fn create(&self, ticket: NewTicket) -> Result<Ticket, RepositoryError> {
        ticket.validate()?;

        let mut primary_error = None;
        if let Some(primary) = &self.primary {
            match self.attempt_primary("create", primary.create(ticket.clone())).await {
                Attempt::Settled(result) => return result,
                Attempt::FellThrough(error) => primary_error = Some(error),
            }
        }
        self.run_fallback("create", primary_error, self.fallback.create(ticket)).await
    }

    async fn find_by_id(&self, id: &TicketId) -> Result<Option<Ticket>, RepositoryError> {
        let mut primary_error = None;
        if let Some(primary) = self.primary.as_ref().filter(|_| !id.is_local()) {
            match self.attempt_primary("find_by_id", primary.find_by_id(id)).await {
                Attempt::Settled(result) => return result,
                Attempt::FellThrough(error) => primary_error = Some(error),
            }
        }
        self.run_fallback("find_by_id", primary_error, self.fallback.find_by_id(id)).await
    }

    async fn update(
        &self,
        id: &TicketId,
        patch: TicketPatch,
    ) -> Result<Option<Ticket>, RepositoryError> {
        let mut primary_error = None;
        if let Some(primary) = self.primary.as_ref().filter(|_| !id.is_local()) {
            match self.attempt_primary("update", primary.update(id, patch.clone())).await {
                Attempt::Settled(result) => return result,
                Attempt::FellThrough(error) => primary_error = Some(error),
            }
        }
        self.run_fallback("update", primary_error, self.fallback.update(id, patch)).await
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        match &self.primary {
            Some(primary) => match tokio::time::timeout(self.primary_timeout, primary.ping()).await {
                Ok(result) => result,
                Err(_) => Err(RepositoryError::Timeout {
                    operation: "ping",
                    millis: self.primary_timeout.as_millis() as u64,
                }),
            },
            None => self.fallback.ping().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tempfile::TempDir;

    use helpline_core::domain::ticket::{
        Intent, NewTicket, Ticket, TicketId, TicketPatch, TicketSource, TicketStatus,
    };
    use helpline_core::errors::DomainError;

    use super::FallbackTicketStore;
    use crate::repositories::{
        InMemoryTicketRepository, JsonFileTicketRepository, RepositoryError, TicketRepository,
    };

    struct StalledRepository;

    #[async_trait::async_trait]
    impl TicketRepository for StalledRepository {
        fn backend(&self) -> &'static str {
            "stalled"
        }

        async fn create(&self, _ticket: NewTicket) -> Result<Ticket, RepositoryError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Err(RepositoryError::Unavailable("stalled".to_string()))
        }

        async fn find_by_id(&self, _id: &TicketId) -> Result<Option<Ticket>, RepositoryError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(None)
        }

        async fn update(
            &self,
            _id: &TicketId,
            _patch: TicketPatch,
        ) -> Result<Option<Ticket>, RepositoryError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(None)
        }

        async fn ping(&self) -> Result<(), RepositoryError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    fn file_store(dir: &TempDir) -> Arc<JsonFileTicketRepository> {
        Arc::new(JsonFileTicketRepository::new(dir.path().join("tickets.json")))
    }

    fn sample() -> NewTicket {
        NewTicket::new("How do I create a page?", "a@b.com", TicketSource::Api)
    }

    #[tokio::test]
    async fn healthy_primary_owns_the_ticket() {
        let dir = TempDir::new().expect("tempdir");
        let primary = Arc::new(InMemoryTicketRepository::default());
        let fallback = file_store(&dir);
        let store =
            FallbackTicketStore::new(Some(primary.clone()), fallback.clone(), Duration::from_secs(1));

        let created = store.create(sample()).await.expect("create");
        assert!(!created.id.is_local());
        assert_eq!(primary.len().await, 1);
        assert_eq!(fallback.count().await.expect("count"), 0);

        let updated = store
            .update(
                &created.id,
                TicketPatch::default().status(TicketStatus::Processed).intent(Intent::NotionBasics),
            )
            .await
            .expect("update")
            .expect("exists");
        assert_eq!(updated.status, TicketStatus::Processed);
        assert_eq!(updated.intent, Some(Intent::NotionBasics));
        assert!(updated.updated_at > updated.created_at);
    }

    #[tokio::test]
    async fn unreachable_primary_falls_back_per_call_and_recovers() {
        let dir = TempDir::new().expect("tempdir");
        let primary = Arc::new(InMemoryTicketRepository::default());
        let fallback = file_store(&dir);
        let store =
            FallbackTicketStore::new(Some(primary.clone()), fallback.clone(), Duration::from_secs(1));

        primary.set_available(false);
        let local = store.create(sample()).await.expect("create on fallback");
        assert!(local.id.is_local());
        assert_eq!(store.find_by_id(&local.id).await.expect("find"), Some(local.clone()));

        primary.set_available(true);
        let remote = store.create(sample()).await.expect("create on primary");
        assert!(!remote.id.is_local());

        let updated = store
            .update(&local.id, TicketPatch::default().ai_reply("Use the New page button"))
            .await
            .expect("update local ticket")
            .expect("exists");
        assert_eq!(updated.ai_reply.as_deref(), Some("Use the New page button"));
        assert_eq!(fallback.count().await.expect("count"), 1);
        assert_eq!(primary.len().await, 1);
    }

    #[tokio::test]
    async fn no_primary_configured_uses_file_store() {
        let dir = TempDir::new().expect("tempdir");
        let store = FallbackTicketStore::new(None, file_store(&dir), Duration::from_secs(1));

        let created = store.create(sample()).await.expect("create");
        assert!(created.id.is_local());
        assert!(!store.has_primary());
        assert!(!store.primary_reachable().await);
        store.ping().await.expect("file store ping");
    }

    #[tokio::test]
    async fn stalled_primary_times_out_into_fallback() {
        let dir = TempDir::new().expect("tempdir");
        let store = FallbackTicketStore::new(
            Some(Arc::new(StalledRepository)),
            file_store(&dir),
            Duration::from_millis(50),
        );

        let created = store.create(sample()).await.expect("create through timeout");
        assert!(created.id.is_local());
        assert!(matches!(store.ping().await, Err(RepositoryError::Timeout { operation: "ping", .. })));
    }

    #[tokio::test]
    async fn double_failure_surfaces_the_primary_error() {
        let dir = TempDir::new().expect("tempdir");
        let blocked = dir.path().join("not-a-dir");
        std::fs::write(&blocked, "occupied").expect("write blocker");

        let primary = Arc::new(InMemoryTicketRepository::default());
        primary.set_available(false);
        let fallback = Arc::new(JsonFileTicketRepository::new(blocked.join("tickets.json")));
        let store = FallbackTicketStore::new(Some(primary), fallback, Duration::from_secs(1));

        let error = store.create(sample()).await.expect_err("both stores fail");
        assert!(matches!(error, RepositoryError::Unavailable(_)));
    }

    #[tokio::test]
    async fn validation_errors_never_reach_the_fallback() {
        let dir = TempDir::new().expect("tempdir");
        let primary = Arc::new(InMemoryTicketRepository::default());
        let fallback = file_store(&dir);
        let store = FallbackTicketStore::new(Some(primary), fallback.clone(), Duration::from_secs(1));

        let error = store
            .create(NewTicket::new("", "a@b.com", TicketSource::Email))
            .await
            .expect_err("query required");
        assert!(matches!(error, RepositoryError::Domain(DomainError::MissingField("query"))));
        assert_eq!(fallback.count().await.expect("count"), 0);
    }
}
