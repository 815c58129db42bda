use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use helpline_core::clock::{Clock, SystemClock};
use helpline_core::domain::session::{Session, SessionKey};
use helpline_core::domain::ticket::{NewTicket, Ticket, TicketId, TicketPatch};

use super::{session_expiry, RepositoryError, SessionStore, TicketRepository};

/// Ticket store held in process memory. `set_available(false)` simulates an outage.
pub struct InMemoryTicketRepository {
    tickets: RwLock<HashMap<String, Ticket>>,
    available: AtomicBool,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryTicketRepository {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl InMemoryTicketRepository {
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { tickets: RwLock::new(HashMap::new()), available: AtomicBool::new(true), clock }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.tickets.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn ensure_available(&self) -> Result<(), RepositoryError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RepositoryError::Unavailable("in-memory ticket store is offline".to_string()))
        }
    }
}

#[async_trait::async_trait]
impl TicketRepository for InMemoryTicketRepository {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn create(&self, ticket: NewTicket) -> Result<Ticket, RepositoryError> {
        self.ensure_available()?;
        ticket.validate()?;
        let ticket = ticket.into_ticket(TicketId::mint_primary(), self.clock.now());
        let mut tickets = self.tickets.write().await;
        tickets.insert(ticket.id.0.clone(), ticket.clone());
        Ok(ticket)
    }

    async fn find_by_id(&self, id: &TicketId) -> Result<Option<Ticket>, RepositoryError> {
        self.ensure_available()?;
        let tickets = self.tickets.read().await;
        Ok(tickets.get(&id.0).cloned())
    }

    async fn update(
        &self,
        id: &TicketId,
        patch: TicketPatch,
    ) -> Result<Option<Ticket>, RepositoryError> {
        self.ensure_available()?;
        let mut tickets = self.tickets.write().await;
        let Some(ticket) = tickets.get_mut(&id.0) else {
            return Ok(None);
        };
        ticket.apply_patch(patch, self.clock.now())?;
        Ok(Some(ticket.clone()))
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        self.ensure_available()
    }
}

/// Expiring session map. Also the per-call stand-in when the session backend is down.
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<SessionKey, (Session, DateTime<Utc>)>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl InMemorySessionStore {
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { sessions: RwLock::new(HashMap::new()), clock }
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn load(&self, key: &SessionKey) -> Result<Option<Session>, RepositoryError> {
        let now = self.clock.now();
        {
            let sessions = self.sessions.read().await;
            match sessions.get(key) {
                None => return Ok(None),
                Some((session, expires_at)) if *expires_at > now => {
                    return Ok(Some(session.clone()))
                }
                Some(_) => {}
            }
        }

        let mut sessions = self.sessions.write().await;
        if sessions.get(key).is_some_and(|(_, expires_at)| *expires_at <= now) {
            sessions.remove(key);
        }
        Ok(None)
    }

    async fn save(&self, session: &Session, ttl: Duration) -> Result<(), RepositoryError> {
        let expires_at = session_expiry(self.clock.now(), ttl);
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.key.clone(), (session.clone(), expires_at));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use helpline_core::clock::{Clock, ManualClock};
    use helpline_core::domain::session::{Session, SessionKey};
    use helpline_core::domain::ticket::{NewTicket, TicketPatch, TicketSource, TicketStatus};

    use super::{InMemorySessionStore, InMemoryTicketRepository};
    use crate::repositories::{RepositoryError, SessionStore, TicketRepository};

    #[tokio::test]
    async fn in_memory_ticket_repo_round_trip_and_outage() {
        let repo = InMemoryTicketRepository::default();
        let ticket = repo
            .create(NewTicket::new("How do I create a page?", "a@b.com", TicketSource::Api))
            .await
            .expect("create");
        assert_eq!(repo.find_by_id(&ticket.id).await.expect("find"), Some(ticket.clone()));

        let updated = repo
            .update(&ticket.id, TicketPatch::default().status(TicketStatus::NeedsInfo))
            .await
            .expect("update")
            .expect("exists");
        assert_eq!(updated.status, TicketStatus::NeedsInfo);

        repo.set_available(false);
        assert!(matches!(repo.ping().await, Err(RepositoryError::Unavailable(_))));
        assert!(repo.find_by_id(&ticket.id).await.is_err());
        assert_eq!(repo.len().await, 1);
    }

    #[tokio::test]
    async fn sessions_expire_after_ttl() {
        let clock = ManualClock::default();
        let store = InMemorySessionStore::with_clock(Arc::new(clock.clone()));
        let session = Session::new_chat(SessionKey::chat("whatsapp", "+1555"), clock.now());

        store.save(&session, Duration::seconds(86_400)).await.expect("save");
        clock.advance(Duration::seconds(86_399));
        assert_eq!(store.load(&session.key).await.expect("load"), Some(session.clone()));

        clock.advance(Duration::seconds(1));
        assert_eq!(store.load(&session.key).await.expect("load expired"), None);
    }

    #[tokio::test]
    async fn saving_again_refreshes_the_ttl() {
        let clock = ManualClock::default();
        let store = InMemorySessionStore::with_clock(Arc::new(clock.clone()));
        let mut session = Session::new_call(SessionKey::call("CA1"), None, clock.now());

        store.save(&session, Duration::seconds(60)).await.expect("save");
        clock.advance(Duration::seconds(50));
        session.push_user("my vpn drops", clock.now());
        store.save(&session, Duration::seconds(60)).await.expect("save again");
        clock.advance(Duration::seconds(50));

        let loaded = store.load(&session.key).await.expect("load").expect("still live");
        assert_eq!(loaded.transcript.len(), 1);
    }

    #[tokio::test]
    async fn oversized_ttl_saves_without_overflow() {
        let clock = ManualClock::default();
        let store = InMemorySessionStore::with_clock(Arc::new(clock.clone()));
        let session = Session::new_chat(SessionKey::chat("sms", "+1556"), clock.now());

        store.save(&session, Duration::days(200_000_000)).await.expect("save");
        clock.advance(Duration::days(3_650));
        assert_eq!(store.load(&session.key).await.expect("load"), Some(session));
    }
}
