use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use helpline_core::clock::{Clock, SystemClock};
use helpline_core::domain::ticket::{NewTicket, Ticket, TicketId, TicketPatch};

use super::{RepositoryError, TicketRepository};

/// Ticket collection stored as one JSON array on disk.
///
/// Every operation reads the whole file, mutates in memory and writes the whole
/// file back. One mutex covers the full read-modify-write so concurrent updates
/// cannot overwrite each other.
pub struct JsonFileTicketRepository {
    path: PathBuf,
    clock: Arc<dyn Clock>,
    collection: Mutex<()>,
}

impl JsonFileTicketRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_clock(path, Arc::new(SystemClock))
    }

    pub fn with_clock(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self { path: path.into(), clock, collection: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn count(&self) -> Result<usize, RepositoryError> {
        let _guard = self.collection.lock().await;
        Ok(read_collection(&self.path).await?.len())
    }
}

#[async_trait::async_trait]
impl TicketRepository for JsonFileTicketRepository {
    fn backend(&self) -> &'static str {
        "json-file"
    }

    async fn create(&self, ticket: NewTicket) -> Result<Ticket, RepositoryError> {
        ticket.validate()?;

        let _guard = self.collection.lock().await;
        let mut tickets = read_collection(&self.path).await?;
        let ticket = ticket.into_ticket(TicketId::mint_local(self.clock.now()), self.clock.now());
        tickets.push(ticket.clone());
        write_collection(&self.path, &tickets).await?;

        debug!(
            event_name = "persistence.ticket.file_created",
            ticket_id = %ticket.id,
            collection_size = tickets.len(),
            "ticket written to file store"
        );
        Ok(ticket)
    }

    async fn find_by_id(&self, id: &TicketId) -> Result<Option<Ticket>, RepositoryError> {
        let _guard = self.collection.lock().await;
        let tickets = read_collection(&self.path).await?;
        Ok(tickets.into_iter().find(|ticket| &ticket.id == id))
    }

    async fn update(
        &self,
        id: &TicketId,
        patch: TicketPatch,
    ) -> Result<Option<Ticket>, RepositoryError> {
        let _guard = self.collection.lock().await;
        let mut tickets = read_collection(&self.path).await?;
        let Some(ticket) = tickets.iter_mut().find(|ticket| &ticket.id == id) else {
            return Ok(None);
        };

        ticket.apply_patch(patch, self.clock.now())?;
        let updated = ticket.clone();
        write_collection(&self.path, &tickets).await?;
        Ok(Some(updated))
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        let _guard = self.collection.lock().await;
        read_collection(&self.path).await.map(|_| ())
    }
}

async fn read_collection(path: &Path) -> Result<Vec<Ticket>, RepositoryError> {
    match tokio::fs::read(path).await {
        Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Vec::new()),
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(Vec::new()),
        Err(error) => Err(error.into()),
    }
}

/// Writes to a sibling temp file and renames it over the target, so a crash
/// mid-write never leaves a truncated collection.
pub(crate) async fn write_collection<T>(path: &Path, items: &[T]) -> Result<(), RepositoryError>
where
    T: serde::Serialize,
{
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let payload = serde_json::to_vec_pretty(items)?;
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);

    tokio::fs::write(&temp, payload).await?;
    tokio::fs::rename(&temp, path).await?;
    Ok(())
}
