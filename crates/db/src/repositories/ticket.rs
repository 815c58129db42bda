use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use helpline_core::clock::{Clock, SystemClock};
use helpline_core::domain::ticket::{
    Intent, NewTicket, Ticket, TicketId, TicketPatch, TicketSource, TicketStatus,
};

use super::{RepositoryError, TicketRepository};
use crate::DbPool;

const TICKET_COLUMNS: &str = "id, query, email, subject, source, status, ai_reply, intent,
     metadata_json, created_at, updated_at";

pub struct SqlTicketRepository {
    pool: DbPool,
    clock: Arc<dyn Clock>,
}

impl SqlTicketRepository {
    pub fn new(pool: DbPool) -> Self {
        Self::with_clock(pool, Arc::new(SystemClock))
    }

    pub fn with_clock(pool: DbPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }
}

#[async_trait::async_trait]
impl TicketRepository for SqlTicketRepository {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn create(&self, ticket: NewTicket) -> Result<Ticket, RepositoryError> {
        ticket.validate()?;
        let ticket = ticket.into_ticket(TicketId::mint_primary(), self.clock.now());

        sqlx::query(
            "INSERT INTO support_ticket (
                id, query, email, subject, source, status, ai_reply, intent,
                metadata_json, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(ticket.id.as_str())
        .bind(&ticket.query)
        .bind(&ticket.email)
        .bind(&ticket.subject)
        .bind(ticket.source.as_str())
        .bind(ticket.status.as_str())
        .bind(&ticket.ai_reply)
        .bind(ticket.intent.map(|intent| intent.as_str()))
        .bind(serde_json::to_string(&ticket.metadata)?)
        .bind(format_timestamp(ticket.created_at))
        .bind(format_timestamp(ticket.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(ticket)
    }

    async fn find_by_id(&self, id: &TicketId) -> Result<Option<Ticket>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {TICKET_COLUMNS} FROM support_ticket WHERE id = ?"))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(ticket_from_row).transpose()
    }

    async fn update(
        &self,
        id: &TicketId,
        patch: TicketPatch,
    ) -> Result<Option<Ticket>, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!("SELECT {TICKET_COLUMNS} FROM support_ticket WHERE id = ?"))
            .bind(id.as_str())
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let mut ticket = ticket_from_row(row)?;
        ticket.apply_patch(patch, self.clock.now())?;

        sqlx::query(
            "UPDATE support_ticket
             SET subject = ?, status = ?, ai_reply = ?, intent = ?, metadata_json = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&ticket.subject)
        .bind(ticket.status.as_str())
        .bind(&ticket.ai_reply)
        .bind(ticket.intent.map(|intent| intent.as_str()))
        .bind(serde_json::to_string(&ticket.metadata)?)
        .bind(format_timestamp(ticket.updated_at))
        .bind(ticket.id.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(ticket))
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn ticket_from_row(row: SqliteRow) -> Result<Ticket, RepositoryError> {
    let source_raw = row.try_get::<String, _>("source")?;
    let source = TicketSource::parse(&source_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown ticket source `{source_raw}`")))?;

    let status_raw = row.try_get::<String, _>("status")?;
    let status = TicketStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown ticket status `{status_raw}`")))?;

    let intent = row
        .try_get::<Option<String>, _>("intent")?
        .map(|value| {
            Intent::parse(&value)
                .ok_or_else(|| RepositoryError::Decode(format!("unknown intent `{value}`")))
        })
        .transpose()?;

    let metadata_raw = row.try_get::<String, _>("metadata_json")?;
    let metadata = serde_json::from_str::<BTreeMap<String, String>>(&metadata_raw)
        .map_err(|error| RepositoryError::Decode(format!("invalid `metadata_json`: {error}")))?;

    Ok(Ticket {
        id: TicketId(row.try_get("id")?),
        query: row.try_get("query")?,
        email: row.try_get("email")?,
        subject: row.try_get("subject")?,
        source,
        status,
        ai_reply: row.try_get("ai_reply")?,
        intent,
        metadata,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

pub(crate) fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use helpline_core::clock::ManualClock;
    use helpline_core::domain::ticket::{
        Intent, NewTicket, TicketId, TicketPatch, TicketSource, TicketStatus,
    };
    use helpline_core::errors::DomainError;

    use super::SqlTicketRepository;
    use crate::migrations;
    use crate::repositories::{RepositoryError, TicketRepository};
    use crate::{connect_with_settings, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    #[tokio::test]
    async fn sql_ticket_round_trips_all_fields() {
        let pool = setup_pool().await;
        let repo = SqlTicketRepository::new(pool.clone());

        let created = repo
            .create(
                NewTicket::new("How do I create a page?", "a@b.com", TicketSource::Email)
                    .with_subject("Pages")
                    .with_metadata("received_at", "2026-03-01T09:00:00Z"),
            )
            .await
            .expect("create ticket");

        assert!(!created.id.is_local());
        assert_eq!(created.status, TicketStatus::Open);

        let found = repo.find_by_id(&created.id).await.expect("find ticket");
        assert_eq!(found, Some(created));

        pool.close().await;
    }

    #[tokio::test]
    async fn sql_update_merges_patch_and_advances_updated_at() {
        let pool = setup_pool().await;
        let clock = ManualClock::default();
        let repo = SqlTicketRepository::with_clock(pool.clone(), Arc::new(clock.clone()));

        let created = repo
            .create(NewTicket::new("How do I create a page?", "a@b.com", TicketSource::Api))
            .await
            .expect("create ticket");

        let updated = repo
            .update(
                &created.id,
                TicketPatch::default().status(TicketStatus::Processed).intent(Intent::NotionBasics),
            )
            .await
            .expect("update ticket")
            .expect("ticket exists");

        assert_eq!(updated.status, TicketStatus::Processed);
        assert_eq!(updated.intent, Some(Intent::NotionBasics));
        assert!(updated.updated_at > updated.created_at);
        assert_eq!(repo.find_by_id(&created.id).await.expect("reload"), Some(updated));

        pool.close().await;
    }

    #[tokio::test]
    async fn sql_unknown_ids_read_as_absent() {
        let pool = setup_pool().await;
        let repo = SqlTicketRepository::new(pool.clone());
        let missing = TicketId("does-not-exist".to_string());

        assert_eq!(repo.find_by_id(&missing).await.expect("find"), None);
        assert_eq!(
            repo.update(&missing, TicketPatch::default().ai_reply("hi")).await.expect("update"),
            None
        );
        repo.ping().await.expect("ping");

        pool.close().await;
    }

    #[tokio::test]
    async fn sql_create_rejects_missing_fields() {
        let pool = setup_pool().await;
        let repo = SqlTicketRepository::new(pool.clone());

        let error = repo
            .create(NewTicket::new("help", " ", TicketSource::Api))
            .await
            .expect_err("email is required");
        assert!(matches!(error, RepositoryError::Domain(DomainError::MissingField("email"))));

        pool.close().await;
    }
}
