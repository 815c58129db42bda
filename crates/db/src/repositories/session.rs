use std::sync::Arc;

use chrono::Duration;
use sqlx::Row;

use helpline_core::clock::{Clock, SystemClock};
use helpline_core::domain::session::{Session, SessionKey};

use super::ticket::{format_timestamp, parse_timestamp};
use super::{session_expiry, RepositoryError, SessionStore};
use crate::DbPool;

pub struct SqlSessionStore {
    pool: DbPool,
    clock: Arc<dyn Clock>,
}

impl SqlSessionStore {
    pub fn new(pool: DbPool) -> Self {
        Self::with_clock(pool, Arc::new(SystemClock))
    }

    pub fn with_clock(pool: DbPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Deletes expired rows; returns how many were removed.
    pub async fn purge_expired(&self) -> Result<u64, RepositoryError> {
        let now = self.clock.now();
        let rows = sqlx::query("SELECT session_key, expires_at FROM session_entry")
            .fetch_all(&self.pool)
            .await?;

        let mut removed = 0;
        for row in rows {
            let expires_at = parse_timestamp("expires_at", row.try_get("expires_at")?)?;
            if expires_at <= now {
                let key: String = row.try_get("session_key")?;
                removed += sqlx::query("DELETE FROM session_entry WHERE session_key = ?")
                    .bind(key)
                    .execute(&self.pool)
                    .await?
                    .rows_affected();
            }
        }
        Ok(removed)
    }
}

#[async_trait::async_trait]
impl SessionStore for SqlSessionStore {
    fn backend(&self) -> &'static str {
        "sql"
    }

    async fn load(&self, key: &SessionKey) -> Result<Option<Session>, RepositoryError> {
        let row = sqlx::query(
            "SELECT payload_json, expires_at FROM session_entry WHERE session_key = ?",
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let expires_at = parse_timestamp("expires_at", row.try_get("expires_at")?)?;
        if expires_at <= self.clock.now() {
            sqlx::query("DELETE FROM session_entry WHERE session_key = ?")
                .bind(key.as_str())
                .execute(&self.pool)
                .await?;
            return Ok(None);
        }

        let payload: String = row.try_get("payload_json")?;
        let session = serde_json::from_str::<Session>(&payload)
            .map_err(|error| RepositoryError::Decode(format!("invalid session payload: {error}")))?;
        Ok(Some(session))
    }

    async fn save(&self, session: &Session, ttl: Duration) -> Result<(), RepositoryError> {
        let now = self.clock.now();
        sqlx::query(
            "INSERT INTO session_entry (session_key, payload_json, expires_at, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(session_key) DO UPDATE SET
                payload_json = excluded.payload_json,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at",
        )
        .bind(session.key.as_str())
        .bind(serde_json::to_string(session)?)
        .bind(format_timestamp(session_expiry(now, ttl)))
        .bind(format_timestamp(now))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use helpline_core::clock::{Clock, ManualClock};
    use helpline_core::domain::session::{Session, SessionKey, SessionState};
    use helpline_core::flows::CallState;

    use super::SqlSessionStore;
    use crate::migrations;
    use crate::repositories::SessionStore;
    use crate::{connect_with_settings, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    #[tokio::test]
    async fn sql_session_round_trips_until_expiry() {
        let pool = setup_pool().await;
        let clock = ManualClock::default();
        let store = SqlSessionStore::with_clock(pool.clone(), Arc::new(clock.clone()));

        let mut session = Session::new_call(SessionKey::call("CA9"), Some("+15550100".into()), clock.now());
        session.state = SessionState::Call(CallState::Recording);
        session.push_user("the screen share is black", clock.now());

        store.save(&session, Duration::seconds(3_600)).await.expect("save");
        assert_eq!(store.load(&session.key).await.expect("load"), Some(session.clone()));

        clock.advance(Duration::seconds(3_600));
        assert_eq!(store.load(&session.key).await.expect("load expired"), None);

        pool.close().await;
    }

    #[tokio::test]
    async fn sql_session_purge_removes_only_expired_rows() {
        let pool = setup_pool().await;
        let clock = ManualClock::default();
        let store = SqlSessionStore::with_clock(pool.clone(), Arc::new(clock.clone()));

        let short = Session::new_chat(SessionKey::chat("whatsapp", "+1"), clock.now());
        let long = Session::new_chat(SessionKey::chat("whatsapp", "+2"), clock.now());
        store.save(&short, Duration::seconds(10)).await.expect("save short");
        store.save(&long, Duration::seconds(1_000)).await.expect("save long");

        clock.advance(Duration::seconds(11));
        assert_eq!(store.purge_expired().await.expect("purge"), 1);
        assert!(store.load(&long.key).await.expect("load long").is_some());

        pool.close().await;
    }

    #[tokio::test]
    async fn oversized_ttl_is_stored_as_a_readable_timestamp() {
        let pool = setup_pool().await;
        let clock = ManualClock::default();
        let store = SqlSessionStore::with_clock(pool.clone(), Arc::new(clock.clone()));
        let session = Session::new_chat(SessionKey::chat("whatsapp", "+3"), clock.now());

        store.save(&session, Duration::days(200_000_000)).await.expect("save");
        assert_eq!(store.load(&session.key).await.expect("load"), Some(session));
        assert_eq!(store.purge_expired().await.expect("purge"), 0);

        pool.close().await;
    }
}
