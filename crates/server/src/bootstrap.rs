use std::sync::Arc;
use std::time::Duration;

use helpline_agent::conversation::{ChatConversation, ChatDependencies, TracingNotifier};
use helpline_agent::llm::OpenAiCompatibleClient;
use helpline_agent::runtime::SupportRuntime;
use helpline_agent::voice::CallHandler;
use helpline_core::audit::TracingAuditSink;
use helpline_core::cache::SupportCache;
use helpline_core::clock::{Clock, SystemClock};
use helpline_core::config::AppConfig;
use helpline_core::errors::CapabilityError;
use helpline_core::retrieval::Embedder;
use helpline_db::repositories::{
    FallbackTicketStore, InMemorySessionStore, JsonFileTicketRepository, RepositoryError,
    SessionStore, SqlSessionStore, SqlTicketRepository, TicketRepository,
};
use helpline_db::vector::{HttpVectorIndex, LocalVectorStore, RemoteIndex, VectorIndex};
use helpline_db::{connect_primary, DbPool};
use thiserror::Error;
use tracing::{info, warn};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: Option<DbPool>,
    pub tickets: Arc<FallbackTicketStore>,
    pub vectors: Arc<VectorIndex>,
    pub sessions: Arc<dyn SessionStore>,
    pub runtime: Arc<SupportRuntime>,
    pub chat: Arc<ChatConversation>,
    pub calls: Arc<CallHandler>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("language model client setup failed: {0}")]
    Llm(#[source] CapabilityError),
    #[error("vector store setup failed: {0}")]
    VectorStore(#[source] RepositoryError),
}

pub async fn bootstrap(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        data_dir = %config.storage.data_dir.display(),
        "starting application bootstrap"
    );
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let db_pool = connect_primary(&config.database).await;
    let primary = db_pool.clone().map(|pool| {
        Arc::new(SqlTicketRepository::with_clock(pool, clock.clone())) as Arc<dyn TicketRepository>
    });
    let fallback =
        Arc::new(JsonFileTicketRepository::with_clock(config.storage.ticket_path(), clock.clone()));
    let tickets = Arc::new(FallbackTicketStore::new(
        primary,
        fallback,
        Duration::from_millis(config.database.operation_timeout_ms),
    ));
    info!(
        event_name = "system.bootstrap.ticket_store_ready",
        correlation_id = "bootstrap",
        primary = tickets.has_primary(),
        ticket_file = %config.storage.ticket_path().display(),
        "ticket store ready"
    );

    let llm = Arc::new(OpenAiCompatibleClient::from_config(&config.llm).map_err(BootstrapError::Llm)?);
    let vectors = Arc::new(build_vector_index(&config, llm.clone()).await?);
    if let Err(error) = vectors.ensure_seeded(config.vector.seed_defaults).await {
        warn!(
            event_name = "system.bootstrap.seed_failed",
            correlation_id = "bootstrap",
            error = %error,
            "default documents could not be seeded; continuing with the current store"
        );
    }

    let sessions: Arc<dyn SessionStore> = match &db_pool {
        Some(pool) => Arc::new(SqlSessionStore::with_clock(pool.clone(), clock.clone())),
        None => Arc::new(InMemorySessionStore::with_clock(clock.clone())),
    };
    info!(
        event_name = "system.bootstrap.session_store_ready",
        correlation_id = "bootstrap",
        backend = sessions.backend(),
        "session store ready"
    );

    let cache = Arc::new(SupportCache::from_config(&config.cache, clock.clone()));
    let runtime = Arc::new(
        SupportRuntime::new(
            tickets.clone(),
            cache.clone(),
            llm.clone(),
            llm.clone(),
            vectors.clone(),
            clock.clone(),
        )
        .with_top_k(config.vector.top_k),
    );
    let chat = Arc::new(ChatConversation::new(
        ChatDependencies {
            sessions: sessions.clone(),
            cache,
            classifier: llm.clone(),
            generator: llm.clone(),
            retriever: vectors.clone(),
            notifier: Arc::new(TracingNotifier),
            clock: clock.clone(),
        },
        config.session.chat_ttl(),
        config.vector.top_k,
    ));
    let calls = Arc::new(CallHandler::new(
        sessions.clone(),
        vectors.clone(),
        llm,
        Arc::new(TracingAuditSink),
        clock,
        config.session.call_ttl(),
        config.vector.top_k,
    ));

    info!(
        event_name = "system.bootstrap.complete",
        correlation_id = "bootstrap",
        remote_index = vectors.remote_active(),
        "application bootstrap complete"
    );
    Ok(Application { config, db_pool, tickets, vectors, sessions, runtime, chat, calls })
}

async fn build_vector_index(
    config: &AppConfig,
    embedder: Arc<dyn Embedder>,
) -> Result<VectorIndex, BootstrapError> {
    let local = LocalVectorStore::open(config.storage.vector_path())
        .await
        .map_err(BootstrapError::VectorStore)?;
    let timeout = Duration::from_millis(config.vector.timeout_ms);

    let remote = match (&config.vector.remote_url, &config.vector.api_key) {
        (Some(url), Some(api_key)) => {
            let index = HttpVectorIndex::new(url, api_key, timeout).map_err(BootstrapError::VectorStore)?;
            Some(Arc::new(index) as Arc<dyn RemoteIndex>)
        }
        _ => None,
    };

    Ok(VectorIndex::new(local, remote, embedder, timeout))
}
