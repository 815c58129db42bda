//! Similarity retrieval over a remote index with a local brute-force fallback.
//!
//! The remote index is used until its first failure. After that every query
//! and every insert goes to the local store for the rest of the process.

pub mod local;
pub mod remote;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use helpline_core::errors::ApplicationError;
use helpline_core::retrieval::{Embedder, Retriever, VectorRecord};

pub use local::{LocalVectorStore, ScoredDocument};
pub use remote::{HttpVectorIndex, RemoteIndex};

use crate::fixtures::DEFAULT_DOCUMENTS;
use crate::repositories::RepositoryError;

pub enum VectorQuery<'a> {
    Text(&'a str),
    Embedding(&'a [f32]),
}

pub struct VectorIndex {
    local: LocalVectorStore,
    remote: Option<Arc<dyn RemoteIndex>>,
    remote_active: AtomicBool,
    embedder: Arc<dyn Embedder>,
    remote_timeout: Duration,
}

impl VectorIndex {
    pub fn new(
        local: LocalVectorStore,
        remote: Option<Arc<dyn RemoteIndex>>,
        embedder: Arc<dyn Embedder>,
        remote_timeout: Duration,
    ) -> Self {
        let remote_active = AtomicBool::new(remote.is_some());
        Self { local, remote, remote_active, embedder, remote_timeout }
    }

    pub fn local(&self) -> &LocalVectorStore {
        &self.local
    }

    pub fn remote_active(&self) -> bool {
        self.remote_active.load(Ordering::SeqCst)
    }

    fn downgrade(&self, operation: &'static str, error: &RepositoryError) {
        if self.remote_active.swap(false, Ordering::SeqCst) {
            warn!(
                event_name = "retrieval.remote.downgraded",
                operation,
                error = %error,
                "remote vector index failed; using local store from now on"
            );
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RepositoryError> {
        self.embedder
            .embed(text)
            .await
            .map_err(|error| RepositoryError::Unavailable(format!("embedding failed: {error}")))
    }

    async fn remote_call<T, F>(&self, operation: &'static str, call: F) -> Option<T>
    where
        F: std::future::Future<Output = Result<T, RepositoryError>>,
    {
        let outcome = match tokio::time::timeout(self.remote_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(RepositoryError::Timeout {
                operation,
                millis: self.remote_timeout.as_millis() as u64,
            }),
        };
        match outcome {
            Ok(value) => Some(value),
            Err(error) => {
                self.downgrade(operation, &error);
                None
            }
        }
    }

    /// Texts of the `top_k` most similar documents, most similar first.
    pub async fn query(
        &self,
        query: VectorQuery<'_>,
        top_k: usize,
    ) -> Result<Vec<String>, RepositoryError> {
        let embedding = match query {
            VectorQuery::Text(text) => self.embed(text).await?,
            VectorQuery::Embedding(embedding) => embedding.to_vec(),
        };

        if let Some(remote) = self.remote.as_ref().filter(|_| self.remote_active()) {
            if let Some(texts) = self.remote_call("query", remote.query(&embedding, top_k)).await {
                return Ok(texts);
            }
        }

        Ok(self.local.query(&embedding, top_k).await?.into_iter().map(|doc| doc.text).collect())
    }

    /// Embeds `text` and stores it locally, mirroring to the remote index while it is healthy.
    pub async fn add(
        &self,
        text: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<(), RepositoryError> {
        let mut record = VectorRecord::new(self.embed(text).await?, text);
        record.metadata = metadata;
        self.local.add(record.clone()).await?;

        if let Some(remote) = self.remote.as_ref().filter(|_| self.remote_active()) {
            let id = format!("doc-{}", uuid::Uuid::new_v4());
            self.remote_call("upsert", remote.upsert(&id, &record)).await;
        }
        Ok(())
    }

    /// Adds the default support documents when the local store is empty.
    /// Returns how many were added.
    pub async fn ensure_seeded(&self, seed_defaults: bool) -> Result<usize, RepositoryError> {
        if !seed_defaults || !self.local.is_empty().await {
            return Ok(0);
        }

        for document in DEFAULT_DOCUMENTS {
            let metadata = BTreeMap::from([
                ("source".to_string(), "default".to_string()),
                ("topic".to_string(), document.topic.to_string()),
            ]);
            self.add(document.text, metadata).await?;
        }
        info!(
            event_name = "retrieval.local.seeded",
            correlation_id = "bootstrap",
            documents = DEFAULT_DOCUMENTS.len(),
            "seeded default support documents"
        );
        Ok(DEFAULT_DOCUMENTS.len())
    }
}

#[async_trait]
impl Retriever for VectorIndex {
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<String>, ApplicationError> {
        Ok(self.query(VectorQuery::Text(query), top_k).await?)
    }

    fn remote_active(&self) -> bool {
        VectorIndex::remote_active(self)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use helpline_core::errors::CapabilityError;
    use helpline_core::retrieval::{Embedder, Retriever, VectorRecord};

    use super::{LocalVectorStore, RemoteIndex, VectorIndex, VectorQuery};
    use crate::fixtures::DEFAULT_DOCUMENTS;
    use crate::repositories::RepositoryError;

    /// Maps known phrases to fixed axes so similarity is predictable.
    struct KeywordEmbedder;

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, CapabilityError> {
            let lower = text.to_lowercase();
            Ok(vec![
                if lower.contains("template") { 1.0 } else { 0.0 },
                if lower.contains("share") { 1.0 } else { 0.0 },
                if lower.contains("plan") { 1.0 } else { 0.0 },
                0.1,
            ])
        }
    }

    #[derive(Default)]
    struct FailingRemote {
        queries: AtomicUsize,
        upserts: AtomicUsize,
    }

    #[async_trait]
    impl RemoteIndex for FailingRemote {
        async fn query(&self, _embedding: &[f32], _top_k: usize) -> Result<Vec<String>, RepositoryError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            Err(RepositoryError::Http("503 from index".to_string()))
        }

        async fn upsert(&self, _id: &str, _record: &VectorRecord) -> Result<(), RepositoryError> {
            self.upserts.fetch_add(1, Ordering::SeqCst);
            Err(RepositoryError::Http("503 from index".to_string()))
        }
    }

    struct CannedRemote;

    #[async_trait]
    impl RemoteIndex for CannedRemote {
        async fn query(&self, _embedding: &[f32], _top_k: usize) -> Result<Vec<String>, RepositoryError> {
            Ok(vec!["from the remote index".to_string()])
        }

        async fn upsert(&self, _id: &str, _record: &VectorRecord) -> Result<(), RepositoryError> {
            Ok(())
        }
    }

    async fn local_store(dir: &TempDir) -> LocalVectorStore {
        LocalVectorStore::open(dir.path().join("vector_db.json")).await.expect("open")
    }

    #[tokio::test]
    async fn local_only_index_returns_closest_document() {
        let dir = TempDir::new().expect("tempdir");
        let index =
            VectorIndex::new(local_store(&dir).await, None, Arc::new(KeywordEmbedder), Duration::from_secs(1));

        index.add("Duplicate a template from the gallery", BTreeMap::new()).await.expect("add");
        index.add("Use the Share button to invite guests", BTreeMap::new()).await.expect("add");
        index.add("The free plan includes unlimited pages", BTreeMap::new()).await.expect("add");

        let top = index.query(VectorQuery::Text("how do I share a page"), 1).await.expect("query");
        assert_eq!(top, vec!["Use the Share button to invite guests".to_string()]);
        assert!(!index.remote_active());
    }

    #[tokio::test]
    async fn first_remote_failure_downgrades_for_good() {
        let dir = TempDir::new().expect("tempdir");
        let remote = Arc::new(FailingRemote::default());
        let index = VectorIndex::new(
            local_store(&dir).await,
            Some(remote.clone()),
            Arc::new(KeywordEmbedder),
            Duration::from_secs(1),
        );
        assert!(index.remote_active());

        index.add("Duplicate a template from the gallery", BTreeMap::new()).await.expect("add");
        assert!(!index.remote_active());
        assert_eq!(index.local().len().await, 1);

        let top = index.retrieve("template", 3).await.expect("retrieve");
        assert_eq!(top, vec!["Duplicate a template from the gallery".to_string()]);
        index.retrieve("template", 3).await.expect("retrieve again");

        assert_eq!(remote.upserts.load(Ordering::SeqCst), 1);
        assert_eq!(remote.queries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn healthy_remote_answers_queries() {
        let dir = TempDir::new().expect("tempdir");
        let index = VectorIndex::new(
            local_store(&dir).await,
            Some(Arc::new(CannedRemote)),
            Arc::new(KeywordEmbedder),
            Duration::from_secs(1),
        );

        let top = index.query(VectorQuery::Embedding(&[0.0, 1.0, 0.0, 0.1]), 3).await.expect("query");
        assert_eq!(top, vec!["from the remote index".to_string()]);
        assert!(index.remote_active());
    }

    #[tokio::test]
    async fn seeding_happens_once_and_only_when_enabled() {
        let dir = TempDir::new().expect("tempdir");
        let index =
            VectorIndex::new(local_store(&dir).await, None, Arc::new(KeywordEmbedder), Duration::from_secs(1));

        assert_eq!(index.ensure_seeded(false).await.expect("disabled"), 0);
        assert_eq!(index.ensure_seeded(true).await.expect("seed"), DEFAULT_DOCUMENTS.len());
        assert_eq!(index.ensure_seeded(true).await.expect("already seeded"), 0);
        assert_eq!(index.local().len().await, DEFAULT_DOCUMENTS.len());
    }
}
