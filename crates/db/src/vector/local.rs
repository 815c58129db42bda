use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::sync::RwLock;
use tracing::info;

use helpline_core::errors::DomainError;
use helpline_core::retrieval::{cosine_similarity, VectorRecord};

use crate::repositories::file::write_collection;
use crate::repositories::RepositoryError;

#[derive(Clone, Debug, PartialEq)]
pub struct ScoredDocument {
    pub text: String,
    pub score: f32,
    pub metadata: BTreeMap<String, String>,
}

/// Brute-force cosine store persisted as one JSON array.
///
/// The lock is held across the file write in `add`, so queries never observe a
/// record that failed to persist.
pub struct LocalVectorStore {
    path: PathBuf,
    records: RwLock<Vec<VectorRecord>>,
}

impl LocalVectorStore {
    /// Loads `path` if present, otherwise starts empty.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, RepositoryError> {
        let path = path.into();
        let records = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Vec::new(),
            Ok(bytes) => serde_json::from_slice::<Vec<VectorRecord>>(&bytes)?,
            Err(error) if error.kind() == ErrorKind::NotFound => Vec::new(),
            Err(error) => return Err(error.into()),
        };

        if let Some(first) = records.first() {
            let expected = first.dimension();
            if let Some(bad) = records.iter().find(|record| record.dimension() != expected) {
                return Err(DomainError::DimensionMismatch { expected, actual: bad.dimension() }.into());
            }
        }

        info!(
            event_name = "retrieval.local.loaded",
            correlation_id = "bootstrap",
            path = %path.display(),
            records = records.len(),
            "local vector store loaded"
        );
        Ok(Self { path, records: RwLock::new(records) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Fixed by the first stored record.
    pub async fn dimension(&self) -> Option<usize> {
        self.records.read().await.first().map(VectorRecord::dimension)
    }

    pub async fn add(&self, record: VectorRecord) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        if record.embedding.is_empty() {
            return Err(DomainError::InvariantViolation("embedding must not be empty".into()).into());
        }
        ensure_finite(&record.embedding)?;
        if let Some(expected) = records.first().map(VectorRecord::dimension) {
            if record.dimension() != expected {
                return Err(DomainError::DimensionMismatch { expected, actual: record.dimension() }.into());
            }
        }

        records.push(record);
        if let Err(error) = write_collection(&self.path, &records).await {
            records.pop();
            return Err(error);
        }
        Ok(())
    }

    /// Top `top_k` records by cosine similarity, ties in insertion order.
    pub async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredDocument>, RepositoryError> {
        let records = self.records.read().await;
        let Some(expected) = records.first().map(VectorRecord::dimension) else {
            return Ok(Vec::new());
        };
        if embedding.len() != expected {
            return Err(DomainError::DimensionMismatch { expected, actual: embedding.len() }.into());
        }
        ensure_finite(embedding)?;

        let mut scored: Vec<(f32, &VectorRecord)> = records
            .iter()
            .map(|record| (cosine_similarity(embedding, &record.embedding), record))
            .collect();
        scored.sort_by(|left, right| right.0.total_cmp(&left.0));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(score, record)| ScoredDocument {
                text: record.text.clone(),
                score,
                metadata: record.metadata.clone(),
            })
            .collect())
    }
}

fn ensure_finite(embedding: &[f32]) -> Result<(), RepositoryError> {
    if embedding.iter().all(|value| value.is_finite()) {
        Ok(())
    } else {
        Err(DomainError::InvariantViolation("embedding values must be finite".into()).into())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use helpline_core::errors::DomainError;
    use helpline_core::retrieval::VectorRecord;

    use super::LocalVectorStore;
    use crate::repositories::RepositoryError;

    #[tokio::test]
    async fn query_identical_to_stored_embedding_ranks_it_first() {
        let dir = TempDir::new().expect("tempdir");
        let store = LocalVectorStore::open(dir.path().join("vectors.json")).await.expect("open");

        store.add(VectorRecord::new(vec![1.0, 0.0, 0.0], "doc A")).await.expect("add A");
        store.add(VectorRecord::new(vec![0.2, 0.9, 0.1], "doc B")).await.expect("add B");
        store.add(VectorRecord::new(vec![0.0, 0.1, 1.0], "doc C")).await.expect("add C");

        let top = store.query(&[0.2, 0.9, 0.1], 1).await.expect("query");
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].text, "doc B");
        assert!((top[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn ties_keep_insertion_order() {
        let dir = TempDir::new().expect("tempdir");
        let store = LocalVectorStore::open(dir.path().join("vectors.json")).await.expect("open");

        store.add(VectorRecord::new(vec![1.0, 0.0], "first")).await.expect("add");
        store.add(VectorRecord::new(vec![2.0, 0.0], "second")).await.expect("add");
        store.add(VectorRecord::new(vec![0.0, 1.0], "third")).await.expect("add");

        let texts: Vec<String> =
            store.query(&[1.0, 0.0], 3).await.expect("query").into_iter().map(|doc| doc.text).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn dimension_is_fixed_by_first_record() {
        let dir = TempDir::new().expect("tempdir");
        let store = LocalVectorStore::open(dir.path().join("vectors.json")).await.expect("open");
        store.add(VectorRecord::new(vec![1.0, 0.0, 0.0], "three dims")).await.expect("add");

        let error = store
            .add(VectorRecord::new(vec![1.0, 0.0], "two dims"))
            .await
            .expect_err("mismatched add");
        assert!(matches!(
            error,
            RepositoryError::Domain(DomainError::DimensionMismatch { expected: 3, actual: 2 })
        ));

        let error = store.query(&[1.0], 1).await.expect_err("mismatched query");
        assert!(matches!(error, RepositoryError::Domain(DomainError::DimensionMismatch { .. })));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("vector-db").join("vectors.json");
        {
            let store = LocalVectorStore::open(&path).await.expect("open");
            store
                .add(VectorRecord::new(vec![0.5, 0.5], "persisted").with_metadata("source", "test"))
                .await
                .expect("add");
        }

        let reopened = LocalVectorStore::open(&path).await.expect("reopen");
        assert_eq!(reopened.len().await, 1);
        assert_eq!(reopened.dimension().await, Some(2));
        let top = reopened.query(&[0.5, 0.5], 3).await.expect("query");
        assert_eq!(top[0].metadata.get("source").map(String::as_str), Some("test"));
    }

    #[tokio::test]
    async fn failed_persist_rolls_back_the_append() {
        let dir = TempDir::new().expect("tempdir");
        let parent = dir.path().join("vector-db");
        let store = LocalVectorStore::open(parent.join("vectors.json")).await.expect("open");
        std::fs::write(&parent, "file, not a directory").expect("write blocker");

        assert!(store.add(VectorRecord::new(vec![1.0], "lost")).await.is_err());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn empty_store_answers_with_no_documents() {
        let dir = TempDir::new().expect("tempdir");
        let store = LocalVectorStore::open(dir.path().join("vectors.json")).await.expect("open");
        assert!(store.query(&[1.0, 2.0], 3).await.expect("query").is_empty());
    }

    #[tokio::test]
    async fn non_finite_embeddings_never_reach_the_ranking() {
        let dir = TempDir::new().expect("tempdir");
        let store = LocalVectorStore::open(dir.path().join("vectors.json")).await.expect("open");
        store.add(VectorRecord::new(vec![0.0, 1.0], "sidebar")).await.expect("add");
        store.add(VectorRecord::new(vec![1.0, 0.0], "sharing")).await.expect("add");

        let error = store
            .add(VectorRecord::new(vec![f32::NAN, 1.0], "poisoned"))
            .await
            .expect_err("nan add");
        assert!(matches!(error, RepositoryError::Domain(DomainError::InvariantViolation(_))));
        let error = store.query(&[f32::INFINITY, 0.0], 2).await.expect_err("inf query");
        assert!(matches!(error, RepositoryError::Domain(DomainError::InvariantViolation(_))));

        let texts: Vec<String> =
            store.query(&[0.9, 0.1], 2).await.expect("query").into_iter().map(|doc| doc.text).collect();
        assert_eq!(texts, vec!["sharing", "sidebar"]);
        assert_eq!(store.len().await, 2);
    }
}
