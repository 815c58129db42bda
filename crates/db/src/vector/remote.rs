use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use helpline_core::retrieval::VectorRecord;

use crate::repositories::RepositoryError;

/// Hosted similarity index.
#[async_trait]
pub trait RemoteIndex: Send + Sync {
    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<String>, RepositoryError>;

    async fn upsert(&self, id: &str, record: &VectorRecord) -> Result<(), RepositoryError>;
}

/// Client for a Pinecone-style REST index (`/query`, `/vectors/upsert`).
#[derive(Clone, Debug)]
pub struct HttpVectorIndex {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Deserialize)]
struct QueryMatch {
    #[serde(default)]
    metadata: Option<Value>,
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    vectors: [UpsertVector<'a>; 1],
}

#[derive(Serialize)]
struct UpsertVector<'a> {
    id: &'a str,
    values: &'a [f32],
    metadata: Value,
}

impl HttpVectorIndex {
    pub fn new(
        base_url: &str,
        api_key: &SecretString,
        timeout: Duration,
    ) -> Result<Self, RepositoryError> {
        let mut api_key_header = HeaderValue::from_str(api_key.expose_secret())
            .map_err(|error| RepositoryError::Http(format!("invalid api key header value: {error}")))?;
        api_key_header.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert("Api-Key", api_key_header);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|error| RepositoryError::Http(format!("failed to build HTTP client: {error}")))?;

        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string() })
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, RepositoryError> {
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .json(body)
            .send()
            .await
            .map_err(|error| RepositoryError::Http(format!("request to {path} failed: {error}")))?;

        let status = response.status();
        debug!(event_name = "retrieval.remote.response", path, status = %status, "remote index responded");
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RepositoryError::Http(format!("{path} returned {status}: {body}")));
        }
        Ok(response)
    }
}

#[async_trait]
impl RemoteIndex for HttpVectorIndex {
    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<String>, RepositoryError> {
        let response = self
            .post("/query", &QueryRequest { vector: embedding, top_k, include_metadata: true })
            .await?;
        let parsed = response
            .json::<QueryResponse>()
            .await
            .map_err(|error| RepositoryError::Http(format!("invalid query response: {error}")))?;

        Ok(parsed
            .matches
            .into_iter()
            .filter_map(|hit| {
                hit.metadata
                    .as_ref()
                    .and_then(|metadata| metadata.get("text"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .collect())
    }

    async fn upsert(&self, id: &str, record: &VectorRecord) -> Result<(), RepositoryError> {
        let mut metadata = serde_json::Map::new();
        for (key, value) in &record.metadata {
            metadata.insert(key.clone(), Value::String(value.clone()));
        }
        metadata.insert("text".to_string(), Value::String(record.text.clone()));

        self.post(
            "/vectors/upsert",
            &UpsertRequest {
                vectors: [UpsertVector { id, values: &record.embedding, metadata: Value::Object(metadata) }],
            },
        )
        .await?;
        Ok(())
    }
}
