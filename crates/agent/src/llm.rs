//! Language-model capabilities: intent classification, reply generation and
//! embeddings, plus an adapter for OpenAI-compatible HTTP endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::debug;

use helpline_core::config::LlmConfig;
use helpline_core::domain::session::{Role, TranscriptEntry};
use helpline_core::domain::ticket::Intent;
use helpline_core::errors::CapabilityError;
use helpline_core::retrieval::Embedder;

const CLASSIFY_PROMPT: &str = "Classify the following support request into exactly one of these \
categories: template_issue, refund, multi_lang, missing_info, notion_basics, vpn_connection, \
screen_share_issue, other. Answer with the category name only.";

#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<Intent, CapabilityError>;
}

#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    /// `context` replaces the default support-agent instructions when set.
    async fn generate(
        &self,
        query: &str,
        documents: &[String],
        history: &[TranscriptEntry],
        context: Option<&str>,
    ) -> Result<String, CapabilityError>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    fn new(role: &str, content: impl Into<String>) -> Self {
        Self { role: role.to_string(), content: content.into() }
    }
}

/// System prompt for a reply: caller-provided context or the default agent
/// instructions, followed by the retrieved documents.
pub fn system_prompt(documents: &[String], context: Option<&str>) -> String {
    let docs = documents.join("\n\n");
    match context {
        Some(context) if docs.is_empty() => context.to_string(),
        Some(context) => format!("{context}\n\nRelevant documentation:\n\n{docs}"),
        None => format!(
            "You are a Notion support agent. Use these docs to help answer the user's question:\n\n\
             {docs}\n\nIf you don't know the answer, or if this is a refund request, politely say \
             you'll escalate to a human agent."
        ),
    }
}

/// Full message list for a generation call. The history precedes the current query.
pub fn build_messages(
    query: &str,
    documents: &[String],
    history: &[TranscriptEntry],
    context: Option<&str>,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::new("system", system_prompt(documents, context)));
    messages.extend(history.iter().map(|entry| {
        let role = match entry.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        ChatMessage::new(role, entry.text.clone())
    }));
    messages.push(ChatMessage::new("user", query));
    messages
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Client for `/chat/completions` and `/embeddings` on OpenAI or Ollama.
#[derive(Clone, Debug)]
pub struct OpenAiCompatibleClient {
    client: reqwest::Client,
    base_url: String,
    chat_model: String,
    embedding_model: String,
    timeout_ms: u64,
}

impl OpenAiCompatibleClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, CapabilityError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(api_key) = &config.api_key {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", api_key.expose_secret()))
                .map_err(|error| {
                    CapabilityError::Unavailable(format!("invalid API key header value: {error}"))
                })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|error| {
                CapabilityError::Unavailable(format!("failed to build HTTP client: {error}"))
            })?;

        Ok(Self {
            client,
            base_url: config.effective_base_url(),
            chat_model: config.chat_model.clone(),
            embedding_model: config.embedding_model.clone(),
            timeout_ms: timeout.as_millis() as u64,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, CapabilityError>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .json(body)
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    CapabilityError::Timeout(self.timeout_ms)
                } else {
                    CapabilityError::Unavailable(format!("HTTP request failed: {error}"))
                }
            })?;

        let status = response.status();
        debug!(event_name = "agent.llm.response", path, status = %status, "model endpoint responded");
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CapabilityError::Unavailable(format!("{path} returned {status}: {body}")));
        }

        response
            .json::<R>()
            .await
            .map_err(|error| CapabilityError::InvalidResponse(format!("{path}: {error}")))
    }

    async fn complete(&self, messages: &[ChatMessage], temperature: f32) -> Result<String, CapabilityError> {
        let response: ChatCompletionResponse = self
            .post_json(
                "/chat/completions",
                &ChatCompletionRequest { model: &self.chat_model, messages, temperature },
            )
            .await?;
        first_choice(response)
    }
}

fn first_choice(response: ChatCompletionResponse) -> Result<String, CapabilityError> {
    response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content)
        .ok_or_else(|| CapabilityError::InvalidResponse("completion returned no choices".to_string()))
}

#[async_trait]
impl IntentClassifier for OpenAiCompatibleClient {
    async fn classify(&self, text: &str) -> Result<Intent, CapabilityError> {
        let messages = [ChatMessage::new("system", CLASSIFY_PROMPT), ChatMessage::new("user", text)];
        let label = self.complete(&messages, 0.0).await?;
        Ok(Intent::from_label(&label))
    }
}

#[async_trait]
impl ReplyGenerator for OpenAiCompatibleClient {
    async fn generate(
        &self,
        query: &str,
        documents: &[String],
        history: &[TranscriptEntry],
        context: Option<&str>,
    ) -> Result<String, CapabilityError> {
        let messages = build_messages(query, documents, history, context);
        let reply = self.complete(&messages, 0.7).await?;
        Ok(reply.trim().to_string())
    }
}

#[async_trait]
impl Embedder for OpenAiCompatibleClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CapabilityError> {
        let response: EmbeddingResponse = self
            .post_json("/embeddings", &EmbeddingRequest { model: &self.embedding_model, input: text })
            .await?;
        response
            .data
            .into_iter()
            .next()
            .map(|data| data.embedding)
            .filter(|embedding| !embedding.is_empty())
            .ok_or_else(|| CapabilityError::InvalidResponse("embedding response was empty".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use secrecy::SecretString;

    use helpline_core::config::{LlmConfig, LlmProvider};
    use helpline_core::domain::session::{Role, TranscriptEntry};
    use helpline_core::errors::CapabilityError;

    use super::{
        build_messages, first_choice, system_prompt, ChatCompletionResponse, OpenAiCompatibleClient,
    };

    fn entry(role: Role, text: &str) -> TranscriptEntry {
        TranscriptEntry { role, text: text.to_string(), at: Utc::now(), attachments: Vec::new() }
    }

    #[test]
    fn default_prompt_embeds_documents_and_escalation_rule() {
        let prompt = system_prompt(&["Use the Share button.".to_string()], None);
        assert!(prompt.contains("Use the Share button."));
        assert!(prompt.contains("escalate to a human agent"));
    }

    #[test]
    fn context_replaces_default_instructions() {
        let prompt = system_prompt(&[], Some("You are a support agent for account issues."));
        assert_eq!(prompt, "You are a support agent for account issues.");
    }

    #[test]
    fn messages_keep_history_order_and_end_with_query() {
        let history = [entry(Role::User, "my page is blank"), entry(Role::Assistant, "Try reloading.")];
        let messages = build_messages("still blank", &[], &history, None);

        let roles: Vec<&str> = messages.iter().map(|message| message.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(messages[3].content, "still blank");
    }

    #[test]
    fn completion_without_choices_is_invalid() {
        let response: ChatCompletionResponse = serde_json::from_str(r#"{"choices":[]}"#).expect("parse");
        assert!(matches!(first_choice(response), Err(CapabilityError::InvalidResponse(_))));

        let response: ChatCompletionResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"refund"}}]}"#,
        )
        .expect("parse");
        assert_eq!(first_choice(response).expect("choice"), "refund");
    }

    #[test]
    fn client_uses_provider_base_url() {
        let config = LlmConfig {
            provider: LlmProvider::OpenAi,
            api_key: Some(SecretString::from("sk-test".to_string())),
            base_url: None,
            chat_model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            timeout_secs: 20,
        };
        let client = OpenAiCompatibleClient::from_config(&config).expect("client");
        assert_eq!(client.base_url(), "https://api.openai.com/v1");
    }
}
