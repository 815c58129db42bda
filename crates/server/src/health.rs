use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use helpline_agent::conversation::{ChatConversation, ChatReply};
use helpline_agent::guardrails::SupportRequest;
use helpline_agent::runtime::{SupportReply, SupportRuntime};
use helpline_agent::voice::{CallHandler, CallResponse};
use helpline_core::cache::MetricsSnapshot;
use helpline_core::errors::InterfaceError;
use helpline_core::flows::{CallAction, CallState};
use helpline_db::repositories::{FallbackTicketStore, SessionStore};
use helpline_db::vector::VectorIndex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub tickets: Arc<FallbackTicketStore>,
    pub vectors: Arc<VectorIndex>,
    pub sessions: Arc<dyn SessionStore>,
    pub runtime: Arc<SupportRuntime>,
    pub chat: Arc<ChatConversation>,
    pub calls: Arc<CallHandler>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub primary_store: HealthCheck,
    pub fallback_store: HealthCheck,
    pub session_store: HealthCheck,
    pub vector_index: HealthCheck,
    pub local_documents: usize,
    pub checked_at: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ChatTurn {
    pub transport: String,
    pub user_id: String,
    pub text: String,
}

/// One telephony webhook, tagged by `event`.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CallWebhook {
    Start {
        #[serde(default)]
        caller: Option<String>,
    },
    Menu {
        #[serde(default)]
        digits: Option<String>,
    },
    Recording {
        transcription: String,
    },
    FollowUp {
        #[serde(default)]
        digits: Option<String>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CallBody {
    pub session_key: String,
    pub state: CallState,
    pub actions: Vec<CallAction>,
    pub prompts: Vec<String>,
    pub reply: Option<String>,
    pub duration_ms: Option<i64>,
}

impl From<CallResponse> for CallBody {
    fn from(response: CallResponse) -> Self {
        Self {
            session_key: response.session_key.as_str().to_string(),
            state: response.state,
            actions: response.actions,
            prompts: response.prompts,
            reply: response.reply,
            duration_ms: response.duration.map(|duration| duration.num_milliseconds()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub details: Option<String>,
    pub correlation_id: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/api/support", post(support))
        .route("/api/chat", post(chat))
        .route("/api/calls/{call_sid}", post(call))
        .with_state(state)
}

/// Binds and serves in the background until `shutdown` fires.
pub async fn spawn(
    bind_address: &str,
    port: u16,
    state: AppState,
    shutdown: oneshot::Receiver<()>,
) -> std::io::Result<JoinHandle<()>> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.http.start",
        correlation_id = "bootstrap",
        bind_address = %address,
        "http endpoint started"
    );

    Ok(tokio::spawn(async move {
        let server = axum::serve(listener, router(state)).with_graceful_shutdown(async {
            let _ = shutdown.await;
        });
        if let Err(error) = server.await {
            error!(
                event_name = "system.http.error",
                correlation_id = "bootstrap",
                error = %error,
                "http server terminated unexpectedly"
            );
        }
    }))
}

/// Always 200 while the file store works; a down primary only degrades.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let primary_store = if !state.tickets.has_primary() {
        HealthCheck { status: "disabled", detail: "no primary database configured".to_string() }
    } else if state.tickets.primary_reachable().await {
        HealthCheck { status: "ready", detail: "primary store answered ping".to_string() }
    } else {
        HealthCheck { status: "degraded", detail: "primary store unreachable; using file fallback".to_string() }
    };

    let fallback_ready = state.tickets.fallback_reachable().await;
    let fallback_store = if fallback_ready {
        HealthCheck { status: "ready", detail: "ticket file readable".to_string() }
    } else {
        HealthCheck { status: "degraded", detail: "ticket file unreadable".to_string() }
    };

    let session_store =
        HealthCheck { status: "ready", detail: format!("{} session backend", state.sessions.backend()) };

    let vector_index = if state.vectors.remote_active() {
        HealthCheck { status: "ready", detail: "remote index active".to_string() }
    } else {
        HealthCheck { status: "local_only", detail: "queries served by the local store".to_string() }
    };

    let status = match (fallback_ready, primary_store.status) {
        (true, "ready" | "disabled") => "ready",
        (false, "ready") | (true, _) => "degraded",
        (false, _) => "unavailable",
    };
    let payload = HealthResponse {
        status,
        primary_store,
        fallback_store,
        session_store,
        vector_index,
        local_documents: state.vectors.local().len().await,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if status == "unavailable" { StatusCode::SERVICE_UNAVAILABLE } else { StatusCode::OK };
    (status_code, Json(payload))
}

pub async fn metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.runtime.cache().snapshot())
}

pub async fn support(
    State(state): State<AppState>,
    Json(request): Json<SupportRequest>,
) -> Result<Json<SupportReply>, (StatusCode, Json<ErrorBody>)> {
    let correlation_id = format!("req-{}", Uuid::new_v4());
    state
        .runtime
        .handle_request(request, &correlation_id)
        .await
        .map(Json)
        .map_err(|error| error_response(error, correlation_id))
}

pub async fn chat(
    State(state): State<AppState>,
    Json(turn): Json<ChatTurn>,
) -> Result<Json<ChatReply>, (StatusCode, Json<ErrorBody>)> {
    let correlation_id = format!("chat-{}", Uuid::new_v4());
    if [&turn.transport, &turn.user_id, &turn.text].iter().any(|field| field.trim().is_empty()) {
        let error = InterfaceError::BadRequest {
            message: "transport, user_id and text are required".to_string(),
            correlation_id: correlation_id.clone(),
        };
        return Err(error_response(error, correlation_id));
    }
    Ok(Json(state.chat.handle_turn(&turn.transport, &turn.user_id, &turn.text, &correlation_id).await))
}

pub async fn call(
    State(state): State<AppState>,
    Path(call_sid): Path<String>,
    Json(webhook): Json<CallWebhook>,
) -> Result<Json<CallBody>, (StatusCode, Json<ErrorBody>)> {
    let outcome = match webhook {
        CallWebhook::Start { caller } => Ok(state.calls.start_call(&call_sid, caller.as_deref()).await),
        CallWebhook::Menu { digits } => state.calls.menu_selection(&call_sid, digits.as_deref()).await,
        CallWebhook::Recording { transcription } => {
            state.calls.recording_finished(&call_sid, &transcription).await
        }
        CallWebhook::FollowUp { digits } => state.calls.follow_up(&call_sid, digits.as_deref()).await,
    };
    outcome
        .map(|response| Json(CallBody::from(response)))
        .map_err(|error| error_response(error.into_interface(call_sid.clone()), call_sid))
}

fn error_response(error: InterfaceError, correlation_id: String) -> (StatusCode, Json<ErrorBody>) {
    let (status, details) = match &error {
        InterfaceError::BadRequest { message, .. } => (StatusCode::BAD_REQUEST, Some(message.clone())),
        InterfaceError::ServiceUnavailable { .. } => (StatusCode::SERVICE_UNAVAILABLE, None),
        InterfaceError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, None),
    };
    (status, Json(ErrorBody { error: error.user_message(), details, correlation_id }))
}
