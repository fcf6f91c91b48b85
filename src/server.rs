use crate::admission::Admission;
use crate::auth::AuthState;
use crate::clients::{ChatCompletionsOutcome, CopilotApi, GitHubApi, SseFrameStream};
use crate::config::RuntimeConfig;
use crate::error::{GatewayError, Result};
use crate::logging::{record_requests, ModelMapping, SharedJournal};
use crate::models::{ModelFallbackConfig, ModelsResponse};
use crate::proxy::{self, AnthropicEventStream, MessagesOutcome};
use crate::translate::anthropic_types::{ErrorResponse, StreamEvent};
use crate::translate::{anthropic_to_openai, estimate_input_tokens};
use crate::validation::{
    parse_anthropic_messages_payload, parse_embedding_request, parse_openai_chat_payload,
};

use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::StreamExt;
use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Everything a request handler can reach. One instance per server.
pub struct AppState {
    pub config: RuntimeConfig,
    pub auth: Arc<AuthState>,
    pub copilot: Arc<dyn CopilotApi>,
    pub github: Arc<dyn GitHubApi>,
    pub models: RwLock<Option<ModelsResponse>>,
    pub fallbacks: ModelFallbackConfig,
    pub admission: Admission,
    pub journal: SharedJournal,
}

impl AppState {
    /// Fetch the upstream model list into the cache.
    pub async fn refresh_models(&self) -> Result<()> {
        let models = self.copilot.get_models().await?;
        tracing::info!(
            "Available models: {}",
            models
                .data
                .iter()
                .map(|m| m.id.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        *self.models.write().await = Some(models);
        Ok(())
    }

    pub async fn known_model_ids(&self) -> Option<HashSet<String>> {
        self.models.read().await.as_ref().map(ModelsResponse::ids)
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let admitted = Router::new()
        .route("/v1/messages", post(handle_messages))
        .route("/v1/chat/completions", post(handle_chat_completions))
        .route_layer(middleware::from_fn_with_state(state.clone(), admit));

    Router::new()
        .merge(admitted)
        .route("/v1/messages/count_tokens", post(handle_count_tokens))
        .route("/v1/embeddings", post(handle_embeddings))
        .route("/v1/models", get(handle_models))
        .route("/v1/token", get(handle_token))
        .route("/v1/usage", get(handle_usage))
        .route("/health", get(handle_health))
        .layer(middleware::from_fn_with_state(
            state.journal.clone(),
            record_requests,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn admit(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    match state.admission.admit().await {
        Ok(()) => next.run(request).await,
        Err(e) => e.into_response(),
    }
}

async fn handle_messages(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Response> {
    let req = parse_anthropic_messages_payload(&body)?;
    tracing::debug!(
        model = %req.model,
        streaming = req.stream.unwrap_or(false),
        messages = req.messages.len(),
        "Anthropic request"
    );

    let known = state.known_model_ids().await;
    let payload = anthropic_to_openai(&req, known.as_ref(), &state.fallbacks);
    let mapping = ModelMapping {
        original_model: req.model.clone(),
        mapped_model: payload.model.clone(),
    };
    tracing::debug!(
        "Claude Code requested model: {} -> Copilot model: {}",
        mapping.original_model,
        mapping.mapped_model
    );

    let mut response = match proxy::forward_messages(state.copilot.as_ref(), &payload).await {
        Ok(MessagesOutcome::Complete(message)) => Json(message).into_response(),
        Ok(MessagesOutcome::Stream(events)) => anthropic_sse(events),
        Err(e) => e.into_response(),
    };
    response.extensions_mut().insert(mapping);
    Ok(response)
}

fn anthropic_sse(events: AnthropicEventStream) -> Response {
    let sse = events.map(|item| -> std::result::Result<Event, Infallible> {
        Ok(match item {
            Ok(event) => anthropic_event(&event),
            Err(e) => {
                tracing::error!(error = %e, "Stream aborted");
                error_event(&e)
            }
        })
    });

    Sse::new(sse).keep_alive(KeepAlive::default()).into_response()
}

fn anthropic_event(event: &StreamEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_default();
    Event::default().event(event.event_name()).data(data)
}

fn error_event(err: &GatewayError) -> Event {
    let body = ErrorResponse::api_error(err.public_message());
    Event::default()
        .event("error")
        .data(serde_json::to_string(&body).unwrap_or_default())
}

async fn handle_count_tokens(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<serde_json::Value>> {
    let req = parse_anthropic_messages_payload(&body)?;
    let known = state.known_model_ids().await;
    let payload = anthropic_to_openai(&req, known.as_ref(), &state.fallbacks);
    let input_tokens = estimate_input_tokens(&payload);
    tracing::debug!(input_tokens, "Estimated token count");
    Ok(Json(serde_json::json!({ "input_tokens": input_tokens })))
}

async fn handle_chat_completions(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response> {
    let payload = parse_openai_chat_payload(&body)?;

    match state.copilot.create_chat_completions(payload).await? {
        ChatCompletionsOutcome::Complete(value) => Ok(Json(value).into_response()),
        ChatCompletionsOutcome::Stream(frames) => Ok(relay_sse(frames)),
    }
}

/// Pass upstream frames through untouched.
fn relay_sse(frames: SseFrameStream) -> Response {
    let sse = frames.map(|item| -> std::result::Result<Event, Infallible> {
        Ok(match item {
            Ok(frame) => {
                let event = Event::default().data(frame.data);
                if frame.event.is_empty() || frame.event == "message" {
                    event
                } else {
                    event.event(frame.event)
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Relay aborted");
                error_event(&e)
            }
        })
    });

    Sse::new(sse).keep_alive(KeepAlive::default()).into_response()
}

async fn handle_embeddings(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<serde_json::Value>> {
    let req = parse_embedding_request(&body)?;
    let response = state
        .copilot
        .create_embeddings(serde_json::to_value(&req)?)
        .await?;
    Ok(Json(response))
}

async fn handle_models(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>> {
    if state.models.read().await.is_none() {
        state.refresh_models().await?;
    }

    let guard = state.models.read().await;
    let models: Vec<serde_json::Value> = guard
        .iter()
        .flat_map(|m| m.data.iter())
        .map(|model| {
            serde_json::json!({
                "id": model.id,
                "object": "model",
                "type": "model",
                "created": 0,
                "created_at": "1970-01-01T00:00:00.000Z",
                "owned_by": model.vendor,
                "display_name": model.name,
            })
        })
        .collect();

    Ok(Json(serde_json::json!({
        "object": "list",
        "data": models,
        "has_more": false,
    })))
}

async fn handle_token(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "token": state.auth.copilot_token().await }))
}

async fn handle_usage(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>> {
    let github_token = state
        .auth
        .github_token()
        .await
        .ok_or(GatewayError::NotAuthenticated)?;
    Ok(Json(state.github.get_copilot_usage(&github_token).await?))
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
