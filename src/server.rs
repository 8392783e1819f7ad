//! OpenAI-style chat completion endpoint in front of the gateway.
//!
//! Each inbound request becomes exactly one gateway query keyed by the
//! formatted chat prompt, so concurrent clients share one backend and one cache.

use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::models::{ChatMessage, SamplingParams};
use crate::prompt::format_chat;
use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info};

/// Shared state for the HTTP server
#[derive(Clone)]
pub struct ServerState {
    pub gateway: Arc<Gateway>,
    /// Stop strings applied to every request
    pub stop: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f32 {
    0.6
}

fn default_top_p() -> f32 {
    0.9
}

fn default_max_tokens() -> u32 {
    256
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    pub usage: Usage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: u32,
    pub message: ChatMessage,
    pub finish_reason: String,
}

/// Whitespace-delimited word counts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// Error body in the `{"detail": ...}` shape clients expect
struct ApiError {
    status: StatusCode,
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        error!("Chat completion failed: {}", err);
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: err.to_string(),
        }
    }
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Bind and serve until the process is stopped
pub async fn serve(bind: &str, state: ServerState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!("Serving chat completions on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .await
        .context("HTTP server failed")
}

/// Health check endpoint
async fn health_handler() -> impl IntoResponse {
    "ok"
}

async fn chat_completions_handler(
    State(state): State<ServerState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatCompletionResponse>, ApiError> {
    if request.messages.is_empty() {
        return Err(ApiError {
            status: StatusCode::BAD_REQUEST,
            detail: "messages must be a non-empty list".to_string(),
        });
    }

    let prompt = format_chat(&request.messages);
    let params = SamplingParams {
        temperature: request.temperature,
        top_p: request.top_p,
        max_tokens: request.max_tokens,
        stop: state.stop.clone(),
    };
    debug!("Chat completion request with {} messages", request.messages.len());

    let content = state.gateway.query(&prompt, &params).await?;
    let model = state.gateway.model_id().await?;

    let prompt_tokens = prompt.split_whitespace().count();
    let completion_tokens = content.split_whitespace().count();

    Ok(Json(ChatCompletionResponse {
        id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
        object: "chat.completion".to_string(),
        created: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs(),
        model,
        choices: vec![ChatChoice {
            index: 0,
            message: ChatMessage {
                role: "assistant".to_string(),
                content,
            },
            finish_reason: "stop".to_string(),
        }],
        usage: Usage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        },
    }))
}
