//! OpenAI-compatible handlers

use std::time::Instant;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use uuid::Uuid;

use super::{
    error_response, AppState, ChatChoice, ChatCompletionRequest, ChatCompletionResponse,
    ChatMessage, OpenAIModel, OpenAIModelsResponse, Usage,
};
use crate::{
    prompt::{approximate_token_count, format_messages},
    registry::unix_timestamp,
};

/// `chatcmpl-` plus the first 8 hex characters of a random UUID
fn completion_id() -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("chatcmpl-{}", &uuid[..8])
}

fn build_chat_response(model: String, text: String, prompt_tokens: usize) -> ChatCompletionResponse {
    let completion_tokens = approximate_token_count(&text);
    ChatCompletionResponse {
        id: completion_id(),
        object: "chat.completion".to_string(),
        created: unix_timestamp(),
        model,
        choices: vec![ChatChoice {
            index: 0,
            message: ChatMessage::assistant(text),
            finish_reason: "stop".to_string(),
        }],
        usage: Usage::new(prompt_tokens, completion_tokens),
    }
}

/// Chat completion handler
///
/// 503 when the manager is absent or uninitialized; 500 with
/// `Generation failed: <cause>` for any failure after that, including an
/// implicit model load.
pub async fn chat_completions_handler(
    State(state): State<AppState>,
    Json(request): Json<ChatCompletionRequest>,
) -> Response {
    let manager = match state.ready_manager() {
        Ok(manager) => manager,
        Err(response) => return response,
    };

    let prompt = format_messages(
        request
            .messages
            .iter()
            .map(|m| (m.role.as_str(), m.content.as_str())),
    );
    let max_tokens = request.max_tokens();
    let temperature = request.temperature();
    let start = Instant::now();

    let text = match manager
        .generate(&request.model, &prompt, max_tokens, temperature, request.stream)
        .await
    {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(model = %request.model, error = %e, "chat completion failed");
            state.metrics().record_failure();
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Generation failed: {e}"),
            );
        },
    };

    let response = build_chat_response(request.model, text, approximate_token_count(&prompt));
    state
        .metrics()
        .record_success(response.usage.completion_tokens, start.elapsed());
    tracing::info!(
        id = %response.id,
        model = %response.model,
        prompt_tokens = response.usage.prompt_tokens,
        completion_tokens = response.usage.completion_tokens,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "chat completion"
    );
    Json(response).into_response()
}

/// `GET /v1/models`
pub(crate) async fn models_handler(State(state): State<AppState>) -> Response {
    let manager = match state.ready_manager() {
        Ok(manager) => manager,
        Err(response) => return response,
    };

    let data = manager
        .loaded_models()
        .into_iter()
        .map(|info| OpenAIModel {
            id: info.id,
            object: "model".to_string(),
            created: info.loaded_at,
            owned_by: "conversar".to_string(),
        })
        .collect();

    Json(OpenAIModelsResponse {
        object: "list".to_string(),
        data,
        current_model: manager.current_model(),
    })
    .into_response()
}
