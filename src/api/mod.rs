//! HTTP API
//!
//! OpenAI-compatible chat completions plus model management, built on axum.
//!
//! ## Endpoints
//!
//! - `POST /chat/completions` - Chat completion (alias: `/v1/chat/completions`)
//! - `GET /health` - Health check
//! - `GET /v1/models` - Loaded models
//! - `POST /v1/models/load` - Load a model
//! - `POST /v1/models/unload` - Unload a model
//! - `GET /metrics` - JSON completion counters
//!
//! ## Example
//!
//! ```rust,ignore
//! use conversar::api::{create_router, AppState};
//!
//! let state = AppState::new(Arc::new(manager));
//! let app = create_router(state);
//! axum::serve(listener, app).await?;
//! ```

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::trace::TraceLayer;

use crate::{manager::ModelManager, metrics::MetricsCollector};

mod openai_handlers;
mod openai_types;
mod types;

pub use openai_handlers::chat_completions_handler;
pub use openai_types::{
    ChatChoice, ChatCompletionRequest, ChatCompletionResponse, ChatMessage, OpenAIModel,
    OpenAIModelsResponse, Usage, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE,
};
pub use types::{
    ErrorResponse, HealthResponse, LoadModelRequest, UnloadModelRequest, UnloadModelResponse,
};

#[cfg(test)]
mod test_helpers;
#[cfg(test)]
mod tests;

/// Detail returned with every 503
pub const NOT_INITIALIZED: &str = "Model manager not initialized";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Model manager; `None` until the server has constructed one
    manager: Option<Arc<ModelManager>>,
    /// Completion counters
    metrics: Arc<MetricsCollector>,
}

impl AppState {
    /// State backed by `manager`
    #[must_use]
    pub fn new(manager: Arc<ModelManager>) -> Self {
        Self {
            manager: Some(manager),
            metrics: Arc::new(MetricsCollector::new()),
        }
    }

    /// State without a manager; every model endpoint answers 503
    #[must_use]
    pub fn uninitialized() -> Self {
        Self {
            manager: None,
            metrics: Arc::new(MetricsCollector::new()),
        }
    }

    /// Manager, if present
    #[must_use]
    pub fn manager(&self) -> Option<&Arc<ModelManager>> {
        self.manager.as_ref()
    }

    /// Completion counters
    #[must_use]
    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Manager that is present and initialized, or the 503 response
    #[allow(clippy::result_large_err)]
    pub(crate) fn ready_manager(&self) -> Result<&Arc<ModelManager>, Response> {
        self.manager
            .as_ref()
            .filter(|manager| manager.is_initialized())
            .ok_or_else(|| error_response(StatusCode::SERVICE_UNAVAILABLE, NOT_INITIALIZED))
    }
}

/// `{"detail": ...}` error body with `status`
pub(crate) fn error_response(status: StatusCode, detail: impl std::fmt::Display) -> Response {
    (
        status,
        Json(ErrorResponse {
            detail: detail.to_string(),
        }),
    )
        .into_response()
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        // OpenAI-compatible API
        .route("/chat/completions", post(chat_completions_handler))
        .route("/v1/chat/completions", post(chat_completions_handler))
        .route("/v1/models", get(openai_handlers::models_handler))
        // Model management
        .route("/v1/models/load", post(load_model_handler))
        .route("/v1/models/unload", post(unload_model_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check handler
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let (status, device, loaded_models) = match state.manager() {
        Some(manager) if manager.is_initialized() => (
            "healthy",
            Some(manager.device().to_string()),
            manager.list_loaded_models().len(),
        ),
        Some(manager) => ("initializing", Some(manager.device().to_string()), 0),
        None => ("initializing", None, 0),
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: crate::VERSION.to_string(),
        device,
        loaded_models,
    })
}

async fn metrics_handler(State(state): State<AppState>) -> Json<crate::metrics::MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

/// Load a model explicitly
async fn load_model_handler(
    State(state): State<AppState>,
    Json(request): Json<LoadModelRequest>,
) -> Response {
    let manager = match state.ready_manager() {
        Ok(manager) => manager,
        Err(response) => return response,
    };
    let quantization = request
        .quantization
        .unwrap_or_else(|| manager.default_quantization());

    match manager.load(&request.model, quantization).await {
        Ok(entry) => Json(entry.info.clone()).into_response(),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Load failed: {e}"),
        ),
    }
}

/// Unload a model; unloading an absent model is not an error
async fn unload_model_handler(
    State(state): State<AppState>,
    Json(request): Json<UnloadModelRequest>,
) -> Response {
    let manager = match state.ready_manager() {
        Ok(manager) => manager,
        Err(response) => return response,
    };

    match manager.unload(&request.model) {
        Ok(unloaded) => Json(UnloadModelResponse {
            model: request.model,
            unloaded,
        })
        .into_response(),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Unload failed: {e}"),
        ),
    }
}
