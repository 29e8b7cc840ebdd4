//! Request and response types for the non-OpenAI endpoints

use serde::{Deserialize, Serialize};

use crate::quantization::QuantizationMode;

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `healthy` once the manager is initialized, `initializing` before
    pub status: String,
    /// Service version
    pub version: String,
    /// Compute device label
    pub device: Option<String>,
    /// Number of loaded models
    pub loaded_models: usize,
}

/// Error body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable failure
    pub detail: String,
}

/// `POST /v1/models/load` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadModelRequest {
    /// Model identifier
    pub model: String,
    /// Requested quantization (server default when omitted)
    #[serde(default)]
    pub quantization: Option<QuantizationMode>,
}

/// `POST /v1/models/unload` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnloadModelRequest {
    /// Model identifier
    pub model: String,
}

/// `POST /v1/models/unload` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnloadModelResponse {
    /// Model identifier
    pub model: String,
    /// Whether a loaded model was removed
    pub unloaded: bool,
}
