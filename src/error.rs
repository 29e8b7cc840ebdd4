//! Error types for Conversar
//!
//! A single error enum covers the registry, the model runtime and configuration.
//! The HTTP layer collapses every variant raised during a completion into one
//! generation-failure response, so variants exist for logging and for callers of
//! the library API, not for status-code routing.

use thiserror::Error;

/// Result type alias for Conversar operations
pub type Result<T> = std::result::Result<T, ConversarError>;

/// Error type for all Conversar operations
#[derive(Error, Debug)]
pub enum ConversarError {
    /// Model artifacts (tokenizer, weights, config) could not be resolved
    #[error("Failed to fetch artifacts for '{model}': {reason}")]
    ArtifactFetch {
        /// Model identifier
        model: String,
        /// Underlying failure
        reason: String,
    },

    /// The checkpoint architecture or requested quantization is not supported
    #[error("Incompatible configuration for '{model}': {reason}")]
    IncompatibleConfiguration {
        /// Model identifier
        model: String,
        /// Why the configuration was rejected
        reason: String,
    },

    /// Tokenizer failed to encode or decode
    #[error("Tokenization failed: {0}")]
    Tokenization(String),

    /// Forward pass or sampling failed
    #[error("Inference failed: {0}")]
    Inference(String),

    /// Model is not present in the registry
    #[error("Model '{0}' not loaded")]
    ModelNotFound(String),

    /// Model with the same identifier is already registered
    #[error("Model '{0}' already loaded")]
    ModelAlreadyExists(String),

    /// Registry bookkeeping failure (poisoned lock, join error)
    #[error("Registry error: {0}")]
    RegistryError(String),

    /// Model manager has not been initialized
    #[error("Model manager not initialized")]
    NotInitialized,

    /// Invalid server or model configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Filesystem or socket failure
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(feature = "candle")]
impl From<candle_core::Error> for ConversarError {
    fn from(err: candle_core::Error) -> Self {
        Self::Inference(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ConversarError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::RegistryError(format!("background task failed: {err}"))
    }
}
