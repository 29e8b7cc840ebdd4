//! # Conversar
//!
//! OpenAI-compatible chat completion server in front of a lazily populated
//! model registry.
//!
//! Conversar (Spanish: "to converse") flattens chat turns into a prompt, loads
//! the requested model on first use and delegates generation to the `candle`
//! runtime.
//!
//! ## Features
//!
//! - **Chat completions**: `POST /chat/completions` in the OpenAI wire format
//! - **On-demand loading**: models come from the Hugging Face hub or a local
//!   directory the first time they are named, single-flight per identifier
//! - **Quantization**: 4-bit and 8-bit GGUF weights on accelerators, full
//!   precision on CPU
//! - **Model management**: explicit load, unload and listing endpoints
//!
//! ## Example
//!
//! ```rust
//! use conversar::prompt::format_messages;
//!
//! let prompt = format_messages([("system", "Be brief."), ("user", "Hi")]);
//! assert_eq!(prompt, "System: Be brief.\n\nUser: Hi\n\nAssistant: ");
//! ```
//!
//! ## Architecture
//!
//! - [`api`]: axum router and handlers
//! - [`manager`]: load/generate/unload orchestration
//! - [`registry`]: lock-free map of loaded models
//! - [`backend`]: runtime seam (`candle` and a deterministic mock)

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
// Clippy allows (MUST come after deny/warn to override them)
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)] // u128 -> u64 for elapsed millis
#![allow(clippy::cast_precision_loss)] // usize -> f64 for averages
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_panics_doc)]

#[cfg(feature = "server")]
pub mod api;
pub mod backend;
#[cfg(feature = "server")]
pub mod config;
pub mod device;
pub mod error;
pub mod manager;
#[cfg(feature = "server")]
pub mod metrics;
pub mod prompt;
pub mod quantization;
pub mod registry;

pub use error::{ConversarError, Result};
pub use manager::ModelManager;
pub use quantization::QuantizationMode;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(VERSION.starts_with("0."));
        assert!(VERSION.contains('.'));
    }
}
