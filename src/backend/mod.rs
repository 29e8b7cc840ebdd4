//! Model runtime seam
//!
//! Everything that touches weights, tensors or vocabularies sits behind three
//! traits so the registry and the HTTP layer never see a concrete runtime:
//!
//! - [`ModelLoader`]: resolves a model identifier to artifacts and builds the
//!   model/tokenizer pair on a device
//! - [`TextTokenizer`]: text to token ids and back
//! - [`CausalModel`]: bounded autoregressive generation over token ids
//!
//! Two implementations ship with the crate: [`candle`] (Hugging Face hub +
//! candle kernels) and [`mock`] (deterministic, used by tests and demo mode).

use std::sync::Arc;

use async_trait::async_trait;

use crate::{device::ComputeDevice, error::Result, quantization::QuantizationMode};

#[cfg(feature = "candle")]
pub mod candle;
pub mod mock;

/// Parameters for one generation call
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    /// Upper bound on newly generated tokens
    pub max_new_tokens: usize,
    /// Sampling temperature
    pub temperature: f32,
    /// Sample from the distribution (`false` = greedy argmax)
    pub do_sample: bool,
    /// Padding token id
    pub pad_token_id: Option<u32>,
    /// Generation stops after emitting this token
    pub eos_token_id: Option<u32>,
    /// Sampler seed
    pub seed: u64,
}

impl GenerationParams {
    /// Build parameters for a tokenizer; sampling is enabled iff `temperature > 0`
    #[must_use]
    pub fn new(max_new_tokens: usize, temperature: f32, tokenizer: &dyn TextTokenizer) -> Self {
        Self {
            max_new_tokens,
            temperature,
            do_sample: temperature > 0.0,
            pad_token_id: tokenizer.pad_token_id(),
            eos_token_id: tokenizer.eos_token_id(),
            seed: rand::random(),
        }
    }

    /// Override the sampler seed
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Tokenizer handle
pub trait TextTokenizer: Send + Sync {
    /// Encode text, including any special tokens the tokenizer adds
    ///
    /// # Errors
    ///
    /// Returns error if the tokenizer rejects the input
    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    /// Decode token ids
    ///
    /// # Errors
    ///
    /// Returns error if an id is outside the vocabulary
    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String>;

    /// End-of-sequence token id
    fn eos_token_id(&self) -> Option<u32>;

    /// Padding token id, falling back to end-of-sequence
    fn pad_token_id(&self) -> Option<u32> {
        self.eos_token_id()
    }
}

/// Model handle
pub trait CausalModel: Send + Sync {
    /// Run generation and return the prompt ids followed by the generated ids
    ///
    /// Blocking; callers on an async runtime should move this off the reactor.
    ///
    /// # Errors
    ///
    /// Returns error if a forward pass or sampling step fails
    fn generate(&self, input_ids: &[u32], params: &GenerationParams) -> Result<Vec<u32>>;

    /// Architecture name for diagnostics
    fn architecture(&self) -> &str;
}

/// Model/tokenizer pair produced by a [`ModelLoader`]
#[derive(Clone)]
pub struct LoadedArtifacts {
    /// Model handle
    pub model: Arc<dyn CausalModel>,
    /// Tokenizer handle
    pub tokenizer: Arc<dyn TextTokenizer>,
    /// Quantization that was actually applied
    pub quantization: QuantizationMode,
}

/// Artifact source and model constructor
#[async_trait]
pub trait ModelLoader: Send + Sync {
    /// Short loader name for logs and `/health`
    fn name(&self) -> &str;

    /// Fetch artifacts for `model_id` and place the model on `device`
    ///
    /// # Errors
    ///
    /// Returns error if artifacts cannot be fetched or the configuration is
    /// incompatible with the device
    async fn load(
        &self,
        model_id: &str,
        quantization: QuantizationMode,
        device: &ComputeDevice,
    ) -> Result<LoadedArtifacts>;
}
