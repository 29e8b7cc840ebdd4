//! OpenAI-compatible chat completion types

use serde::{Deserialize, Serialize};

/// `max_tokens` when the request omits it
pub const DEFAULT_MAX_TOKENS: usize = 512;
/// `temperature` when the request omits it
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Chat completion request
///
/// `max_tokens` and `temperature` may be absent or `null`; use
/// [`max_tokens`](Self::max_tokens) and [`temperature`](Self::temperature) for
/// the effective values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    /// Model ID to use
    pub model: String,
    /// Chat messages, oldest first
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Maximum tokens to generate
    #[serde(default)]
    pub max_tokens: Option<usize>,
    /// Accepted for compatibility; responses are never streamed
    #[serde(default)]
    pub stream: bool,
}

impl ChatCompletionRequest {
    /// Effective generation bound
    #[must_use]
    pub fn max_tokens(&self) -> usize {
        self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)
    }

    /// Effective sampling temperature
    #[must_use]
    pub fn temperature(&self) -> f32 {
        self.temperature.unwrap_or(DEFAULT_TEMPERATURE)
    }
}

/// Chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role: "system", "user", "assistant"; anything else is ignored
    pub role: String,
    /// Message content
    pub content: String,
    /// Optional participant name (ignored)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    /// Assistant reply
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
            name: None,
        }
    }
}

/// Chat completion response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    /// `chatcmpl-` followed by 8 hex characters
    pub id: String,
    /// Always `chat.completion`
    pub object: String,
    /// Creation time, unix seconds
    pub created: u64,
    /// Model used
    pub model: String,
    /// Exactly one choice
    pub choices: Vec<ChatChoice>,
    /// Approximate token usage
    pub usage: Usage,
}

/// Chat completion choice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoice {
    /// Choice index
    pub index: usize,
    /// Generated message
    pub message: ChatMessage,
    /// Always `stop`
    pub finish_reason: String,
}

/// Token usage, counted as whitespace-separated words
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Words in the flattened prompt
    pub prompt_tokens: usize,
    /// Words in the generated text
    pub completion_tokens: usize,
    /// Sum of both
    pub total_tokens: usize,
}

impl Usage {
    /// Usage block with `total_tokens` filled in
    #[must_use]
    pub fn new(prompt_tokens: usize, completion_tokens: usize) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// `GET /v1/models` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIModelsResponse {
    /// Always `list`
    pub object: String,
    /// Loaded models, in load order
    pub data: Vec<OpenAIModel>,
    /// Most recently loaded model
    pub current_model: Option<String>,
}

/// Model entry in `GET /v1/models`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIModel {
    /// Model identifier
    pub id: String,
    /// Always `model`
    pub object: String,
    /// Load time, unix seconds
    pub created: u64,
    /// Owner label
    pub owned_by: String,
}
