//! Deterministic in-process backend
//!
//! Byte-level tokenizer plus a scripted model. Decoding is lossless so prompt
//! echo stripping behaves the way it does with a real tokenizer. Used by the
//! test suites and by `conversar serve --demo`.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;

use super::{CausalModel, GenerationParams, LoadedArtifacts, ModelLoader, TextTokenizer};
use crate::{
    device::ComputeDevice,
    error::{ConversarError, Result},
    prompt::ASSISTANT_CUE,
    quantization::QuantizationMode,
};

/// Beginning-of-sequence id
pub const BOS_TOKEN: u32 = 256;
/// End-of-sequence id
pub const EOS_TOKEN: u32 = 257;

/// Tokenizer mapping each UTF-8 byte to its value, with BOS/EOS above 255
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteTokenizer;

impl ByteTokenizer {
    /// Create a byte tokenizer
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl TextTokenizer for ByteTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let mut ids = Vec::with_capacity(text.len() + 1);
        ids.push(BOS_TOKEN);
        ids.extend(text.bytes().map(u32::from));
        Ok(ids)
    }

    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String> {
        let mut bytes = Vec::with_capacity(ids.len());
        for &id in ids {
            match (id, u8::try_from(id)) {
                (_, Ok(byte)) => bytes.push(byte),
                (BOS_TOKEN, _) if !skip_special_tokens => bytes.extend_from_slice(b"<s>"),
                (EOS_TOKEN, _) if !skip_special_tokens => bytes.extend_from_slice(b"</s>"),
                (BOS_TOKEN | EOS_TOKEN, _) => {},
                (other, _) => {
                    return Err(ConversarError::Tokenization(format!(
                        "token id {other} outside byte vocabulary"
                    )))
                },
            }
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn eos_token_id(&self) -> Option<u32> {
        Some(EOS_TOKEN)
    }
}

/// Scripted causal model
///
/// Echoes the prompt, then appends either a fixed reply or, when none is set,
/// `"You said: <last user turn>"`. Output is cut at `max_new_tokens` and
/// terminated with EOS when there is room.
#[derive(Debug, Clone, Default)]
pub struct ScriptedModel {
    reply: Option<String>,
    failure: Option<String>,
}

impl ScriptedModel {
    /// Echo model
    #[must_use]
    pub fn echo() -> Self {
        Self::default()
    }

    /// Model that always answers `reply`
    #[must_use]
    pub fn with_reply(reply: impl Into<String>) -> Self {
        Self {
            reply: Some(reply.into()),
            failure: None,
        }
    }

    /// Model whose every generation fails with `message`
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            reply: None,
            failure: Some(message.into()),
        }
    }

    fn reply_for(&self, prompt: &str) -> String {
        if let Some(reply) = &self.reply {
            return reply.clone();
        }
        let last_user = prompt
            .rsplit("User: ")
            .next()
            .filter(|_| prompt.contains("User: "))
            .map(|turn| turn.split("\n\n").next().unwrap_or_default())
            .unwrap_or_default();
        format!("You said: {last_user}")
    }
}

impl CausalModel for ScriptedModel {
    fn generate(&self, input_ids: &[u32], params: &GenerationParams) -> Result<Vec<u32>> {
        if let Some(message) = &self.failure {
            return Err(ConversarError::Inference(message.clone()));
        }
        let prompt = ByteTokenizer.decode(input_ids, true)?;
        let prompt = prompt.strip_suffix(ASSISTANT_CUE).unwrap_or(&prompt);

        let mut output = input_ids.to_vec();
        let reply: Vec<u32> = self
            .reply_for(prompt)
            .bytes()
            .map(u32::from)
            .take(params.max_new_tokens)
            .collect();
        let room_for_eos = reply.len() < params.max_new_tokens;
        output.extend(reply);
        if room_for_eos {
            if let Some(eos) = params.eos_token_id {
                output.push(eos);
            }
        }
        Ok(output)
    }

    fn architecture(&self) -> &str {
        "scripted"
    }
}

#[derive(Default)]
struct LoaderState {
    loads: HashMap<String, usize>,
}

/// Loader for [`ScriptedModel`]s with configurable failures
///
/// Records how many times each identifier was loaded.
#[derive(Clone, Default)]
pub struct MockLoader {
    reply: Option<String>,
    missing: HashSet<String>,
    broken: HashSet<String>,
    load_delay: Option<Duration>,
    state: Arc<Mutex<LoaderState>>,
}

impl MockLoader {
    /// Loader producing echo models
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every model answers `reply`
    #[must_use]
    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = Some(reply.into());
        self
    }

    /// Loading `model_id` fails as if its artifacts did not exist
    #[must_use]
    pub fn with_missing_model(mut self, model_id: impl Into<String>) -> Self {
        self.missing.insert(model_id.into());
        self
    }

    /// `model_id` loads but every generation fails
    #[must_use]
    pub fn with_broken_model(mut self, model_id: impl Into<String>) -> Self {
        self.broken.insert(model_id.into());
        self
    }

    /// Sleep this long inside every load
    #[must_use]
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = Some(delay);
        self
    }

    /// Number of completed artifact fetches for `model_id`
    #[must_use]
    pub fn load_count(&self, model_id: &str) -> usize {
        self.state
            .lock()
            .map(|state| state.loads.get(model_id).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Number of completed artifact fetches across all identifiers
    #[must_use]
    pub fn total_loads(&self) -> usize {
        self.state
            .lock()
            .map(|state| state.loads.values().sum())
            .unwrap_or(0)
    }
}

#[async_trait]
impl ModelLoader for MockLoader {
    fn name(&self) -> &str {
        "mock"
    }

    async fn load(
        &self,
        model_id: &str,
        quantization: QuantizationMode,
        device: &ComputeDevice,
    ) -> Result<LoadedArtifacts> {
        if let Some(delay) = self.load_delay {
            tokio::time::sleep(delay).await;
        }
        if self.missing.contains(model_id) {
            return Err(ConversarError::ArtifactFetch {
                model: model_id.to_string(),
                reason: "repository not found".to_string(),
            });
        }

        let model = if self.broken.contains(model_id) {
            ScriptedModel::failing("CUDA out of memory")
        } else if let Some(reply) = &self.reply {
            ScriptedModel::with_reply(reply.clone())
        } else {
            ScriptedModel::echo()
        };

        self.state
            .lock()
            .map_err(|_| ConversarError::RegistryError("mock loader state poisoned".to_string()))?
            .loads
            .entry(model_id.to_string())
            .and_modify(|n| *n += 1)
            .or_insert(1);

        Ok(LoadedArtifacts {
            model: Arc::new(model),
            tokenizer: Arc::new(ByteTokenizer::new()),
            quantization: quantization.effective(device.is_accelerator()),
        })
    }
}
