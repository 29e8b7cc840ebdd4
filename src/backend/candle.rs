//! Hugging Face hub + candle backend
//!
//! Artifacts come from the hub (or from a local directory when the model
//! identifier is a path):
//!
//! - `tokenizer.json` from the model repository; a GGUF-only repository may
//!   borrow it from its base model (GGUF `general.base_model.0.repo_id`) or
//!   from [`HubConfig::tokenizer_repo`]
//! - full precision: `config.json` plus `model.safetensors` or its shards, built
//!   with `candle_transformers::models::llama`
//! - 4bit/8bit on an accelerator: a GGUF file whose name carries the matching
//!   quant tag, built with `candle_transformers::models::quantized_llama`.
//!   Without one the full-precision weights are used and the load records
//!   `none` as its effective quantization.
//!
//! Only Llama-family architectures are supported.

use std::{
    collections::HashMap,
    fs::File,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Instant,
};

use async_trait::async_trait;
use candle_core::{quantized::gguf_file, DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::{
    generation::{LogitsProcessor, Sampling},
    models::{
        llama::{Cache, Config, Llama, LlamaConfig, LlamaEosToks},
        quantized_llama,
    },
};
use hf_hub::{
    api::tokio::{Api, ApiBuilder},
    Repo, RepoType,
};
use tokenizers::Tokenizer;

use super::{CausalModel, GenerationParams, LoadedArtifacts, ModelLoader, TextTokenizer};
use crate::{
    device::ComputeDevice,
    error::{ConversarError, Result},
    quantization::QuantizationMode,
};

/// Tokens tried, in order, when the tokenizer does not name its EOS token
const EOS_CANDIDATES: &[&str] = &["</s>", "<|endoftext|>", "<|eot_id|>", "<|im_end|>", "<eos>"];

const TOKENIZER_FILE: &str = "tokenizer.json";
const CONFIG_FILE: &str = "config.json";
const SINGLE_SAFETENSORS: &str = "model.safetensors";
const LLAMA_MODEL_TYPE: &str = "llama";
const LLAMA_ARCHITECTURE: &str = "LlamaForCausalLM";
const GGUF_BASE_MODEL_KEY: &str = "general.base_model.0.repo_id";

// ============================================================================
// Artifact resolution
// ============================================================================

/// Hub access settings
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Access token for gated repositories
    pub token: Option<String>,
    /// Download cache (defaults to the hub's own cache directory)
    pub cache_dir: Option<PathBuf>,
    /// Git revision to fetch
    pub revision: String,
    /// Repository to take `tokenizer.json` from when a GGUF repository has none
    /// and its metadata names no base model
    pub tokenizer_repo: Option<String>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            token: None,
            cache_dir: None,
            revision: "main".to_string(),
            tokenizer_repo: None,
        }
    }
}

/// Weight files to fetch for a model
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WeightPlan {
    /// Single quantized GGUF file
    Gguf(String),
    /// Safetensors file or shards, in shard order
    Safetensors(Vec<String>),
}

impl WeightPlan {
    /// Quantization actually applied when `requested` was asked for
    #[must_use]
    pub fn effective(&self, requested: QuantizationMode) -> QuantizationMode {
        match self {
            Self::Gguf(_) => requested,
            Self::Safetensors(_) => QuantizationMode::None,
        }
    }
}

/// Pick weight files from a repository listing
///
/// A quantized mode picks the GGUF file carrying its tag. Without one it falls
/// back to the full-precision weights.
///
/// # Errors
///
/// Returns `ArtifactFetch` when no usable weights exist.
pub fn select_weights(
    model_id: &str,
    files: &[String],
    quantization: QuantizationMode,
) -> Result<WeightPlan> {
    if quantization.is_quantized() {
        for tag in quantization.gguf_tags() {
            if let Some(file) = files.iter().find(|f| {
                let lower = f.to_ascii_lowercase();
                lower.ends_with(".gguf") && lower.contains(tag)
            }) {
                return Ok(WeightPlan::Gguf(file.clone()));
            }
        }
        tracing::warn!(
            model = model_id,
            quantization = %quantization,
            "no matching GGUF weights, loading full precision"
        );
    }

    if files.iter().any(|f| f == SINGLE_SAFETENSORS) {
        return Ok(WeightPlan::Safetensors(vec![SINGLE_SAFETENSORS.to_string()]));
    }
    let mut shards: Vec<String> = files
        .iter()
        .filter(|f| f.starts_with("model-") && f.ends_with(".safetensors"))
        .cloned()
        .collect();
    if shards.is_empty() {
        return Err(ConversarError::ArtifactFetch {
            model: model_id.to_string(),
            reason: "no safetensors weights found".to_string(),
        });
    }
    shards.sort();
    Ok(WeightPlan::Safetensors(shards))
}

enum WeightFiles {
    Gguf(PathBuf),
    Safetensors { config: PathBuf, shards: Vec<PathBuf> },
}

struct ModelFiles {
    tokenizer: PathBuf,
    weights: WeightFiles,
    quantization: QuantizationMode,
}

fn fetch_error(model_id: &str, err: impl std::fmt::Display) -> ConversarError {
    ConversarError::ArtifactFetch {
        model: model_id.to_string(),
        reason: err.to_string(),
    }
}

/// Repository to borrow `tokenizer.json` from: the GGUF base model first, then
/// the configured fallback
fn tokenizer_source(
    model_id: &str,
    base_model: Option<String>,
    configured: Option<&str>,
) -> Result<String> {
    base_model
        .filter(|repo| !repo.trim().is_empty())
        .or_else(|| configured.map(str::to_string))
        .ok_or_else(|| {
            fetch_error(
                model_id,
                "repository has no tokenizer.json; set --tokenizer-repo",
            )
        })
}

/// Base model recorded in GGUF metadata, if any
fn gguf_base_model(path: &Path) -> Option<String> {
    let mut file = File::open(path).ok()?;
    let content = gguf_file::Content::read(&mut file).ok()?;
    content
        .metadata
        .get(GGUF_BASE_MODEL_KEY)
        .and_then(|v| v.to_string().ok())
        .cloned()
}

/// Loads Llama-family models from the Hugging Face hub or a local directory
pub struct HubLoader {
    config: HubConfig,
}

impl HubLoader {
    /// Create a loader
    #[must_use]
    pub fn new(config: HubConfig) -> Self {
        Self { config }
    }

    fn api(&self) -> Result<Api> {
        let mut builder = ApiBuilder::new()
            .with_token(self.config.token.clone())
            .with_progress(false);
        if let Some(dir) = &self.config.cache_dir {
            builder = builder.with_cache_dir(dir.clone());
        }
        builder
            .build()
            .map_err(|e| ConversarError::InvalidConfiguration(format!("hub client: {e}")))
    }

    async fn fetch(&self, model_id: &str, quantization: QuantizationMode) -> Result<ModelFiles> {
        let local = Path::new(model_id);
        if local.is_dir() {
            return local_files(model_id, local, quantization);
        }

        let repo = self.api()?.repo(Repo::with_revision(
            model_id.to_string(),
            RepoType::Model,
            self.config.revision.clone(),
        ));
        let listing: Vec<String> = repo
            .info()
            .await
            .map_err(|e| fetch_error(model_id, e))?
            .siblings
            .into_iter()
            .map(|s| s.rfilename)
            .collect();
        let plan = select_weights(model_id, &listing, quantization)?;
        let effective = plan.effective(quantization);

        let weights = match plan {
            WeightPlan::Gguf(name) => {
                WeightFiles::Gguf(repo.get(&name).await.map_err(|e| fetch_error(model_id, e))?)
            },
            WeightPlan::Safetensors(names) => {
                let config = repo
                    .get(CONFIG_FILE)
                    .await
                    .map_err(|e| fetch_error(model_id, e))?;
                let mut shards = Vec::with_capacity(names.len());
                for name in &names {
                    tracing::debug!(model = model_id, file = %name, "fetching weight shard");
                    shards.push(repo.get(name).await.map_err(|e| fetch_error(model_id, e))?);
                }
                WeightFiles::Safetensors { config, shards }
            },
        };

        let tokenizer = if listing.iter().any(|f| f == TOKENIZER_FILE) {
            repo.get(TOKENIZER_FILE)
                .await
                .map_err(|e| fetch_error(model_id, e))?
        } else {
            let base_model = match &weights {
                WeightFiles::Gguf(path) => {
                    let path = path.clone();
                    tokio::task::spawn_blocking(move || gguf_base_model(&path)).await?
                },
                WeightFiles::Safetensors { .. } => None,
            };
            let source =
                tokenizer_source(model_id, base_model, self.config.tokenizer_repo.as_deref())?;
            tracing::info!(model = model_id, tokenizer_repo = %source, "borrowing tokenizer.json");
            self.api()?
                .model(source)
                .get(TOKENIZER_FILE)
                .await
                .map_err(|e| fetch_error(model_id, e))?
        };
        Ok(ModelFiles {
            tokenizer,
            weights,
            quantization: effective,
        })
    }
}

fn local_files(model_id: &str, dir: &Path, quantization: QuantizationMode) -> Result<ModelFiles> {
    let mut listing = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            listing.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    let require = |name: &str| -> Result<PathBuf> {
        let path = dir.join(name);
        if path.is_file() {
            Ok(path)
        } else {
            Err(fetch_error(model_id, format!("missing {name}")))
        }
    };

    let plan = select_weights(model_id, &listing, quantization)?;
    let effective = plan.effective(quantization);
    let weights = match plan {
        WeightPlan::Gguf(name) => WeightFiles::Gguf(dir.join(name)),
        WeightPlan::Safetensors(names) => WeightFiles::Safetensors {
            config: require(CONFIG_FILE)?,
            shards: names.iter().map(|n| dir.join(n)).collect(),
        },
    };
    Ok(ModelFiles {
        tokenizer: require(TOKENIZER_FILE)?,
        weights,
        quantization: effective,
    })
}

#[async_trait]
impl ModelLoader for HubLoader {
    fn name(&self) -> &str {
        "candle"
    }

    async fn load(
        &self,
        model_id: &str,
        quantization: QuantizationMode,
        device: &ComputeDevice,
    ) -> Result<LoadedArtifacts> {
        let effective = quantization.effective(device.is_accelerator());
        let files = self.fetch(model_id, effective).await?;
        let model_id = model_id.to_string();
        let device = device.candle().clone();
        tokio::task::spawn_blocking(move || build(&model_id, files, device)).await?
    }
}

// ============================================================================
// Model construction
// ============================================================================

fn build(model_id: &str, files: ModelFiles, device: Device) -> Result<LoadedArtifacts> {
    let start = Instant::now();
    let tokenizer = HfTokenizer::from_file(&files.tokenizer)?;

    let (model, config_eos) = match files.weights {
        WeightFiles::Gguf(path) => load_gguf(model_id, &path, device)?,
        WeightFiles::Safetensors { config, shards } => {
            load_safetensors(model_id, &config, &shards, device)?
        },
    };
    let tokenizer = tokenizer.with_eos(config_eos);

    tracing::debug!(
        model = model_id,
        arch = model.architecture(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "weights placed on device"
    );
    Ok(LoadedArtifacts {
        model: Arc::new(model),
        tokenizer: Arc::new(tokenizer),
        quantization: files.quantization,
    })
}

fn load_gguf(model_id: &str, path: &Path, device: Device) -> Result<(CandleModel, Option<u32>)> {
    let mut file = File::open(path)?;
    let content = gguf_file::Content::read(&mut file).map_err(|e| {
        ConversarError::IncompatibleConfiguration {
            model: model_id.to_string(),
            reason: format!("invalid GGUF file: {e}"),
        }
    })?;

    let arch = content
        .metadata
        .get("general.architecture")
        .and_then(|v| v.to_string().ok())
        .cloned()
        .unwrap_or_else(|| "llama".to_string());
    if arch != "llama" {
        return Err(ConversarError::IncompatibleConfiguration {
            model: model_id.to_string(),
            reason: format!("unsupported GGUF architecture '{arch}'"),
        });
    }
    let eos = content
        .metadata
        .get("tokenizer.ggml.eos_token_id")
        .and_then(|v| v.to_u32().ok());

    let weights = quantized_llama::ModelWeights::from_gguf(content, &mut file, &device)?;
    Ok((
        CandleModel {
            weights: Weights::Quantized(Mutex::new(weights)),
            device,
        },
        eos,
    ))
}

/// Parse `config.json`, accepting only Llama checkpoints
///
/// `model_type` decides when present, otherwise `architectures` must list
/// `LlamaForCausalLM`. Other families share Llama's tensor names and would load
/// without complaint.
fn parse_llama_config(model_id: &str, raw: &[u8]) -> Result<LlamaConfig> {
    let incompatible = |reason: String| ConversarError::IncompatibleConfiguration {
        model: model_id.to_string(),
        reason,
    };
    let value: serde_json::Value = serde_json::from_slice(raw)
        .map_err(|e| incompatible(format!("invalid config.json: {e}")))?;

    let model_type = value.get("model_type").and_then(serde_json::Value::as_str);
    let architectures: Vec<&str> = value
        .get("architectures")
        .and_then(serde_json::Value::as_array)
        .map(|list| list.iter().filter_map(serde_json::Value::as_str).collect())
        .unwrap_or_default();
    let is_llama = match model_type {
        Some(kind) => kind == LLAMA_MODEL_TYPE,
        None => architectures.contains(&LLAMA_ARCHITECTURE),
    };
    if !is_llama {
        let named = model_type
            .map(str::to_string)
            .or_else(|| (!architectures.is_empty()).then(|| architectures.join(",")))
            .unwrap_or_else(|| "unspecified".to_string());
        return Err(incompatible(format!(
            "unsupported architecture '{named}', only llama is supported"
        )));
    }

    serde_json::from_value(value)
        .map_err(|e| incompatible(format!("config.json is not a Llama config: {e}")))
}

fn load_safetensors(
    model_id: &str,
    config_path: &Path,
    shards: &[PathBuf],
    device: Device,
) -> Result<(CandleModel, Option<u32>)> {
    let raw = std::fs::read(config_path)?;
    let config = parse_llama_config(model_id, &raw)?.into_config(false);
    let eos = match &config.eos_token_id {
        Some(LlamaEosToks::Single(id)) => Some(*id),
        Some(LlamaEosToks::Multiple(ids)) => ids.first().copied(),
        None => None,
    };

    let dtype = if device.is_cpu() { DType::F32 } else { DType::F16 };
    let mut tensors = HashMap::new();
    for shard in shards {
        tensors.extend(candle_core::safetensors::load(shard, &device)?);
    }
    let vb = VarBuilder::from_tensors(tensors, dtype, &device);
    let model = Llama::load(vb, &config)?;

    Ok((
        CandleModel {
            weights: Weights::Full {
                model,
                config,
                dtype,
            },
            device,
        },
        eos,
    ))
}

// ============================================================================
// Tokenizer
// ============================================================================

/// `tokenizers` tokenizer with a resolved EOS id
pub struct HfTokenizer {
    inner: Tokenizer,
    eos: Option<u32>,
}

impl HfTokenizer {
    /// Load `tokenizer.json`
    ///
    /// # Errors
    ///
    /// Returns error if the file is not a valid tokenizer definition
    pub fn from_file(path: &Path) -> Result<Self> {
        let inner = Tokenizer::from_file(path)
            .map_err(|e| ConversarError::Tokenization(format!("{}: {e}", path.display())))?;
        let eos = EOS_CANDIDATES
            .iter()
            .find_map(|token| inner.token_to_id(token));
        Ok(Self { inner, eos })
    }

    /// Prefer the EOS id declared by the model config
    #[must_use]
    pub fn with_eos(mut self, eos: Option<u32>) -> Self {
        if eos.is_some() {
            self.eos = eos;
        }
        self
    }
}

impl TextTokenizer for HfTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        self.inner
            .encode(text, true)
            .map(|encoding| encoding.get_ids().to_vec())
            .map_err(|e| ConversarError::Tokenization(e.to_string()))
    }

    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String> {
        self.inner
            .decode(ids, skip_special_tokens)
            .map_err(|e| ConversarError::Tokenization(e.to_string()))
    }

    fn eos_token_id(&self) -> Option<u32> {
        self.eos
    }
}

// ============================================================================
// Model
// ============================================================================

enum Weights {
    Full {
        model: Llama,
        config: Config,
        dtype: DType,
    },
    /// `forward` mutates the internal KV cache
    Quantized(Mutex<quantized_llama::ModelWeights>),
}

/// Llama model placed on a candle device
pub struct CandleModel {
    weights: Weights,
    device: Device,
}

impl CausalModel for CandleModel {
    fn generate(&self, input_ids: &[u32], params: &GenerationParams) -> Result<Vec<u32>> {
        if input_ids.is_empty() {
            return Err(ConversarError::Inference("empty prompt".to_string()));
        }
        let sampling = if params.do_sample {
            Sampling::All {
                temperature: f64::from(params.temperature),
            }
        } else {
            Sampling::ArgMax
        };
        let mut sampler = LogitsProcessor::from_sampling(params.seed, sampling);
        let mut tokens = input_ids.to_vec();

        match &self.weights {
            Weights::Full {
                model,
                config,
                dtype,
            } => {
                let mut cache = Cache::new(true, *dtype, config, &self.device)?;
                decode_loop(&self.device, &mut tokens, params, &mut sampler, |input, pos| {
                    model.forward(input, pos, &mut cache)
                })?;
            },
            Weights::Quantized(weights) => {
                let mut weights = weights
                    .lock()
                    .map_err(|_| ConversarError::Inference("model lock poisoned".to_string()))?;
                decode_loop(&self.device, &mut tokens, params, &mut sampler, |input, pos| {
                    weights.forward(input, pos)
                })?;
            },
        }
        Ok(tokens)
    }

    fn architecture(&self) -> &str {
        match self.weights {
            Weights::Full { .. } => "llama",
            Weights::Quantized(_) => "llama-gguf",
        }
    }
}

/// Prefill with the whole prompt, then feed one token per step
fn decode_loop<F>(
    device: &Device,
    tokens: &mut Vec<u32>,
    params: &GenerationParams,
    sampler: &mut LogitsProcessor,
    mut forward: F,
) -> Result<()>
where
    F: FnMut(&Tensor, usize) -> candle_core::Result<Tensor>,
{
    let mut index_pos = 0;
    for step in 0..params.max_new_tokens {
        let context = if step == 0 {
            &tokens[..]
        } else {
            &tokens[tokens.len() - 1..]
        };
        let context_len = context.len();
        let input = Tensor::new(context, device)?.unsqueeze(0)?;
        let logits = forward(&input, index_pos)?;
        index_pos += context_len;

        let logits = logits.squeeze(0)?.to_dtype(DType::F32)?;
        let next = sampler.sample(&logits)?;
        tokens.push(next);
        if params.eos_token_id == Some(next) {
            break;
        }
    }
    Ok(())
}
