//! Model manager
//!
//! Owns the registry, the loader and the compute device. Loads are
//! single-flight per identifier: concurrent callers for a model that is
//! mid-load wait on a per-identifier async mutex and then reuse the entry the
//! first caller inserted. Weight loading and generation run on the blocking
//! pool, never on the reactor threads.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Instant,
};

use crate::{
    backend::{GenerationParams, ModelLoader},
    device::ComputeDevice,
    error::{ConversarError, Result},
    quantization::QuantizationMode,
    registry::{LoadedModel, ModelInfo, ModelRegistry},
};

type LoadLock = Arc<tokio::sync::Mutex<()>>;

/// Loads, caches and runs models
pub struct ModelManager {
    registry: ModelRegistry,
    loader: Arc<dyn ModelLoader>,
    device: ComputeDevice,
    default_quantization: QuantizationMode,
    initialized: AtomicBool,
    load_locks: Mutex<HashMap<String, LoadLock>>,
}

impl ModelManager {
    /// Create a manager; call [`initialize`](Self::initialize) before use
    #[must_use]
    pub fn new(loader: Arc<dyn ModelLoader>, device: ComputeDevice) -> Self {
        Self {
            registry: ModelRegistry::new(),
            loader,
            device,
            default_quantization: QuantizationMode::default(),
            initialized: AtomicBool::new(false),
            load_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Quantization used for implicit loads
    #[must_use]
    pub fn with_default_quantization(mut self, quantization: QuantizationMode) -> Self {
        self.default_quantization = quantization;
        self
    }

    /// Report the selected device and mark the manager ready
    pub fn initialize(&self) {
        let report = self.device.report();
        if report.accelerator {
            tracing::info!(
                device = %report.device,
                backend = self.loader.name(),
                "model manager initialized on accelerator"
            );
        } else {
            tracing::info!(
                device = %report.device,
                backend = self.loader.name(),
                cpu_threads = report.cpu_threads,
                simd = ?report.simd,
                "model manager initialized on CPU (quantization disabled)"
            );
        }
        self.initialized.store(true, Ordering::Release);
    }

    /// Whether [`initialize`](Self::initialize) has run
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(ConversarError::NotInitialized)
        }
    }

    fn load_lock(&self, id: &str) -> Result<LoadLock> {
        let mut locks = self
            .load_locks
            .lock()
            .map_err(|_| ConversarError::RegistryError("load lock table poisoned".to_string()))?;
        Ok(Arc::clone(locks.entry(id.to_string()).or_default()))
    }

    /// Drop the table entry for `id` unless another caller still holds `lock`
    ///
    /// Holders are the table and this caller; any extra reference is a waiter
    /// that will release the entry itself.
    fn release_load_lock(&self, id: &str, lock: &LoadLock) {
        let Ok(mut locks) = self.load_locks.lock() else {
            return;
        };
        let unshared = Arc::strong_count(lock) <= 2;
        if unshared && locks.get(id).is_some_and(|current| Arc::ptr_eq(current, lock)) {
            locks.remove(id);
        }
    }

    #[cfg(test)]
    fn pending_load_locks(&self) -> usize {
        self.load_locks.lock().map(|locks| locks.len()).unwrap_or_default()
    }

    /// Load a model, or return the existing entry if it is already loaded
    ///
    /// # Arguments
    ///
    /// * `id` - Model identifier (hub repository or local directory)
    /// * `quantization` - Requested weight precision; only applied on accelerators
    ///
    /// # Errors
    ///
    /// Returns error if the manager is not initialized, or if the loader fails
    /// to fetch artifacts or build the model
    pub async fn load(&self, id: &str, quantization: QuantizationMode) -> Result<Arc<LoadedModel>> {
        self.ensure_initialized()?;
        if let Ok(entry) = self.registry.get(id) {
            return Ok(entry);
        }

        let held = HeldLoadLock {
            manager: self,
            id,
            lock: self.load_lock(id)?,
        };
        let _guard = held.lock.lock().await;
        match self.registry.get(id) {
            Ok(entry) => Ok(entry),
            Err(_) => self.load_exclusive(id, quantization).await,
        }
    }

    /// Fetch, build and register `id`; the caller holds its load lock
    async fn load_exclusive(
        &self,
        id: &str,
        quantization: QuantizationMode,
    ) -> Result<Arc<LoadedModel>> {
        let start = Instant::now();
        tracing::info!(model = id, quantization = %quantization, device = %self.device, "loading model");
        let artifacts = match self.loader.load(id, quantization, &self.device).await {
            Ok(artifacts) => artifacts,
            Err(e) => {
                tracing::error!(model = id, error = %e, "model load failed");
                return Err(e);
            },
        };

        let entry = match self
            .registry
            .insert(id, artifacts, quantization, &self.device.to_string())
        {
            Ok(entry) => entry,
            Err(ConversarError::ModelAlreadyExists(_)) => self.registry.get(id)?,
            Err(e) => return Err(e),
        };

        tracing::info!(
            model = id,
            arch = %entry.info.architecture,
            quantization = %entry.info.effective_quantization,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "model loaded"
        );
        Ok(entry)
    }

    /// Generate a completion for `prompt`, loading the model first if needed
    ///
    /// Returns the generated text with the echoed prompt removed and surrounding
    /// whitespace trimmed. `stream` is accepted for API compatibility and ignored.
    ///
    /// # Errors
    ///
    /// Returns error if the implicit load fails, or if tokenization or
    /// generation fails
    pub async fn generate(
        &self,
        id: &str,
        prompt: &str,
        max_tokens: usize,
        temperature: f32,
        _stream: bool,
    ) -> Result<String> {
        let entry = self.load(id, self.default_quantization).await?;
        let owned_prompt = prompt.to_string();
        let start = Instant::now();

        let text = tokio::task::spawn_blocking(move || {
            run_generation(&entry, &owned_prompt, max_tokens, temperature)
        })
        .await??;

        tracing::debug!(
            model = id,
            max_tokens,
            temperature,
            output_chars = text.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "generation finished"
        );
        Ok(text)
    }

    /// Unload a model and release accelerator memory
    ///
    /// Returns `false` when the model was not loaded. In-flight generations keep
    /// their handle; the weights drop with the last one.
    ///
    /// # Errors
    ///
    /// Returns error if the registry lock is poisoned
    pub fn unload(&self, id: &str) -> Result<bool> {
        let Some(entry) = self.registry.remove(id)? else {
            return Ok(false);
        };
        drop(entry);
        self.device.release_cached_memory();
        tracing::info!(model = id, "model unloaded");
        Ok(true)
    }

    /// Identifiers of loaded models, in load order
    #[must_use]
    pub fn list_loaded_models(&self) -> Vec<String> {
        self.registry.ids()
    }

    /// Metadata of loaded models, in load order
    #[must_use]
    pub fn loaded_models(&self) -> Vec<ModelInfo> {
        self.registry.list()
    }

    /// Unload every model; returns how many were removed
    ///
    /// # Errors
    ///
    /// Returns error if the registry lock is poisoned
    pub fn cleanup(&self) -> Result<usize> {
        let removed = self.registry.clear()?;
        let count = removed.len();
        drop(removed);
        if count > 0 {
            self.device.release_cached_memory();
        }
        tracing::info!(unloaded = count, "model manager cleaned up");
        Ok(count)
    }

    /// Most recently loaded model still present
    #[must_use]
    pub fn current_model(&self) -> Option<String> {
        self.registry.current()
    }

    /// Compute device
    #[must_use]
    pub fn device(&self) -> &ComputeDevice {
        &self.device
    }

    /// Quantization used for implicit loads
    #[must_use]
    pub fn default_quantization(&self) -> QuantizationMode {
        self.default_quantization
    }

    /// Loader backend name
    #[must_use]
    pub fn loader_name(&self) -> &str {
        self.loader.name()
    }
}

/// Releases a load lock on every exit from `load`, cancellation included
struct HeldLoadLock<'a> {
    manager: &'a ModelManager,
    id: &'a str,
    lock: LoadLock,
}

impl Drop for HeldLoadLock<'_> {
    fn drop(&mut self) {
        self.manager.release_load_lock(self.id, &self.lock);
    }
}

fn run_generation(
    entry: &LoadedModel,
    prompt: &str,
    max_tokens: usize,
    temperature: f32,
) -> Result<String> {
    let input_ids = entry.tokenizer.encode(prompt)?;
    let params = GenerationParams::new(max_tokens, temperature, entry.tokenizer.as_ref());
    let output_ids = entry.model.generate(&input_ids, &params)?;
    let decoded = entry.tokenizer.decode(&output_ids, true)?;
    Ok(strip_prompt(&decoded, prompt))
}

/// Remove the echoed prompt from decoded output and trim whitespace
#[must_use]
pub fn strip_prompt(decoded: &str, prompt: &str) -> String {
    decoded
        .strip_prefix(prompt)
        .unwrap_or(decoded)
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::backend::mock::MockLoader;

    fn manager(loader: MockLoader) -> ModelManager {
        let manager = ModelManager::new(Arc::new(loader), ComputeDevice::cpu());
        manager.initialize();
        manager
    }

    #[test]
    fn test_strip_prompt() {
        assert_eq!(strip_prompt("User: Hi\n\nAssistant: Hello! ", "User: Hi\n\nAssistant: "), "Hello!");
        assert_eq!(strip_prompt("  unrelated  ", "prompt"), "unrelated");
    }

    #[tokio::test]
    async fn test_requires_initialize() {
        let manager = ModelManager::new(Arc::new(MockLoader::new()), ComputeDevice::cpu());
        assert!(!manager.is_initialized());
        let err = manager.load("m1", QuantizationMode::None).await.err().unwrap();
        assert!(matches!(err, ConversarError::NotInitialized));
        manager.initialize();
        assert!(manager.is_initialized());
    }

    #[tokio::test]
    async fn test_load_is_idempotent() {
        let loader = MockLoader::new();
        let manager = manager(loader.clone());

        let first = manager.load("m1", QuantizationMode::FourBit).await.unwrap();
        let second = manager.load("m1", QuantizationMode::EightBit).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loader.load_count("m1"), 1);
        assert_eq!(second.info.quantization, QuantizationMode::FourBit);
        assert_eq!(manager.list_loaded_models(), vec!["m1"]);
    }

    #[tokio::test]
    async fn test_cpu_load_records_effective_none() {
        let manager = manager(MockLoader::new());
        let entry = manager.load("m1", QuantizationMode::EightBit).await.unwrap();
        assert_eq!(entry.info.quantization, QuantizationMode::EightBit);
        assert_eq!(entry.info.effective_quantization, QuantizationMode::None);
        assert_eq!(entry.info.device, "cpu");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_loads_are_single_flight() {
        let loader = MockLoader::new().with_load_delay(Duration::from_millis(50));
        let manager = Arc::new(manager(loader.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.load("m1", QuantizationMode::None).await })
            })
            .collect();

        let mut entries = Vec::new();
        for handle in handles {
            entries.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(loader.load_count("m1"), 1);
        assert!(entries.iter().all(|e| Arc::ptr_eq(e, &entries[0])));
        assert_eq!(manager.list_loaded_models().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_load_leaves_model_absent() {
        let loader = MockLoader::new().with_missing_model("ghost");
        let manager = manager(loader);

        let err = manager.load("ghost", QuantizationMode::None).await.err().unwrap();
        assert!(matches!(err, ConversarError::ArtifactFetch { .. }));
        assert!(manager.list_loaded_models().is_empty());
        assert!(manager.current_model().is_none());

        let err = manager.generate("ghost", "User: Hi\n\nAssistant: ", 16, 0.7, false).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_failed_loads_release_lock_table() {
        let ids: Vec<String> = (0..100).map(|i| format!("org/missing-{i}")).collect();
        let loader = ids
            .iter()
            .fold(MockLoader::new(), |loader, id| loader.with_missing_model(id.clone()));
        let manager = manager(loader);

        for id in &ids {
            assert!(manager.load(id, QuantizationMode::None).await.is_err());
        }
        assert_eq!(manager.pending_load_locks(), 0);
        assert!(manager.list_loaded_models().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_failed_loads_release_lock_table() {
        let loader = MockLoader::new()
            .with_missing_model("ghost")
            .with_load_delay(Duration::from_millis(20));
        let manager = Arc::new(manager(loader));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.load("ghost", QuantizationMode::None).await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().is_err());
        }
        assert_eq!(manager.pending_load_locks(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_load_releases_lock_table() {
        let loader = MockLoader::new().with_load_delay(Duration::from_millis(500));
        let manager = Arc::new(manager(loader));

        let task = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.load("m1", QuantizationMode::None).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(manager.pending_load_locks(), 1);

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert_eq!(manager.pending_load_locks(), 0);
        assert!(manager.list_loaded_models().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_successful_loads_release_lock_table() {
        let loader = MockLoader::new().with_load_delay(Duration::from_millis(20));
        let manager = Arc::new(manager(loader));

        let handles: Vec<_> = (0..6)
            .map(|i| {
                let manager = Arc::clone(&manager);
                let id = if i % 2 == 0 { "m1" } else { "m2" };
                tokio::spawn(async move { manager.load(id, QuantizationMode::None).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(manager.pending_load_locks(), 0);
        assert_eq!(manager.list_loaded_models().len(), 2);
    }

    #[tokio::test]
    async fn test_generate_loads_implicitly_and_strips_prompt() {
        let loader = MockLoader::new();
        let manager = manager(loader.clone());

        let text = manager
            .generate("m1", "User: Hi\n\nAssistant: ", 64, 0.7, false)
            .await
            .unwrap();

        assert_eq!(text, "You said: Hi");
        assert_eq!(loader.load_count("m1"), 1);
        assert_eq!(manager.current_model().as_deref(), Some("m1"));
    }

    #[tokio::test]
    async fn test_generate_respects_max_tokens() {
        let manager = manager(MockLoader::new().with_reply("abcdefgh"));
        let text = manager
            .generate("m1", "User: Hi\n\nAssistant: ", 4, 0.0, false)
            .await
            .unwrap();
        assert_eq!(text, "abcd");
    }

    #[tokio::test]
    async fn test_generation_failure_propagates() {
        let manager = manager(MockLoader::new().with_broken_model("m1"));
        let err = manager
            .generate("m1", "User: Hi\n\nAssistant: ", 8, 0.7, false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("CUDA out of memory"));
    }

    #[tokio::test]
    async fn test_unload_and_cleanup() {
        let loader = MockLoader::new();
        let manager = manager(loader.clone());
        for id in ["a", "b", "c"] {
            manager.load(id, QuantizationMode::None).await.unwrap();
        }
        assert_eq!(manager.current_model().as_deref(), Some("c"));

        assert!(manager.unload("b").unwrap());
        assert!(!manager.unload("b").unwrap());
        assert_eq!(manager.list_loaded_models(), vec!["a", "c"]);

        assert!(manager.unload("c").unwrap());
        assert!(manager.current_model().is_none());

        assert_eq!(manager.cleanup().unwrap(), 1);
        assert!(manager.list_loaded_models().is_empty());

        // reload after unload fetches again
        manager.load("a", QuantizationMode::None).await.unwrap();
        assert_eq!(loader.load_count("a"), 2);
    }
}
