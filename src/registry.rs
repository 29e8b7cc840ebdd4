//! Loaded-model registry
//!
//! Maps model identifiers to loaded model/tokenizer pairs. Reads are lock-free
//! through an `ArcSwap` snapshot; writers clone the snapshot under a mutex and
//! publish the new one atomically.
//!
//! Besides the entries the snapshot carries the insertion order and the
//! "current model": the identifier most recently inserted, cleared when that
//! model is removed.
//!
//! ## Example
//!
//! ```rust,ignore
//! use conversar::registry::ModelRegistry;
//!
//! let registry = ModelRegistry::new();
//! registry.insert("org/model", artifacts, QuantizationMode::FourBit, "cuda:0")?;
//! let entry = registry.get("org/model")?;
//! ```

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{SystemTime, UNIX_EPOCH},
};

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::{
    backend::{CausalModel, LoadedArtifacts, TextTokenizer},
    error::{ConversarError, Result},
    quantization::QuantizationMode,
};

/// Metadata about a loaded model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model identifier
    pub id: String,
    /// Quantization requested by the caller
    pub quantization: QuantizationMode,
    /// Quantization actually applied (`none` on CPU)
    pub effective_quantization: QuantizationMode,
    /// Device the weights live on
    pub device: String,
    /// Load time, unix seconds
    pub loaded_at: u64,
    /// Architecture reported by the runtime
    pub architecture: String,
}

/// Registry entry
pub struct LoadedModel {
    /// Model handle
    pub model: Arc<dyn CausalModel>,
    /// Tokenizer handle
    pub tokenizer: Arc<dyn TextTokenizer>,
    /// Metadata
    pub info: ModelInfo,
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

/// Immutable registry snapshot
#[derive(Clone, Default)]
struct Snapshot {
    entries: HashMap<String, Arc<LoadedModel>>,
    order: Vec<String>,
    current: Option<String>,
}

/// Registry of loaded models
///
/// Uses `ArcSwap` for lock-free reads; modifications are serialized.
pub struct ModelRegistry {
    snapshot: ArcSwap<Snapshot>,
    write_lock: Mutex<()>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(Snapshot::default()),
            write_lock: Mutex::new(()),
        }
    }

    fn update<T>(&self, f: impl FnOnce(&mut Snapshot) -> Result<T>) -> Result<T> {
        let _guard = self.write_lock.lock().map_err(|_| {
            ConversarError::RegistryError("Failed to acquire write lock".to_string())
        })?;

        let mut next: Snapshot = (**self.snapshot.load()).clone();
        let out = f(&mut next)?;
        self.snapshot.store(Arc::new(next));
        Ok(out)
    }

    /// Insert freshly loaded artifacts and make them the current model
    ///
    /// # Arguments
    ///
    /// * `id` - Model identifier
    /// * `artifacts` - Model/tokenizer pair from the loader
    /// * `requested` - Quantization the caller asked for
    /// * `device` - Device label
    ///
    /// # Errors
    ///
    /// Returns error if the identifier is already registered
    pub fn insert(
        &self,
        id: &str,
        artifacts: LoadedArtifacts,
        requested: QuantizationMode,
        device: &str,
    ) -> Result<Arc<LoadedModel>> {
        let entry = Arc::new(LoadedModel {
            info: ModelInfo {
                id: id.to_string(),
                quantization: requested,
                effective_quantization: artifacts.quantization,
                device: device.to_string(),
                loaded_at: unix_timestamp(),
                architecture: artifacts.model.architecture().to_string(),
            },
            model: artifacts.model,
            tokenizer: artifacts.tokenizer,
        });

        self.update(|snapshot| {
            if snapshot.entries.contains_key(id) {
                return Err(ConversarError::ModelAlreadyExists(id.to_string()));
            }
            snapshot.entries.insert(id.to_string(), Arc::clone(&entry));
            snapshot.order.push(id.to_string());
            snapshot.current = Some(id.to_string());
            Ok(())
        })?;
        Ok(entry)
    }

    /// Get a model by identifier (lock-free)
    ///
    /// # Errors
    ///
    /// Returns error if the model is not loaded
    pub fn get(&self, id: &str) -> Result<Arc<LoadedModel>> {
        self.snapshot
            .load()
            .entries
            .get(id)
            .cloned()
            .ok_or_else(|| ConversarError::ModelNotFound(id.to_string()))
    }

    /// Get model metadata by identifier
    ///
    /// # Errors
    ///
    /// Returns error if the model is not loaded
    pub fn get_info(&self, id: &str) -> Result<ModelInfo> {
        self.get(id).map(|entry| entry.info.clone())
    }

    /// Metadata for every loaded model, in insertion order
    #[must_use]
    pub fn list(&self) -> Vec<ModelInfo> {
        let snapshot = self.snapshot.load();
        snapshot
            .order
            .iter()
            .filter_map(|id| snapshot.entries.get(id))
            .map(|entry| entry.info.clone())
            .collect()
    }

    /// Loaded identifiers, in insertion order
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.snapshot.load().order.clone()
    }

    /// Most recently loaded model that is still present
    #[must_use]
    pub fn current(&self) -> Option<String> {
        self.snapshot.load().current.clone()
    }

    /// Remove a model; `Ok(None)` when it was not loaded
    ///
    /// # Errors
    ///
    /// Returns error if the write lock is poisoned
    pub fn remove(&self, id: &str) -> Result<Option<Arc<LoadedModel>>> {
        self.update(|snapshot| {
            let removed = snapshot.entries.remove(id);
            if removed.is_some() {
                snapshot.order.retain(|existing| existing != id);
                if snapshot.current.as_deref() == Some(id) {
                    snapshot.current = None;
                }
            }
            Ok(removed)
        })
    }

    /// Remove every model, returning the removed entries in insertion order
    ///
    /// # Errors
    ///
    /// Returns error if the write lock is poisoned
    pub fn clear(&self) -> Result<Vec<Arc<LoadedModel>>> {
        self.update(|snapshot| {
            let mut taken = std::mem::take(snapshot);
            Ok(taken
                .order
                .iter()
                .filter_map(|id| taken.entries.remove(id))
                .collect())
        })
    }

    /// Check if a model is loaded (lock-free)
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.snapshot.load().entries.contains_key(id)
    }

    /// Number of loaded models (lock-free)
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshot.load().entries.len()
    }

    /// Check if the registry is empty (lock-free)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub(crate) fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
