//! Compute device selection
//!
//! Picks an accelerator (CUDA, then Metal) when the runtime was compiled with
//! support for one and it initializes, otherwise falls back to the CPU.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of compute device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// General-purpose processor
    Cpu,
    /// NVIDIA GPU
    Cuda,
    /// Apple GPU
    Metal,
}

/// Capability summary reported at startup and by `/health`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceReport {
    /// Device label, e.g. `cuda:0` or `cpu`
    pub device: String,
    /// Whether the device is an accelerator
    pub accelerator: bool,
    /// Worker threads available to CPU kernels
    pub cpu_threads: usize,
    /// SIMD extensions the CPU kernels were compiled with
    pub simd: Vec<String>,
}

/// Selected compute device
#[derive(Clone)]
pub struct ComputeDevice {
    kind: DeviceKind,
    ordinal: usize,
    #[cfg(feature = "candle")]
    device: candle_core::Device,
}

impl ComputeDevice {
    /// CPU device
    #[must_use]
    pub fn cpu() -> Self {
        Self {
            kind: DeviceKind::Cpu,
            ordinal: 0,
            #[cfg(feature = "candle")]
            device: candle_core::Device::Cpu,
        }
    }

    /// Detect the best available device
    ///
    /// `force_cpu` skips accelerator probing entirely.
    #[must_use]
    pub fn detect(force_cpu: bool) -> Self {
        if force_cpu {
            tracing::info!("accelerator probing disabled, using CPU");
            return Self::cpu();
        }
        Self::detect_accelerator().unwrap_or_else(|| {
            tracing::warn!("no accelerator detected, using CPU (inference will be slower)");
            Self::cpu()
        })
    }

    #[cfg(feature = "candle")]
    fn detect_accelerator() -> Option<Self> {
        use candle_core::{utils, Device};

        if utils::cuda_is_available() {
            match Device::new_cuda(0) {
                Ok(device) => {
                    return Some(Self {
                        kind: DeviceKind::Cuda,
                        ordinal: 0,
                        device,
                    })
                },
                Err(e) => tracing::warn!(error = %e, "CUDA initialization failed"),
            }
        }
        if utils::metal_is_available() {
            match Device::new_metal(0) {
                Ok(device) => {
                    return Some(Self {
                        kind: DeviceKind::Metal,
                        ordinal: 0,
                        device,
                    })
                },
                Err(e) => tracing::warn!(error = %e, "Metal initialization failed"),
            }
        }
        None
    }

    #[cfg(not(feature = "candle"))]
    fn detect_accelerator() -> Option<Self> {
        None
    }

    /// Device kind
    #[must_use]
    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    /// Whether this is an accelerator (anything but the CPU)
    #[must_use]
    pub fn is_accelerator(&self) -> bool {
        self.kind != DeviceKind::Cpu
    }

    /// Runtime device handle
    #[cfg(feature = "candle")]
    #[must_use]
    pub fn candle(&self) -> &candle_core::Device {
        &self.device
    }

    /// Wait for queued accelerator work so dropped buffers are returned to the allocator
    pub fn release_cached_memory(&self) {
        if self.is_accelerator() {
            self.synchronize();
        }
    }

    #[cfg(feature = "candle")]
    fn synchronize(&self) {
        if let Err(e) = self.device.synchronize() {
            tracing::warn!(device = %self, error = %e, "device synchronize failed");
        }
    }

    #[cfg(not(feature = "candle"))]
    fn synchronize(&self) {}

    /// Capability summary
    #[must_use]
    pub fn report(&self) -> DeviceReport {
        DeviceReport {
            device: self.to_string(),
            accelerator: self.is_accelerator(),
            cpu_threads: std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(1),
            simd: simd_features(),
        }
    }
}

#[cfg(feature = "candle")]
fn simd_features() -> Vec<String> {
    use candle_core::utils;

    let mut features = Vec::new();
    if utils::with_avx() {
        features.push("avx".to_string());
    }
    if utils::with_neon() {
        features.push("neon".to_string());
    }
    if utils::with_simd128() {
        features.push("simd128".to_string());
    }
    if utils::with_f16c() {
        features.push("f16c".to_string());
    }
    features
}

#[cfg(not(feature = "candle"))]
fn simd_features() -> Vec<String> {
    Vec::new()
}

impl fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DeviceKind::Cpu => f.write_str("cpu"),
            DeviceKind::Cuda => write!(f, "cuda:{}", self.ordinal),
            DeviceKind::Metal => write!(f, "metal:{}", self.ordinal),
        }
    }
}

impl fmt::Debug for ComputeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputeDevice")
            .field("kind", &self.kind)
            .field("ordinal", &self.ordinal)
            .finish()
    }
}
