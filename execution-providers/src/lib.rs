//! Tabagent Execution Providers
//!
//! Descriptors for the compute backends a model can run on (CPU, WASM,
//! WebGPU, WebNN), the capabilities each one advertises, and the pure
//! selection logic that picks a backend from those capabilities.
//!
//! # Examples
//!
//! ```rust
//! use common::ModelFormat;
//! use tabagent_execution_providers::*;
//!
//! let webgpu = WebGPUExecutionProvider::new()
//!     .with_preferred_layout("NHWC")
//!     .build();
//!
//! let dispatch = ExecutionProviderDispatch::new(vec![
//!     webgpu,
//!     CPUExecutionProvider::new().build(), // Fallback
//! ]);
//!
//! let detected = dispatch.available_capabilities();
//! let backend = select_backend(&BackendPreference::default(), &detected, ModelFormat::Onnx)?;
//! println!("Selected backend: {}", backend);
//! # Ok::<(), ProviderError>(())
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::str::FromStr;
use std::sync::Arc;

pub mod capabilities;
pub mod constants;
pub mod error;
pub mod host;
pub mod selection;

pub mod cpu;
pub mod wasm;
pub mod webgpu;
pub mod webnn;

pub use capabilities::{BackendCapabilities, DeviceClass};
pub use cpu::CPUExecutionProvider;
pub use error::{ProviderError, Result};
pub use host::HostInfo;
pub use selection::{
    candidate_order, select_backend, universal_fallback, BackendPreference, ModelRequirements,
};
pub use wasm::WASMExecutionProvider;
pub use webgpu::WebGPUExecutionProvider;
pub use webnn::WebNNExecutionProvider;

/// Backend type enum - identifies a compute backend.
///
/// Declaration order is the final tie-breaker during selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// Native CPU (universal fallback outside the browser)
    Cpu,
    /// WebAssembly CPU kernels (universal fallback inside the browser)
    Wasm,
    /// WebGPU compute shaders
    WebGpu,
    /// Web Neural Network API (CPU/GPU/NPU depending on device type)
    WebNN,
}

impl BackendType {
    pub const ALL: [BackendType; 4] = [Self::Cpu, Self::Wasm, Self::WebGpu, Self::WebNN];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Wasm => "wasm",
            Self::WebGpu => "webgpu",
            Self::WebNN => "webnn",
        }
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendType {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.to_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|backend| backend.as_str() == lower)
            .ok_or_else(|| ProviderError::Unsupported(s.to_string()))
    }
}

/// Generic configuration store for provider options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderConfig {
    options: HashMap<String, String>,
}

impl ProviderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl ToString) {
        self.options.insert(key.into(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    pub fn get_as<T: FromStr>(&self, key: &str) -> Option<T> {
        self.get(key)?.parse().ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.options.iter()
    }
}

/// Execution provider trait (engine-agnostic)
///
/// Describes a backend: what it is called, whether it can exist on this
/// platform, whether it is usable right now, and what it can run. It does NOT
/// execute anything itself.
pub trait ExecutionProvider: Send + Sync + Debug {
    /// Human-readable name (e.g., "WebGpuExecutionProvider")
    fn name(&self) -> &'static str;

    /// Backend type for this provider
    fn backend_type(&self) -> BackendType;

    /// Check if this provider is supported on the current platform (compile-time)
    fn supported_by_platform(&self) -> bool;

    /// Configuration options for this provider
    fn config(&self) -> &ProviderConfig;

    /// Check if this provider is available on the current system (runtime)
    fn is_available(&self) -> Result<bool>;

    /// Capabilities advertised to backend selection
    fn capabilities(&self) -> BackendCapabilities;
}

/// Type-erased execution provider for dynamic dispatch
pub type DynExecutionProvider = Arc<dyn ExecutionProvider>;

/// Execution provider dispatch - collection of providers with priority order
#[derive(Debug, Clone)]
pub struct ExecutionProviderDispatch {
    providers: Vec<DynExecutionProvider>,
}

impl ExecutionProviderDispatch {
    pub fn new(providers: Vec<DynExecutionProvider>) -> Self {
        Self { providers }
    }

    /// Every provider this crate knows, most capable first
    pub fn all() -> Self {
        Self::new(vec![
            WebNNExecutionProvider::new().build(),
            WebGPUExecutionProvider::new().build(),
            WASMExecutionProvider::new().build(),
            CPUExecutionProvider::new().build(),
        ])
    }

    pub fn providers(&self) -> &[DynExecutionProvider] {
        &self.providers
    }

    pub fn into_providers(self) -> Vec<DynExecutionProvider> {
        self.providers
    }

    pub fn get(&self, backend: BackendType) -> Option<&DynExecutionProvider> {
        self.providers.iter().find(|p| p.backend_type() == backend)
    }

    /// Filter to only available providers
    pub fn filter_available(&self) -> Vec<DynExecutionProvider> {
        self.providers
            .iter()
            .filter(|p| match p.is_available() {
                Ok(available) => available,
                Err(e) => {
                    log::warn!("Availability check failed for {}: {}", p.name(), e);
                    false
                }
            })
            .cloned()
            .collect()
    }

    /// Capabilities of the available providers, in dispatch order
    pub fn available_capabilities(&self) -> Vec<BackendCapabilities> {
        self.filter_available()
            .iter()
            .map(|p| p.capabilities())
            .collect()
    }
}

/// Macro to reduce boilerplate when implementing ExecutionProvider base methods
#[macro_export]
macro_rules! impl_provider_base {
    ($struct_name:ident, $name:expr, $backend:expr) => {
        impl $struct_name {
            pub fn new() -> Self {
                Self {
                    config: $crate::ProviderConfig::new(),
                }
            }

            pub fn build(self) -> std::sync::Arc<dyn $crate::ExecutionProvider> {
                std::sync::Arc::new(self)
            }

            fn get_name(&self) -> &'static str {
                $name
            }

            fn get_backend_type(&self) -> $crate::BackendType {
                $backend
            }
        }

        impl Default for $struct_name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}
