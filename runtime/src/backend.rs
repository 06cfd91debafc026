//! Compute backend contract.
//!
//! A backend exposes exactly two operations to the runtime: `load` an artifact
//! into an opaque session, and `infer` on that session. Capability detection
//! feeds backend selection.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tabagent_execution_providers::{
    BackendCapabilities, BackendType, ExecutionProvider, ProviderError,
};
use tabagent_tensor::{Tensor, TensorError};
use thiserror::Error;

use crate::source::ModelArtifact;

/// Errors reported by a backend engine. The runtime wraps them with the
/// fingerprint / model and backend they occurred on.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    #[error("Load failed: {0}")]
    Load(String),

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Cancelled")]
    Cancelled,

    #[error(transparent)]
    Tensor(#[from] TensorError),
}

/// Backend-specific load options. Ordered so they fingerprint canonically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendLoadOptions {
    options: BTreeMap<String, String>,
}

impl BackendLoadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl ToString) {
        self.options.insert(key.into(), value.to_string());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    pub fn get_as<T: FromStr>(&self, key: &str) -> Option<T> {
        self.get(key)?.parse().ok()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.options.iter()
    }

    pub(crate) fn to_map(&self) -> BTreeMap<String, String> {
        self.options.clone()
    }
}

/// A model loaded into a backend. Dropping the last reference releases the
/// backend's resources.
#[async_trait]
pub trait BackendSession: Send + Sync {
    async fn infer(&self, inputs: Vec<Tensor>) -> Result<Vec<Tensor>, BackendError>;

    /// Best-effort cancellation of in-flight `infer` calls.
    fn cancel(&self) {}
}

#[async_trait]
pub trait InferenceBackend: Send + Sync {
    fn backend_type(&self) -> BackendType;

    /// Probe the host for this backend. Failures are recoverable: the runtime
    /// skips the backend.
    async fn detect(&self) -> Result<BackendCapabilities, ProviderError>;

    async fn load(
        &self,
        artifact: &ModelArtifact,
        options: &BackendLoadOptions,
    ) -> Result<Arc<dyn BackendSession>, BackendError>;
}

/// Capability detection for backends described by an [`ExecutionProvider`].
pub fn detect_from_provider(provider: &dyn ExecutionProvider) -> Result<BackendCapabilities, ProviderError> {
    if !provider.supported_by_platform() {
        return Err(ProviderError::Unsupported(format!(
            "{} is not supported on {}",
            provider.name(),
            std::env::consts::OS
        )));
    }
    if !provider.is_available()? {
        return Err(ProviderError::NotAvailable(provider.name().to_string()));
    }
    Ok(provider.capabilities())
}

/// Backends registered with a runtime, at most one per [`BackendType`].
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: BTreeMap<BackendType, Arc<dyn InferenceBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend, replacing any previous one of the same type
    pub fn register(&mut self, backend: Arc<dyn InferenceBackend>) -> Option<Arc<dyn InferenceBackend>> {
        let backend_type = backend.backend_type();
        log::debug!("Registering {} backend", backend_type);
        self.backends.insert(backend_type, backend)
    }

    pub fn get(&self, backend: BackendType) -> Option<&Arc<dyn InferenceBackend>> {
        self.backends.get(&backend)
    }

    pub fn contains(&self, backend: BackendType) -> bool {
        self.backends.contains_key(&backend)
    }

    pub fn backend_types(&self) -> Vec<BackendType> {
        self.backends.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn InferenceBackend>> {
        self.backends.values()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.backend_types())
            .finish()
    }
}
