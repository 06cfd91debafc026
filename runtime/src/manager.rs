//! Runtime manager: backend detection, selection and the model cache.

use futures::future::{join_all, BoxFuture, FutureExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tabagent_execution_providers::{
    candidate_order, select_backend, BackendCapabilities, BackendPreference, BackendType,
    HostInfo, ModelRequirements, ProviderError,
};
use tabagent_tensor::Tensor;
use tokio::sync::OnceCell;

use crate::backend::{BackendError, BackendLoadOptions, BackendRegistry, InferenceBackend};
use crate::cache::{CacheStats, LoadResult, ModelCache, ReleaseOutcome};
use crate::config::RuntimeConfig;
use crate::error::{Result, RuntimeError};
use crate::fingerprint::Fingerprint;
use crate::handle::ModelHandle;
use crate::source::{LocalModelSource, ModelRef, ModelSource};
use common::Quantization;

/// Per-call load options. Unset fields fall back to the [`RuntimeConfig`].
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub quantization: Option<Quantization>,
    pub backend_options: BackendLoadOptions,
    pub allow_fallback: Option<bool>,
    pub timeout: Option<Duration>,
}

impl LoadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quantization(mut self, quantization: Quantization) -> Self {
        self.quantization = Some(quantization);
        self
    }

    pub fn with_backend_options(mut self, options: BackendLoadOptions) -> Self {
        self.backend_options = options;
        self
    }

    pub fn with_fallback(mut self, allow_fallback: bool) -> Self {
        self.allow_fallback = Some(allow_fallback);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

pub struct RuntimeManagerBuilder {
    config: RuntimeConfig,
    backends: BackendRegistry,
    source: Option<Arc<dyn ModelSource>>,
}

impl RuntimeManagerBuilder {
    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_backend(mut self, backend: Arc<dyn InferenceBackend>) -> Self {
        if let Some(previous) = self.backends.register(backend) {
            log::warn!("Replaced previously registered {} backend", previous.backend_type());
        }
        self
    }

    /// Model source; defaults to a [`LocalModelSource`] at `config.model_root`
    pub fn with_source(mut self, source: Arc<dyn ModelSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Register the ONNX Runtime CPU backend
    #[cfg(feature = "onnx")]
    pub fn with_onnx_backend(self) -> Self {
        self.with_backend(Arc::new(crate::onnx::OnnxBackend::cpu()))
    }

    pub fn build(self) -> Result<RuntimeManager> {
        self.config
            .validate()
            .map_err(|e| RuntimeError::Config(e.to_string()))?;

        if self.backends.is_empty() {
            log::warn!("Runtime built without backends; every load will fail");
        }

        let source = self
            .source
            .unwrap_or_else(|| Arc::new(LocalModelSource::new(self.config.model_root.clone())));

        log::info!(
            "Runtime manager ready (backends: {:?}, fallback: {})",
            self.backends.backend_types(),
            self.config.allow_fallback
        );

        Ok(RuntimeManager {
            config: self.config,
            backends: self.backends,
            source,
            cache: ModelCache::new(),
            detected: OnceCell::new(),
            host: HostInfo::detect(),
        })
    }
}

/// Owns the backends, the model source and the model cache.
///
/// Each manager has its own cache; nothing is process-global.
pub struct RuntimeManager {
    config: RuntimeConfig,
    backends: BackendRegistry,
    source: Arc<dyn ModelSource>,
    cache: ModelCache,
    detected: OnceCell<Vec<BackendCapabilities>>,
    host: HostInfo,
}

impl RuntimeManager {
    pub fn builder() -> RuntimeManagerBuilder {
        RuntimeManagerBuilder {
            config: RuntimeConfig::default(),
            backends: BackendRegistry::new(),
            source: None,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn host(&self) -> &HostInfo {
        &self.host
    }

    pub fn backends(&self) -> &BackendRegistry {
        &self.backends
    }

    /// Probe every registered backend once. Later calls return the cached
    /// result. A failing or slow detection only removes that backend.
    pub async fn detect_capabilities(&self) -> &[BackendCapabilities] {
        self.detected
            .get_or_init(|| async {
                let limit = self.config.detection_timeout();
                let detections = self.backends.iter().map(|backend| async move {
                    let backend_type = backend.backend_type();
                    match tokio::time::timeout(limit, backend.detect()).await {
                        Ok(Ok(capabilities)) => Some(capabilities),
                        Ok(Err(e)) => {
                            log::warn!("Skipping {} backend: {}", backend_type, e);
                            None
                        }
                        Err(_) => {
                            log::warn!(
                                "Skipping {} backend: detection timed out after {:?}",
                                backend_type,
                                limit
                            );
                            None
                        }
                    }
                });

                let detected: Vec<BackendCapabilities> =
                    join_all(detections).await.into_iter().flatten().collect();
                log::info!(
                    "Detected backends: {:?}",
                    detected.iter().map(|caps| caps.backend).collect::<Vec<_>>()
                );
                detected
            })
            .await
    }

    fn preference(&self, requested: Option<BackendType>, allow_fallback: Option<bool>) -> BackendPreference {
        BackendPreference {
            requested,
            order: self.config.preferred_backends.clone(),
            allow_fallback: allow_fallback.unwrap_or(self.config.allow_fallback),
        }
    }

    /// Backend a load with these requirements would start on
    pub async fn select_backend(
        &self,
        requested: Option<BackendType>,
        requirements: impl Into<ModelRequirements>,
    ) -> Result<BackendType> {
        let detected = self.detect_capabilities().await;
        Ok(select_backend(&self.preference(requested, None), detected, requirements)?)
    }

    /// Load a model, or take another reference to it if it is already
    /// cached or loading. Every successful call must be paired with
    /// [`RuntimeManager::release_model`].
    pub async fn load_model(
        &self,
        model: &ModelRef,
        backend: Option<BackendType>,
        options: LoadOptions,
    ) -> Result<Arc<ModelHandle>> {
        match options.timeout.or_else(|| self.config.load_timeout()) {
            Some(limit) => tokio::time::timeout(limit, self.load_candidates(model, backend, &options))
                .await
                .map_err(|_| RuntimeError::Timeout {
                    operation: format!("Loading {}", model),
                    after_ms: limit.as_millis() as u64,
                })?,
            None => self.load_candidates(model, backend, &options).await,
        }
    }

    async fn load_candidates(
        &self,
        model: &ModelRef,
        requested: Option<BackendType>,
        options: &LoadOptions,
    ) -> Result<Arc<ModelHandle>> {
        let quantization = options.quantization.unwrap_or(self.config.default_quantization);
        let detected = self.detect_capabilities().await;
        let preference = self.preference(requested, options.allow_fallback);

        if let Some(handle) = self.cached_first_candidate(model, quantization, options, &preference, detected) {
            return Ok(handle);
        }

        let artifact = Arc::new(self.source.resolve(model, quantization).await?);
        let requirements = ModelRequirements::new(artifact.metadata.format, quantization);
        let candidates = candidate_order(&preference, detected, requirements)?;

        let size = artifact.metadata.size_bytes;
        if size > 0 && !self.host.fits_in_memory(size) {
            log::warn!(
                "{} needs {} MB but only {} MB RAM is available",
                model,
                size / (1024 * 1024),
                self.host.available_memory_mb()
            );
        }

        let mut last_error = None;
        for backend_type in candidates {
            let Some(backend) = self.backends.get(backend_type).cloned() else {
                continue;
            };
            let fingerprint = Fingerprint::new(model, backend_type, quantization, &options.backend_options);
            let loader = {
                let artifact = Arc::clone(&artifact);
                let load_options = options.backend_options.clone();
                let fingerprint = fingerprint.clone();
                move || -> BoxFuture<'static, LoadResult> {
                    async move {
                        let started = Instant::now();
                        log::info!("Loading {} on {}", fingerprint, backend_type);
                        let session = backend.load(&artifact, &load_options).await.map_err(|e| {
                            RuntimeError::ModelLoad {
                                fingerprint: fingerprint.short(),
                                backend: backend_type,
                                reason: e.to_string(),
                            }
                        })?;
                        log::info!("Loaded {} in {:?}", fingerprint, started.elapsed());
                        Ok(Arc::new(ModelHandle::new(
                            fingerprint,
                            artifact.metadata.clone(),
                            backend_type,
                            session,
                        )))
                    }
                    .boxed()
                }
            };

            match self.cache.acquire(&fingerprint, loader).await {
                Ok(handle) => return Ok(handle),
                Err(e) => {
                    log::warn!("Could not load {} on {}: {}", model, backend_type, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ProviderError::NoBackendAvailable {
                format: requirements.format,
                quantization: requirements.quantization,
                requested,
                detected: detected.iter().map(|caps| caps.backend).collect(),
            }
            .into()
        }))
    }

    /// Reference to the backend a full load would try first, when that
    /// backend already holds the model. The model format comes from any
    /// cached variant's metadata, so a hit touches neither the source nor
    /// the backends.
    fn cached_first_candidate(
        &self,
        model: &ModelRef,
        quantization: Quantization,
        options: &LoadOptions,
        preference: &BackendPreference,
        detected: &[BackendCapabilities],
    ) -> Option<Arc<ModelHandle>> {
        let fingerprint_on =
            |backend: BackendType| Fingerprint::new(model, backend, quantization, &options.backend_options);

        let format = detected
            .iter()
            .find_map(|caps| self.cache.get(&fingerprint_on(caps.backend)))?
            .metadata()
            .format;

        let first = candidate_order(preference, detected, ModelRequirements::new(format, quantization))
            .ok()?
            .into_iter()
            .next()?;
        self.cache.acquire_ready(&fingerprint_on(first))
    }

    /// Return one reference taken by `load_model`
    pub fn release_model(&self, handle: &ModelHandle) -> ReleaseOutcome {
        let outcome = self.cache.release(handle);
        log::debug!("Released {} -> {:?}", handle.fingerprint(), outcome);
        outcome
    }

    /// Run one inference call. `timeout` bounds the call only when given;
    /// on expiry the session is asked to cancel.
    pub async fn infer(
        &self,
        handle: &ModelHandle,
        inputs: Vec<Tensor>,
        timeout: Option<Duration>,
    ) -> Result<Vec<Tensor>> {
        let session = handle.session()?;

        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, session.infer(inputs)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    session.cancel();
                    return Err(RuntimeError::Timeout {
                        operation: format!("Inference on {}", handle.fingerprint()),
                        after_ms: limit.as_millis() as u64,
                    });
                }
            },
            None => session.infer(inputs).await,
        };

        outcome.map_err(|e| match e {
            BackendError::Tensor(e) => RuntimeError::Tensor(e),
            other => RuntimeError::Inference {
                model: handle.fingerprint().model_id.to_string(),
                backend: handle.backend(),
                reason: other.to_string(),
            },
        })
    }

    /// Best-effort cancellation of in-flight inference on `handle`
    pub fn cancel(&self, handle: &ModelHandle) {
        handle.cancel();
    }

    /// Force an entry out of the cache, disposing it whatever its refcount
    pub fn evict(&self, fingerprint: &Fingerprint) -> bool {
        self.cache.evict(fingerprint)
    }

    /// Dispose every cached handle
    pub fn shutdown(&self) {
        let disposed = self.cache.clear();
        log::info!("Runtime manager shut down, {} model(s) disposed", disposed);
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn cached_handle(&self, fingerprint: &Fingerprint) -> Option<Arc<ModelHandle>> {
        self.cache.get(fingerprint)
    }

    pub fn ref_count(&self, fingerprint: &Fingerprint) -> Option<usize> {
        self.cache.ref_count(fingerprint)
    }
}

impl Drop for RuntimeManager {
    fn drop(&mut self) {
        if !self.cache.is_empty() {
            self.shutdown();
        }
    }
}
