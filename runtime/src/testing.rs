//! In-memory test doubles for the runtime and the crates built on it.
//!
//! Enabled for this crate's tests and, for dependent crates, through the
//! `testing` feature.

use async_trait::async_trait;
use common::{ModelFormat, Quantization};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tabagent_execution_providers::{BackendCapabilities, BackendType, DeviceClass, ProviderError};
use tabagent_tensor::Tensor;

use crate::backend::{BackendError, BackendLoadOptions, BackendSession, InferenceBackend};
use crate::source::{ModelArtifact, ModelRef, StaticModelSource};

/// Computes a session's outputs from its inputs
pub type Responder = Arc<dyn Fn(&[Tensor]) -> Result<Vec<Tensor>, BackendError> + Send + Sync>;

#[derive(Debug, Default)]
struct Counters {
    loads: AtomicUsize,
    failing_loads: AtomicUsize,
    infers: AtomicUsize,
    cancels: AtomicUsize,
    sessions_created: AtomicUsize,
    sessions_dropped: AtomicUsize,
}

/// Scriptable [`InferenceBackend`] that counts everything it is asked to do.
pub struct MockBackend {
    capabilities: BackendCapabilities,
    detect_error: Option<ProviderError>,
    detect_delay: Duration,
    load_delay: Duration,
    infer_delay: Duration,
    always_fail: bool,
    responder: Responder,
    counters: Arc<Counters>,
}

impl MockBackend {
    /// A backend able to run every known format, on the device class its
    /// type implies.
    pub fn new(backend: BackendType) -> Self {
        let device = match backend {
            BackendType::Cpu | BackendType::Wasm => DeviceClass::Cpu,
            BackendType::WebGpu | BackendType::WebNN => DeviceClass::Gpu,
        };
        let capabilities = BackendCapabilities::new(backend, device).with_formats([
            ModelFormat::Onnx,
            ModelFormat::Gguf,
            ModelFormat::SafeTensors,
            ModelFormat::LiteRt,
        ]);

        Self {
            capabilities,
            detect_error: None,
            detect_delay: Duration::ZERO,
            load_delay: Duration::ZERO,
            infer_delay: Duration::ZERO,
            always_fail: false,
            responder: Arc::new(|inputs: &[Tensor]| Ok(inputs.to_vec())),
            counters: Arc::default(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: BackendCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_quantizations(mut self, quantizations: impl IntoIterator<Item = Quantization>) -> Self {
        self.capabilities = self.capabilities.with_quantizations(quantizations);
        self
    }

    /// Detection reports `error` and the backend is skipped
    pub fn failing_detection(mut self, error: ProviderError) -> Self {
        self.detect_error = Some(error);
        self
    }

    pub fn with_detect_delay(mut self, delay: Duration) -> Self {
        self.detect_delay = delay;
        self
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    pub fn with_infer_delay(mut self, delay: Duration) -> Self {
        self.infer_delay = delay;
        self
    }

    /// Every load fails
    pub fn always_failing(mut self) -> Self {
        self.always_fail = true;
        self
    }

    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&[Tensor]) -> Result<Vec<Tensor>, BackendError> + Send + Sync + 'static,
    {
        self.responder = Arc::new(responder);
        self
    }

    /// Every inference returns `outputs`
    pub fn with_outputs(self, outputs: Vec<Tensor>) -> Self {
        self.with_responder(move |_| Ok(outputs.clone()))
    }

    /// The next `count` loads fail, later ones succeed
    pub fn fail_next_loads(&self, count: usize) {
        self.counters.failing_loads.store(count, Ordering::SeqCst);
    }

    /// Loads started, including failed ones
    pub fn load_count(&self) -> usize {
        self.counters.loads.load(Ordering::SeqCst)
    }

    pub fn infer_count(&self) -> usize {
        self.counters.infers.load(Ordering::SeqCst)
    }

    pub fn cancel_count(&self) -> usize {
        self.counters.cancels.load(Ordering::SeqCst)
    }

    /// Sessions created and not yet dropped
    pub fn live_sessions(&self) -> usize {
        self.counters.sessions_created.load(Ordering::SeqCst)
            - self.counters.sessions_dropped.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> bool {
        self.always_fail
            || self
                .counters
                .failing_loads
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
    }
}

#[async_trait]
impl InferenceBackend for MockBackend {
    fn backend_type(&self) -> BackendType {
        self.capabilities.backend
    }

    async fn detect(&self) -> Result<BackendCapabilities, ProviderError> {
        if !self.detect_delay.is_zero() {
            tokio::time::sleep(self.detect_delay).await;
        }
        match &self.detect_error {
            Some(error) => Err(error.clone()),
            None => Ok(self.capabilities.clone()),
        }
    }

    async fn load(
        &self,
        artifact: &ModelArtifact,
        _options: &BackendLoadOptions,
    ) -> Result<Arc<dyn BackendSession>, BackendError> {
        self.counters.loads.fetch_add(1, Ordering::SeqCst);
        if !self.load_delay.is_zero() {
            tokio::time::sleep(self.load_delay).await;
        }
        if self.take_failure() {
            return Err(BackendError::Load(format!(
                "{} refused {}",
                self.capabilities.backend, artifact.metadata.name
            )));
        }

        self.counters.sessions_created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockSession {
            responder: Arc::clone(&self.responder),
            infer_delay: self.infer_delay,
            counters: Arc::clone(&self.counters),
        }))
    }
}

struct MockSession {
    responder: Responder,
    infer_delay: Duration,
    counters: Arc<Counters>,
}

#[async_trait]
impl BackendSession for MockSession {
    async fn infer(&self, inputs: Vec<Tensor>) -> Result<Vec<Tensor>, BackendError> {
        self.counters.infers.fetch_add(1, Ordering::SeqCst);
        if !self.infer_delay.is_zero() {
            tokio::time::sleep(self.infer_delay).await;
        }
        (self.responder)(&inputs)
    }

    fn cancel(&self) {
        self.counters.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.counters.sessions_dropped.fetch_add(1, Ordering::SeqCst);
    }
}

/// Static source with one ONNX model available in every variant
pub fn onnx_source(model: impl Into<ModelRef>) -> StaticModelSource {
    StaticModelSource::new().with_model(model, ModelFormat::Onnx, &Quantization::ALL)
}
