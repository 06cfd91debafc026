//! ONNX Runtime backend.
//!
//! Sessions are built from an [`ExecutionProvider`] descriptor bridged to the
//! matching `ort` execution provider. Unbridgeable providers fall back to the
//! ORT CPU provider.

use async_trait::async_trait;
use common::ModelFormat;
use ort::execution_providers::ExecutionProviderDispatch;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{DynValue, Value};
use parking_lot::Mutex;
use std::sync::Arc;
use tabagent_execution_providers::constants::{ENABLE_CPU_MEM_ARENA, INTRA_OP_NUM_THREADS};
use tabagent_execution_providers::{
    BackendCapabilities, BackendType, CPUExecutionProvider, DynExecutionProvider, ExecutionProvider,
    ProviderError,
};
use tabagent_tensor::{DType, Tensor};

use crate::backend::{detect_from_provider, BackendError, BackendLoadOptions, BackendSession, InferenceBackend};
use crate::source::{ArtifactLocation, ModelArtifact};

/// Convert a provider descriptor to its `ort` counterpart
fn bridge_to_ort(provider: &dyn ExecutionProvider) -> ExecutionProviderDispatch {
    let config = provider.config();

    match provider.backend_type() {
        BackendType::Cpu => {
            let mut cpu = ort::execution_providers::CPUExecutionProvider::default();
            if let Some(arena) = config.get_as::<bool>(ENABLE_CPU_MEM_ARENA) {
                cpu = cpu.with_arena_allocator(arena);
            }
            log::debug!("Bridged {} to ort", provider.name());
            cpu.build()
        }
        other => {
            log::warn!(
                "Provider {} ({}) has no ort bridge, using CPU",
                provider.name(),
                other
            );
            ort::execution_providers::CPUExecutionProvider::default().build()
        }
    }
}

fn build_session(
    provider: &dyn ExecutionProvider,
    threads: Option<usize>,
    location: &ArtifactLocation,
) -> Result<Session, BackendError> {
    let load_err = |e: ort::Error| BackendError::Load(e.to_string());

    let mut builder = Session::builder()
        .map_err(load_err)?
        .with_execution_providers([bridge_to_ort(provider)])
        .map_err(load_err)?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(load_err)?;

    if let Some(threads) = threads {
        builder = builder.with_intra_threads(threads).map_err(load_err)?;
    }

    match location {
        ArtifactLocation::File(path) => builder.commit_from_file(path),
        ArtifactLocation::Bytes(bytes) => builder.commit_from_memory(bytes),
    }
    .map_err(load_err)
}

fn to_ort_value(tensor: &Tensor) -> Result<DynValue, BackendError> {
    macro_rules! value {
        ($t:ty) => {
            Value::from_array(tensor.to_array::<$t>()?)
                .map(|value| value.into_dyn())
                .map_err(|e| BackendError::Execution(e.to_string()))
        };
    }

    match tensor.dtype() {
        DType::Float32 => value!(f32),
        DType::Float64 => value!(f64),
        DType::Int8 => value!(i8),
        DType::Int32 => value!(i32),
        DType::Int64 => value!(i64),
        DType::Uint8 => value!(u8),
        DType::Uint64 => value!(u64),
        DType::Bool => value!(bool),
    }
}

fn from_ort_value(name: &str, value: &DynValue) -> Result<Tensor, BackendError> {
    macro_rules! extract {
        ($($t:ty),*) => {
            $(
                if let Ok((shape, data)) = value.try_extract_tensor::<$t>() {
                    let shape: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
                    return Ok(Tensor::from_vec(data.to_vec(), shape)?);
                }
            )*
        };
    }

    extract!(f32, i64, f64, i32, u8, i8, u64, bool);
    Err(BackendError::Unsupported(format!(
        "output '{}' has an element type tensors cannot hold",
        name
    )))
}

/// ONNX Runtime [`InferenceBackend`]
pub struct OnnxBackend {
    provider: DynExecutionProvider,
}

impl OnnxBackend {
    pub fn new(provider: DynExecutionProvider) -> Self {
        Self { provider }
    }

    pub fn cpu() -> Self {
        Self::new(CPUExecutionProvider::new().build())
    }
}

#[async_trait]
impl InferenceBackend for OnnxBackend {
    fn backend_type(&self) -> BackendType {
        self.provider.backend_type()
    }

    async fn detect(&self) -> Result<BackendCapabilities, ProviderError> {
        let capabilities = detect_from_provider(self.provider.as_ref())?;
        // ORT only executes ONNX graphs, whatever else the provider lists
        Ok(capabilities.with_formats([ModelFormat::Onnx]))
    }

    async fn load(
        &self,
        artifact: &ModelArtifact,
        options: &BackendLoadOptions,
    ) -> Result<Arc<dyn BackendSession>, BackendError> {
        if artifact.metadata.format != ModelFormat::Onnx {
            return Err(BackendError::Unsupported(format!(
                "ONNX Runtime cannot load {} models",
                artifact.metadata.format
            )));
        }

        let provider = Arc::clone(&self.provider);
        let threads = options
            .get_as::<usize>(INTRA_OP_NUM_THREADS)
            .or_else(|| provider.capabilities().max_threads);
        let location = artifact.location.clone();

        let session = tokio::task::spawn_blocking(move || {
            build_session(provider.as_ref(), threads, &location)
        })
        .await
        .map_err(|e| BackendError::Load(e.to_string()))??;

        let input_names: Vec<String> = session.inputs.iter().map(|i| i.name.clone()).collect();
        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        log::info!(
            "ONNX session ready for {} (inputs: {:?}, outputs: {:?})",
            artifact.metadata.name,
            input_names,
            output_names
        );

        Ok(Arc::new(OnnxSession {
            session: Arc::new(Mutex::new(session)),
            input_names,
            output_names,
        }))
    }
}

struct OnnxSession {
    session: Arc<Mutex<Session>>,
    input_names: Vec<String>,
    output_names: Vec<String>,
}

fn run(
    session: &Mutex<Session>,
    input_names: &[String],
    output_names: &[String],
    inputs: Vec<Tensor>,
) -> Result<Vec<Tensor>, BackendError> {
    let values = input_names
        .iter()
        .zip(&inputs)
        .map(|(name, tensor)| Ok((name.clone(), to_ort_value(tensor)?)))
        .collect::<Result<Vec<(String, DynValue)>, BackendError>>()?;

    let mut session = session.lock();
    let outputs = session
        .run(values)
        .map_err(|e| BackendError::Execution(e.to_string()))?;

    output_names
        .iter()
        .map(|name| from_ort_value(name, &outputs[name.as_str()]))
        .collect()
}

#[async_trait]
impl BackendSession for OnnxSession {
    async fn infer(&self, inputs: Vec<Tensor>) -> Result<Vec<Tensor>, BackendError> {
        if inputs.len() != self.input_names.len() {
            return Err(BackendError::Execution(format!(
                "model takes {} inputs {:?}, got {}",
                self.input_names.len(),
                self.input_names,
                inputs.len()
            )));
        }

        let session = Arc::clone(&self.session);
        let input_names = self.input_names.clone();
        let output_names = self.output_names.clone();
        tokio::task::spawn_blocking(move || run(&session, &input_names, &output_names, inputs))
            .await
            .map_err(|e| BackendError::Execution(e.to_string()))?
    }
}
