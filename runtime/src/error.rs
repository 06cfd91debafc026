use tabagent_execution_providers::{BackendType, ProviderError};
use tabagent_tensor::TensorError;
use thiserror::Error;

/// Runtime errors.
///
/// `Clone` because one in-flight load result is handed to every caller
/// waiting on it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    NoBackendAvailable(ProviderError),

    #[error(transparent)]
    Provider(ProviderError),

    #[error("Failed to load model [{fingerprint}] on {backend}: {reason}")]
    ModelLoad {
        fingerprint: String,
        backend: BackendType,
        reason: String,
    },

    #[error("Inference failed for {model} on {backend}: {reason}")]
    Inference {
        model: String,
        backend: BackendType,
        reason: String,
    },

    #[error("Model handle #{handle_id} ({model}) has been disposed")]
    HandleDisposed { model: String, handle_id: u64 },

    #[error("Could not resolve model {model}: {reason}")]
    Source { model: String, reason: String },

    #[error("{operation} timed out after {after_ms} ms")]
    Timeout { operation: String, after_ms: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Tensor error: {0}")]
    Tensor(#[from] TensorError),
}

impl From<ProviderError> for RuntimeError {
    fn from(error: ProviderError) -> Self {
        match error {
            ProviderError::NoBackendAvailable { .. } => Self::NoBackendAvailable(error),
            other => Self::Provider(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
