/// Pipeline errors
///
/// Load and inference failures keep the runtime error that caused them.
use tabagent_runtime::RuntimeError;
use tabagent_tensor::TensorError;
use thiserror::Error;

use crate::types::PipelineType;

#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("No backend available: {0}")]
    NoBackendAvailable(#[source] RuntimeError),

    #[error("Model load failed: {0}")]
    ModelLoad(#[source] RuntimeError),

    #[error("Inference failed: {0}")]
    Inference(#[source] RuntimeError),

    #[error("{0} pipeline has been disposed")]
    Disposed(PipelineType),

    #[error("Tensor error: {0}")]
    Tensor(#[from] TensorError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    #[error("Pipeline type not supported: {0}")]
    Unsupported(String),
}

impl PipelineError {
    pub(crate) fn load(error: RuntimeError) -> Self {
        match error {
            RuntimeError::NoBackendAvailable(_) => Self::NoBackendAvailable(error),
            other => Self::ModelLoad(other),
        }
    }

    pub(crate) fn inference(error: RuntimeError) -> Self {
        match error {
            RuntimeError::Tensor(e) => Self::Tensor(e),
            other => Self::Inference(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
