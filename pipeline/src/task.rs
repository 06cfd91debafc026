//! The per-task half of a pipeline.

use tabagent_execution_providers::BackendType;
use tabagent_runtime::{LoadOptions, ModelRef};
use tabagent_tensor::Tensor;

use crate::error::Result;
use crate::options::RunOptions;
use crate::types::PipelineType;

/// How `run_batch` feeds inputs to the backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BatchPolicy {
    /// One inference call per input
    #[default]
    Sequential,
    /// One inference call for the whole batch when every input tensor has a
    /// leading batch axis of 1 and matching shapes; sequential otherwise
    Stacked,
}

/// Task-specific preprocessing and postprocessing.
///
/// The [`Pipeline`](crate::Pipeline) owns loading, inference, batching and
/// disposal; a task only maps its input to tensors and tensors to its output.
pub trait Task: Send + Sync + 'static {
    type Input: Send + Sync;
    type Output: Send;

    fn pipeline_type(&self) -> PipelineType;

    fn model_ref(&self) -> &ModelRef;

    fn load_options(&self) -> LoadOptions {
        LoadOptions::default()
    }

    /// Backend to request; `None` lets the runtime choose
    fn backend(&self) -> Option<BackendType> {
        None
    }

    fn preprocess(&self, input: &Self::Input) -> Result<Vec<Tensor>>;

    fn postprocess(&self, outputs: Vec<Tensor>, options: &RunOptions) -> Result<Self::Output>;

    fn batch_policy(&self) -> BatchPolicy {
        BatchPolicy::Sequential
    }
}
