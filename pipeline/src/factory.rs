//! Routes task tags to the pipelines this crate can build.

use std::sync::Arc;
use tabagent_runtime::{ModelRef, RuntimeManager};

use crate::classification::{ImageClassificationTask, TextClassificationTask};
use crate::encoders::TextEncoder;
use crate::error::{PipelineError, Result};
use crate::feature_extraction::FeatureExtractionTask;
use crate::pipeline::Pipeline;
use crate::types::PipelineType;

const SUPPORTED: [PipelineType; 3] = [
    PipelineType::TextClassification,
    PipelineType::ImageClassification,
    PipelineType::FeatureExtraction,
];

/// Builds pipelines that share one runtime (and so one model cache)
#[derive(Clone)]
pub struct PipelineFactory {
    runtime: Arc<RuntimeManager>,
}

impl PipelineFactory {
    pub fn new(runtime: Arc<RuntimeManager>) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> &Arc<RuntimeManager> {
        &self.runtime
    }

    pub fn supported_types(&self) -> &'static [PipelineType] {
        &SUPPORTED
    }

    pub fn is_supported(&self, pipeline_type: PipelineType) -> bool {
        SUPPORTED.contains(&pipeline_type)
    }

    /// Resolve a HuggingFace `pipeline_tag` to a pipeline type this factory
    /// can build
    pub fn route(&self, tag: &str) -> Result<PipelineType> {
        match PipelineType::from_hf_tag(tag) {
            Some(pipeline_type) if self.is_supported(pipeline_type) => Ok(pipeline_type),
            Some(pipeline_type) => Err(PipelineError::Unsupported(format!(
                "{} has no pipeline implementation",
                pipeline_type
            ))),
            None => Err(PipelineError::Unsupported(format!("unknown task '{}'", tag))),
        }
    }

    pub fn text_classification<E: TextEncoder>(
        &self,
        model: impl Into<ModelRef>,
        encoder: E,
    ) -> Pipeline<TextClassificationTask<E>> {
        self.pipeline(TextClassificationTask::new(model, encoder))
    }

    pub fn image_classification(&self, model: impl Into<ModelRef>) -> Pipeline<ImageClassificationTask> {
        self.pipeline(ImageClassificationTask::new(model))
    }

    pub fn feature_extraction<E: TextEncoder>(
        &self,
        model: impl Into<ModelRef>,
        encoder: E,
    ) -> Pipeline<FeatureExtractionTask<E>> {
        self.pipeline(FeatureExtractionTask::new(model, encoder))
    }

    /// Wrap an already configured task
    pub fn pipeline<T: crate::task::Task>(&self, task: T) -> Pipeline<T> {
        Pipeline::new(task, Arc::clone(&self.runtime))
    }
}
