//! Sentence embeddings from an encoder's last hidden state.

use tabagent_execution_providers::BackendType;
use tabagent_runtime::{LoadOptions, ModelRef};
use tabagent_tensor::{Tensor, TensorError};

use crate::encoders::TextEncoder;
use crate::error::{PipelineError, Result};
use crate::options::{FeatureExtractionOptions, Pooling, RunOptions};
use crate::task::{BatchPolicy, Task};
use crate::types::PipelineType;

/// Mean over the token axis of a `[seq, dim]` row-major buffer
fn mean_pool(data: &[f32], seq_len: usize, dim: usize) -> Vec<f32> {
    let mut pooled = vec![0.0f32; dim];
    for token in data.chunks_exact(dim).take(seq_len) {
        for (sum, value) in pooled.iter_mut().zip(token) {
            *sum += value;
        }
    }
    for value in &mut pooled {
        *value /= seq_len as f32;
    }
    pooled
}

/// Scale to unit L2 norm; the zero vector is returned unchanged
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

/// Pool a `[1, seq, dim]` hidden state into one `dim` vector
pub fn pool(hidden_state: &Tensor, options: &FeatureExtractionOptions) -> Result<Vec<f32>> {
    let (seq_len, dim) = match hidden_state.shape() {
        [1, seq, dim] if *seq > 0 && *dim > 0 => (*seq, *dim),
        shape => {
            return Err(PipelineError::InvalidInput(format!(
                "expected a hidden state of shape [1, seq, dim], got {:?}",
                shape
            )))
        }
    };
    let data = hidden_state.to_f32_vec().map_err(TensorError::from)?;

    let mut embedding = match options.pooling {
        Pooling::Mean => mean_pool(&data, seq_len, dim),
        Pooling::Cls => data[..dim].to_vec(),
    };
    if options.normalize {
        l2_normalize(&mut embedding);
    }
    Ok(embedding)
}

/// Text embeddings (sentence-transformers style encoders)
pub struct FeatureExtractionTask<E: TextEncoder> {
    model: ModelRef,
    encoder: E,
    load_options: LoadOptions,
    backend: Option<BackendType>,
    batch_policy: BatchPolicy,
}

impl<E: TextEncoder> FeatureExtractionTask<E> {
    pub fn new(model: impl Into<ModelRef>, encoder: E) -> Self {
        Self {
            model: model.into(),
            encoder,
            load_options: LoadOptions::default(),
            backend: None,
            batch_policy: BatchPolicy::Sequential,
        }
    }

    pub fn with_load_options(mut self, options: LoadOptions) -> Self {
        self.load_options = options;
        self
    }

    pub fn with_backend(mut self, backend: BackendType) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_batch_policy(mut self, policy: BatchPolicy) -> Self {
        self.batch_policy = policy;
        self
    }
}

impl<E: TextEncoder> Task for FeatureExtractionTask<E> {
    type Input = String;
    type Output = Vec<f32>;

    fn pipeline_type(&self) -> PipelineType {
        PipelineType::FeatureExtraction
    }

    fn model_ref(&self) -> &ModelRef {
        &self.model
    }

    fn load_options(&self) -> LoadOptions {
        self.load_options.clone()
    }

    fn backend(&self) -> Option<BackendType> {
        self.backend
    }

    fn preprocess(&self, input: &String) -> Result<Vec<Tensor>> {
        self.encoder.encode(input)?.to_tensors()
    }

    fn postprocess(&self, outputs: Vec<Tensor>, options: &RunOptions) -> Result<Vec<f32>> {
        let view: FeatureExtractionOptions = options.view()?;
        let hidden_state = outputs
            .first()
            .ok_or_else(|| PipelineError::InvalidInput("model returned no outputs".to_string()))?;
        pool(hidden_state, &view)
    }

    fn batch_policy(&self) -> BatchPolicy {
        self.batch_policy
    }
}
