//! Text and image classification.
//!
//! Both tasks end the same way: `[1, num_classes]` logits, a numerically
//! stable softmax and the best class (or the `top_k` best).

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tabagent_execution_providers::BackendType;
use tabagent_runtime::{LoadOptions, ModelRef};
use tabagent_tensor::Tensor;

use crate::encoders::{ImageInput, TextEncoder};
use crate::error::{PipelineError, Result};
use crate::options::{ClassificationOptions, RunOptions};
use crate::task::{BatchPolicy, Task};
use crate::types::PipelineType;

/// ImageNet channel statistics, the usual ViT/ResNet preprocessing
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationLabel {
    pub label: String,
    pub score: f32,
    pub index: usize,
}

/// Softmax, shifted by the max logit so large logits cannot overflow
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Indices of the `k` largest scores, best first; equal scores keep the
/// lower index first
pub fn top_k(scores: &[f32], k: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| match scores[b].total_cmp(&scores[a]) {
        Ordering::Equal => a.cmp(&b),
        other => other,
    });
    order.truncate(k);
    order
}

/// `id2label` lookup with the `LABEL_<i>` fallback
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelMap {
    labels: Vec<String>,
}

impl LabelMap {
    pub fn new<S: Into<String>>(labels: impl IntoIterator<Item = S>) -> Self {
        Self {
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }

    pub fn label(&self, index: usize) -> String {
        self.labels
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("LABEL_{}", index))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Shared classification postprocessing
pub fn classify(outputs: Vec<Tensor>, labels: &LabelMap, options: &RunOptions) -> Result<Vec<ClassificationLabel>> {
    let view: ClassificationOptions = options.view()?;
    let k = view.top_k.unwrap_or(1);
    if k == 0 {
        return Err(PipelineError::InvalidOptions("top_k must be at least 1".to_string()));
    }

    let logits = outputs
        .into_iter()
        .next()
        .ok_or_else(|| PipelineError::InvalidInput("model returned no outputs".to_string()))?;
    let num_classes = match logits.shape() {
        [n] | [1, n] if *n > 0 => *n,
        shape => {
            return Err(PipelineError::InvalidInput(format!(
                "expected logits of shape [1, num_classes], got {:?}",
                shape
            )))
        }
    };
    if !labels.is_empty() && labels.len() != num_classes {
        log::warn!(
            "Model returned {} classes but {} labels are configured",
            num_classes,
            labels.len()
        );
    }

    let scores = softmax(&logits.to_f32_vec().map_err(tabagent_tensor::TensorError::from)?);
    Ok(top_k(&scores, k)
        .into_iter()
        .map(|index| ClassificationLabel {
            label: labels.label(index),
            score: scores[index],
            index,
        })
        .collect())
}

/// Sequence classification (sentiment, topic, ...)
pub struct TextClassificationTask<E: TextEncoder> {
    model: ModelRef,
    encoder: E,
    labels: LabelMap,
    load_options: LoadOptions,
    backend: Option<BackendType>,
    batch_policy: BatchPolicy,
}

impl<E: TextEncoder> TextClassificationTask<E> {
    pub fn new(model: impl Into<ModelRef>, encoder: E) -> Self {
        Self {
            model: model.into(),
            encoder,
            labels: LabelMap::default(),
            load_options: LoadOptions::default(),
            backend: None,
            batch_policy: BatchPolicy::Sequential,
        }
    }

    pub fn with_labels<S: Into<String>>(mut self, labels: impl IntoIterator<Item = S>) -> Self {
        self.labels = LabelMap::new(labels);
        self
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

    pub fn labels(&self) -> &LabelMap {
        &self.labels
    }
}

impl<E: TextEncoder> Task for TextClassificationTask<E> {
    type Input = String;
    type Output = Vec<ClassificationLabel>;

    fn pipeline_type(&self) -> PipelineType {
        PipelineType::TextClassification
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

    fn postprocess(&self, outputs: Vec<Tensor>, options: &RunOptions) -> Result<Self::Output> {
        classify(outputs, &self.labels, options)
    }

    fn batch_policy(&self) -> BatchPolicy {
        self.batch_policy
    }
}

/// Image classification over decoded RGB images
pub struct ImageClassificationTask {
    model: ModelRef,
    labels: LabelMap,
    mean: [f32; 3],
    std: [f32; 3],
    image_size: Option<(usize, usize)>,
    load_options: LoadOptions,
    backend: Option<BackendType>,
    batch_policy: BatchPolicy,
}

impl ImageClassificationTask {
    pub fn new(model: impl Into<ModelRef>) -> Self {
        Self {
            model: model.into(),
            labels: LabelMap::default(),
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
            image_size: None,
            load_options: LoadOptions::default(),
            backend: None,
            batch_policy: BatchPolicy::Stacked,
        }
    }

    pub fn with_labels<S: Into<String>>(mut self, labels: impl IntoIterator<Item = S>) -> Self {
        self.labels = LabelMap::new(labels);
        self
    }

    pub fn with_normalization(mut self, mean: [f32; 3], std: [f32; 3]) -> Self {
        self.mean = mean;
        self.std = std;
        self
    }

    /// Reject images that are not exactly `width` x `height`
    pub fn with_image_size(mut self, width: usize, height: usize) -> Self {
        self.image_size = Some((width, height));
        self
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

impl Task for ImageClassificationTask {
    type Input = ImageInput;
    type Output = Vec<ClassificationLabel>;

    fn pipeline_type(&self) -> PipelineType {
        PipelineType::ImageClassification
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

    fn preprocess(&self, input: &ImageInput) -> Result<Vec<Tensor>> {
        if let Some((width, height)) = self.image_size {
            if (input.width(), input.height()) != (width, height) {
                return Err(PipelineError::InvalidInput(format!(
                    "expected a {}x{} image, got {}x{}",
                    width,
                    height,
                    input.width(),
                    input.height()
                )));
            }
        }
        if self.std.iter().any(|&s| s == 0.0) {
            return Err(PipelineError::InvalidOptions("normalization std must be non-zero".to_string()));
        }
        Ok(vec![input.to_normalized_chw(self.mean, self.std)?])
    }

    fn postprocess(&self, outputs: Vec<Tensor>, options: &RunOptions) -> Result<Self::Output> {
        classify(outputs, &self.labels, options)
    }

    fn batch_policy(&self) -> BatchPolicy {
        self.batch_policy
    }
}
