//! TabAgent pipelines: task input in, task output out.
//!
//! A [`Pipeline`] binds a [`Task`] to a shared [`RuntimeManager`]. The first
//! run loads the model through the runtime's cache; every run then
//! preprocesses, infers and postprocesses; `dispose` hands the model
//! reference back.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tabagent_pipeline::{Encoding, PipelineFactory, RunOptions};
//! use tabagent_runtime::RuntimeManager;
//!
//! # async fn run(runtime: RuntimeManager) -> tabagent_pipeline::Result<()> {
//! let factory = PipelineFactory::new(Arc::new(runtime));
//! let encoder = |text: &str| -> tabagent_pipeline::Result<Encoding> {
//!     Ok(Encoding::new(text.bytes().map(i64::from).collect()))
//! };
//! let pipeline = factory
//!     .text_classification("Xenova/distilbert-base-uncased-finetuned-sst-2-english", encoder);
//!
//! let labels = pipeline.run(&"I love this!".to_string(), &RunOptions::default()).await?;
//! println!("{} ({:.3})", labels[0].label, labels[0].score);
//! pipeline.dispose().await?;
//! # Ok(())
//! # }
//! ```
//!
//! [`RuntimeManager`]: tabagent_runtime::RuntimeManager

pub mod classification;
pub mod encoders;
pub mod error;
pub mod factory;
pub mod feature_extraction;
pub mod options;
pub mod pipeline;
pub mod task;
pub mod types;

pub use classification::{
    ClassificationLabel, ImageClassificationTask, LabelMap, TextClassificationTask,
};
pub use encoders::{Encoding, ImageInput, TextEncoder};
pub use error::{PipelineError, Result};
pub use factory::PipelineFactory;
pub use feature_extraction::FeatureExtractionTask;
pub use options::{
    ClassificationOptions, FeatureExtractionOptions, GenerationOptions, Pooling, RunOptions,
};
pub use pipeline::{Pipeline, PipelineState};
pub use task::{BatchPolicy, Task};
pub use types::PipelineType;
