//! TabAgent runtime: backends, model sources and the model cache.
//!
//! A [`RuntimeManager`] owns a set of [`InferenceBackend`]s, a
//! [`ModelSource`] and a [`ModelCache`]. `load_model` returns a cached handle
//! straight away when there is one; otherwise it resolves an artifact, picks a
//! backend from the detected capabilities and hands out a shared,
//! reference-counted [`ModelHandle`]. Concurrent loads of the same
//! [`Fingerprint`] are collapsed into one backend load.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tabagent_runtime::{LoadOptions, ModelRef, RuntimeConfig, RuntimeManager};
//!
//! # async fn run(backend: Arc<dyn tabagent_runtime::InferenceBackend>) -> tabagent_runtime::Result<()> {
//! let runtime = RuntimeManager::builder()
//!     .with_config(RuntimeConfig::default())
//!     .with_backend(backend)
//!     .build()?;
//!
//! let model = ModelRef::new("Xenova/distilbert-base-uncased-finetuned-sst-2-english");
//! let handle = runtime.load_model(&model, None, LoadOptions::default()).await?;
//! // ... runtime.infer(&handle, inputs, None).await?
//! runtime.release_model(&handle);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod handle;
pub mod manager;
pub mod source;

#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use backend::{
    detect_from_provider, BackendError, BackendLoadOptions, BackendRegistry, BackendSession,
    InferenceBackend,
};
pub use cache::{CacheStats, ModelCache, ReleaseOutcome};
pub use config::RuntimeConfig;
pub use error::{Result, RuntimeError};
pub use fingerprint::Fingerprint;
pub use handle::ModelHandle;
pub use manager::{LoadOptions, RuntimeManager, RuntimeManagerBuilder};
pub use source::{
    ArtifactLocation, LocalModelSource, ModelArtifact, ModelRef, ModelSource, StaticModelSource,
};
