//! Common types shared across the TabAgent inference crates.
//!
//! This crate provides the model vocabulary that every other crate in the
//! workspace agrees on (tensor, execution-providers, runtime, pipeline).
//!
//! # Architecture
//!
//! The `common` crate sits at the bottom of the dependency hierarchy:
//! - Has NO dependencies on other workspace crates
//! - Provides shared types that all other crates can use
//! - Ensures type consistency across the entire system

pub mod inference_settings;
pub mod models;

pub use inference_settings::InferenceSettings;
pub use models::{
    detect_from_file_path, ModelFormat, ModelMetadata, Quantization, TensorSpec,
};

use thiserror::Error;

// --- Core Newtype Wrappers ---

/// Identifier of a model as understood by a model source
/// (e.g. `"Xenova/distilbert-base-uncased-finetuned-sst-2-english"`).
///
/// **Type Safety**: Using newtype pattern instead of a bare `String` keeps model
/// ids from being mixed up with file paths or backend names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ModelId(String);

impl ModelId {
    /// Create a new ModelId from a string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string reference
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume and return the inner string
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for ModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ModelId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ModelId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Errors raised while parsing the shared vocabulary from strings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Unknown quantization: {0}")]
    UnknownQuantization(String),

    #[error("Unknown model format: {0}")]
    UnknownFormat(String),
}
