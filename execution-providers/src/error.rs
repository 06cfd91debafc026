use common::{ModelFormat, Quantization};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::BackendType;

/// Errors that can occur when working with execution providers
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum ProviderError {
    #[error(
        "No backend available for {format} model (quantization: {quantization:?}, requested: {requested:?}, detected: {detected:?})"
    )]
    NoBackendAvailable {
        format: ModelFormat,
        quantization: Option<Quantization>,
        requested: Option<BackendType>,
        detected: Vec<BackendType>,
    },

    #[error("Provider not available: {0}")]
    NotAvailable(String),

    #[error("Unsupported provider: {0}")]
    Unsupported(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Capability detection failed: {0}")]
    Detection(String),
}

pub type Result<T> = std::result::Result<T, ProviderError>;
