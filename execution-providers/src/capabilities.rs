//! Capability flags a backend advertises to selection.

use common::{ModelFormat, Quantization};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::BackendType;

/// Class of device a backend executes on. Ordered by selection rank:
/// `Npu > Gpu > Cpu`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Cpu,
    Gpu,
    Npu,
}

impl DeviceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Gpu => "gpu",
            Self::Npu => "npu",
        }
    }

    /// Parse the WebNN `deviceType` spelling
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "cpu" => Some(Self::Cpu),
            "gpu" => Some(Self::Gpu),
            "npu" => Some(Self::Npu),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendCapabilities {
    pub backend: BackendType,
    pub device: DeviceClass,
    /// Model formats the backend can execute
    pub formats: Vec<ModelFormat>,
    /// Supported weight variants; empty means every variant
    #[serde(default)]
    pub quantizations: Vec<Quantization>,
    #[serde(default)]
    pub max_threads: Option<usize>,
}

impl BackendCapabilities {
    pub fn new(backend: BackendType, device: DeviceClass) -> Self {
        Self {
            backend,
            device,
            formats: Vec::new(),
            quantizations: Vec::new(),
            max_threads: None,
        }
    }

    pub fn with_formats(mut self, formats: impl IntoIterator<Item = ModelFormat>) -> Self {
        self.formats = formats.into_iter().collect();
        self
    }

    pub fn with_quantizations(mut self, quantizations: impl IntoIterator<Item = Quantization>) -> Self {
        self.quantizations = quantizations.into_iter().collect();
        self
    }

    pub fn with_max_threads(mut self, threads: usize) -> Self {
        self.max_threads = Some(threads);
        self
    }

    pub fn supports_format(&self, format: ModelFormat) -> bool {
        self.formats.contains(&format)
    }

    pub fn supports_quantization(&self, quantization: Quantization) -> bool {
        self.quantizations.is_empty() || self.quantizations.contains(&quantization)
    }

    /// Minimum contract: the format must be executable, and the variant (when
    /// one is required) must be supported.
    pub fn can_run(&self, format: ModelFormat, quantization: Option<Quantization>) -> bool {
        self.supports_format(format)
            && quantization.map_or(true, |q| self.supports_quantization(q))
    }
}
