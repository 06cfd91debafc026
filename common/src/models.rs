//! Model vocabulary: formats, quantization variants and metadata.
//!
//! Rule: use enums, not strings, for domain-specific values. String forms only
//! exist at the edges (file names, config files, logs).

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// On-disk model format a backend must be able to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFormat {
    /// ONNX graphs (Transformers.js / Optimum exports)
    Onnx,
    /// GGUF files (llama.cpp family)
    Gguf,
    /// SafeTensors weights
    SafeTensors,
    /// LiteRT / TFLite flatbuffers
    LiteRt,
    /// Unknown or unsupported format
    Unknown,
}

impl Default for ModelFormat {
    fn default() -> Self {
        Self::Unknown
    }
}

impl ModelFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Onnx => "onnx",
            Self::Gguf => "gguf",
            Self::SafeTensors => "safetensors",
            Self::LiteRt => "litert",
            Self::Unknown => "unknown",
        }
    }

    /// Canonical file extension (without the dot)
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Onnx => "onnx",
            Self::Gguf => "gguf",
            Self::SafeTensors => "safetensors",
            Self::LiteRt => "tflite",
            Self::Unknown => "bin",
        }
    }
}

impl fmt::Display for ModelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelFormat {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "onnx" => Ok(Self::Onnx),
            "gguf" => Ok(Self::Gguf),
            "safetensors" => Ok(Self::SafeTensors),
            "litert" | "tflite" => Ok(Self::LiteRt),
            other => Err(ParseError::UnknownFormat(other.to_string())),
        }
    }
}

/// Detect the model format from a file path (fast, no I/O)
///
/// # Examples
/// ```
/// use common::{detect_from_file_path, ModelFormat};
///
/// assert_eq!(detect_from_file_path("onnx/model_q4f16.onnx"), ModelFormat::Onnx);
/// assert_eq!(detect_from_file_path("model-Q4_K_M.gguf"), ModelFormat::Gguf);
/// assert_eq!(detect_from_file_path("README.md"), ModelFormat::Unknown);
/// ```
pub fn detect_from_file_path(path: &str) -> ModelFormat {
    let lower = path.to_lowercase();
    let ext = lower.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
    match ext {
        "onnx" => ModelFormat::Onnx,
        "gguf" => ModelFormat::Gguf,
        "safetensors" => ModelFormat::SafeTensors,
        "tflite" | "task" => ModelFormat::LiteRt,
        _ => ModelFormat::Unknown,
    }
}

/// Reduced-precision weight representation of a model variant.
///
/// String forms follow the ONNX export naming used on the HF hub, where each
/// variant lives in its own file: `model.onnx`, `model_fp16.onnx`,
/// `model_quantized.onnx`, `model_q4f16.onnx`, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quantization {
    Fp32,
    Fp16,
    Q8,
    Int8,
    Uint8,
    Q4,
    Q4f16,
    Bnb4,
}

impl Default for Quantization {
    fn default() -> Self {
        Self::Fp32
    }
}

impl Quantization {
    pub const ALL: [Quantization; 8] = [
        Self::Fp32,
        Self::Fp16,
        Self::Q8,
        Self::Int8,
        Self::Uint8,
        Self::Q4,
        Self::Q4f16,
        Self::Bnb4,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fp32 => "fp32",
            Self::Fp16 => "fp16",
            Self::Q8 => "q8",
            Self::Int8 => "int8",
            Self::Uint8 => "uint8",
            Self::Q4 => "q4",
            Self::Q4f16 => "q4f16",
            Self::Bnb4 => "bnb4",
        }
    }

    /// Suffix appended to the base file stem for this variant
    pub fn file_suffix(&self) -> &'static str {
        match self {
            Self::Fp32 => "",
            Self::Fp16 => "_fp16",
            Self::Q8 => "_quantized",
            Self::Int8 => "_int8",
            Self::Uint8 => "_uint8",
            Self::Q4 => "_q4",
            Self::Q4f16 => "_q4f16",
            Self::Bnb4 => "_bnb4",
        }
    }

    /// Bits per weight, used for rough memory estimates
    pub fn bits(&self) -> u32 {
        match self {
            Self::Fp32 => 32,
            Self::Fp16 => 16,
            Self::Q8 | Self::Int8 | Self::Uint8 => 8,
            Self::Q4 | Self::Q4f16 | Self::Bnb4 => 4,
        }
    }

    /// Extract the variant from an artifact file name
    ///
    /// Examples:
    ///   "onnx/model_q4f16.onnx" -> Q4f16
    ///   "model_quantized.onnx"  -> Q8
    ///   "model.onnx"            -> Fp32
    ///   "decoder_model_fp16.onnx" -> Fp16
    pub fn from_file_name(file_path: &str) -> Self {
        let file_name = file_path.rsplit('/').next().unwrap_or(file_path);
        let stem = file_name
            .rsplit_once('.')
            .map(|(base, _)| base)
            .unwrap_or(file_name);

        stem.rsplit_once('_')
            .and_then(|(_, suffix)| match suffix.to_lowercase().as_str() {
                "quantized" => Some(Self::Q8),
                other => other.parse().ok(),
            })
            .unwrap_or(Self::Fp32)
    }
}

impl fmt::Display for Quantization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Quantization {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|q| q.as_str() == lower)
            .ok_or(ParseError::UnknownQuantization(lower))
    }
}

/// Declared input or output of a model graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorSpec {
    pub name: String,
    /// Element type name (`"float32"`, `"int64"`, ...), when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtype: Option<String>,
    /// Dimensions; `-1` marks a dynamic axis
    #[serde(default)]
    pub dims: Vec<i64>,
}

impl TensorSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dtype: None,
            dims: Vec::new(),
        }
    }

    pub fn with_dtype(mut self, dtype: impl Into<String>) -> Self {
        self.dtype = Some(dtype.into());
        self
    }

    pub fn with_dims(mut self, dims: Vec<i64>) -> Self {
        self.dims = dims;
        self
    }
}

/// Metadata of a resolvable model artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub name: String,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default)]
    pub inputs: Vec<TensorSpec>,
    #[serde(default)]
    pub outputs: Vec<TensorSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub format: ModelFormat,
    #[serde(default)]
    pub quantization: Quantization,
}

impl ModelMetadata {
    pub fn new(name: impl Into<String>, format: ModelFormat, quantization: Quantization) -> Self {
        Self {
            name: name.into(),
            size_bytes: 0,
            inputs: Vec::new(),
            outputs: Vec::new(),
            version: None,
            format,
            quantization,
        }
    }

    pub fn with_size(mut self, size_bytes: u64) -> Self {
        self.size_bytes = size_bytes;
        self
    }

    pub fn with_inputs(mut self, inputs: Vec<TensorSpec>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_outputs(mut self, outputs: Vec<TensorSpec>) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn input_names(&self) -> Vec<&str> {
        self.inputs.iter().map(|spec| spec.name.as_str()).collect()
    }

    pub fn output_names(&self) -> Vec<&str> {
        self.outputs.iter().map(|spec| spec.name.as_str()).collect()
    }
}
