/// Pipeline type enum - NO string literals!
///
/// Represents the ML task types a pipeline can be built for. String forms
/// are the HuggingFace `pipeline_tag` spellings.
use common::ModelFormat;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineType {
    /// Sequence classification (sentiment, topic, ...)
    #[serde(rename = "text-classification", alias = "sentiment-analysis")]
    TextClassification,

    /// Image classification
    #[serde(rename = "image-classification")]
    ImageClassification,

    /// Feature extraction (sentence-transformers, CLIP text tower)
    #[serde(rename = "feature-extraction")]
    FeatureExtraction,

    /// Text generation (LLMs, GPT, Llama, etc.)
    #[serde(rename = "text-generation")]
    TextGeneration,

    /// Image to text (Florence2, BLIP, etc.)
    #[serde(rename = "image-to-text")]
    ImageToText,

    /// Automatic speech recognition (Whisper)
    #[serde(rename = "automatic-speech-recognition")]
    AutomaticSpeechRecognition,

    /// Zero-shot image classification
    #[serde(rename = "zero-shot-image-classification")]
    ZeroShotImageClassification,

    /// Object detection
    #[serde(rename = "object-detection")]
    ObjectDetection,
}

impl PipelineType {
    /// Pipeline for a model, preferring its declared task tag
    pub fn from_model(format: ModelFormat, task: Option<&str>) -> Self {
        if let Some(pipeline_type) = task.and_then(Self::from_hf_tag) {
            return pipeline_type;
        }

        match format {
            ModelFormat::Gguf | ModelFormat::SafeTensors | ModelFormat::LiteRt => Self::TextGeneration,
            // ONNX exports cover every task; without a tag assume an encoder
            ModelFormat::Onnx => Self::FeatureExtraction,
            ModelFormat::Unknown => Self::TextGeneration,
        }
    }

    /// Convert to HuggingFace pipeline_tag string (for API compatibility)
    pub fn to_hf_tag(&self) -> &'static str {
        match self {
            Self::TextClassification => "text-classification",
            Self::ImageClassification => "image-classification",
            Self::FeatureExtraction => "feature-extraction",
            Self::TextGeneration => "text-generation",
            Self::ImageToText => "image-to-text",
            Self::AutomaticSpeechRecognition => "automatic-speech-recognition",
            Self::ZeroShotImageClassification => "zero-shot-image-classification",
            Self::ObjectDetection => "object-detection",
        }
    }

    /// Parse from HuggingFace pipeline_tag string
    pub fn from_hf_tag(tag: &str) -> Option<Self> {
        match tag {
            "text-classification" | "sentiment-analysis" => Some(Self::TextClassification),
            "image-classification" => Some(Self::ImageClassification),
            "feature-extraction" | "sentence-similarity" | "embedding" => Some(Self::FeatureExtraction),
            "text-generation" => Some(Self::TextGeneration),
            "image-to-text" => Some(Self::ImageToText),
            "automatic-speech-recognition" => Some(Self::AutomaticSpeechRecognition),
            "zero-shot-image-classification" => Some(Self::ZeroShotImageClassification),
            "object-detection" => Some(Self::ObjectDetection),
            _ => None,
        }
    }
}

impl fmt::Display for PipelineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hf_tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_type_serialization() {
        let pt = PipelineType::TextClassification;
        let json = serde_json::to_string(&pt).expect("Serialization failed");
        assert_eq!(json, r#""text-classification""#);

        let alias: PipelineType = serde_json::from_str(r#""sentiment-analysis""#).expect("Deserialization failed");
        assert_eq!(alias, pt);
    }

    #[test]
    fn test_hf_tag_conversion() {
        assert_eq!(PipelineType::FeatureExtraction.to_hf_tag(), "feature-extraction");
        assert_eq!(
            PipelineType::from_hf_tag("sentence-similarity"),
            Some(PipelineType::FeatureExtraction)
        );
        assert_eq!(PipelineType::from_hf_tag("invalid"), None);
    }

    #[test]
    fn test_from_model_prefers_task_tag() {
        assert_eq!(
            PipelineType::from_model(ModelFormat::Onnx, Some("image-classification")),
            PipelineType::ImageClassification
        );
        assert_eq!(
            PipelineType::from_model(ModelFormat::Gguf, Some("not-a-task")),
            PipelineType::TextGeneration
        );
        assert_eq!(PipelineType::from_model(ModelFormat::Onnx, None), PipelineType::FeatureExtraction);
    }
}
