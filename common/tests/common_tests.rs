//! Tests for the common crate
//!
//! Covers the shared model vocabulary: ids, formats, quantization variants
//! and metadata parsing.

use common::{
    detect_from_file_path, ModelFormat, ModelId, ModelMetadata, ParseError, Quantization,
    TensorSpec,
};

#[test]
fn test_model_id_conversions() {
    let from_str: ModelId = "Xenova/bert-base-uncased".into();
    let from_string: ModelId = String::from("Xenova/bert-base-uncased").into();

    assert_eq!(from_str, from_string);
    assert_eq!(from_str.clone().into_inner(), "Xenova/bert-base-uncased");
}

#[test]
fn test_quantization_parse_errors() {
    let err = "int3".parse::<Quantization>().unwrap_err();
    assert_eq!(err, ParseError::UnknownQuantization("int3".to_string()));
    assert_eq!(err.to_string(), "Unknown quantization: int3");

    let err = "pickle".parse::<ModelFormat>().unwrap_err();
    assert_eq!(err, ParseError::UnknownFormat("pickle".to_string()));
}

#[test]
fn test_quantization_bits_ordering() {
    assert!(Quantization::Fp32.bits() > Quantization::Fp16.bits());
    assert!(Quantization::Fp16.bits() > Quantization::Q8.bits());
    assert_eq!(Quantization::Q4f16.bits(), Quantization::Bnb4.bits());
}

#[test]
fn test_format_and_quantization_from_same_path() {
    let path = "Xenova/distilbert/onnx/model_q4f16.onnx";
    assert_eq!(detect_from_file_path(path), ModelFormat::Onnx);
    assert_eq!(Quantization::from_file_name(path), Quantization::Q4f16);
}

#[test]
fn test_metadata_sidecar_parsing() {
    let json = r#"{
        "name": "distilbert-sst2",
        "format": "onnx",
        "inputs": [
            {"name": "input_ids", "dtype": "int64", "dims": [-1, -1]},
            {"name": "attention_mask", "dtype": "int64", "dims": [-1, -1]}
        ],
        "outputs": [{"name": "logits", "dims": [-1, 2]}]
    }"#;

    let metadata: ModelMetadata = serde_json::from_str(json).unwrap();
    assert_eq!(metadata.format, ModelFormat::Onnx);
    assert_eq!(metadata.quantization, Quantization::Fp32);
    assert_eq!(metadata.size_bytes, 0);
    assert_eq!(metadata.input_names(), vec!["input_ids", "attention_mask"]);
    assert_eq!(metadata.outputs[0].dtype, None);
}

#[test]
fn test_metadata_builder() {
    let metadata = ModelMetadata::new("clip", ModelFormat::Onnx, Quantization::Fp16)
        .with_size(1024)
        .with_version("v2")
        .with_outputs(vec![TensorSpec::new("image_embeds").with_dims(vec![1, 512])]);

    assert_eq!(metadata.size_bytes, 1024);
    assert_eq!(metadata.version.as_deref(), Some("v2"));
    assert_eq!(metadata.output_names(), vec!["image_embeds"]);
}
