//! Run options.
//!
//! The caller's options object travels through the pipeline untouched. Each
//! task reads the keys it understands through a typed view; unknown keys are
//! ignored and every key has its own default.
//!
//! Views see snake_case keys. The camelCase spellings in [`KEY_ALIASES`] are
//! accepted too; when both spellings are present the snake_case one wins.

use common::InferenceSettings;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

use crate::error::{PipelineError, Result};

/// Alternate spelling and the key it stands for, in precedence order
pub const KEY_ALIASES: &[(&str, &str)] = &[
    ("topK", "top_k"),
    ("topP", "top_p"),
    ("maxNewTokens", "max_new_tokens"),
    ("max_tokens", "max_new_tokens"),
    ("maxTokens", "max_new_tokens"),
    ("doSample", "do_sample"),
    ("repetitionPenalty", "repetition_penalty"),
    ("timeoutMs", "timeout_ms"),
];

fn is_alias(key: &str) -> bool {
    KEY_ALIASES.iter().any(|(alias, _)| *alias == key)
}

/// Rewrite aliased keys to their canonical name. A key already present
/// under its canonical name is never overwritten.
fn canonical_keys(map: &Map<String, Value>) -> Map<String, Value> {
    let mut canonical: Map<String, Value> = map
        .iter()
        .filter(|(key, _)| !is_alias(key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    for (alias, name) in KEY_ALIASES {
        if canonical.contains_key(*name) {
            continue;
        }
        if let Some(value) = map.get(*alias) {
            canonical.insert((*name).to_string(), value.clone());
        }
    }
    canonical
}

/// Caller-supplied options, kept as the raw JSON object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunOptions(Value);

impl RunOptions {
    pub fn new() -> Self {
        Self(Value::Object(Map::new()))
    }

    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    /// Set one key, turning a null options value into an object
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        if !self.0.is_object() {
            self.0 = Value::Object(Map::new());
        }
        if let Value::Object(map) = &mut self.0 {
            map.insert(key.into(), value.into());
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Typed view of the options. A missing (null) object yields the view's
    /// defaults.
    pub fn view<T: DeserializeOwned + Default>(&self) -> Result<T> {
        match &self.0 {
            Value::Null => Ok(T::default()),
            Value::Object(map) => serde_json::from_value(Value::Object(canonical_keys(map)))
                .map_err(|e| PipelineError::InvalidOptions(e.to_string())),
            other => Err(PipelineError::InvalidOptions(format!(
                "expected an options object, got {}",
                other
            ))),
        }
    }

    /// Inference timeout (`timeout_ms`, or `timeoutMs`); none means wait
    pub fn timeout(&self) -> Result<Option<Duration>> {
        let value = match self.get("timeout_ms").or_else(|| self.get("timeoutMs")) {
            None | Some(Value::Null) => return Ok(None),
            Some(value) => value,
        };
        value
            .as_u64()
            .map(|ms| Some(Duration::from_millis(ms)))
            .ok_or_else(|| PipelineError::InvalidOptions(format!("timeout_ms must be a positive integer, got {}", value)))
    }
}

impl From<Value> for RunOptions {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Options read by classification tasks
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClassificationOptions {
    /// Return the `top_k` best classes instead of only the best one
    pub top_k: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pooling {
    #[default]
    Mean,
    Cls,
}

/// Options read by feature extraction
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FeatureExtractionOptions {
    pub pooling: Pooling,
    pub normalize: bool,
}

impl Default for FeatureExtractionOptions {
    fn default() -> Self {
        Self {
            pooling: Pooling::Mean,
            normalize: true,
        }
    }
}

/// Sampling options for generation-style tasks.
///
/// None of the bundled tasks generate text; a task that does reads this view
/// and calls [`GenerationOptions::resolve`] against the model's
/// [`InferenceSettings`], so every unset key keeps the model default.
///
/// ```
/// use common::InferenceSettings;
/// use tabagent_pipeline::{GenerationOptions, RunOptions};
///
/// let options = RunOptions::new().with("maxNewTokens", 32).with("temperature", 0.2);
/// let settings = options
///     .view::<GenerationOptions>()?
///     .resolve(&InferenceSettings::default());
/// assert_eq!(settings.max_new_tokens, 32);
/// # Ok::<(), tabagent_pipeline::PipelineError>(())
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct GenerationOptions {
    pub top_k: Option<u32>,
    pub top_p: Option<f32>,
    pub temperature: Option<f32>,
    pub max_new_tokens: Option<u32>,
    pub do_sample: Option<bool>,
    pub repetition_penalty: Option<f32>,
}

impl GenerationOptions {
    /// Overlay these options on `base`
    pub fn resolve(&self, base: &InferenceSettings) -> InferenceSettings {
        InferenceSettings {
            top_k: self.top_k.unwrap_or(base.top_k),
            top_p: self.top_p.unwrap_or(base.top_p),
            temperature: self.temperature.unwrap_or(base.temperature),
            max_new_tokens: self.max_new_tokens.unwrap_or(base.max_new_tokens),
            do_sample: self.do_sample.unwrap_or(base.do_sample),
            repetition_penalty: self.repetition_penalty.unwrap_or(base.repetition_penalty),
            ..base.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_keys_are_ignored() {
        let options = RunOptions::from_value(json!({"topK": 3, "someFutureKnob": true}));
        let view: ClassificationOptions = options.view().unwrap();
        assert_eq!(view.top_k, Some(3));
        assert_eq!(options.get("someFutureKnob"), Some(&json!(true)));
    }

    #[test]
    fn test_null_options_use_defaults() {
        let options = RunOptions::default();
        let view: FeatureExtractionOptions = options.view().unwrap();
        assert_eq!(view, FeatureExtractionOptions::default());
        assert_eq!(options.timeout().unwrap(), None);
    }

    #[test]
    fn test_invalid_options() {
        assert!(RunOptions::from_value(json!(42)).view::<ClassificationOptions>().is_err());
        assert!(RunOptions::new().with("top_k", "three").view::<ClassificationOptions>().is_err());
        assert!(RunOptions::new().with("timeout_ms", -5).timeout().is_err());
    }

    #[test]
    fn test_timeout() {
        let options = RunOptions::new().with("timeoutMs", 250);
        assert_eq!(options.timeout().unwrap(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_canonical_key_wins() {
        let options = RunOptions::from_value(json!({"top_k": 2, "topK": 5}));
        let view: ClassificationOptions = options.view().unwrap();
        assert_eq!(view.top_k, Some(2));

        let options = RunOptions::from_value(json!({"maxTokens": 8, "maxNewTokens": 64, "max_tokens": 4}));
        let view: GenerationOptions = options.view().unwrap();
        assert_eq!(view.max_new_tokens, Some(64));

        // The caller's object is left as given
        assert_eq!(options.get("maxTokens"), Some(&json!(8)));
    }

    #[test]
    fn test_generation_options_keep_model_defaults() {
        let base = InferenceSettings::default();
        let view: GenerationOptions = RunOptions::default().view().unwrap();
        assert_eq!(view, GenerationOptions::default());
        assert_eq!(view.resolve(&base), base);

        let options = RunOptions::from_value(json!({
            "topK": 1,
            "do_sample": false,
            "repetitionPenalty": 1.3,
            "stream": true,
        }));
        let settings = options.view::<GenerationOptions>().unwrap().resolve(&base);
        assert_eq!(settings.top_k, 1);
        assert!(!settings.do_sample);
        assert_eq!(settings.repetition_penalty, 1.3);
        assert_eq!(settings.top_p, base.top_p);

        let err = RunOptions::new().with("temperature", "hot").view::<GenerationOptions>();
        assert!(matches!(err, Err(PipelineError::InvalidOptions(_))));
    }

    #[test]
    fn test_generation_options_overlay() {
        let options = RunOptions::new().with("maxNewTokens", 16).with("temperature", 0.0);
        let view: GenerationOptions = options.view().unwrap();
        let settings = view.resolve(&InferenceSettings::default());

        assert_eq!(settings.max_new_tokens, 16);
        assert_eq!(settings.temperature, 0.0);
        assert_eq!(settings.top_k, InferenceSettings::default().top_k);
    }
}
