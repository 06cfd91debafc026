//! Generation defaults shared by text-generation tasks.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InferenceSettings {
    pub temperature: f32,
    pub max_new_tokens: u32,
    pub top_k: u32,
    pub top_p: f32,
    pub repetition_penalty: f32,
    pub do_sample: bool,
    pub num_beams: u32,
    pub num_return_sequences: u32,
    pub use_cache: bool,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_new_tokens: 1024,
            top_k: 50,
            top_p: 0.9,
            repetition_penalty: 1.2,
            do_sample: true,
            num_beams: 1,
            num_return_sequences: 1,
            use_cache: true,
        }
    }
}

impl InferenceSettings {
    /// Tuned defaults for well-known model families, matched on the model id
    pub fn for_model(model_id: &str) -> Self {
        let lower = model_id.to_lowercase();

        // (family, temperature, top_k, top_p, repetition_penalty, max_new_tokens)
        const FAMILIES: [(&str, f32, u32, f32, f32, u32); 4] = [
            ("smollm", 0.7, 40, 0.95, 1.1, 512),
            ("phi", 0.6, 50, 0.9, 1.15, 1024),
            ("qwen", 0.7, 50, 0.8, 1.1, 2048),
            ("llama", 0.6, 40, 0.9, 1.15, 2048),
        ];

        FAMILIES
            .iter()
            .find(|(family, ..)| lower.contains(family))
            .map(|&(_, temperature, top_k, top_p, repetition_penalty, max_new_tokens)| Self {
                temperature,
                top_k,
                top_p,
                repetition_penalty,
                max_new_tokens,
                ..Default::default()
            })
            .unwrap_or_default()
    }

    /// Greedy decoding: sampling off, single beam
    pub fn is_greedy(&self) -> bool {
        !self.do_sample && self.num_beams == 1
    }
}
