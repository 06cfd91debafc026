//! Input encoders: text to token ids, decoded images.

use tabagent_tensor::Tensor;

use crate::error::{PipelineError, Result};

/// Token ids for one text, unpadded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoding {
    pub input_ids: Vec<i64>,
    pub attention_mask: Vec<i64>,
    pub token_type_ids: Option<Vec<i64>>,
}

impl Encoding {
    /// Encoding with a full attention mask and no token types
    pub fn new(input_ids: Vec<i64>) -> Self {
        let attention_mask = vec![1; input_ids.len()];
        Self {
            input_ids,
            attention_mask,
            token_type_ids: None,
        }
    }

    pub fn with_token_type_ids(mut self, token_type_ids: Vec<i64>) -> Self {
        self.token_type_ids = Some(token_type_ids);
        self
    }

    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }

    /// `input_ids`, `attention_mask` and, when present, `token_type_ids`,
    /// each int64 `[1, seq]`
    pub fn to_tensors(&self) -> Result<Vec<Tensor>> {
        if self.is_empty() {
            return Err(PipelineError::InvalidInput("encoder produced no tokens".to_string()));
        }
        if self.attention_mask.len() != self.len() {
            return Err(PipelineError::InvalidInput(format!(
                "attention mask has {} entries for {} tokens",
                self.attention_mask.len(),
                self.len()
            )));
        }

        let shape = [1, self.len()];
        let mut tensors = vec![
            Tensor::from_vec(self.input_ids.clone(), shape)?,
            Tensor::from_vec(self.attention_mask.clone(), shape)?,
        ];
        if let Some(token_type_ids) = &self.token_type_ids {
            tensors.push(Tensor::from_vec(token_type_ids.clone(), shape)?);
        }
        Ok(tensors)
    }
}

/// Turns text into token ids. Tokenizers live outside this crate; any
/// `Fn(&str) -> Result<Encoding>` works.
pub trait TextEncoder: Send + Sync + 'static {
    fn encode(&self, text: &str) -> Result<Encoding>;
}

impl<F> TextEncoder for F
where
    F: Fn(&str) -> Result<Encoding> + Send + Sync + 'static,
{
    fn encode(&self, text: &str) -> Result<Encoding> {
        self(text)
    }
}

/// A decoded RGB8 image, row-major HWC
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInput {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
}

impl ImageInput {
    pub fn new(width: usize, height: usize, pixels: Vec<u8>) -> Result<Self> {
        let expected = width
            .checked_mul(height)
            .and_then(|n| n.checked_mul(3))
            .ok_or_else(|| PipelineError::InvalidInput(format!("image {}x{} is too large", width, height)))?;
        if width == 0 || height == 0 || pixels.len() != expected {
            return Err(PipelineError::InvalidInput(format!(
                "{}x{} RGB image needs {} bytes, got {}",
                width,
                height,
                expected,
                pixels.len()
            )));
        }
        Ok(Self { width, height, pixels })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Channel-first float32 `[1, 3, H, W]`, each channel as
    /// `(value / 255 - mean) / std`
    pub fn to_normalized_chw(&self, mean: [f32; 3], std: [f32; 3]) -> Result<Tensor> {
        let plane = self.width * self.height;
        let mut values = vec![0.0f32; 3 * plane];
        for (pixel, rgb) in self.pixels.chunks_exact(3).enumerate() {
            for channel in 0..3 {
                let scaled = f32::from(rgb[channel]) / 255.0;
                values[channel * plane + pixel] = (scaled - mean[channel]) / std[channel];
            }
        }
        Ok(Tensor::from_vec(values, [1, 3, self.height, self.width])?)
    }
}
