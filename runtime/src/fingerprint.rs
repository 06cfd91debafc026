//! Cache identity of a loaded model.

use common::{ModelId, Quantization};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use tabagent_execution_providers::BackendType;

use crate::backend::BackendLoadOptions;
use crate::source::ModelRef;

/// Everything that makes two loads interchangeable.
///
/// Equal fingerprints share one cached handle; a difference in any field
/// means a separate load.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    pub model_id: ModelId,
    pub revision: Option<String>,
    pub backend: BackendType,
    pub quantization: Quantization,
    pub options: BTreeMap<String, String>,
}

impl Fingerprint {
    pub fn new(
        model: &ModelRef,
        backend: BackendType,
        quantization: Quantization,
        options: &BackendLoadOptions,
    ) -> Self {
        Self {
            model_id: model.id.clone(),
            revision: model.revision.clone(),
            backend,
            quantization,
            options: options.to_map(),
        }
    }

    /// Length-prefixed encoding; unambiguous whatever the field contents.
    pub fn canonical(&self) -> String {
        fn field(out: &mut String, value: &str) {
            out.push_str(&value.len().to_string());
            out.push(':');
            out.push_str(value);
        }

        let mut out = String::new();
        field(&mut out, self.model_id.as_str());
        field(&mut out, self.revision.as_deref().unwrap_or(""));
        out.push(if self.revision.is_some() { '+' } else { '-' });
        field(&mut out, self.backend.as_str());
        field(&mut out, self.quantization.as_str());
        for (key, value) in &self.options {
            field(&mut out, key);
            field(&mut out, value);
        }
        out
    }

    /// SHA-256 of the canonical encoding, hex
    pub fn digest(&self) -> String {
        format!("{:x}", Sha256::digest(self.canonical().as_bytes()))
    }

    /// First 12 hex chars of the digest, for logs and error messages
    pub fn short(&self) -> String {
        let mut digest = self.digest();
        digest.truncate(12);
        digest
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.model_id)?;
        if let Some(revision) = &self.revision {
            write!(f, "@{}", revision)?;
        }
        write!(f, " [{}/{}]", self.backend, self.quantization)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(quantization: Quantization) -> Fingerprint {
        Fingerprint::new(
            &ModelRef::new("Xenova/bert"),
            BackendType::Cpu,
            quantization,
            &BackendLoadOptions::default(),
        )
    }

    #[test]
    fn test_digest_is_stable() {
        assert_eq!(fp(Quantization::Q8).digest(), fp(Quantization::Q8).digest());
        assert_eq!(fp(Quantization::Q8).digest().len(), 64);
        assert_ne!(fp(Quantization::Q8).digest(), fp(Quantization::Fp16).digest());
    }

    #[test]
    fn test_option_order_is_canonical() {
        let model = ModelRef::new("m");
        let mut a = BackendLoadOptions::default();
        a.set("threads", 4);
        a.set("arena", false);
        let mut b = BackendLoadOptions::default();
        b.set("arena", false);
        b.set("threads", 4);

        let fa = Fingerprint::new(&model, BackendType::Cpu, Quantization::Fp32, &a);
        let fb = Fingerprint::new(&model, BackendType::Cpu, Quantization::Fp32, &b);
        assert_eq!(fa, fb);
        assert_eq!(fa.digest(), fb.digest());
    }

    #[test]
    fn test_revision_none_differs_from_empty() {
        let none = Fingerprint::new(
            &ModelRef::new("m"),
            BackendType::Cpu,
            Quantization::Fp32,
            &BackendLoadOptions::default(),
        );
        let empty = Fingerprint::new(
            &ModelRef::new("m").with_revision(""),
            BackendType::Cpu,
            Quantization::Fp32,
            &BackendLoadOptions::default(),
        );
        assert_ne!(none.canonical(), empty.canonical());
    }
}
