//! Backend selection.
//!
//! Pure functions over advertised [`BackendCapabilities`]: no I/O, no
//! knowledge of concrete backend implementations. Order of preference:
//!
//! 1. the caller-requested backend, when detected and able to run the model
//! 2. the remaining capable backends, highest device class first; ties go to
//!    the configured preference order, then to `BackendType` order
//! 3. the universal fallback (`Cpu` natively, `Wasm` in the browser)
//!
//! Without `allow_fallback` only the first candidate is ever returned, so a
//! load failure on the selected backend is reported instead of retried
//! elsewhere.

use common::{ModelFormat, Quantization};
use serde::{Deserialize, Serialize};

use crate::{BackendCapabilities, BackendType, ProviderError, Result};

/// Caller and configuration preferences feeding selection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendPreference {
    /// Backend the caller asked for explicitly
    #[serde(default)]
    pub requested: Option<BackendType>,
    /// Configured order used to break ties between equally ranked devices
    #[serde(default)]
    pub order: Vec<BackendType>,
    /// Whether later candidates may be tried after the first one fails
    #[serde(default)]
    pub allow_fallback: bool,
}

impl BackendPreference {
    pub fn requested(backend: BackendType) -> Self {
        Self {
            requested: Some(backend),
            ..Default::default()
        }
    }

    pub fn with_order(mut self, order: Vec<BackendType>) -> Self {
        self.order = order;
        self
    }

    pub fn with_fallback(mut self, allow_fallback: bool) -> Self {
        self.allow_fallback = allow_fallback;
        self
    }
}

/// What a backend must be able to execute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelRequirements {
    pub format: ModelFormat,
    pub quantization: Option<Quantization>,
}

impl ModelRequirements {
    pub fn new(format: ModelFormat, quantization: Quantization) -> Self {
        Self {
            format,
            quantization: Some(quantization),
        }
    }
}

impl From<ModelFormat> for ModelRequirements {
    fn from(format: ModelFormat) -> Self {
        Self {
            format,
            quantization: None,
        }
    }
}

/// The backend assumed to exist everywhere on this target
pub fn universal_fallback() -> BackendType {
    if cfg!(target_arch = "wasm32") {
        BackendType::Wasm
    } else {
        BackendType::Cpu
    }
}

/// Ordered backends to try for a model.
///
/// Never empty on success. Contains a single entry unless
/// `preference.allow_fallback` is set.
pub fn candidate_order(
    preference: &BackendPreference,
    detected: &[BackendCapabilities],
    requirements: impl Into<ModelRequirements>,
) -> Result<Vec<BackendType>> {
    let requirements = requirements.into();
    let capable = |caps: &&BackendCapabilities| {
        caps.can_run(requirements.format, requirements.quantization)
    };
    let no_backend = || ProviderError::NoBackendAvailable {
        format: requirements.format,
        quantization: requirements.quantization,
        requested: preference.requested,
        detected: detected.iter().map(|caps| caps.backend).collect(),
    };

    let mut order = Vec::new();

    if let Some(requested) = preference.requested {
        let usable = detected
            .iter()
            .filter(capable)
            .any(|caps| caps.backend == requested);
        if usable {
            order.push(requested);
        } else if !preference.allow_fallback {
            return Err(no_backend());
        } else {
            log::warn!(
                "Requested backend {} cannot run {} model, falling back",
                requested,
                requirements.format
            );
        }
    }

    let fallback = universal_fallback();
    let rank_in_preference = |backend: BackendType| {
        preference
            .order
            .iter()
            .position(|b| *b == backend)
            .unwrap_or(usize::MAX)
    };

    let mut ranked: Vec<&BackendCapabilities> = detected
        .iter()
        .filter(capable)
        .filter(|caps| caps.backend != fallback && !order.contains(&caps.backend))
        .collect();
    ranked.sort_by(|a, b| {
        b.device
            .cmp(&a.device)
            .then_with(|| rank_in_preference(a.backend).cmp(&rank_in_preference(b.backend)))
            .then_with(|| a.backend.cmp(&b.backend))
    });
    for caps in ranked {
        if !order.contains(&caps.backend) {
            order.push(caps.backend);
        }
    }

    if !order.contains(&fallback) && detected.iter().filter(capable).any(|caps| caps.backend == fallback) {
        order.push(fallback);
    }

    if order.is_empty() {
        return Err(no_backend());
    }
    if !preference.allow_fallback {
        order.truncate(1);
    }
    Ok(order)
}

/// The single backend selection would start with
pub fn select_backend(
    preference: &BackendPreference,
    detected: &[BackendCapabilities],
    requirements: impl Into<ModelRequirements>,
) -> Result<BackendType> {
    let requirements = requirements.into();
    let order = candidate_order(preference, detected, requirements)?;
    order
        .first()
        .copied()
        .ok_or_else(|| ProviderError::NoBackendAvailable {
            format: requirements.format,
            quantization: requirements.quantization,
            requested: preference.requested,
            detected: detected.iter().map(|caps| caps.backend).collect(),
        })
}
