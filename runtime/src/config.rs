//! Runtime configuration.

use common::Quantization;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tabagent_execution_providers::BackendType;

pub const ENV_BACKEND: &str = "TABAGENT_BACKEND";
pub const ENV_ALLOW_FALLBACK: &str = "TABAGENT_ALLOW_FALLBACK";
pub const ENV_QUANTIZATION: &str = "TABAGENT_QUANTIZATION";
pub const ENV_MODEL_ROOT: &str = "TABAGENT_MODEL_ROOT";

/// Configuration for a [`RuntimeManager`](crate::RuntimeManager).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Tie-break order between backends of the same device class
    pub preferred_backends: Vec<BackendType>,

    /// Try the next candidate backend when a load fails. Off unless the
    /// caller opts in, so a failed load is reported instead of retried.
    pub allow_fallback: bool,

    /// Variant loaded when the caller does not ask for one
    pub default_quantization: Quantization,

    /// Upper bound for a single backend's capability detection
    pub detection_timeout_ms: u64,

    /// Upper bound for `load_model`; unbounded when unset
    pub load_timeout_ms: Option<u64>,

    /// How long a disposing pipeline waits for in-flight runs
    pub dispose_grace_ms: u64,

    /// Root directory of the local model store
    pub model_root: PathBuf,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            preferred_backends: vec![BackendType::WebGpu, BackendType::WebNN, BackendType::Cpu],
            allow_fallback: false,
            default_quantization: Quantization::default(),
            detection_timeout_ms: 5_000,
            load_timeout_ms: None,
            dispose_grace_ms: 2_000,
            model_root: default_model_root(),
        }
    }
}

/// `<data_local_dir>/TabAgent/models`, or `./models` when there is no home
pub fn default_model_root() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("TabAgent").join("models"))
        .unwrap_or_else(|| PathBuf::from("models"))
}

fn is_toml(path: &Path) -> bool {
    path.extension().and_then(|s| s.to_str()) == Some("toml")
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl RuntimeConfig {
    /// Load configuration from a file.
    ///
    /// TOML when the extension is `.toml`, JSON otherwise. Missing keys take
    /// their default value.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        let config = if is_toml(path) {
            toml::from_str(&content)?
        } else {
            serde_json::from_str(&content)?
        };

        Ok(config)
    }

    /// Save configuration to a file, in the format implied by its extension.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let path = path.as_ref();

        let content = if is_toml(path) {
            toml::to_string_pretty(self)?
        } else {
            serde_json::to_string_pretty(self)?
        };

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply `TABAGENT_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> anyhow::Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup, keyed like the environment.
    ///
    /// `TABAGENT_BACKEND` moves that backend to the front of
    /// `preferred_backends`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_BACKEND) {
            let backend: BackendType = value
                .parse()
                .map_err(|e| anyhow::anyhow!("{}: {}", ENV_BACKEND, e))?;
            self.preferred_backends.retain(|b| *b != backend);
            self.preferred_backends.insert(0, backend);
        }

        if let Some(value) = lookup(ENV_ALLOW_FALLBACK) {
            self.allow_fallback = parse_bool(&value)
                .ok_or_else(|| anyhow::anyhow!("{}: expected a boolean, got {:?}", ENV_ALLOW_FALLBACK, value))?;
        }

        if let Some(value) = lookup(ENV_QUANTIZATION) {
            self.default_quantization = value
                .parse()
                .map_err(|e| anyhow::anyhow!("{}: {}", ENV_QUANTIZATION, e))?;
        }

        if let Some(value) = lookup(ENV_MODEL_ROOT) {
            self.model_root = PathBuf::from(value);
        }

        Ok(())
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.detection_timeout_ms == 0 {
            return Err(anyhow::anyhow!("detection_timeout_ms must be greater than 0"));
        }

        if self.load_timeout_ms == Some(0) {
            return Err(anyhow::anyhow!("load_timeout_ms must be greater than 0 when set"));
        }

        for (i, backend) in self.preferred_backends.iter().enumerate() {
            if self.preferred_backends[..i].contains(backend) {
                return Err(anyhow::anyhow!(
                    "preferred_backends lists {} more than once",
                    backend
                ));
            }
        }

        if self.model_root.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("model_root must not be empty"));
        }

        Ok(())
    }

    pub fn detection_timeout(&self) -> Duration {
        Duration::from_millis(self.detection_timeout_ms)
    }

    pub fn load_timeout(&self) -> Option<Duration> {
        self.load_timeout_ms.map(Duration::from_millis)
    }

    pub fn dispose_grace(&self) -> Duration {
        Duration::from_millis(self.dispose_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();
        assert!(!config.allow_fallback);
        assert_eq!(config.default_quantization, Quantization::Fp32);
        assert_eq!(config.preferred_backends[0], BackendType::WebGpu);
        assert!(config.load_timeout().is_none());
        assert!(config.model_root.ends_with("models"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = RuntimeConfig::default();

        config.detection_timeout_ms = 0;
        assert!(config.validate().is_err());

        config.detection_timeout_ms = 100;
        config.load_timeout_ms = Some(0);
        assert!(config.validate().is_err());

        config.load_timeout_ms = Some(30_000);
        config.preferred_backends = vec![BackendType::Cpu, BackendType::Cpu];
        assert!(config.validate().is_err());

        config.preferred_backends = vec![BackendType::Cpu];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_file_operations() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let config = RuntimeConfig {
            allow_fallback: true,
            default_quantization: Quantization::Q4f16,
            load_timeout_ms: Some(10_000),
            ..Default::default()
        };

        for name in ["runtime.json", "runtime.toml"] {
            let path = dir.path().join(name);
            config.to_file(&path)?;
            assert_eq!(RuntimeConfig::from_file(&path)?, config);
        }
        Ok(())
    }

    #[test]
    fn test_partial_toml_uses_defaults() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("runtime.toml");
        std::fs::write(
            &path,
            "preferred_backends = [\"cpu\"]\ndefault_quantization = \"q8\"\n",
        )?;

        let config = RuntimeConfig::from_file(&path)?;
        assert_eq!(config.preferred_backends, vec![BackendType::Cpu]);
        assert_eq!(config.default_quantization, Quantization::Q8);
        assert_eq!(config.dispose_grace_ms, RuntimeConfig::default().dispose_grace_ms);
        Ok(())
    }

    #[test]
    fn test_overrides() -> anyhow::Result<()> {
        let vars: HashMap<&str, &str> = [
            (ENV_BACKEND, "cpu"),
            (ENV_ALLOW_FALLBACK, "yes"),
            (ENV_QUANTIZATION, "FP16"),
            (ENV_MODEL_ROOT, "/srv/models"),
        ]
        .into_iter()
        .collect();

        let mut config = RuntimeConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()))?;

        assert_eq!(
            config.preferred_backends,
            vec![BackendType::Cpu, BackendType::WebGpu, BackendType::WebNN]
        );
        assert!(config.allow_fallback);
        assert_eq!(config.default_quantization, Quantization::Fp16);
        assert_eq!(config.model_root, PathBuf::from("/srv/models"));
        Ok(())
    }

    #[test]
    fn test_invalid_override_is_reported() {
        let mut config = RuntimeConfig::default();
        let err = config
            .apply_overrides(|key| (key == ENV_QUANTIZATION).then(|| "q3".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_QUANTIZATION));
    }
}
