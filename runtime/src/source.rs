//! Model sources: where artifacts come from.
//!
//! The runtime never fetches anything itself. It asks a [`ModelSource`] to
//! resolve a model reference and variant into an artifact the backend can load.

use async_trait::async_trait;
use common::{detect_from_file_path, ModelFormat, ModelId, ModelMetadata, Quantization};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Result, RuntimeError};

/// Model identifier plus optional pinned revision
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelRef {
    pub id: ModelId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
}

impl ModelRef {
    pub fn new(id: impl Into<ModelId>) -> Self {
        Self {
            id: id.into(),
            revision: None,
        }
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.revision {
            Some(revision) => write!(f, "{}@{}", self.id, revision),
            None => write!(f, "{}", self.id),
        }
    }
}

impl From<&str> for ModelRef {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

#[derive(Clone)]
pub enum ArtifactLocation {
    File(PathBuf),
    Bytes(Arc<[u8]>),
}

impl fmt::Debug for ArtifactLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
        }
    }
}

/// A resolved, loadable model variant
#[derive(Debug, Clone)]
pub struct ModelArtifact {
    pub reference: ModelRef,
    pub metadata: ModelMetadata,
    pub location: ArtifactLocation,
}

#[async_trait]
pub trait ModelSource: Send + Sync {
    async fn resolve(&self, model: &ModelRef, quantization: Quantization) -> Result<ModelArtifact>;
}

/// In-memory registry of artifacts keyed by reference and variant.
#[derive(Default)]
pub struct StaticModelSource {
    artifacts: RwLock<HashMap<(ModelRef, Quantization), ModelArtifact>>,
}

impl StaticModelSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, artifact: ModelArtifact) {
        let key = (artifact.reference.clone(), artifact.metadata.quantization);
        self.artifacts.write().insert(key, artifact);
    }

    /// Register an in-memory model under every variant in `quantizations`
    pub fn with_model(
        self,
        model: impl Into<ModelRef>,
        format: ModelFormat,
        quantizations: &[Quantization],
    ) -> Self {
        let reference = model.into();
        for &quantization in quantizations {
            let name = format!("{}{}", reference.id, quantization.file_suffix());
            self.register(ModelArtifact {
                reference: reference.clone(),
                metadata: ModelMetadata::new(name, format, quantization),
                location: ArtifactLocation::Bytes(Arc::from(Vec::new())),
            });
        }
        self
    }

    pub fn len(&self) -> usize {
        self.artifacts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.read().is_empty()
    }
}

#[async_trait]
impl ModelSource for StaticModelSource {
    async fn resolve(&self, model: &ModelRef, quantization: Quantization) -> Result<ModelArtifact> {
        self.artifacts
            .read()
            .get(&(model.clone(), quantization))
            .cloned()
            .ok_or_else(|| RuntimeError::Source {
                model: model.to_string(),
                reason: format!("no {} variant registered", quantization),
            })
    }
}

const METADATA_FILE: &str = "metadata.json";
const ARTIFACT_STEM: &str = "model";
const SEARCHED_FORMATS: [ModelFormat; 4] = [
    ModelFormat::Onnx,
    ModelFormat::Gguf,
    ModelFormat::SafeTensors,
    ModelFormat::LiteRt,
];

/// Artifacts laid out on disk:
///
/// ```text
/// <root>/<model-id>/[<revision>/]
///     metadata.json            (optional)
///     onnx/model_q4f16.onnx    (or model_q4f16.onnx at the top level)
/// ```
#[derive(Debug, Clone)]
pub struct LocalModelSource {
    root: PathBuf,
}

impl LocalModelSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn model_dir(&self, model: &ModelRef) -> PathBuf {
        let dir = self.root.join(model.id.as_str());
        match &model.revision {
            Some(revision) => dir.join(revision),
            None => dir,
        }
    }

    /// Paths tried for a variant, in order
    pub fn candidate_paths(&self, model: &ModelRef, quantization: Quantization) -> Vec<PathBuf> {
        let dir = self.model_dir(model);
        let mut paths = Vec::new();
        for format in SEARCHED_FORMATS {
            let file = format!("{}{}.{}", ARTIFACT_STEM, quantization.file_suffix(), format.extension());
            paths.push(dir.join("onnx").join(&file));
            paths.push(dir.join(&file));
        }
        paths
    }

    async fn read_metadata(dir: &Path) -> Result<Option<ModelMetadata>> {
        let path = dir.join(METADATA_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content)
                .map(Some)
                .map_err(|e| RuntimeError::Source {
                    model: dir.display().to_string(),
                    reason: format!("invalid {}: {}", METADATA_FILE, e),
                }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RuntimeError::Source {
                model: dir.display().to_string(),
                reason: format!("failed to read {}: {}", METADATA_FILE, e),
            }),
        }
    }
}

#[async_trait]
impl ModelSource for LocalModelSource {
    async fn resolve(&self, model: &ModelRef, quantization: Quantization) -> Result<ModelArtifact> {
        let candidates = self.candidate_paths(model, quantization);

        for path in &candidates {
            let Ok(file) = tokio::fs::metadata(path).await else {
                continue;
            };
            if !file.is_file() {
                continue;
            }

            let path_str = path.to_string_lossy();
            let format = detect_from_file_path(&path_str);
            let mut metadata = Self::read_metadata(&self.model_dir(model))
                .await?
                .unwrap_or_else(|| ModelMetadata::new(model.id.as_str(), format, quantization));
            // File facts win over the sidecar
            metadata.format = format;
            metadata.quantization = Quantization::from_file_name(&path_str);
            metadata.size_bytes = file.len();

            log::debug!("Resolved {} ({}) to {:?}", model, quantization, path);
            return Ok(ModelArtifact {
                reference: model.clone(),
                metadata,
                location: ArtifactLocation::File(path.clone()),
            });
        }

        Err(RuntimeError::Source {
            model: model.to_string(),
            reason: format!(
                "no {} artifact under {:?}",
                quantization,
                self.model_dir(model)
            ),
        })
    }
}
