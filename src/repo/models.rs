use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use super::{ModelLoadError, ModelStore};
use crate::domain::ModelReference;

/// Grid models stored as JSON files below a root directory.
#[derive(Debug, Clone)]
pub struct FsModelStore {
    root: PathBuf,
}

impl FsModelStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a reference to a path, refusing anything that escapes the root.
    fn resolve(&self, reference: &ModelReference) -> Result<PathBuf, ModelLoadError> {
        let relative = Path::new(reference.as_str());
        if reference.as_str().trim().is_empty() {
            return Err(ModelLoadError::InvalidReference("empty reference".to_string()));
        }
        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => {
                    return Err(ModelLoadError::InvalidReference(format!(
                        "{reference} must be a relative path inside the model store"
                    )))
                }
            }
        }
        Ok(self.root.join(relative))
    }

    /// References of all `*.json` models directly under the root, sorted.
    pub async fn list(&self) -> Result<Vec<ModelReference>, ModelLoadError> {
        let mut dir = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| ModelLoadError::Unavailable(format!("{}: {e}", self.root.display())))?;

        let mut references = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| ModelLoadError::Unavailable(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                references.push(ModelReference::new(name));
            }
        }
        references.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(references)
    }
}

#[async_trait]
impl ModelStore for FsModelStore {
    async fn fetch(&self, reference: &ModelReference) -> Result<Vec<u8>, ModelLoadError> {
        let path = self.resolve(reference)?;
        tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ModelLoadError::NotFound(reference.to_string()),
            std::io::ErrorKind::InvalidInput | std::io::ErrorKind::InvalidData => {
                ModelLoadError::InvalidReference(format!("{reference}: {e}"))
            }
            _ => ModelLoadError::Unavailable(format!("{}: {e}", path.display())),
        })
    }
}

/// Model store backed by a map, for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryModelStore {
    models: RwLock<HashMap<ModelReference, Vec<u8>>>,
}

impl MemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, reference: ModelReference, content: impl Into<Vec<u8>>) {
        self.models.write().insert(reference, content.into());
    }
}

#[async_trait]
impl ModelStore for MemoryModelStore {
    async fn fetch(&self, reference: &ModelReference) -> Result<Vec<u8>, ModelLoadError> {
        self.models
            .read()
            .get(reference)
            .cloned()
            .ok_or_else(|| ModelLoadError::NotFound(reference.to_string()))
    }
}
