//! Content store implementations.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use cascade_core::{FlowError, Result};
use tokio::sync::RwLock;

/// Reads and writes document text by workspace-relative path.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Read a file, `None` if it does not exist.
    async fn read(&self, path: &str) -> Result<Option<String>>;

    /// Write a file, creating parent directories as needed.
    async fn write(&self, path: &str, content: &str) -> Result<()>;

    /// Check whether a file exists.
    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.read(path).await?.is_some())
    }
}

/// Reject absolute paths and parent traversal.
fn validate(path: &str) -> Result<&Path> {
    let candidate = Path::new(path);
    let escapes = candidate
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if path.is_empty() || escapes {
        return Err(FlowError::storage(format!(
            "path '{}' is not relative to the workspace",
            path
        )));
    }
    Ok(candidate)
}

/// Filesystem store rooted at a workspace directory.
#[derive(Debug, Clone)]
pub struct FsContentStore {
    root: PathBuf,
}

impl FsContentStore {
    /// Create a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Workspace root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        Ok(self.root.join(validate(path)?))
    }
}

#[async_trait]
impl ContentStore for FsContentStore {
    async fn read(&self, path: &str) -> Result<Option<String>> {
        let full = self.resolve(path)?;
        match tokio::fs::read_to_string(&full).await {
            Ok(text) => {
                tracing::debug!("Read {} ({} bytes)", path, text.len());
                Ok(Some(text))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(FlowError::storage(format!("read {}: {}", full.display(), err))),
        }
    }

    async fn write(&self, path: &str, content: &str) -> Result<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, content)
            .await
            .map_err(|err| FlowError::storage(format!("write {}: {}", full.display(), err)))?;
        tracing::debug!("Wrote {} ({} bytes)", path, content.len());
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let full = self.resolve(path)?;
        Ok(tokio::fs::try_exists(&full).await?)
    }
}

/// In-memory store, used by tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryContentStore {
    files: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryContentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Paths currently stored, sorted.
    pub async fn paths(&self) -> Vec<String> {
        let files = self.files.read().await;
        let mut paths: Vec<String> = files.keys().cloned().collect();
        paths.sort();
        paths
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn read(&self, path: &str) -> Result<Option<String>> {
        validate(path)?;
        let files = self.files.read().await;
        Ok(files.get(path).cloned())
    }

    async fn write(&self, path: &str, content: &str) -> Result<()> {
        validate(path)?;
        let mut files = self.files.write().await;
        files.insert(path.to_string(), content.to_string());
        Ok(())
    }
}
