//! Registry plus persistence.

use std::sync::Arc;

use cascade_core::{ArtifactId, Event, FlowConfig, Result, SectionParser};

use crate::expansion::{Expansion, Reaction};
use crate::registry::{ArtifactSpec, Registry};
use crate::snapshot::GraphDocument;
use crate::store::ContentStore;

/// An artifact registry backed by a content store.
///
/// Content is written before the in-memory commit, so a failed write leaves
/// the artifact's staged revisions in place.
pub struct Workspace {
    registry: Registry,
    store: Arc<dyn ContentStore>,
    config: FlowConfig,
}

impl Workspace {
    /// Create an empty workspace.
    pub fn new(config: FlowConfig, store: Arc<dyn ContentStore>, parser: Arc<dyn SectionParser>) -> Self {
        Self {
            registry: Registry::new(parser),
            store,
            config,
        }
    }

    /// Open a workspace, restoring the graph document if one exists.
    pub async fn open(
        config: FlowConfig,
        store: Arc<dyn ContentStore>,
        parser: Arc<dyn SectionParser>,
    ) -> Result<Self> {
        let Some(text) = store.read(&config.graph_file).await? else {
            tracing::info!("No graph document at {}, starting empty", config.graph_file);
            return Ok(Self::new(config, store, parser));
        };

        let doc: GraphDocument = serde_json::from_str(&text)?;
        let registry = doc.restore(parser)?;
        let mut workspace = Self {
            registry,
            store,
            config,
        };

        for records in doc.artifacts.values() {
            for record in records.values() {
                let Some(id) = workspace.registry.find_by_file(&record.path) else {
                    continue;
                };
                let content = workspace.store.read(&record.path).await?.unwrap_or_default();
                workspace.registry.restore(id, content, record.version)?;
            }
        }

        Ok(workspace)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ContentStore> {
        &self.store
    }

    /// Load stored content into a fresh artifact. Returns true if anything was loaded.
    pub async fn hydrate(&mut self, id: ArtifactId) -> Result<bool> {
        let artifact = self.registry.get(id)?;
        if artifact.has_content() || artifact.version() > 0 {
            return Ok(false);
        }
        let file_path = artifact.file_path();
        match self.store.read(&file_path).await? {
            Some(content) => {
                tracing::info!("Loaded existing {} from storage", file_path);
                self.registry.restore(id, content, 0)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Look up or create an artifact, loading stored content for new ones.
    pub async fn get_or_create(&mut self, spec: ArtifactSpec) -> Result<ArtifactId> {
        let (id, created) = self.registry.get_or_create(spec)?;
        if created {
            self.hydrate(id).await?;
        }
        Ok(id)
    }

    /// Expand watchers of a committed artifact, loading stored content for new downstreams.
    pub async fn expand(&mut self, source: ArtifactId, reactions: &[Reaction]) -> Result<Expansion> {
        let expansion = self.registry.expand_watchers(source, reactions)?;
        for id in &expansion.created {
            self.hydrate(*id).await?;
        }
        Ok(expansion)
    }

    /// Persist and commit an artifact's staged revisions.
    ///
    /// A failed autosave of the graph document is logged and does not undo
    /// the commit, so the returned event is never lost.
    pub async fn commit(&mut self, id: ArtifactId) -> Result<Option<Event>> {
        let artifact = self.registry.get(id)?;
        if !artifact.has_pending() {
            return Ok(None);
        }

        let file_path = artifact.file_path();
        self.store.write(&file_path, artifact.working_content()).await?;

        let event = self.registry.commit(id)?;
        if let Some(event) = &event {
            tracing::info!("Committed {} (version {})", file_path, event.version);
        }
        // The content and the in-memory commit already happened; the graph
        // document is rewritten on the next successful save.
        if self.config.autosave_graph {
            if let Err(err) = self.save().await {
                tracing::warn!("Graph document not saved after committing {}: {}", file_path, err);
            }
        }
        Ok(event)
    }

    /// Write the graph document.
    pub async fn save(&self) -> Result<()> {
        let doc = GraphDocument::capture(&self.registry)?;
        let text = serde_json::to_string_pretty(&doc)?;
        self.store.write(&self.config.graph_file, &text).await?;
        tracing::debug!("Saved graph document ({} artifacts)", doc.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_core::{ActionKind, ArtifactType, Cardinality, MarkdownSections, SectionSchema};
    use serde_json::json;

    use crate::store::{FsContentStore, InMemoryContentStore};

    fn parser() -> Arc<dyn SectionParser> {
        Arc::new(MarkdownSections)
    }

    #[tokio::test]
    async fn test_commit_persists_content_and_graph() {
        let store = Arc::new(InMemoryContentStore::new());
        let mut workspace = Workspace::new(FlowConfig::default(), store.clone(), parser());

        let raw = workspace
            .get_or_create(ArtifactSpec::from_path(ArtifactType::RawRequirement, "docs/X.md"))
            .await
            .unwrap();
        workspace.registry_mut().stage(raw, "build a todo app").unwrap();
        let event = workspace.commit(raw).await.unwrap().unwrap();

        assert_eq!(event.version, 1);
        assert_eq!(
            store.read("docs/RAW_X.md").await.unwrap().as_deref(),
            Some("build a todo app")
        );
        assert!(store.exists("artifacts.json").await.unwrap());
        assert!(workspace.commit(raw).await.unwrap().is_none());
    }

    /// Rejects writes to one path.
    struct FullDisk {
        inner: InMemoryContentStore,
        rejected: &'static str,
    }

    #[async_trait::async_trait]
    impl ContentStore for FullDisk {
        async fn read(&self, path: &str) -> Result<Option<String>> {
            self.inner.read(path).await
        }

        async fn write(&self, path: &str, content: &str) -> Result<()> {
            if path == self.rejected {
                return Err(cascade_core::FlowError::storage("disk full"));
            }
            self.inner.write(path, content).await
        }
    }

    #[tokio::test]
    async fn test_failed_autosave_keeps_event() {
        let store = Arc::new(FullDisk {
            inner: InMemoryContentStore::new(),
            rejected: "artifacts.json",
        });
        let mut workspace = Workspace::new(FlowConfig::default(), store.clone(), parser());

        let raw = workspace
            .get_or_create(ArtifactSpec::from_path(ArtifactType::RawRequirement, "docs/X.md"))
            .await
            .unwrap();
        workspace.registry_mut().stage(raw, "build a todo app").unwrap();
        let event = workspace.commit(raw).await.unwrap().unwrap();

        assert_eq!(event.version, 1);
        assert_eq!(workspace.registry().get(raw).unwrap().version(), 1);
        assert!(store.exists("docs/RAW_X.md").await.unwrap());
        assert!(!store.exists("artifacts.json").await.unwrap());
        assert!(workspace.save().await.is_err());
    }

    #[tokio::test]
    async fn test_failed_content_write_keeps_revision_staged() {
        let store = Arc::new(FullDisk {
            inner: InMemoryContentStore::new(),
            rejected: "docs/RAW_X.md",
        });
        let mut workspace = Workspace::new(FlowConfig::default(), store, parser());

        let raw = workspace
            .get_or_create(ArtifactSpec::from_path(ArtifactType::RawRequirement, "docs/X.md"))
            .await
            .unwrap();
        workspace.registry_mut().stage(raw, "build a todo app").unwrap();

        assert!(workspace.commit(raw).await.is_err());
        let artifact = workspace.registry().get(raw).unwrap();
        assert_eq!(artifact.version(), 0);
        assert!(artifact.has_pending());
    }

    #[tokio::test]
    async fn test_new_artifact_loads_existing_file() {
        let store = Arc::new(InMemoryContentStore::new());
        store.write("docs/PRD_X.md", "## Summary\nstored\n").await.unwrap();
        let mut workspace = Workspace::new(FlowConfig::default(), store, parser());

        let prd = workspace
            .get_or_create(
                ArtifactSpec::from_path(ArtifactType::Prd, "docs/X.md")
                    .with_schema(Some(SectionSchema::new().text("Summary"))),
            )
            .await
            .unwrap();

        let artifact = workspace.registry().get(prd).unwrap();
        assert_eq!(artifact.content(), "## Summary\nstored\n");
        assert_eq!(artifact.sections()["Summary"], json!("stored"));
        assert!(!artifact.has_pending());
    }

    #[tokio::test]
    async fn test_reopen_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let config = FlowConfig::with_root(dir.path());
        let store: Arc<dyn ContentStore> = Arc::new(FsContentStore::new(dir.path()));

        {
            let mut workspace = Workspace::new(config.clone(), store.clone(), parser());
            let raw = workspace
                .get_or_create(ArtifactSpec::from_path(ArtifactType::RawRequirement, "docs/X.md"))
                .await
                .unwrap();
            let prd = workspace
                .get_or_create(ArtifactSpec::from_path(ArtifactType::Prd, "docs/X.md"))
                .await
                .unwrap();
            workspace
                .registry_mut()
                .add_watch(raw, prd, ActionKind::WritePrd, Cardinality::OneToOne)
                .unwrap();
            workspace.registry_mut().stage(raw, "build a todo app").unwrap();
            workspace.commit(raw).await.unwrap();
        }

        let workspace = Workspace::open(config, store, parser()).await.unwrap();
        let registry = workspace.registry();
        let raw = registry.find(ArtifactType::RawRequirement, "docs/X.md").unwrap();
        let prd = registry.find(ArtifactType::Prd, "docs/X.md").unwrap();

        assert_eq!(registry.get(raw).unwrap().content(), "build a todo app");
        assert_eq!(registry.get(raw).unwrap().version(), 1);
        assert_eq!(registry.get(raw).unwrap().watchers(ActionKind::WritePrd), &[prd]);
        assert_eq!(registry.get(prd).unwrap().content(), "");
    }

    #[tokio::test]
    async fn test_open_without_graph_is_empty() {
        let store = Arc::new(InMemoryContentStore::new());
        let workspace = Workspace::open(FlowConfig::default(), store, parser())
            .await
            .unwrap();
        assert!(workspace.registry().is_empty());
    }
}
