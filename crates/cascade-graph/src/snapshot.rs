//! Persisted graph document.
//!
//! ```json
//! { "artifacts": { "PRD": { "docs/X.md": {
//!     "name": "X.md", "path": "docs/PRD_X.md", "dir": "docs",
//!     "dependsOn": ["docs/RAW_X.md"], "watchedBy": {"WRITE_DESIGN": ["docs/DESIGN_X.md"]}
//! } } } }
//! ```
//!
//! Loading is two-pass: every artifact is created first, then edges are
//! re-linked through the complete file-path index.

use std::collections::BTreeMap;
use std::sync::Arc;

use cascade_core::{ActionKind, ArtifactType, FlowError, Result, SectionParser, SectionSchema};
use serde::{Deserialize, Serialize};

use crate::registry::{ArtifactSpec, Registry};

/// One persisted artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRecord {
    pub name: String,
    /// Storage path of the content file.
    pub path: String,
    /// Informational; identity is the map key.
    #[serde(default)]
    pub dir: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<String>,
    /// Storage paths of upstream artifacts.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Storage paths of downstream artifacts, per action.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub watched_by: BTreeMap<ActionKind, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_schema: Option<SectionSchema>,
    #[serde(default)]
    pub version: u64,
}

/// The whole persisted graph: type, then identity path, then record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDocument {
    #[serde(default)]
    pub artifacts: BTreeMap<ArtifactType, BTreeMap<String, ArtifactRecord>>,
}

impl GraphDocument {
    /// Capture the committed state of a registry.
    pub fn capture(registry: &Registry) -> Result<Self> {
        let mut doc = GraphDocument::default();

        for artifact in registry.iter() {
            let depends_on = artifact
                .dependencies()
                .map(|(_, id)| registry.get(id).map(|a| a.file_path()))
                .collect::<Result<Vec<_>>>()?;

            let mut watched_by = BTreeMap::new();
            for (kind, ids) in artifact.watched_by() {
                let paths = ids
                    .iter()
                    .map(|id| registry.get(*id).map(|a| a.file_path()))
                    .collect::<Result<Vec<_>>>()?;
                watched_by.insert(kind, paths);
            }

            let record = ArtifactRecord {
                name: artifact.name().to_string(),
                path: artifact.file_path(),
                dir: artifact.dir().to_string(),
                sub_type: artifact.sub_type().map(str::to_string),
                depends_on,
                watched_by,
                section_schema: artifact.schema().cloned(),
                version: artifact.version(),
            };
            doc.artifacts
                .entry(artifact.artifact_type())
                .or_default()
                .insert(artifact.path(), record);
        }

        Ok(doc)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.artifacts.values().map(BTreeMap::len).sum()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rebuild a registry with every artifact and edge, without content.
    pub fn restore(&self, parser: Arc<dyn SectionParser>) -> Result<Registry> {
        let mut registry = Registry::new(parser);

        // Pass 1: stubs, so every path resolves. Identity comes from the map key.
        for (artifact_type, records) in &self.artifacts {
            for (path, record) in records {
                let spec = ArtifactSpec::from_path(*artifact_type, path)
                    .with_schema(record.section_schema.clone())
                    .with_sub_type(record.sub_type.clone());
                if spec.name != record.name {
                    tracing::warn!("Record {} is named {}, using the key", path, record.name);
                }
                let id = registry.create(spec)?;

                let stored_as = registry.get(id)?.file_path();
                if stored_as != record.path.trim_matches('/') {
                    tracing::warn!(
                        "Record path {} does not match storage convention {}",
                        record.path,
                        stored_as
                    );
                }
            }
        }

        // Pass 2: edges.
        for (artifact_type, records) in &self.artifacts {
            for (path, record) in records {
                let id = registry
                    .find(*artifact_type, path.trim_matches('/'))
                    .or_else(|| registry.find_by_file(&record.path))
                    .ok_or_else(|| FlowError::ArtifactNotFound(record.path.clone()))?;

                for upstream_path in &record.depends_on {
                    let upstream = registry
                        .find_by_file(upstream_path)
                        .ok_or_else(|| FlowError::ArtifactNotFound(upstream_path.clone()))?;
                    registry.link_dependency(id, upstream)?;
                }
                for (kind, downstream_paths) in &record.watched_by {
                    for downstream_path in downstream_paths {
                        let downstream = registry
                            .find_by_file(downstream_path)
                            .ok_or_else(|| FlowError::ArtifactNotFound(downstream_path.clone()))?;
                        registry.get_mut(id)?.record_watcher(*kind, downstream);
                    }
                }
            }
        }

        tracing::info!("Restored {} artifact(s) from graph document", registry.len());
        Ok(registry)
    }
}
