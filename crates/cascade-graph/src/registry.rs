//! Artifact arena and its indices.
//!
//! The [`Registry`] is the single owner of every [`Artifact`]. Edges between
//! artifacts are [`ArtifactId`]s into the arena, so watch/dependency cycles
//! never turn into ownership cycles.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use cascade_core::{
    ActionKind, Artifact, ArtifactId, ArtifactKey, ArtifactType, Cardinality, Event, FlowError,
    MarkdownSections, Result, SectionParser, SectionSchema, Sections, StageMark,
};
use serde::{Deserialize, Serialize};

/// Everything needed to create an artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactSpec {
    /// Document type.
    pub artifact_type: ArtifactType,
    /// Directory, relative to the workspace root.
    pub dir: String,
    /// File name without the type prefix.
    pub name: String,
    /// Optional sub-type.
    #[serde(default)]
    pub sub_type: Option<String>,
    /// Section schema for parsed documents.
    #[serde(default)]
    pub schema: Option<SectionSchema>,
}

impl ArtifactSpec {
    /// Spec for a document of `artifact_type` at `dir/name`.
    pub fn new(artifact_type: ArtifactType, dir: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            artifact_type,
            dir: dir.into(),
            name: name.into(),
            sub_type: None,
            schema: None,
        }
    }

    /// Spec from an identity path (`dir/name`).
    pub fn from_path(artifact_type: ArtifactType, path: &str) -> Self {
        let path = path.trim_matches('/');
        match path.rsplit_once('/') {
            Some((dir, name)) => Self::new(artifact_type, dir, name),
            None => Self::new(artifact_type, "", path),
        }
    }

    /// Attach a section schema.
    pub fn with_schema(mut self, schema: Option<SectionSchema>) -> Self {
        self.schema = schema;
        self
    }

    /// Attach a sub-type.
    pub fn with_sub_type(mut self, sub_type: Option<String>) -> Self {
        self.sub_type = sub_type;
        self
    }

    /// Identity this spec would create.
    pub fn key(&self) -> ArtifactKey {
        let dir = self.dir.trim_matches('/');
        let path = if dir.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", dir, self.name)
        };
        ArtifactKey::new(self.artifact_type, path)
    }

    /// Relative file path this spec would be stored under.
    pub fn file_path(&self) -> String {
        let dir = self.dir.trim_matches('/');
        let name = match self.artifact_type.file_prefix() {
            Some(prefix) => format!("{}_{}", prefix, self.name),
            None => self.name.clone(),
        };
        if dir.is_empty() {
            name
        } else {
            format!("{}/{}", dir, name)
        }
    }
}

/// Owns all artifacts; indexes them by identity, file path and type.
pub struct Registry {
    artifacts: Vec<Artifact>,
    by_key: HashMap<ArtifactKey, ArtifactId>,
    by_file: HashMap<String, ArtifactId>,
    by_type: BTreeMap<ArtifactType, Vec<ArtifactId>>,
    parser: Arc<dyn SectionParser>,
}

impl Registry {
    /// Create an empty registry using `parser` for section-structured artifacts.
    pub fn new(parser: Arc<dyn SectionParser>) -> Self {
        Self {
            artifacts: Vec::new(),
            by_key: HashMap::new(),
            by_file: HashMap::new(),
            by_type: BTreeMap::new(),
            parser,
        }
    }

    /// Section parser shared by all artifacts.
    pub fn parser(&self) -> &dyn SectionParser {
        self.parser.as_ref()
    }

    /// Number of artifacts.
    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// Iterate over all artifacts in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Artifact> {
        self.artifacts.iter()
    }

    /// Look up an artifact by id.
    pub fn get(&self, id: ArtifactId) -> Result<&Artifact> {
        self.artifacts
            .get(id.0)
            .ok_or_else(|| FlowError::ArtifactNotFound(id.to_string()))
    }

    pub(crate) fn get_mut(&mut self, id: ArtifactId) -> Result<&mut Artifact> {
        self.artifacts
            .get_mut(id.0)
            .ok_or_else(|| FlowError::ArtifactNotFound(id.to_string()))
    }

    /// Find an artifact by identity.
    pub fn find(&self, artifact_type: ArtifactType, path: &str) -> Option<ArtifactId> {
        self.by_key
            .get(&ArtifactKey::new(artifact_type, path))
            .copied()
    }

    /// Find an artifact by its storage path.
    pub fn find_by_file(&self, file_path: &str) -> Option<ArtifactId> {
        self.by_file.get(file_path.trim_matches('/')).copied()
    }

    /// All artifacts of a type, in creation order.
    pub fn of_type(&self, artifact_type: ArtifactType) -> &[ArtifactId] {
        self.by_type
            .get(&artifact_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The only artifact of a type, if any. More than one is ambiguous.
    pub fn single_of_type(&self, artifact_type: ArtifactType) -> Result<Option<ArtifactId>> {
        match self.of_type(artifact_type) {
            [] => Ok(None),
            [id] => Ok(Some(*id)),
            many => Err(FlowError::AmbiguousDependency {
                dependency_type: artifact_type,
                count: many.len(),
            }),
        }
    }

    /// Create a new artifact. Fails if the identity is taken.
    pub fn create(&mut self, spec: ArtifactSpec) -> Result<ArtifactId> {
        let key = spec.key();
        if self.by_key.contains_key(&key) {
            return Err(FlowError::ArtifactExists(format!("{} {}", key.artifact_type, key.path)));
        }

        let id = ArtifactId(self.artifacts.len());
        let artifact = Artifact::new(id, spec.artifact_type, spec.dir, spec.name)
            .with_schema(spec.schema)
            .with_sub_type(spec.sub_type);

        let file_path = artifact.file_path();
        if let Some(other) = self.by_file.get(&file_path) {
            return Err(FlowError::ArtifactExists(format!(
                "{} (already stored by {})",
                file_path, other
            )));
        }

        tracing::debug!("Created {} {} as {}", key.artifact_type, key.path, id);
        self.by_key.insert(key, id);
        self.by_file.insert(file_path, id);
        self.by_type.entry(spec.artifact_type).or_default().push(id);
        self.artifacts.push(artifact);
        Ok(id)
    }

    /// Look up an artifact by identity, creating it if absent.
    ///
    /// The flag is true when the artifact was created.
    pub fn get_or_create(&mut self, spec: ArtifactSpec) -> Result<(ArtifactId, bool)> {
        match self.by_key.get(&spec.key()) {
            Some(id) => Ok((*id, false)),
            None => self.create(spec).map(|id| (id, true)),
        }
    }

    fn duplicate_dependency(&self, downstream: ArtifactId, upstream: ArtifactId) -> Result<()> {
        let up = self.get(upstream)?;
        let down = self.get(downstream)?;
        match down.check_dependency(up.artifact_type(), upstream) {
            Ok(()) => Ok(()),
            Err(existing) => Err(FlowError::DuplicateDependency {
                artifact: down.path(),
                dependency_type: up.artifact_type(),
                existing: self.get(existing)?.file_path(),
                requested: up.file_path(),
            }),
        }
    }

    /// Check whether `downstream` could watch `upstream` under `kind`.
    pub fn check_watch(
        &self,
        upstream: ArtifactId,
        downstream: ArtifactId,
        kind: ActionKind,
        cardinality: Cardinality,
    ) -> Result<()> {
        if upstream == downstream {
            return Err(FlowError::Internal(format!(
                "{} cannot watch itself",
                self.get(upstream)?.path()
            )));
        }
        let up = self.get(upstream)?;
        let watchers = up.watchers(kind);
        if cardinality == Cardinality::OneToOne
            && !watchers.is_empty()
            && !watchers.contains(&downstream)
        {
            return Err(FlowError::DuplicateImpact {
                source_path: up.path(),
                action: kind,
                count: watchers.len() + 1,
            });
        }
        self.duplicate_dependency(downstream, upstream)
    }

    /// Register that `downstream` regenerates from `upstream` under `kind`.
    ///
    /// Records `upstream` as the downstream's dependency of its type and the
    /// downstream under the upstream's watchers in one step.
    pub fn add_watch(
        &mut self,
        upstream: ArtifactId,
        downstream: ArtifactId,
        kind: ActionKind,
        cardinality: Cardinality,
    ) -> Result<()> {
        self.check_watch(upstream, downstream, kind, cardinality)?;

        let upstream_type = self.get(upstream)?.artifact_type();
        self.get_mut(downstream)?
            .record_dependency(upstream_type, upstream);
        self.get_mut(upstream)?.record_watcher(kind, downstream);

        tracing::debug!("{} watches {} under {}", downstream, upstream, kind);
        Ok(())
    }

    /// Record `upstream` as a dependency of `downstream` without a watch.
    pub fn link_dependency(&mut self, downstream: ArtifactId, upstream: ArtifactId) -> Result<()> {
        self.duplicate_dependency(downstream, upstream)?;
        let upstream_type = self.get(upstream)?.artifact_type();
        self.get_mut(downstream)?
            .record_dependency(upstream_type, upstream);
        Ok(())
    }

    /// The unique upstream of `dependency_type` for `id`.
    pub fn dependency(&self, id: ArtifactId, dependency_type: ArtifactType) -> Result<&Artifact> {
        let upstream = self.get(id)?.dependency(dependency_type)?;
        self.get(upstream)
    }

    /// Stage generator output on an artifact.
    pub fn stage(&mut self, id: ArtifactId, raw: &str) -> Result<String> {
        let parser = Arc::clone(&self.parser);
        let artifact = self.get_mut(id)?;
        let staged = artifact.stage(raw, parser.as_ref())?.to_string();
        tracing::debug!(
            "Staged revision {} on {}",
            artifact.pending_revisions().len(),
            artifact.path()
        );
        Ok(staged)
    }

    /// Stage already-parsed sections on an artifact.
    pub fn stage_sections(&mut self, id: ArtifactId, sections: Sections) -> Result<String> {
        let parser = Arc::clone(&self.parser);
        let artifact = self.get_mut(id)?;
        Ok(artifact.stage_sections(sections, parser.as_ref())?.to_string())
    }

    /// Capture an artifact's staging state.
    pub fn stage_mark(&self, id: ArtifactId) -> Result<StageMark> {
        Ok(self.get(id)?.stage_mark())
    }

    /// Roll an artifact back to a previously captured mark.
    pub fn rollback(&mut self, id: ArtifactId, mark: StageMark) -> Result<()> {
        self.get_mut(id)?.rollback(mark);
        Ok(())
    }

    /// Commit an artifact's staged revisions.
    pub fn commit(&mut self, id: ArtifactId) -> Result<Option<Event>> {
        Ok(self.get_mut(id)?.commit())
    }

    /// Initialize an artifact's committed content from storage.
    pub fn restore(&mut self, id: ArtifactId, content: String, version: u64) -> Result<()> {
        let parser = Arc::clone(&self.parser);
        self.get_mut(id)?.restore(content, version, parser.as_ref())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(Arc::new(MarkdownSections))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(types: &[(ArtifactType, &str)]) -> (Registry, Vec<ArtifactId>) {
        let mut registry = Registry::default();
        let ids = types
            .iter()
            .map(|(t, path)| registry.create(ArtifactSpec::from_path(*t, path)).unwrap())
            .collect();
        (registry, ids)
    }

    #[test]
    fn test_create_indexes_identity_and_file() {
        let (registry, ids) = registry_with(&[(ArtifactType::Prd, "docs/X.md")]);
        assert_eq!(registry.find(ArtifactType::Prd, "docs/X.md"), Some(ids[0]));
        assert_eq!(registry.find_by_file("docs/PRD_X.md"), Some(ids[0]));
        assert_eq!(registry.of_type(ArtifactType::Prd), &[ids[0]]);
        assert!(registry.find(ArtifactType::Design, "docs/X.md").is_none());
    }

    #[test]
    fn test_same_path_different_types_coexist() {
        let (registry, ids) = registry_with(&[
            (ArtifactType::Prd, "docs/X.md"),
            (ArtifactType::Design, "docs/X.md"),
        ]);
        assert_ne!(ids[0], ids[1]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_create_rejects_existing_identity() {
        let (mut registry, _) = registry_with(&[(ArtifactType::Prd, "docs/X.md")]);
        let err = registry
            .create(ArtifactSpec::from_path(ArtifactType::Prd, "docs/X.md"))
            .unwrap_err();
        assert!(matches!(err, FlowError::ArtifactExists(_)));

        let (id, created) = registry
            .get_or_create(ArtifactSpec::from_path(ArtifactType::Prd, "docs/X.md"))
            .unwrap();
        assert_eq!(id, ArtifactId(0));
        assert!(!created);
    }

    #[test]
    fn test_add_watch_is_symmetric() {
        let (mut registry, ids) = registry_with(&[
            (ArtifactType::Prd, "docs/X.md"),
            (ArtifactType::Design, "docs/X.md"),
        ]);
        registry
            .add_watch(ids[0], ids[1], ActionKind::WriteDesign, Cardinality::OneToOne)
            .unwrap();

        assert_eq!(registry.get(ids[0]).unwrap().watchers(ActionKind::WriteDesign), &[ids[1]]);
        assert_eq!(registry.dependency(ids[1], ArtifactType::Prd).unwrap().id(), ids[0]);

        // Re-registering the same edge is accepted.
        registry
            .add_watch(ids[0], ids[1], ActionKind::WriteDesign, Cardinality::OneToOne)
            .unwrap();
        assert_eq!(registry.get(ids[0]).unwrap().watchers(ActionKind::WriteDesign).len(), 1);
    }

    #[test]
    fn test_second_one_to_one_watcher_is_duplicate_impact() {
        let (mut registry, ids) = registry_with(&[
            (ArtifactType::Prd, "docs/X.md"),
            (ArtifactType::Design, "docs/X.md"),
            (ArtifactType::Design, "docs/Y.md"),
        ]);
        registry
            .add_watch(ids[0], ids[1], ActionKind::WriteDesign, Cardinality::OneToOne)
            .unwrap();
        let err = registry
            .add_watch(ids[0], ids[2], ActionKind::WriteDesign, Cardinality::OneToOne)
            .unwrap_err();
        assert!(matches!(err, FlowError::DuplicateImpact { count: 2, .. }));
        assert!(registry.get(ids[2]).unwrap().dependency(ArtifactType::Prd).is_err());
    }

    #[test]
    fn test_second_upstream_of_same_type_is_duplicate_dependency() {
        let (mut registry, ids) = registry_with(&[
            (ArtifactType::Prd, "docs/X.md"),
            (ArtifactType::Prd, "docs/Y.md"),
            (ArtifactType::Design, "docs/X.md"),
        ]);
        registry
            .add_watch(ids[0], ids[2], ActionKind::WriteDesign, Cardinality::OneToOne)
            .unwrap();
        let err = registry
            .add_watch(ids[1], ids[2], ActionKind::WriteDesign, Cardinality::OneToOne)
            .unwrap_err();
        match err {
            FlowError::DuplicateDependency { existing, requested, .. } => {
                assert_eq!(existing, "docs/PRD_X.md");
                assert_eq!(requested, "docs/PRD_Y.md");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(registry.get(ids[1]).unwrap().watchers(ActionKind::WriteDesign).is_empty());
    }

    #[test]
    fn test_single_of_type() {
        let (registry, ids) = registry_with(&[
            (ArtifactType::SystemDesign, "docs/system_design.md"),
            (ArtifactType::Prd, "docs/X.md"),
            (ArtifactType::Prd, "docs/Y.md"),
        ]);
        assert_eq!(registry.single_of_type(ArtifactType::SystemDesign).unwrap(), Some(ids[0]));
        assert_eq!(registry.single_of_type(ArtifactType::Code).unwrap(), None);
        assert!(matches!(
            registry.single_of_type(ArtifactType::Prd),
            Err(FlowError::AmbiguousDependency { count: 2, .. })
        ));
    }

    #[test]
    fn test_stage_and_commit_through_registry() {
        let (mut registry, ids) = registry_with(&[(ArtifactType::RawRequirement, "docs/X.md")]);
        assert!(registry.commit(ids[0]).unwrap().is_none());

        registry.stage(ids[0], "build a todo app").unwrap();
        let event = registry.commit(ids[0]).unwrap().unwrap();
        assert_eq!(event.artifact, ids[0]);
        assert_eq!(event.key.path, "docs/X.md");
        assert_eq!(registry.get(ids[0]).unwrap().content(), "build a todo app");
    }
}
