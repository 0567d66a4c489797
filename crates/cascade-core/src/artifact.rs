//! Versioned document artifacts.
//!
//! An [`Artifact`] holds its last committed text, the revisions staged since,
//! and the change-set those revisions accumulated. Committed content only moves
//! inside [`Artifact::commit`]; everything a generator produces lands in the
//! pending list first.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};
use crate::sections::{SectionParser, SectionSchema, Sections};
use crate::task::Event;
use crate::types::{ActionKind, ArtifactId, ArtifactType};

/// Identity of an artifact: its type plus its relative path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactKey {
    /// Document type.
    pub artifact_type: ArtifactType,
    /// Relative path (`<dir>/<name>`).
    pub path: String,
}

impl ArtifactKey {
    /// Create a key from its parts.
    pub fn new(artifact_type: ArtifactType, path: impl Into<String>) -> Self {
        Self {
            artifact_type,
            path: path.into(),
        }
    }
}

/// Snapshot of staging state, used to roll a task's revisions back.
#[derive(Debug, Clone)]
pub struct StageMark {
    pending_len: usize,
    change_set: Sections,
    staged_sections: Option<Sections>,
}

/// A versioned node in the document graph.
#[derive(Debug, Clone)]
pub struct Artifact {
    id: ArtifactId,
    artifact_type: ArtifactType,
    dir: String,
    name: String,
    sub_type: Option<String>,
    schema: Option<SectionSchema>,

    content: String,
    previous_content: String,
    sections: Sections,

    pending: Vec<String>,
    change_set: Sections,
    staged_sections: Option<Sections>,

    depends_on: BTreeMap<ArtifactType, ArtifactId>,
    watched_by: BTreeMap<ActionKind, Vec<ArtifactId>>,

    version: u64,
    committed_at: Option<DateTime<Utc>>,
}

impl Artifact {
    /// Create an empty artifact.
    pub fn new(
        id: ArtifactId,
        artifact_type: ArtifactType,
        dir: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id,
            artifact_type,
            dir: dir.into().trim_matches('/').to_string(),
            name: name.into(),
            sub_type: None,
            schema: None,
            content: String::new(),
            previous_content: String::new(),
            sections: Sections::new(),
            pending: Vec::new(),
            change_set: Sections::new(),
            staged_sections: None,
            depends_on: BTreeMap::new(),
            watched_by: BTreeMap::new(),
            version: 0,
            committed_at: None,
        }
    }

    /// Attach a section schema.
    pub fn with_schema(mut self, schema: Option<SectionSchema>) -> Self {
        self.schema = schema;
        self
    }

    /// Attach a sub-type (e.g. the code template a source file follows).
    pub fn with_sub_type(mut self, sub_type: Option<String>) -> Self {
        self.sub_type = sub_type;
        self
    }

    pub fn id(&self) -> ArtifactId {
        self.id
    }

    pub fn artifact_type(&self) -> ArtifactType {
        self.artifact_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &str {
        &self.dir
    }

    pub fn sub_type(&self) -> Option<&str> {
        self.sub_type.as_deref()
    }

    pub fn schema(&self) -> Option<&SectionSchema> {
        self.schema.as_ref()
    }

    /// Identity path, `<dir>/<name>`.
    pub fn path(&self) -> String {
        join(&self.dir, &self.name)
    }

    /// Identity key.
    pub fn key(&self) -> ArtifactKey {
        ArtifactKey::new(self.artifact_type, self.path())
    }

    /// Storage path relative to the workspace root.
    pub fn file_path(&self) -> String {
        match self.artifact_type.file_prefix() {
            Some(prefix) => join(&self.dir, &format!("{}_{}", prefix, self.name)),
            None => self.path(),
        }
    }

    /// Last committed text.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Text as of the commit before the last one.
    pub fn previous_content(&self) -> &str {
        &self.previous_content
    }

    /// Last staged revision, or the committed text when nothing is staged.
    pub fn working_content(&self) -> &str {
        self.pending
            .last()
            .map(String::as_str)
            .unwrap_or(self.content.as_str())
    }

    /// Committed content parsed into sections (empty without a schema).
    pub fn sections(&self) -> &Sections {
        &self.sections
    }

    /// Revisions staged since the last commit, oldest first.
    pub fn pending_revisions(&self) -> &[String] {
        &self.pending
    }

    /// Sections touched since the last commit, last write wins.
    pub fn change_set(&self) -> &Sections {
        &self.change_set
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// True once the artifact holds committed or staged text.
    pub fn has_content(&self) -> bool {
        !self.working_content().is_empty()
    }

    /// Number of commits so far.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn committed_at(&self) -> Option<DateTime<Utc>> {
        self.committed_at
    }

    /// Initialize committed content from storage.
    ///
    /// Only valid while nothing is staged; emits no event.
    pub fn restore(
        &mut self,
        content: String,
        version: u64,
        parser: &dyn SectionParser,
    ) -> Result<()> {
        if self.has_pending() {
            return Err(FlowError::Internal(format!(
                "cannot restore {} while revisions are staged",
                self.path()
            )));
        }
        if let Some(schema) = &self.schema {
            self.sections = parser.parse(&content, schema)?;
        }
        self.content = content;
        self.version = version;
        Ok(())
    }

    /// Stage generator output.
    ///
    /// With a schema the text is parsed, merged over the working sections and
    /// re-serialized canonically; without one it is appended verbatim.
    pub fn stage(&mut self, raw: &str, parser: &dyn SectionParser) -> Result<&str> {
        match &self.schema {
            Some(schema) => {
                let incoming = parser.parse(raw, schema)?;
                self.stage_sections(incoming, parser)
            }
            None => {
                self.pending.push(raw.to_string());
                Ok(self.working_content())
            }
        }
    }

    /// Stage already-parsed sections.
    pub fn stage_sections(
        &mut self,
        incoming: Sections,
        parser: &dyn SectionParser,
    ) -> Result<&str> {
        let schema = self.schema.as_ref().ok_or_else(|| {
            FlowError::Internal(format!("{} has no section schema", self.path()))
        })?;

        let mut working = match &self.staged_sections {
            Some(staged) => staged.clone(),
            None => parser.parse(self.working_content(), schema)?,
        };
        for (name, value) in &incoming {
            working.insert(name.clone(), value.clone());
        }
        let text = parser.serialize(&working, schema);

        self.change_set.extend(incoming);
        self.staged_sections = Some(working);
        self.pending.push(text);
        Ok(self.working_content())
    }

    /// Capture the staging state before a task runs.
    pub fn stage_mark(&self) -> StageMark {
        StageMark {
            pending_len: self.pending.len(),
            change_set: self.change_set.clone(),
            staged_sections: self.staged_sections.clone(),
        }
    }

    /// Drop every revision staged after `mark`.
    pub fn rollback(&mut self, mark: StageMark) {
        self.pending.truncate(mark.pending_len);
        self.change_set = mark.change_set;
        self.staged_sections = mark.staged_sections;
    }

    /// Promote the last staged revision to committed content.
    ///
    /// Returns `None` (and changes nothing) when nothing is staged.
    pub fn commit(&mut self) -> Option<Event> {
        let latest = self.pending.pop()?;

        self.previous_content = std::mem::replace(&mut self.content, latest);
        if let Some(staged) = self.staged_sections.take() {
            self.sections = staged;
        }
        self.pending.clear();
        self.change_set.clear();
        self.version += 1;
        let now = Utc::now();
        self.committed_at = Some(now);

        tracing::debug!(
            "Committed {} {} at version {}",
            self.artifact_type,
            self.path(),
            self.version
        );

        Some(Event::new(self.id, self.key(), self.version, now))
    }

    /// The unique upstream of `dependency_type`.
    pub fn dependency(&self, dependency_type: ArtifactType) -> Result<ArtifactId> {
        self.depends_on
            .get(&dependency_type)
            .copied()
            .ok_or_else(|| FlowError::MissingDependency {
                artifact: self.path(),
                dependency_type,
            })
    }

    /// All upstream links.
    pub fn dependencies(&self) -> impl Iterator<Item = (ArtifactType, ArtifactId)> + '_ {
        self.depends_on.iter().map(|(t, id)| (*t, *id))
    }

    /// Downstream artifacts registered under `kind`.
    pub fn watchers(&self, kind: ActionKind) -> &[ArtifactId] {
        self.watched_by.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All downstream links grouped by action.
    pub fn watched_by(&self) -> impl Iterator<Item = (ActionKind, &[ArtifactId])> + '_ {
        self.watched_by.iter().map(|(k, ids)| (*k, ids.as_slice()))
    }

    /// Check that `upstream` may become this artifact's `upstream_type` dependency.
    pub fn check_dependency(
        &self,
        upstream_type: ArtifactType,
        upstream: ArtifactId,
    ) -> std::result::Result<(), ArtifactId> {
        match self.depends_on.get(&upstream_type) {
            Some(existing) if *existing != upstream => Err(*existing),
            _ => Ok(()),
        }
    }

    /// Record `upstream` as the dependency of its type.
    ///
    /// Callers check [`Artifact::check_dependency`] first.
    pub fn record_dependency(&mut self, upstream_type: ArtifactType, upstream: ArtifactId) {
        self.depends_on.insert(upstream_type, upstream);
    }

    /// Record `downstream` as a watcher under `kind`; repeated calls are no-ops.
    pub fn record_watcher(&mut self, kind: ActionKind, downstream: ArtifactId) {
        let list = self.watched_by.entry(kind).or_default();
        if !list.contains(&downstream) {
            list.push(downstream);
        }
    }
}

fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sections::MarkdownSections;
    use proptest::prelude::*;
    use serde_json::json;

    fn schema() -> SectionSchema {
        SectionSchema::new().text("Summary").fenced("List", "python")
    }

    fn prd() -> Artifact {
        Artifact::new(ArtifactId(1), ArtifactType::Prd, "docs", "X.md").with_schema(Some(schema()))
    }

    #[test]
    fn test_paths_follow_storage_convention() {
        let artifact = prd();
        assert_eq!(artifact.path(), "docs/X.md");
        assert_eq!(artifact.file_path(), "docs/PRD_X.md");

        let code = Artifact::new(ArtifactId(2), ArtifactType::Code, "/src/app/", "main.rs");
        assert_eq!(code.file_path(), "src/app/main.rs");
    }

    #[test]
    fn test_commit_without_pending_is_noop() {
        let mut artifact = prd();
        assert!(artifact.commit().is_none());
        assert_eq!(artifact.version(), 0);
        assert_eq!(artifact.content(), "");
        assert_eq!(artifact.previous_content(), "");
    }

    #[test]
    fn test_staging_two_revisions_unions_sections() {
        let mut artifact = prd();
        artifact.stage("## Summary\na\n", &MarkdownSections).unwrap();
        artifact
            .stage("## List\n```python\n[1,2]\n```\n", &MarkdownSections)
            .unwrap();

        assert_eq!(artifact.change_set()["Summary"], json!("a"));
        assert_eq!(artifact.change_set()["List"], json!([1, 2]));
        assert_eq!(artifact.pending_revisions().len(), 2);

        let working = artifact.working_content();
        assert!(working.contains("## Summary\na"));
        assert!(working.contains("## List\n```python\n[1,2]\n```"));
        assert_eq!(artifact.content(), "");
    }

    #[test]
    fn test_commit_promotes_working_content() {
        let mut artifact = prd();
        artifact.stage("## Summary\nfirst\n", &MarkdownSections).unwrap();
        let first = artifact.commit().unwrap();
        assert_eq!(first.version, 1);

        artifact.stage("## Summary\nsecond\n", &MarkdownSections).unwrap();
        let staged = artifact.working_content().to_string();
        let event = artifact.commit().unwrap();

        assert_eq!(event.version, 2);
        assert_eq!(event.artifact, artifact.id());
        assert_eq!(artifact.content(), staged);
        assert_eq!(artifact.previous_content(), "## Summary\nfirst\n");
        assert!(artifact.pending_revisions().is_empty());
        assert!(artifact.change_set().is_empty());
        assert_eq!(artifact.sections()["Summary"], json!("second"));
    }

    #[test]
    fn test_stage_without_schema_is_verbatim() {
        let mut raw = Artifact::new(ArtifactId(0), ArtifactType::RawRequirement, "docs", "X.md");
        raw.stage("build a todo app", &MarkdownSections).unwrap();
        assert_eq!(raw.working_content(), "build a todo app");
        assert!(raw.change_set().is_empty());
    }

    #[test]
    fn test_parse_failure_leaves_state_untouched() {
        let mut artifact = prd();
        artifact.stage("## Summary\nok\n", &MarkdownSections).unwrap();
        let before = artifact.working_content().to_string();

        let err = artifact.stage("## List\n```python\n[1\n", &MarkdownSections);
        assert!(err.is_err());
        assert_eq!(artifact.working_content(), before);
        assert_eq!(artifact.pending_revisions().len(), 1);
        assert!(artifact.change_set().get("List").is_none());
    }

    #[test]
    fn test_rollback_restores_mark() {
        let mut artifact = prd();
        artifact.stage("## Summary\nkeep\n", &MarkdownSections).unwrap();
        let mark = artifact.stage_mark();
        artifact.stage("## Summary\ndrop\n", &MarkdownSections).unwrap();
        artifact
            .stage("## List\n```python\n[3]\n```\n", &MarkdownSections)
            .unwrap();

        artifact.rollback(mark);
        assert_eq!(artifact.pending_revisions().len(), 1);
        assert_eq!(artifact.change_set()["Summary"], json!("keep"));
        assert!(artifact.change_set().get("List").is_none());
        assert!(artifact.working_content().contains("keep"));
    }

    #[test]
    fn test_missing_dependency() {
        let artifact = prd();
        let err = artifact.dependency(ArtifactType::SystemDesign).unwrap_err();
        assert!(matches!(
            err,
            FlowError::MissingDependency { dependency_type: ArtifactType::SystemDesign, .. }
        ));
    }

    #[test]
    fn test_dependency_check_rejects_second_upstream() {
        let mut artifact = prd();
        artifact.record_dependency(ArtifactType::RawRequirement, ArtifactId(7));
        assert!(artifact.check_dependency(ArtifactType::RawRequirement, ArtifactId(7)).is_ok());
        assert_eq!(
            artifact.check_dependency(ArtifactType::RawRequirement, ArtifactId(8)),
            Err(ArtifactId(7))
        );
    }

    #[test]
    fn test_record_watcher_is_idempotent() {
        let mut artifact = prd();
        artifact.record_watcher(ActionKind::WriteDesign, ArtifactId(3));
        artifact.record_watcher(ActionKind::WriteDesign, ArtifactId(3));
        assert_eq!(artifact.watchers(ActionKind::WriteDesign), &[ArtifactId(3)]);
        assert!(artifact.watchers(ActionKind::WriteTasks).is_empty());
    }

    #[test]
    fn test_restore_parses_sections() {
        let mut artifact = prd();
        artifact
            .restore("## Summary\nloaded\n".to_string(), 4, &MarkdownSections)
            .unwrap();
        assert_eq!(artifact.version(), 4);
        assert_eq!(artifact.sections()["Summary"], json!("loaded"));
        assert!(artifact.commit().is_none());
    }

    fn summary_update() -> impl Strategy<Value = (bool, String)> {
        (any::<bool>(), "[a-z]{1,12}")
    }

    proptest! {
        #[test]
        fn prop_change_set_is_last_write_wins_union(updates in proptest::collection::vec(summary_update(), 1..8)) {
            let mut artifact = prd();
            let mut expected = Sections::new();

            for (is_summary, word) in &updates {
                let raw = if *is_summary {
                    expected.insert("Summary".to_string(), json!(word));
                    format!("## Summary\n{}\n", word)
                } else {
                    expected.insert("List".to_string(), json!(word));
                    format!("## List\n```python\n{}\n```\n", word)
                };
                artifact.stage(&raw, &MarkdownSections).unwrap();
            }

            let mut actual: Vec<_> = artifact.change_set().iter().collect();
            let mut wanted: Vec<_> = expected.iter().collect();
            actual.sort_by(|a, b| a.0.cmp(b.0));
            wanted.sort_by(|a, b| a.0.cmp(b.0));
            prop_assert_eq!(actual, wanted);

            artifact.commit();
            prop_assert!(artifact.change_set().is_empty());
        }

        #[test]
        fn prop_commit_without_pending_changes_nothing(text in "[a-z ]{0,30}") {
            let mut artifact = prd();
            artifact.stage(&format!("## Summary\n{}\n", text), &MarkdownSections).unwrap();
            artifact.commit();

            let content = artifact.content().to_string();
            let previous = artifact.previous_content().to_string();
            let version = artifact.version();

            prop_assert!(artifact.commit().is_none());
            prop_assert_eq!(artifact.content(), content.as_str());
            prop_assert_eq!(artifact.previous_content(), previous.as_str());
            prop_assert_eq!(artifact.version(), version);
        }
    }
}
