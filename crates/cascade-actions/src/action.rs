//! The action capability and its registry.

use std::collections::HashMap;
use std::sync::Arc;

use cascade_core::{
    ActionKind, Artifact, ArtifactType, Cardinality, FlowError, PromptKind, Result, SectionParser,
    SectionSchema, Sections, Task,
};
use cascade_graph::{ArtifactSpec, Reaction, Registry};
use similar::{ChangeTag, TextDiff};

/// What an action wants done for a prompt request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptPlan {
    /// Send this prompt to the generator.
    Generate(String),
    /// Stage this text without calling the generator.
    Verbatim(String),
    /// Nothing to stage.
    NoAction,
}

/// Generator output after action-specific parsing.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedResult {
    /// Sections to merge into the target's working sections.
    Sections(Sections),
    /// Text to stage as-is.
    Text(String),
}

/// A derived artifact to write after the producing action's target commits.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitEffect {
    /// Artifact to create or update; it depends on the committed artifact.
    pub artifact: ArtifactSpec,
    /// Content to commit into it.
    pub content: String,
}

/// Everything an action may read while building a prompt.
pub struct PromptRequest<'a> {
    pub kind: PromptKind,
    pub task: &'a Task,
    pub registry: &'a Registry,
    /// Task instruction, or the comment text for [`PromptKind::Comment`].
    pub instruction: Option<&'a str>,
}

impl<'a> PromptRequest<'a> {
    /// Artifact the task writes to.
    pub fn target(&self) -> Result<&'a Artifact> {
        self.registry.get(self.task.target)
    }

    /// Upstream that caused the task, if any.
    pub fn source(&self) -> Result<Option<&'a Artifact>> {
        self.task
            .source
            .map(|id| self.registry.get(id))
            .transpose()
    }

    /// The target's unique upstream of `dependency_type`.
    pub fn dependency(&self, dependency_type: ArtifactType) -> Result<&'a Artifact> {
        self.registry.dependency(self.task.target, dependency_type)
    }

    /// Line diff of the source between its previous commit and its working content.
    pub fn source_diff(&self) -> Result<Option<String>> {
        Ok(self
            .source()?
            .map(|source| line_diff(source.previous_content(), source.working_content())))
    }
}

/// Render a `+`/`-` prefixed line diff, unchanged lines indented.
pub fn line_diff(old: &str, new: &str) -> String {
    let diff = TextDiff::from_lines(old, new);
    let mut out = String::new();
    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => "-",
            ChangeTag::Insert => "+",
            ChangeTag::Equal => " ",
        };
        out.push_str(sign);
        out.push_str(change.value());
        if change.missing_newline() {
            out.push('\n');
        }
    }
    out
}

/// Parse `raw` with `schema`, or pass it through as text without one.
pub fn parse_with_schema(
    raw: &str,
    schema: Option<&SectionSchema>,
    parser: &dyn SectionParser,
) -> Result<ParsedResult> {
    match schema {
        Some(schema) => Ok(ParsedResult::Sections(parser.parse(raw, schema)?)),
        None => Ok(ParsedResult::Text(raw.to_string())),
    }
}

/// A regeneration handler bound to one [`ActionKind`].
pub trait Action: Send + Sync {
    /// Kind this action handles.
    fn kind(&self) -> ActionKind;

    /// Type of artifact this action writes.
    fn target_type(&self) -> ArtifactType;

    /// Downstream cardinality.
    fn cardinality(&self) -> Cardinality {
        Cardinality::OneToOne
    }

    /// Section schema of the artifacts this action writes.
    fn schema(&self) -> Option<SectionSchema> {
        None
    }

    /// Upstream types needed besides the source.
    fn extra_dependencies(&self) -> Vec<ArtifactType> {
        Vec::new()
    }

    /// Downstream to create for `source`: same directory and name, this action's type.
    fn target_spec(&self, source: &Artifact) -> ArtifactSpec {
        ArtifactSpec::new(self.target_type(), source.dir(), source.name()).with_schema(self.schema())
    }

    /// Build the prompt for a request.
    fn build_prompt(&self, request: &PromptRequest<'_>) -> Result<PromptPlan>;

    /// Turn generator output into something to stage.
    fn parse_result(
        &self,
        raw: &str,
        schema: Option<&SectionSchema>,
        parser: &dyn SectionParser,
    ) -> Result<ParsedResult> {
        parse_with_schema(raw, schema, parser)
    }

    /// Derived artifacts to write once `artifact` commits.
    fn on_commit(&self, _artifact: &Artifact) -> Result<Vec<CommitEffect>> {
        Ok(Vec::new())
    }
}

/// Actions keyed by kind.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: HashMap<ActionKind, Arc<dyn Action>>,
}

impl ActionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action, replacing any previous one of the same kind.
    pub fn register(&mut self, action: Arc<dyn Action>) {
        self.actions.insert(action.kind(), action);
    }

    /// Builder form of [`ActionRegistry::register`].
    pub fn with(mut self, action: impl Action + 'static) -> Self {
        self.register(Arc::new(action));
        self
    }

    /// Resolve the action bound to `kind`.
    pub fn get(&self, kind: ActionKind) -> Result<Arc<dyn Action>> {
        self.actions
            .get(&kind)
            .cloned()
            .ok_or(FlowError::UnknownAction(kind))
    }

    /// The action that writes artifacts of `artifact_type`.
    pub fn producer_of(&self, artifact_type: ArtifactType) -> Result<Arc<dyn Action>> {
        let mut producers: Vec<&Arc<dyn Action>> = self
            .actions
            .values()
            .filter(|a| a.target_type() == artifact_type)
            .collect();
        producers.sort_by_key(|a| a.kind());
        producers
            .first()
            .map(|a| Arc::clone(*a))
            .ok_or(FlowError::NoProducer(artifact_type))
    }

    /// Number of registered actions.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Static mapping from a changed artifact type to the actions that react to it.
#[derive(Debug, Clone, Default)]
pub struct ReactionTable {
    entries: HashMap<ArtifactType, Vec<ActionKind>>,
}

impl ReactionTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// RAW_REQUIREMENT → WRITE_PRD → WRITE_DESIGN → WRITE_TASKS.
    pub fn standard() -> Self {
        Self::new()
            .on(ArtifactType::RawRequirement, [ActionKind::WritePrd])
            .on(ArtifactType::Prd, [ActionKind::WriteDesign])
            .on(ArtifactType::Design, [ActionKind::WriteTasks])
    }

    /// Set the ordered reactions for a type.
    pub fn on(mut self, artifact_type: ArtifactType, kinds: impl IntoIterator<Item = ActionKind>) -> Self {
        self.entries
            .insert(artifact_type, kinds.into_iter().collect());
        self
    }

    /// Reactions to a change of `artifact_type`, in order.
    pub fn reactions_to(&self, artifact_type: ArtifactType) -> &[ActionKind] {
        self.entries
            .get(&artifact_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Resolve the reactions to a change of `source` against registered actions.
    pub fn resolve(&self, source: &Artifact, actions: &ActionRegistry) -> Result<Vec<Reaction>> {
        self.reactions_to(source.artifact_type())
            .iter()
            .map(|kind| {
                let action = actions.get(*kind)?;
                Ok(Reaction {
                    action: *kind,
                    cardinality: action.cardinality(),
                    target: action.target_spec(source),
                    extra_dependencies: action.extra_dependencies(),
                })
            })
            .collect()
    }
}
