//! Template-driven document actions.

use std::collections::{BTreeMap, HashMap};

use cascade_core::{
    ActionKind, Artifact, ArtifactType, Cardinality, FlowError, PromptKind, RenderKind, Result,
    SectionParser, SectionSchema,
};
use cascade_graph::ArtifactSpec;

use crate::action::{parse_with_schema, Action, CommitEffect, ParsedResult, PromptPlan, PromptRequest};

/// Fallback prompt for direct edits.
pub const TASK_TEMPLATE: &str = "\
# Current document
{target}

# Format
{format}
-----
Apply the following change to the current document: {instruction}
Output the full document, keeping every section, even when only part of it changes.
";

/// Fallback prompt for follow-up comments on a staged revision.
pub const COMMENT_TEMPLATE: &str = "\
# Current document
{target}

# Format
{format}
-----
Revise the current document according to this comment: {instruction}
Output only the sections that change.
";

/// Fallback prompt when an upstream document changed.
pub const UPDATE_TEMPLATE: &str = "\
# Current document
{target}

# Upstream change
```diff
{diff}
```

# Format
{format}
-----
The upstream document changed as shown. Update the current document to match.
Output only the sections that change.
";

/// Substitute `{name}` placeholders. Unknown placeholders are kept verbatim.
pub fn render(template: &str, vars: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let name_len = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(after.len());
        let name = &after[..name_len];

        match (vars.get(name), after[name_len..].starts_with('}')) {
            (Some(value), true) if !name.is_empty() => {
                out.push_str(value);
                rest = &after[name_len + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// A section exported to its own file after commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionExport {
    pub section: String,
    pub dir: String,
    /// Appended to the document stem, e.g. `seq_flow.mmd`.
    pub suffix: String,
}

/// An action that fills templates with upstream documents and parses sectioned output.
#[derive(Debug, Clone)]
pub struct DocumentAction {
    kind: ActionKind,
    target_type: ArtifactType,
    cardinality: Cardinality,
    schema: Option<SectionSchema>,
    templates: HashMap<PromptKind, String>,
    inputs: Vec<ArtifactType>,
    extra_dependencies: Vec<ArtifactType>,
    exports: Vec<SectionExport>,
}

impl DocumentAction {
    /// Create an action of `kind` writing `target_type` documents.
    pub fn new(kind: ActionKind, target_type: ArtifactType) -> Self {
        Self {
            kind,
            target_type,
            cardinality: Cardinality::OneToOne,
            schema: None,
            templates: HashMap::new(),
            inputs: Vec::new(),
            extra_dependencies: Vec::new(),
            exports: Vec::new(),
        }
    }

    pub fn with_schema(mut self, schema: SectionSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_cardinality(mut self, cardinality: Cardinality) -> Self {
        self.cardinality = cardinality;
        self
    }

    /// Template for one prompt kind.
    pub fn with_template(mut self, kind: PromptKind, template: impl Into<String>) -> Self {
        self.templates.insert(kind, template.into());
        self
    }

    /// Upstream whose working content fills the `{<type>}` placeholder.
    ///
    /// Inputs are resolved before any prompt is built, so a missing one fails
    /// the task without a generator call.
    pub fn with_input(mut self, dependency_type: ArtifactType) -> Self {
        self.inputs.push(dependency_type);
        self
    }

    /// Upstream linked when the target is first created.
    pub fn with_extra_dependency(mut self, dependency_type: ArtifactType) -> Self {
        self.extra_dependencies.push(dependency_type);
        self
    }

    /// Export a section to `<dir>/<stem>_<suffix>` on commit.
    pub fn with_export(
        mut self,
        section: impl Into<String>,
        dir: impl Into<String>,
        suffix: impl Into<String>,
    ) -> Self {
        self.exports.push(SectionExport {
            section: section.into(),
            dir: dir.into(),
            suffix: suffix.into(),
        });
        self
    }

    fn template(&self, kind: PromptKind) -> Result<&str> {
        let fallback = match kind {
            PromptKind::Task => Some(TASK_TEMPLATE),
            PromptKind::Comment => Some(COMMENT_TEMPLATE),
            PromptKind::DependencyUpdate => Some(UPDATE_TEMPLATE),
            PromptKind::DependencyCreate => None,
        };
        self.templates
            .get(&kind)
            .map(String::as_str)
            .or(fallback)
            .ok_or_else(|| FlowError::Internal(format!("{} has no {:?} template", self.kind, kind)))
    }

    /// Format example derived from the schema.
    fn format_hint(&self) -> String {
        let Some(schema) = &self.schema else {
            return "Plain text.".to_string();
        };
        let mut out = String::new();
        for (name, kind) in schema.iter() {
            out.push_str("## ");
            out.push_str(name);
            out.push('\n');
            match kind {
                RenderKind::Text => out.push_str("...\n\n"),
                RenderKind::Fenced(lang) => {
                    out.push_str(&format!("```{}\n...\n```\n\n", lang));
                }
            }
        }
        out.trim_end().to_string()
    }
}

impl Action for DocumentAction {
    fn kind(&self) -> ActionKind {
        self.kind
    }

    fn target_type(&self) -> ArtifactType {
        self.target_type
    }

    fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    fn schema(&self) -> Option<SectionSchema> {
        self.schema.clone()
    }

    fn extra_dependencies(&self) -> Vec<ArtifactType> {
        self.extra_dependencies.clone()
    }

    fn build_prompt(&self, request: &PromptRequest<'_>) -> Result<PromptPlan> {
        if matches!(request.kind, PromptKind::Task | PromptKind::Comment) && request.instruction.is_none() {
            return Ok(PromptPlan::NoAction);
        }

        let mut vars = BTreeMap::new();
        for dependency_type in &self.inputs {
            let upstream = request.dependency(*dependency_type)?;
            vars.insert(dependency_type.placeholder(), upstream.working_content().to_string());
        }

        let target = request.target()?;
        let source = request.source()?;
        vars.insert("target".to_string(), target.working_content().to_string());
        vars.insert("target_name".to_string(), target.name().to_string());
        vars.insert(
            "source".to_string(),
            source.map(|s| s.working_content().to_string()).unwrap_or_default(),
        );
        vars.insert("diff".to_string(), request.source_diff()?.unwrap_or_default());
        vars.insert(
            "instruction".to_string(),
            request.instruction.unwrap_or_default().to_string(),
        );
        vars.insert("format".to_string(), self.format_hint());

        let prompt = render(self.template(request.kind)?, &vars);
        Ok(PromptPlan::Generate(prompt))
    }

    fn parse_result(
        &self,
        raw: &str,
        schema: Option<&SectionSchema>,
        parser: &dyn SectionParser,
    ) -> Result<ParsedResult> {
        // Generators often wrap the document in `---` rulers copied from the format example.
        let body: Vec<&str> = raw
            .lines()
            .filter(|line| {
                let t = line.trim();
                !(t.len() >= 3 && t.chars().all(|c| c == '-'))
            })
            .collect();
        parse_with_schema(&body.join("\n"), schema, parser)
    }

    fn on_commit(&self, artifact: &Artifact) -> Result<Vec<CommitEffect>> {
        let stem = artifact
            .name()
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(artifact.name());

        let effects = self
            .exports
            .iter()
            .filter_map(|export| {
                let value = artifact.sections().get(&export.section)?;
                let content = match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                Some(CommitEffect {
                    artifact: ArtifactSpec::new(
                        ArtifactType::Code,
                        export.dir.clone(),
                        format!("{}_{}", stem, export.suffix),
                    ),
                    content,
                })
            })
            .collect();
        Ok(effects)
    }
}

/// Records a requirement exactly as written.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequirementAction;

impl Action for RequirementAction {
    fn kind(&self) -> ActionKind {
        ActionKind::AddRequirement
    }

    fn target_type(&self) -> ArtifactType {
        ArtifactType::RawRequirement
    }

    fn build_prompt(&self, request: &PromptRequest<'_>) -> Result<PromptPlan> {
        Ok(match request.instruction {
            Some(text) => PromptPlan::Verbatim(text.to_string()),
            None => PromptPlan::NoAction,
        })
    }
}
