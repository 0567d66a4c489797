//! The standard requirement → PRD → design → tasks pipeline.

use cascade_core::{ActionKind, ArtifactType, Cardinality, PromptKind, SectionSchema};

use crate::action::{ActionRegistry, ReactionTable};
use crate::document::{DocumentAction, RequirementAction};

const PRD_CREATE: &str = "\
# Context
## Original Requirements
{source}

## Format example
{format}
-----
Role: You are a professional product manager.
Fill in every section of the format example from the original requirements.
If the requirements are unclear, aim for minimum viability and avoid over-design.
Use '##' to split sections, not '#'.
";

const DESIGN_CREATE: &str = "\
# Context
## Requirements
{prd}

## System design
{system_design}

## Format example
{format}
-----
Role: You are an architect designing one module of the system above.
Keep to the shared system design. List only the files this module needs.
Use '##' to split sections, not '#'.
";

const TASKS_CREATE: &str = "\
# Context
{design}

## Format example
{format}
-----
Role: You are a project manager. Break the design into tasks, ordered so that
prerequisites come first. Use '##' to split sections, not '#'.
";

const CODE_CREATE: &str = "\
# Context
## Design
{design}

## System design
{system_design}
-----
Write the file {target_name}. Output only the code.
";

/// Section schema of product requirement documents.
pub fn prd_schema() -> SectionSchema {
    SectionSchema::new()
        .text("Original Requirements")
        .fenced("User Stories", "python")
        .text("Requirement Analysis")
        .text("Anything UNCLEAR")
}

/// Section schema of module designs.
pub fn design_schema() -> SectionSchema {
    SectionSchema::new()
        .text("Implementation approach")
        .fenced("File list", "python")
        .fenced("Data structures and interface definitions", "mermaid")
        .fenced("Program call flow", "mermaid")
        .text("Anything UNCLEAR")
}

/// Section schema of task breakdowns.
pub fn tasks_schema() -> SectionSchema {
    SectionSchema::new()
        .fenced("Required packages", "python")
        .fenced("Logic Analysis", "python")
        .fenced("Task list", "python")
        .text("Shared Knowledge")
        .text("Anything UNCLEAR")
}

/// Every action of the standard pipeline.
pub fn standard_actions() -> ActionRegistry {
    ActionRegistry::new()
        .with(RequirementAction)
        .with(
            DocumentAction::new(ActionKind::WritePrd, ArtifactType::Prd)
                .with_schema(prd_schema())
                .with_template(PromptKind::DependencyCreate, PRD_CREATE),
        )
        .with(
            DocumentAction::new(ActionKind::WriteDesign, ArtifactType::Design)
                .with_schema(design_schema())
                .with_template(PromptKind::DependencyCreate, DESIGN_CREATE)
                .with_input(ArtifactType::Prd)
                .with_input(ArtifactType::SystemDesign)
                .with_extra_dependency(ArtifactType::SystemDesign)
                .with_export(
                    "Data structures and interface definitions",
                    "resources",
                    "data_api_design.mmd",
                )
                .with_export("Program call flow", "resources", "seq_flow.mmd"),
        )
        .with(
            DocumentAction::new(ActionKind::WriteTasks, ArtifactType::Tasks)
                .with_schema(tasks_schema())
                .with_template(PromptKind::DependencyCreate, TASKS_CREATE)
                .with_input(ArtifactType::Design),
        )
        .with(
            DocumentAction::new(ActionKind::WriteCode, ArtifactType::Code)
                .with_cardinality(Cardinality::OneToMany)
                .with_template(PromptKind::DependencyCreate, CODE_CREATE)
                .with_input(ArtifactType::Design)
                .with_input(ArtifactType::SystemDesign)
                .with_extra_dependency(ArtifactType::SystemDesign),
        )
}

/// Reactions of the standard pipeline.
pub fn standard_reactions() -> ReactionTable {
    ReactionTable::standard()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_core::{Artifact, ArtifactId};

    #[test]
    fn test_every_action_kind_is_registered() {
        let actions = standard_actions();
        for kind in ActionKind::ALL {
            assert_eq!(actions.get(kind).unwrap().kind(), kind);
        }
    }

    #[test]
    fn test_standard_reactions_resolve() {
        let actions = standard_actions();
        let reactions = standard_reactions();
        let prd = Artifact::new(ArtifactId(1), ArtifactType::Prd, "docs", "X.md");

        let resolved = reactions.resolve(&prd, &actions).unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].target.artifact_type, ArtifactType::Design);
        assert_eq!(resolved[0].extra_dependencies, vec![ArtifactType::SystemDesign]);
        assert_eq!(resolved[0].target.schema, Some(design_schema()));
    }

    #[test]
    fn test_code_action_is_fan_out() {
        let actions = standard_actions();
        assert_eq!(
            actions.get(ActionKind::WriteCode).unwrap().cardinality(),
            Cardinality::OneToMany
        );
    }
}
