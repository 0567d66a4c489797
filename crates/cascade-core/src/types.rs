//! Common types used across the Cascade engine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FlowError;

/// Index of an artifact inside the registry arena.
///
/// Edges between artifacts are stored as ids, never as owning references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactId(pub usize);

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kind of document held by an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArtifactType {
    /// Free-form requirement written by a person.
    RawRequirement,
    /// Product requirement document.
    Prd,
    /// Project-wide system design shared by every module.
    SystemDesign,
    /// Module design.
    Design,
    /// Task breakdown derived from a design.
    Tasks,
    /// Source file.
    Code,
}

impl ArtifactType {
    /// Every artifact type, in pipeline order.
    pub const ALL: [ArtifactType; 6] = [
        ArtifactType::RawRequirement,
        ArtifactType::Prd,
        ArtifactType::SystemDesign,
        ArtifactType::Design,
        ArtifactType::Tasks,
        ArtifactType::Code,
    ];

    /// Upper-case wire name (e.g. `SYSTEM_DESIGN`).
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactType::RawRequirement => "RAW_REQUIREMENT",
            ArtifactType::Prd => "PRD",
            ArtifactType::SystemDesign => "SYSTEM_DESIGN",
            ArtifactType::Design => "DESIGN",
            ArtifactType::Tasks => "TASKS",
            ArtifactType::Code => "CODE",
        }
    }

    /// File name prefix used by the default storage convention.
    ///
    /// Code files keep their own name.
    pub fn file_prefix(&self) -> Option<&'static str> {
        match self {
            ArtifactType::RawRequirement => Some("RAW"),
            ArtifactType::Prd => Some("PRD"),
            ArtifactType::SystemDesign => Some("SYSTEM-DESIGN"),
            ArtifactType::Design => Some("DESIGN"),
            ArtifactType::Tasks => Some("TASKS"),
            ArtifactType::Code => None,
        }
    }

    /// Lower-case name used as a template placeholder (e.g. `system_design`).
    pub fn placeholder(&self) -> String {
        self.as_str().to_ascii_lowercase()
    }
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactType {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ArtifactType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| FlowError::Serialization(format!("unknown artifact type '{}'", s)))
    }
}

/// Kind of regeneration work an action performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    /// Record a requirement verbatim.
    AddRequirement,
    /// Requirement to PRD.
    WritePrd,
    /// PRD to module design.
    WriteDesign,
    /// Design to task breakdown.
    WriteTasks,
    /// Design to source files.
    WriteCode,
}

impl ActionKind {
    /// Every action kind.
    pub const ALL: [ActionKind; 5] = [
        ActionKind::AddRequirement,
        ActionKind::WritePrd,
        ActionKind::WriteDesign,
        ActionKind::WriteTasks,
        ActionKind::WriteCode,
    ];

    /// Upper-case wire name (e.g. `WRITE_PRD`).
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::AddRequirement => "ADD_REQUIREMENT",
            ActionKind::WritePrd => "WRITE_PRD",
            ActionKind::WriteDesign => "WRITE_DESIGN",
            ActionKind::WriteTasks => "WRITE_TASKS",
            ActionKind::WriteCode => "WRITE_CODE",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| FlowError::Serialization(format!("unknown action kind '{}'", s)))
    }
}

/// How many downstream artifacts one source may have under an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// Exactly one downstream per source (default).
    #[default]
    OneToOne,
    /// Several downstreams per source. Expansion does not support this.
    OneToMany,
}

/// Why a prompt is being built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    /// Direct edit request against the target.
    Task,
    /// Follow-up revision of an uncommitted result.
    Comment,
    /// Upstream change, target has never had content.
    DependencyCreate,
    /// Upstream change, target already has content.
    DependencyUpdate,
}

/// Lifecycle of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting in the task queue.
    Queued,
    /// Prompt building or generation in progress.
    Executing,
    /// A revision is staged and waits for commit.
    Staged,
    /// The staged revision was committed.
    Committed,
    /// The caller abandoned the staged revision.
    Discarded,
    /// Generation, parsing or dependency resolution failed.
    Failed,
}

impl TaskState {
    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Committed | TaskState::Discarded | TaskState::Failed
        )
    }
}
