//! Units of regeneration work and commit notifications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::artifact::ArtifactKey;
use crate::types::{ActionKind, ArtifactId, TaskState};

/// A unit of regeneration work: one action applied to one target artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier.
    pub id: Uuid,

    /// Artifact the action writes to.
    pub target: ArtifactId,

    /// Upstream artifact whose commit caused this task, if any.
    pub source: Option<ArtifactId>,

    /// Action to run.
    pub action: ActionKind,

    /// Free-form instruction for direct edits and requirements.
    pub instruction: Option<String>,

    /// Lifecycle state.
    pub state: TaskState,

    /// When the task was created.
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Create a task of `action` against `target`.
    pub fn new(action: ActionKind, target: ArtifactId) -> Self {
        Self {
            id: Uuid::new_v4(),
            target,
            source: None,
            action,
            instruction: None,
            state: TaskState::Queued,
            created_at: Utc::now(),
        }
    }

    /// Task triggered by a commit of `source`.
    pub fn from_dependency(action: ActionKind, source: ArtifactId, target: ArtifactId) -> Self {
        Self::new(action, target).with_source(source)
    }

    /// Set the upstream that caused the task.
    pub fn with_source(mut self, source: ArtifactId) -> Self {
        self.source = Some(source);
        self
    }

    /// Attach an instruction.
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    /// True when the task was caused by an upstream commit rather than a direct request.
    pub fn is_dependency_task(&self) -> bool {
        self.source.is_some() && self.instruction.is_none()
    }
}

/// Emitted when an artifact commits a new version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier.
    pub id: Uuid,
    /// Committed artifact.
    pub artifact: ArtifactId,
    /// Identity of the committed artifact.
    pub key: ArtifactKey,
    /// Version reached by the commit.
    pub version: u64,
    /// Commit time.
    pub committed_at: DateTime<Utc>,
}

impl Event {
    /// Create a new commit event.
    pub fn new(
        artifact: ArtifactId,
        key: ArtifactKey,
        version: u64,
        committed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            artifact,
            key,
            version,
            committed_at,
        }
    }
}
