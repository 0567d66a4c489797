//! Error types for the Cascade engine.

use thiserror::Error;

use crate::types::{ActionKind, ArtifactType};

/// Main error type for Cascade operations.
#[derive(Error, Debug, Clone)]
pub enum FlowError {
    /// An action needs an upstream artifact of a type the target does not depend on.
    #[error("Artifact {artifact} has no {dependency_type} dependency")]
    MissingDependency {
        artifact: String,
        dependency_type: ArtifactType,
    },

    /// Watcher expansion found more than one downstream for a one-to-one action.
    #[error("Artifact {source_path} has {count} watchers under {action}, expected at most one")]
    DuplicateImpact {
        source_path: String,
        action: ActionKind,
        count: usize,
    },

    /// A one-to-many action was asked to expand.
    #[error("Fan-out expansion is not implemented for action {action}")]
    UnsupportedFanOut { action: ActionKind },

    /// A downstream already depends on a different artifact of the same type.
    #[error("Artifact {artifact} already depends on {existing} as its {dependency_type}, refusing {requested}")]
    DuplicateDependency {
        artifact: String,
        dependency_type: ArtifactType,
        existing: String,
        requested: String,
    },

    /// An implicit dependency lookup matched several artifacts.
    #[error("Found {count} artifacts of type {dependency_type}, cannot pick one")]
    AmbiguousDependency {
        dependency_type: ArtifactType,
        count: usize,
    },

    /// The generator call failed.
    #[error("Generation failed: {message}")]
    GenerationFailed { message: String, transient: bool },

    /// Generated text could not be parsed into sections.
    #[error("Parse failed in section '{section}': {message}")]
    ParseFailed { section: String, message: String },

    /// No action is registered for the requested kind.
    #[error("No action registered for {0}")]
    UnknownAction(ActionKind),

    /// No artifact produces the requested type.
    #[error("No action produces artifacts of type {0}")]
    NoProducer(ArtifactType),

    /// Artifact lookup failed.
    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    /// An artifact with the same identity already exists.
    #[error("Artifact already exists: {0}")]
    ArtifactExists(String),

    /// Content or graph persistence failed.
    #[error("Storage error: {message}")]
    Storage { message: String },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error (should not happen).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FlowError {
    /// Returns true if retrying the same task may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, FlowError::GenerationFailed { transient: true, .. })
    }

    /// Returns true for graph consistency violations that need a human to fix the graph.
    pub fn is_consistency_error(&self) -> bool {
        matches!(
            self,
            FlowError::DuplicateImpact { .. }
                | FlowError::DuplicateDependency { .. }
                | FlowError::AmbiguousDependency { .. }
        )
    }

    /// Shorthand for a generator failure.
    pub fn generation(message: impl Into<String>, transient: bool) -> Self {
        FlowError::GenerationFailed {
            message: message.into(),
            transient,
        }
    }

    /// Shorthand for a storage failure.
    pub fn storage(message: impl Into<String>) -> Self {
        FlowError::Storage {
            message: message.into(),
        }
    }
}

/// Convenience Result type for Cascade operations.
pub type Result<T> = std::result::Result<T, FlowError>;

impl From<serde_json::Error> for FlowError {
    fn from(err: serde_json::Error) -> Self {
        FlowError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for FlowError {
    fn from(err: std::io::Error) -> Self {
        FlowError::storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(FlowError::generation("timeout", true).is_transient());
        assert!(!FlowError::generation("bad request", false).is_transient());
        assert!(!FlowError::UnsupportedFanOut {
            action: ActionKind::WriteCode
        }
        .is_transient());
    }

    #[test]
    fn test_consistency_classification() {
        let err = FlowError::DuplicateImpact {
            source_path: "docs/PRD_X.md".to_string(),
            action: ActionKind::WriteDesign,
            count: 2,
        };
        assert!(err.is_consistency_error());
        assert!(err.to_string().contains("WRITE_DESIGN"));

        let missing = FlowError::MissingDependency {
            artifact: "docs/DESIGN_X.md".to_string(),
            dependency_type: ArtifactType::SystemDesign,
        };
        assert!(!missing.is_consistency_error());
        assert!(missing.to_string().contains("SYSTEM_DESIGN"));
    }
}
