//! # Cascade Core
//!
//! Core types for the Cascade regeneration engine.
//!
//! This crate provides the building blocks shared by every other crate:
//! - [`Artifact`] - Versioned document with staged revisions
//! - [`Task`] / [`Event`] - Regeneration work and commit notifications
//! - [`SectionParser`] - Section-structured document parsing
//! - [`FlowError`] - Error taxonomy

pub mod artifact;
pub mod config;
pub mod error;
pub mod sections;
pub mod task;
pub mod types;

// Re-exports for convenience
pub use artifact::{Artifact, ArtifactKey, StageMark};
pub use config::FlowConfig;
pub use error::{FlowError, Result};
pub use sections::{MarkdownSections, RenderKind, SectionParser, SectionSchema, Sections};
pub use task::{Event, Task};
pub use types::*;

/// Prelude module for common imports
pub mod prelude {
    pub use crate::artifact::{Artifact, ArtifactKey};
    pub use crate::error::{FlowError, Result};
    pub use crate::sections::{MarkdownSections, SectionParser, SectionSchema, Sections};
    pub use crate::task::{Event, Task};
    pub use crate::types::{ActionKind, ArtifactId, ArtifactType, Cardinality, PromptKind};
}
