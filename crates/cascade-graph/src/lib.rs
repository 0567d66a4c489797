//! # Cascade Graph
//!
//! Artifact registry with watch edges, persistence and commit notifications.

pub mod expansion;
pub mod registry;
pub mod snapshot;
pub mod store;
pub mod subscription;
pub mod workspace;

pub use expansion::{Expansion, Reaction};
pub use registry::{ArtifactSpec, Registry};
pub use snapshot::{ArtifactRecord, GraphDocument};
pub use store::{ContentStore, FsContentStore, InMemoryContentStore};
pub use subscription::{CommitFeed, CommitFilter, CommitNotice, CommitSubscription};
pub use workspace::Workspace;
