//! # Cascade Scheduler
//!
//! Pull-driven execution: commit events expand into tasks, tasks run one at a
//! time into staged revisions, and the caller decides what gets committed.
//!
//! ```ignore
//! while let Some(staged) = scheduler.execute_next_task().await? {
//!     scheduler.commit(staged).await?;
//! }
//! ```

pub mod queue;
pub mod scheduler;

pub use queue::{EventQueue, TaskQueue};
pub use scheduler::{FailedEffect, FailedTask, Scheduler, StagedRevision};
