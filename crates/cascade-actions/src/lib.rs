//! # Cascade Actions
//!
//! Regeneration handlers, the reaction table and text generators.

pub mod action;
pub mod document;
pub mod generator;
pub mod pipeline;

pub use action::{
    line_diff, Action, ActionRegistry, CommitEffect, ParsedResult, PromptPlan, PromptRequest,
    ReactionTable,
};
pub use document::{DocumentAction, RequirementAction};
pub use generator::{
    CommandGenerator, Generator, RecordingGenerator, ReplayGenerator, Role, Turn,
};
pub use pipeline::{standard_actions, standard_reactions};
