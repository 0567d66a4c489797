//! Workspace layout configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Where artifacts live on disk and how the graph is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Root directory all artifact paths are relative to.
    pub workspace_root: PathBuf,

    /// Graph document file name, relative to the workspace root.
    pub graph_file: String,

    /// Directory new documents are created in when none is given.
    pub default_dir: String,

    /// Save the graph document after every commit.
    pub autosave_graph: bool,

    /// Maximum number of earlier prompt/response turns replayed on a comment.
    pub max_prior_turns: usize,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("."),
            graph_file: "artifacts.json".to_string(),
            default_dir: "docs".to_string(),
            autosave_graph: true,
            max_prior_turns: 8,
        }
    }
}

impl FlowConfig {
    /// Config rooted at `root`, everything else default.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: root.into(),
            ..Self::default()
        }
    }

    /// Absolute location of the graph document.
    pub fn graph_path(&self) -> PathBuf {
        self.workspace_root.join(&self.graph_file)
    }
}
