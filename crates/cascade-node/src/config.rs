//! Driver configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use cascade_actions::{CommandGenerator, Generator, RecordingGenerator, ReplayGenerator};
use cascade_core::FlowConfig;
use serde::{Deserialize, Serialize};

/// Default config file name, relative to the workspace root.
pub const CONFIG_FILE: &str = "cascade.json";

/// Settings for one run of the driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine settings shared with the library crates.
    #[serde(flatten)]
    pub flow: FlowConfig,
    /// Commit every staged revision without review.
    pub auto_commit: bool,
    /// Stop after this many tasks.
    pub max_tasks: Option<usize>,
    /// Directory of recorded responses.
    pub replay_dir: Option<PathBuf>,
    /// Record live responses into `replay_dir`.
    pub record_responses: bool,
    /// External program answering prompts on stdin/stdout.
    pub generator_command: Option<String>,
    /// Filter used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            flow: FlowConfig::default(),
            auto_commit: true,
            max_tasks: None,
            replay_dir: None,
            record_responses: false,
            generator_command: None,
            log_filter: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file. A missing file yields defaults.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => {
                return Err(err).with_context(|| format!("Failed to read {}", path.display()))
            }
        };
        serde_json::from_str(&text).with_context(|| format!("Invalid config in {}", path.display()))
    }

    /// Resolve a possibly relative path against the workspace root.
    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.flow.workspace_root.join(path)
        }
    }

    /// Build the configured generator.
    ///
    /// A command wins over replay; with `record_responses` its answers are
    /// written to `replay_dir`.
    pub fn generator(&self) -> anyhow::Result<Arc<dyn Generator>> {
        if let Some(line) = &self.generator_command {
            let command = CommandGenerator::from_command_line(line)?;
            let generator: Arc<dyn Generator> = match (&self.replay_dir, self.record_responses) {
                (Some(dir), true) => Arc::new(RecordingGenerator::new(command, self.resolve(dir))),
                (None, true) => bail!("record_responses needs a replay_dir"),
                _ => Arc::new(command),
            };
            return Ok(generator);
        }
        if let Some(dir) = &self.replay_dir {
            return Ok(Arc::new(ReplayGenerator::new(self.resolve(dir))));
        }
        bail!("No generator configured: set generator_command or replay_dir")
    }
}
