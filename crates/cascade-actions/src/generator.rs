//! Text generators.
//!
//! The engine treats generation as an opaque call: a prompt plus earlier
//! conversation turns in, text out. [`ReplayGenerator`] and
//! [`RecordingGenerator`] make runs reproducible; [`CommandGenerator`] hands
//! the prompt to any external program.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use cascade_core::{FlowError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One earlier message in the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

/// Produces text for a prompt.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate a response to `prompt`, given the earlier turns of the conversation.
    async fn generate(&self, prompt: &str, prior: &[Turn]) -> Result<String>;
}

#[async_trait]
impl<G: Generator + ?Sized> Generator for Arc<G> {
    async fn generate(&self, prompt: &str, prior: &[Turn]) -> Result<String> {
        (**self).generate(prompt, prior).await
    }
}

/// Stable key for a prompt and its conversation, hex SHA-256.
pub fn recording_key(prompt: &str, prior: &[Turn]) -> String {
    let mut hasher = Sha256::new();
    for turn in prior {
        let json = serde_json::to_string(turn).unwrap_or_default();
        hasher.update(json.as_bytes());
        hasher.update(b"\n");
    }
    hasher.update(prompt.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Answers from responses recorded on disk.
#[derive(Debug, Clone)]
pub struct ReplayGenerator {
    dir: PathBuf,
}

impl ReplayGenerator {
    /// Replay from `dir`, one `<key>.md` file per response.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.md", key))
    }
}

#[async_trait]
impl Generator for ReplayGenerator {
    async fn generate(&self, prompt: &str, prior: &[Turn]) -> Result<String> {
        let key = recording_key(prompt, prior);
        let path = self.path_for(&key);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => {
                tracing::debug!("Replayed response {} ({} bytes)", key, text.len());
                Ok(text)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(FlowError::generation(
                format!("no recorded response for {}", path.display()),
                false,
            )),
            Err(err) => Err(FlowError::generation(
                format!("read {}: {}", path.display(), err),
                true,
            )),
        }
    }
}

/// Writes every response of an inner generator where [`ReplayGenerator`] will find it.
pub struct RecordingGenerator<G> {
    inner: G,
    dir: PathBuf,
}

impl<G: Generator> RecordingGenerator<G> {
    pub fn new(inner: G, dir: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            dir: dir.into(),
        }
    }
}

#[async_trait]
impl<G: Generator> Generator for RecordingGenerator<G> {
    async fn generate(&self, prompt: &str, prior: &[Turn]) -> Result<String> {
        let response = self.inner.generate(prompt, prior).await?;
        let key = recording_key(prompt, prior);

        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(format!("{}.md", key));
        tokio::fs::write(&path, &response).await?;
        tracing::debug!("Recorded response {}", key);

        Ok(response)
    }
}

#[derive(Serialize)]
struct CommandInput<'a> {
    prompt: &'a str,
    prior: &'a [Turn],
}

/// Runs an external program per prompt.
///
/// The program receives `{"prompt": ..., "prior": [...]}` on stdin and answers on stdout.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    program: String,
    args: Vec<String>,
}

impl CommandGenerator {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Parse a whitespace-separated command line.
    pub fn from_command_line(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| FlowError::Internal("empty generator command".to_string()))?;
        Ok(Self::new(program, parts.collect()))
    }
}

#[async_trait]
impl Generator for CommandGenerator {
    async fn generate(&self, prompt: &str, prior: &[Turn]) -> Result<String> {
        let input = serde_json::to_vec(&CommandInput { prompt, prior })?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| FlowError::generation(format!("spawn {}: {}", self.program, e), false))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&input)
                .await
                .map_err(|e| FlowError::generation(format!("write prompt: {}", e), true))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| FlowError::generation(format!("wait for {}: {}", self.program, e), true))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FlowError::generation(
                format!("{} exited with {}: {}", self.program, output.status, stderr.trim()),
                true,
            ));
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        tracing::debug!(
            "{} answered {} bytes for a {} byte prompt",
            self.program,
            text.len(),
            prompt.len()
        );
        Ok(text)
    }
}
