//! The pull loop.

use cascade_core::FlowError;
use cascade_scheduler::Scheduler;
use tracing::{error, info, warn};

use crate::config::EngineConfig;

/// Why [`Engine::run`] returned.
#[derive(Debug)]
pub enum StopReason {
    /// Both queues are empty.
    Idle,
    /// `max_tasks` tasks ran.
    TaskLimit,
    /// Auto-commit is off and a revision waits for review.
    AwaitingReview { file_path: String, content: String },
    /// A task failed.
    Failed(FlowError),
}

/// What a run did.
#[derive(Debug)]
pub struct RunSummary {
    pub executed: usize,
    pub committed: usize,
    pub stopped: StopReason,
}

/// Drives a [`Scheduler`] until there is nothing left to do.
pub struct Engine {
    scheduler: Scheduler,
    auto_commit: bool,
    max_tasks: Option<usize>,
}

impl Engine {
    /// Create a new engine.
    pub fn new(scheduler: Scheduler, config: &EngineConfig) -> Self {
        Self {
            scheduler,
            auto_commit: config.auto_commit,
            max_tasks: config.max_tasks,
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    /// Run the engine's main loop.
    pub async fn run(&mut self) -> RunSummary {
        info!("🔧 Engine started");
        let mut executed = 0;
        let mut committed = 0;

        let stopped = loop {
            if self.max_tasks.is_some_and(|max| executed >= max) {
                info!("Task limit of {} reached", executed);
                break StopReason::TaskLimit;
            }

            let staged = match self.scheduler.execute_next_task().await {
                Ok(Some(staged)) => staged,
                Ok(None) => break StopReason::Idle,
                Err(err) => {
                    for failed in self.scheduler.take_failed() {
                        error!(
                            "❌ {} on {} failed: {}",
                            failed.task.action, failed.task.target, failed.error
                        );
                    }
                    break StopReason::Failed(err);
                }
            };
            executed += 1;

            if !self.auto_commit {
                let target = staged.target();
                let Ok(artifact) = self.scheduler.registry().get(target) else {
                    break StopReason::Failed(FlowError::ArtifactNotFound(target.to_string()));
                };
                break StopReason::AwaitingReview {
                    file_path: artifact.file_path(),
                    content: artifact.working_content().to_string(),
                };
            }

            match self.scheduler.commit(staged).await {
                Ok(Some(event)) => {
                    committed += 1;
                    info!("✅ {} v{} committed", event.key.path, event.version);
                    for failed in self.scheduler.take_failed_effects() {
                        warn!("⚠️ {} not written: {}", failed.file_path, failed.error);
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    error!("❌ Commit failed: {}", err);
                    break StopReason::Failed(err);
                }
            }
        };

        RunSummary {
            executed,
            committed,
            stopped,
        }
    }
}
