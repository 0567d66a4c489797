//! The pull-driven scheduler.
//!
//! A driver calls [`Scheduler::execute_next_task`] in a loop. Each call first
//! expands every queued commit event into tasks, then runs exactly one task up
//! to a staged revision. Nothing becomes durable until the driver hands the
//! returned [`StagedRevision`] to [`Scheduler::commit`].

use std::sync::Arc;

use cascade_actions::{
    Action, ActionRegistry, CommitEffect, Generator, ParsedResult, PromptPlan, PromptRequest,
    ReactionTable, Turn,
};
use cascade_core::{
    ActionKind, ArtifactId, Cardinality, Event, FlowError, PromptKind, Result, StageMark, Task, TaskState,
};
use cascade_graph::{
    ArtifactSpec, CommitFeed, CommitFilter, CommitNotice, CommitSubscription, Registry, Workspace,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::queue::{EventQueue, TaskQueue};

/// A task whose output is staged on its target but not committed.
#[must_use = "a staged revision must be committed or discarded"]
#[derive(Debug)]
pub struct StagedRevision {
    task: Task,
    mark: StageMark,
    turns: Vec<Turn>,
    staged: usize,
}

impl StagedRevision {
    pub fn task(&self) -> &Task {
        &self.task
    }

    /// Artifact holding the staged revisions.
    pub fn target(&self) -> ArtifactId {
        self.task.target
    }

    /// Prompt/response turns exchanged so far.
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Number of revisions this handle staged.
    pub fn revisions(&self) -> usize {
        self.staged
    }

    /// True when the action had nothing to stage.
    pub fn is_empty(&self) -> bool {
        self.staged == 0
    }
}

/// A task that failed, with the error that stopped it.
#[derive(Debug, Clone)]
pub struct FailedTask {
    pub task: Task,
    pub error: FlowError,
}

/// A derived file that could not be written after its source committed.
#[derive(Debug, Clone)]
pub struct FailedEffect {
    pub source: ArtifactId,
    pub file_path: String,
    pub error: FlowError,
}

/// Turns commits into tasks and tasks into staged revisions.
pub struct Scheduler {
    workspace: Workspace,
    actions: ActionRegistry,
    reactions: ReactionTable,
    generator: Arc<dyn Generator>,
    events: EventQueue,
    tasks: TaskQueue,
    feed: CommitFeed,
    failed: Vec<FailedTask>,
    failed_effects: Vec<FailedEffect>,
}

impl Scheduler {
    /// Create a scheduler over `workspace`.
    pub fn new(
        workspace: Workspace,
        actions: ActionRegistry,
        reactions: ReactionTable,
        generator: Arc<dyn Generator>,
    ) -> Self {
        Self {
            workspace,
            actions,
            reactions,
            generator,
            events: EventQueue::new(),
            tasks: TaskQueue::new(),
            feed: CommitFeed::default(),
            failed: Vec::new(),
            failed_effects: Vec::new(),
        }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn workspace_mut(&mut self) -> &mut Workspace {
        &mut self.workspace
    }

    pub fn registry(&self) -> &Registry {
        self.workspace.registry()
    }

    pub fn actions(&self) -> &ActionRegistry {
        &self.actions
    }

    pub fn events(&self) -> &EventQueue {
        &self.events
    }

    pub fn tasks(&self) -> &TaskQueue {
        &self.tasks
    }

    /// True when neither events nor tasks are waiting.
    pub fn is_idle(&self) -> bool {
        self.events.is_empty() && self.tasks.is_empty()
    }

    /// Subscribe to commit notices.
    pub fn subscribe(&self, filter: CommitFilter) -> CommitSubscription {
        self.feed.subscribe(filter)
    }

    /// Queue a task. Returns its id.
    pub fn submit(&mut self, task: Task) -> Uuid {
        let id = task.id;
        debug!("Queued {} on {}", task.action, task.target);
        self.tasks.push(task);
        id
    }

    /// Queue a direct edit of `target`, run by the action that produces its type.
    pub fn submit_edit(&mut self, target: ArtifactId, instruction: impl Into<String>) -> Result<Uuid> {
        let artifact_type = self.registry().get(target)?.artifact_type();
        let action = self.actions.producer_of(artifact_type)?;
        Ok(self.submit(Task::new(action.kind(), target).with_instruction(instruction)))
    }

    /// Commit `content` verbatim into the artifact `spec` names, creating it if needed.
    ///
    /// For inputs no action produces, such as the system design. Returns
    /// `None` as the event when the content is unchanged.
    pub async fn add_document(
        &mut self,
        spec: ArtifactSpec,
        content: &str,
    ) -> Result<(ArtifactId, Option<Event>)> {
        let id = self.workspace.get_or_create(spec).await?;
        let artifact = self.registry().get(id)?;
        if artifact.version() > 0 && artifact.content() == content {
            return Ok((id, None));
        }
        self.workspace.registry_mut().stage(id, content)?;
        let event = self.commit_artifact(id).await?;
        Ok((id, event))
    }

    /// Drop a queued task without side effects.
    pub fn cancel(&mut self, id: Uuid) -> Option<Task> {
        let mut task = self.tasks.cancel(id)?;
        task.state = TaskState::Discarded;
        info!("Cancelled task {}", id);
        Some(task)
    }

    /// Failed tasks since the last call.
    pub fn take_failed(&mut self) -> Vec<FailedTask> {
        std::mem::take(&mut self.failed)
    }

    /// Drain commit effects that failed since the last call.
    pub fn take_failed_effects(&mut self) -> Vec<FailedEffect> {
        std::mem::take(&mut self.failed_effects)
    }

    /// Queue a change event for an already committed artifact, re-running its downstreams.
    pub fn propagate(&mut self, id: ArtifactId) -> Result<()> {
        let artifact = self.registry().get(id)?;
        let event = Event::new(
            id,
            artifact.key(),
            artifact.version(),
            artifact.committed_at().unwrap_or_else(chrono::Utc::now),
        );
        self.events.push(event);
        Ok(())
    }

    /// Expand every queued event into tasks.
    ///
    /// Stops at the first event that fails to expand and returns its error;
    /// events behind it stay queued.
    pub async fn drain_events(&mut self) -> Result<usize> {
        let mut queued = 0;
        while let Some(event) = self.events.pop() {
            let source = self.registry().get(event.artifact)?;
            let reactions = self.reactions.resolve(source, &self.actions)?;
            if reactions.is_empty() {
                continue;
            }

            let expansion = match self.workspace.expand(event.artifact, &reactions).await {
                Ok(expansion) => expansion,
                Err(err) => {
                    warn!("Expansion of {} failed: {}", event.key.path, err);
                    return Err(err);
                }
            };
            info!(
                "{} {} v{} expanded into {} task(s)",
                event.key.artifact_type,
                event.key.path,
                event.version,
                expansion.tasks.len()
            );
            queued += expansion.tasks.len();
            self.tasks.extend(expansion.tasks);
        }
        Ok(queued)
    }

    /// Run the next task up to a staged revision. `None` when no work is left.
    pub async fn execute_next_task(&mut self) -> Result<Option<StagedRevision>> {
        self.drain_events().await?;

        let Some(mut task) = self.tasks.pop() else {
            return Ok(None);
        };
        task.state = TaskState::Executing;
        info!("Executing {} on {}", task.action, task.target);

        let mark = self.workspace.registry().stage_mark(task.target);
        let result = match mark {
            Ok(mark) => self.run_task(&task, mark).await,
            Err(err) => Err(err),
        };

        match result {
            Ok((mark, turns, staged)) => {
                task.state = TaskState::Staged;
                Ok(Some(StagedRevision {
                    task,
                    mark,
                    turns,
                    staged,
                }))
            }
            Err(err) => {
                warn!("Task {} ({}) failed: {}", task.id, task.action, err);
                task.state = TaskState::Failed;
                self.failed.push(FailedTask {
                    task,
                    error: err.clone(),
                });
                Err(err)
            }
        }
    }

    fn prompt_kind(&self, task: &Task) -> Result<PromptKind> {
        if task.source.is_none() || task.instruction.is_some() {
            return Ok(PromptKind::Task);
        }
        let target = self.registry().get(task.target)?;
        Ok(if target.has_content() {
            PromptKind::DependencyUpdate
        } else {
            PromptKind::DependencyCreate
        })
    }

    async fn run_task(&mut self, task: &Task, mark: StageMark) -> Result<(StageMark, Vec<Turn>, usize)> {
        let action = self.actions.get(task.action)?;
        let kind = self.prompt_kind(task)?;
        let plan = action.build_prompt(&PromptRequest {
            kind,
            task,
            registry: self.workspace.registry(),
            instruction: task.instruction.as_deref(),
        })?;

        let mut turns = Vec::new();
        let staged = self
            .apply_plan(action.as_ref(), task.target, plan, &[], &mut turns)
            .await?;
        Ok((mark, turns, staged))
    }

    /// Generate (if needed), parse and stage. Returns how many revisions were staged.
    async fn apply_plan(
        &mut self,
        action: &dyn Action,
        target: ArtifactId,
        plan: PromptPlan,
        prior: &[Turn],
        turns: &mut Vec<Turn>,
    ) -> Result<usize> {
        match plan {
            PromptPlan::NoAction => {
                debug!("{} has nothing to stage on {}", action.kind(), target);
                Ok(0)
            }
            PromptPlan::Verbatim(text) => {
                self.workspace.registry_mut().stage(target, &text)?;
                Ok(1)
            }
            PromptPlan::Generate(prompt) => {
                debug!("Generating for {} ({} byte prompt)", target, prompt.len());
                let response = self.generator.generate(&prompt, prior).await?;

                let registry = self.workspace.registry();
                let schema = registry.get(target)?.schema();
                let parsed = action.parse_result(&response, schema, registry.parser())?;

                let registry = self.workspace.registry_mut();
                match parsed {
                    ParsedResult::Sections(sections) => registry.stage_sections(target, sections)?,
                    ParsedResult::Text(text) => registry.stage(target, &text)?,
                };
                turns.push(Turn::user(prompt));
                turns.push(Turn::assistant(response));
                Ok(1)
            }
        }
    }

    /// Stage a follow-up revision on a staged target from a comment.
    ///
    /// On failure the handle and the target are unchanged.
    pub async fn comment(&mut self, staged: &mut StagedRevision, comment: &str) -> Result<()> {
        let action = self.actions.get(staged.task.action)?;
        let plan = action.build_prompt(&PromptRequest {
            kind: PromptKind::Comment,
            task: &staged.task,
            registry: self.workspace.registry(),
            instruction: Some(comment),
        })?;

        let limit = self.workspace.config().max_prior_turns;
        let prior: Vec<Turn> = staged
            .turns
            .iter()
            .skip(staged.turns.len().saturating_sub(limit))
            .cloned()
            .collect();

        let mut turns = Vec::new();
        let count = self
            .apply_plan(action.as_ref(), staged.task.target, plan, &prior, &mut turns)
            .await?;
        staged.turns.extend(turns);
        staged.staged += count;
        info!("Comment staged {} revision(s) on {}", count, staged.task.target);
        Ok(())
    }

    /// Abandon a staged revision: drop exactly what it staged. No event.
    pub fn discard(&mut self, staged: StagedRevision) -> Result<Task> {
        let StagedRevision { mut task, mark, .. } = staged;
        self.workspace.registry_mut().rollback(task.target, mark)?;
        task.state = TaskState::Discarded;
        info!("Discarded {} on {}", task.action, task.target);
        Ok(task)
    }

    /// Commit a staged revision: persist, queue the event, notify subscribers
    /// and apply the action's commit effects.
    pub async fn commit(&mut self, staged: StagedRevision) -> Result<Option<Event>> {
        let task = staged.task;

        let Some(event) = self.commit_artifact(task.target).await? else {
            debug!("Nothing staged on {}, commit was a no-op", task.target);
            return Ok(None);
        };
        info!("Committed {} v{} ({})", event.key.path, event.version, task.action);

        // The target is durable from here on, so effect failures are
        // recorded instead of hiding the event from the caller.
        let effects = self
            .actions
            .get(task.action)
            .and_then(|action| action.on_commit(self.registry().get(task.target)?));
        let effects = match effects {
            Ok(effects) => effects,
            Err(error) => {
                warn!("Commit effects of {} failed: {}", event.key.path, error);
                self.failed_effects.push(FailedEffect {
                    source: task.target,
                    file_path: event.key.path.clone(),
                    error,
                });
                return Ok(Some(event));
            }
        };
        for effect in effects {
            let file_path = effect.artifact.file_path();
            if let Err(error) = self.apply_effect(task.target, task.action, effect).await {
                warn!("Derived file {} not written: {}", file_path, error);
                self.failed_effects.push(FailedEffect {
                    source: task.target,
                    file_path,
                    error,
                });
            }
        }
        Ok(Some(event))
    }

    async fn commit_artifact(&mut self, id: ArtifactId) -> Result<Option<Event>> {
        let Some(event) = self.workspace.commit(id).await? else {
            return Ok(None);
        };
        self.events.push(event.clone());
        let notice = CommitNotice::from_artifact(self.registry().get(id)?);
        self.feed.publish(notice);
        Ok(Some(event))
    }

    /// Write a derived artifact; it watches `source` under the producing action.
    async fn apply_effect(&mut self, source: ArtifactId, kind: ActionKind, effect: CommitEffect) -> Result<()> {
        let id = self.workspace.get_or_create(effect.artifact).await?;
        self.workspace
            .registry_mut()
            .add_watch(source, id, kind, Cardinality::OneToMany)?;

        if self.registry().get(id)?.working_content() == effect.content {
            return Ok(());
        }
        self.workspace.registry_mut().stage(id, &effect.content)?;
        self.commit_artifact(id).await?;
        Ok(())
    }
}
