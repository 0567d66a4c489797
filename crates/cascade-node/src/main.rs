//! # Cascade
//!
//! Command-line driver: keeps a directory of dependent documents up to date.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use cascade_actions::{standard_actions, standard_reactions};
use cascade_core::{ArtifactType, MarkdownSections};
use cascade_graph::{ArtifactSpec, CommitFilter, ContentStore, FsContentStore, Workspace};
use cascade_scheduler::Scheduler;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod config;
mod engine;

use config::{EngineConfig, CONFIG_FILE};
use engine::{Engine, StopReason};

#[derive(Parser, Debug)]
#[command(name = "cascade", version, about = "Regenerate dependent documents when their inputs change")]
struct Cli {
    /// Workspace root.
    #[arg(short = 'C', long, env = "CASCADE_ROOT", default_value = ".")]
    root: PathBuf,

    /// Config file, relative to the workspace root.
    #[arg(long, default_value = CONFIG_FILE)]
    config: PathBuf,

    /// Stop at the first staged revision instead of committing it.
    #[arg(long)]
    review: bool,

    /// Stop after this many tasks.
    #[arg(long)]
    max_tasks: Option<usize>,

    /// Answer prompts from recorded responses in this directory.
    #[arg(long)]
    replay: Option<PathBuf>,

    /// External generator command.
    #[arg(long, env = "CASCADE_GENERATOR")]
    generator: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the graph document and a default config.
    Init,
    /// Create or replace a raw requirement, then regenerate what depends on it.
    Requirement {
        /// Identity path, e.g. `docs/todo.md`.
        path: String,
        /// Requirement text.
        text: String,
    },
    /// Create or replace the system design, then regenerate the designs that read it.
    SystemDesign {
        /// Identity path, e.g. `docs/system_design.md`.
        path: String,
        /// System design text.
        text: String,
    },
    /// Edit the artifact stored at a file path, then regenerate what depends on it.
    Edit {
        file_path: String,
        instruction: String,
    },
    /// Re-run everything downstream of the committed requirements.
    Run,
    /// List artifacts.
    Status,
}

impl Cli {
    /// Apply command-line overrides to the loaded config.
    fn apply(&self, config: &mut EngineConfig) {
        config.flow.workspace_root = self.root.clone();
        if self.review {
            config.auto_commit = false;
        }
        if self.max_tasks.is_some() {
            config.max_tasks = self.max_tasks;
        }
        if self.replay.is_some() {
            config.replay_dir = self.replay.clone();
        }
        if self.generator.is_some() {
            config.generator_command = self.generator.clone();
        }
    }
}

fn init_tracing(config: &EngineConfig) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.log_filter))?;
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

async fn open_workspace(config: &EngineConfig) -> anyhow::Result<Workspace> {
    let store = Arc::new(FsContentStore::new(&config.flow.workspace_root));
    Workspace::open(config.flow.clone(), store, Arc::new(MarkdownSections))
        .await
        .with_context(|| format!("Failed to open workspace {}", config.flow.workspace_root.display()))
}

async fn init(config: &EngineConfig, config_path: &str) -> anyhow::Result<()> {
    let workspace = open_workspace(config).await?;
    workspace.save().await?;

    let store = workspace.store();
    if !store.exists(config_path).await? {
        store
            .write(config_path, &serde_json::to_string_pretty(config)?)
            .await?;
    }
    println!(
        "Initialized {} ({} artifacts)",
        config.flow.workspace_root.display(),
        workspace.registry().len()
    );
    Ok(())
}

/// Spec for a user-supplied input; a bare name lands in the default directory.
fn input_spec(artifact_type: ArtifactType, path: String, config: &EngineConfig) -> ArtifactSpec {
    if path.contains('/') {
        ArtifactSpec::from_path(artifact_type, &path)
    } else {
        ArtifactSpec::new(artifact_type, config.flow.default_dir.clone(), path)
    }
}

fn status(workspace: &Workspace) {
    let registry = workspace.registry();
    for artifact in registry.iter() {
        println!(
            "{:<16} {:<40} v{:<3} pending={}",
            artifact.artifact_type(),
            artifact.file_path(),
            artifact.version(),
            artifact.pending_revisions().len()
        );
        for (action, watchers) in artifact.watched_by() {
            for watcher in watchers {
                if let Ok(watcher) = registry.get(*watcher) {
                    println!("    {} -> {}", action, watcher.file_path());
                }
            }
        }
    }
}

/// Print every commit as it happens.
fn follow_commits(scheduler: &Scheduler) {
    let mut notices = Box::pin(scheduler.subscribe(CommitFilter::default()).into_stream());
    tokio::spawn(async move {
        while let Some(notice) = notices.next().await {
            println!("committed {} v{}", notice.file_path, notice.version);
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.to_string_lossy().into_owned();
    let mut config = EngineConfig::load(&cli.root.join(&cli.config)).await?;
    cli.apply(&mut config);
    init_tracing(&config)?;
    debug!("Config: {:?}", config);

    match &cli.command {
        Command::Init => return init(&config, &config_path).await,
        Command::Status => {
            status(&open_workspace(&config).await?);
            return Ok(());
        }
        _ => {}
    }

    info!("🚀 Cascade starting in {}", config.flow.workspace_root.display());
    let workspace = open_workspace(&config).await?;
    let mut scheduler = Scheduler::new(
        workspace,
        standard_actions(),
        standard_reactions(),
        config.generator()?,
    );

    match cli.command {
        Command::Requirement { path, text } => {
            let spec = input_spec(ArtifactType::RawRequirement, path, &config);
            let id = scheduler.workspace_mut().get_or_create(spec).await?;
            scheduler.submit_edit(id, text)?;
        }
        Command::SystemDesign { path, text } => {
            let spec = input_spec(ArtifactType::SystemDesign, path, &config);
            let (id, event) = scheduler.add_document(spec, &text).await?;
            if event.is_none() {
                info!("System design {} unchanged", scheduler.registry().get(id)?.file_path());
            }
            let prds: Vec<_> = scheduler.registry().of_type(ArtifactType::Prd).to_vec();
            for prd in prds {
                if scheduler.registry().get(prd)?.version() > 0 {
                    scheduler.propagate(prd)?;
                }
            }
        }
        Command::Edit {
            file_path,
            instruction,
        } => {
            let Some(id) = scheduler.registry().find_by_file(&file_path) else {
                bail!("No artifact is stored at {}", file_path);
            };
            scheduler.submit_edit(id, instruction)?;
        }
        Command::Run => {
            let roots: Vec<_> = scheduler
                .registry()
                .of_type(ArtifactType::RawRequirement)
                .to_vec();
            for id in roots {
                if scheduler.registry().get(id)?.version() > 0 {
                    scheduler.propagate(id)?;
                }
            }
        }
        Command::Init | Command::Status => return Ok(()),
    }

    follow_commits(&scheduler);
    let mut engine = Engine::new(scheduler, &config);
    let summary = engine.run().await;
    info!(
        "Executed {} task(s), committed {}",
        summary.executed, summary.committed
    );

    match summary.stopped {
        StopReason::Idle | StopReason::TaskLimit => Ok(()),
        StopReason::AwaitingReview { file_path, content } => {
            println!("--- staged {} (not committed) ---\n{}", file_path, content);
            Ok(())
        }
        StopReason::Failed(err) => Err(err.into()),
    }
}
