//! CLI binary for listing and running Cairn projects and tasks.

mod buildfile;

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use cairn_project::{ExecutionMode, Workspace, WorkspaceConfig, WorkspaceEvent};
use clap::{Parser, Subcommand};

use crate::buildfile::Buildfile;

#[derive(Parser)]
#[command(name = "cairn", version, about = "Hierarchical project definitions and task runner")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Buildfile to load, relative to the working directory
    #[arg(short = 'f', long, default_value = "Buildfile.json", global = true)]
    file: PathBuf,

    /// Change to this directory before doing anything
    #[arg(short = 'C', long, global = true)]
    directory: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run tasks (default: `build` of the projects in the working directory)
    Run {
        /// Fully-qualified task names, e.g. `app:web:build`
        tasks: Vec<String>,

        /// Run independent tasks concurrently
        #[arg(long)]
        parallel: bool,

        /// Maximum concurrent tasks with --parallel. Default: number of CPUs.
        #[arg(short, long)]
        jobs: Option<usize>,
    },

    /// List every project with its base directory
    Projects,

    /// List every task with its description
    Tasks,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let workdir = match &cli.directory {
        Some(dir) => std::fs::canonicalize(dir)
            .with_context(|| format!("cannot enter {}", dir.display()))?,
        None => std::env::current_dir()?,
    };

    let execution = match &cli.command {
        Commands::Run {
            parallel: true,
            jobs,
            ..
        } => ExecutionMode::Parallel {
            jobs: jobs.unwrap_or_else(default_jobs),
        },
        _ => ExecutionMode::Sequential,
    };
    let workspace = load_workspace(&workdir.join(&cli.file), &workdir, execution)?;

    match cli.command {
        Commands::Run { tasks, .. } => cmd_run(&workspace, &workdir, tasks).await?,
        Commands::Projects => cmd_projects(&workspace)?,
        Commands::Tasks => cmd_tasks(&workspace)?,
    }

    Ok(())
}

fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn load_workspace(
    path: &Path,
    workdir: &Path,
    execution: ExecutionMode,
) -> anyhow::Result<Workspace> {
    let buildfile =
        Buildfile::load(path).with_context(|| format!("cannot load {}", path.display()))?;
    let base_dir = path.parent().unwrap_or(workdir).to_path_buf();
    let workspace = Workspace::new(WorkspaceConfig {
        base_dir: Some(base_dir),
        execution,
        ..WorkspaceConfig::default()
    });
    buildfile.install(&workspace)?;
    Ok(workspace)
}

async fn cmd_run(workspace: &Workspace, workdir: &Path, tasks: Vec<String>) -> anyhow::Result<()> {
    let targets = if tasks.is_empty() {
        let local = workspace.local_projects(workdir)?;
        if local.is_empty() {
            anyhow::bail!("no project is defined for {}", workdir.display());
        }
        local
            .iter()
            .map(|project| format!("{}:build", project.name()))
            .collect()
    } else {
        tasks
    };

    let mut events = workspace.subscribe();
    let (stop, mut stopped) = tokio::sync::oneshot::channel::<()>();
    let reporter = tokio::spawn(async move {
        loop {
            tokio::select! {
                received = events.recv() => match received {
                    Ok(event) => report(&event),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
                _ = &mut stopped => {
                    while let Ok(event) = events.try_recv() {
                        report(&event);
                    }
                    break;
                }
            }
        }
    });

    let names: Vec<&str> = targets.iter().map(String::as_str).collect();
    println!("Running: {}", names.join(" "));
    let outcome = workspace.run(&names).await;

    let _ = stop.send(());
    let _ = reporter.await;

    outcome?;
    let completed = workspace.tasks().iter().filter(|t| t.is_invoked()).count();
    println!("\nCompleted {completed} task(s)");
    Ok(())
}

fn report(event: &WorkspaceEvent) {
    match event {
        WorkspaceEvent::TaskCompleted { name, duration_ms } => {
            println!("  done {name} ({duration_ms}ms)")
        }
        WorkspaceEvent::TaskSkipped { name } => println!("  up to date {name}"),
        WorkspaceEvent::TaskFailed { name, error } => println!("  FAILED {name}: {error}"),
        _ => {}
    }
}

fn cmd_projects(workspace: &Workspace) -> anyhow::Result<()> {
    for project in workspace.projects()? {
        println!("{:<32} {}", project.name(), project.base_dir()?.display());
    }
    Ok(())
}

fn cmd_tasks(workspace: &Workspace) -> anyhow::Result<()> {
    workspace.projects()?;
    for task in workspace.tasks() {
        match task.description() {
            Some(text) => println!("{:<32} # {}", task.name(), text),
            None => println!("{}", task.name()),
        }
    }
    Ok(())
}
