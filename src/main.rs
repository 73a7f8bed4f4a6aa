use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use clipscribe::{Config, TaskManager, TaskOverrides, TaskStatus, TranscriberKind};

#[derive(Parser)]
#[command(name = "clipscribe", version, about = "Video transcription with captioned screenshots")]
struct Cli {
    /// Directory for task state and checkpoints
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Directory for extracted audio and captured frames
    #[arg(long, global = true)]
    media_dir: Option<PathBuf>,

    /// API key for the cloud providers (falls back to CLIPSCRIBE_API_KEY)
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Transcription backend: local or openai
    #[arg(long, global = true)]
    transcriber: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a task for a video and process it to completion
    Process {
        /// Path to the source video
        video: PathBuf,
    },
    /// Resume processing an existing task
    Resume { task_id: String },
    /// Show one task's status and checkpoint
    Status { task_id: String },
    /// List all tasks
    List,
    /// Remove a task and its checkpoint
    Remove { task_id: String },
    /// Remove all completed tasks
    ClearCompleted,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clipscribe=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = Config::load().unwrap_or_else(|e| {
        warn!("Failed to load config, using defaults: {}", e);
        Config::default()
    });
    if let Some(state_dir) = cli.state_dir {
        config.storage.state_dir = state_dir;
    }
    if let Some(media_dir) = cli.media_dir {
        config.storage.media_dir = media_dir;
    }
    if let Some(api_key) = cli.api_key {
        config.set_api_key(api_key);
    }
    if let Some(transcriber) = cli.transcriber.as_deref() {
        config.transcription.provider = match transcriber {
            "local" => TranscriberKind::Local,
            "openai" => TranscriberKind::OpenAi,
            other => return Err(anyhow::anyhow!("unknown transcriber: {}", other)),
        };
    }
    config.validate()?;

    let manager = Arc::new(TaskManager::from_config(&config).await?);

    match cli.command {
        Commands::Process { video } => {
            let task_id = manager
                .create_task(video, TaskOverrides::default())
                .await?;
            run_and_poll(manager, &task_id).await?;
        }
        Commands::Resume { task_id } => {
            run_and_poll(manager, &task_id).await?;
        }
        Commands::Status { task_id } => {
            let snapshot = manager.get_task(&task_id).await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Commands::List => {
            for task in manager.list_tasks().await {
                println!(
                    "{}  {:22}  {}",
                    task.id,
                    task.status.to_string(),
                    task.video_path.display()
                );
            }
        }
        Commands::Remove { task_id } => {
            manager.remove_task(&task_id).await?;
            println!("removed {task_id}");
        }
        Commands::ClearCompleted => {
            let count = manager.clear_completed_tasks().await?;
            println!("removed {count} completed task(s)");
        }
    }

    Ok(())
}

/// Spawn the pipeline and poll status until the run finishes, the way a UI
/// caller would.
async fn run_and_poll(manager: Arc<TaskManager>, task_id: &str) -> Result<()> {
    let runner = {
        let manager = Arc::clone(&manager);
        let task_id = task_id.to_string();
        tokio::spawn(async move { manager.process_task(&task_id).await })
    };

    let mut last_status = None;
    loop {
        let snapshot = manager.get_task(task_id).await?;
        if last_status != Some(snapshot.task.status) {
            info!("📊 Task {}: {}", task_id, snapshot.task.status);
            last_status = Some(snapshot.task.status);
        }
        if runner.is_finished() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    runner.await??;

    let snapshot = manager.get_task(task_id).await?;
    match snapshot.task.status {
        TaskStatus::Completed => {
            if let Some(result) = &snapshot.task.result {
                info!(
                    "🎉 Done: {} transcript segment(s), {} screenshot(s)",
                    result.transcription.len(),
                    result.screenshots.len()
                );
            }
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        status => {
            warn!("Task {} ended in status {}", task_id, status);
        }
    }
    Ok(())
}
