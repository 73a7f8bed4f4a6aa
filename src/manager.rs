use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::checkpoint::{Checkpoint, Stage};
use crate::config::{AnalysisConfig, CaptionConfig, Config, TranscriberKind, TranscriptionConfig};
use crate::error::{Result, TaskError};
use crate::media::{FfmpegEngine, MediaEngine};
use crate::providers::{
    create_analyzer, create_captioner, create_transcriber, Captioner, MomentAnalyzer, Transcriber,
};
use crate::stages::StageExecutors;
use crate::store::CheckpointStore;
use crate::task::{Task, TaskOverrides, TaskResult, TaskStatus};

/// Full task snapshot returned to callers: the record plus whatever
/// checkpoint progress has been durably made.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task: Task,
    pub checkpoint: Checkpoint,
}

/// Owns task records, drives the stage pipeline, and enforces the
/// at-most-one-concurrent-run-per-task invariant.
///
/// The registry supports concurrent reads while a task is processing; the
/// per-task run guard (and its stop flag) lives only in memory, so after a
/// process restart no task is considered running.
pub struct TaskManager {
    tasks: Arc<RwLock<HashMap<String, Task>>>,
    checkpoints: Arc<RwLock<HashMap<String, Checkpoint>>>,
    store: CheckpointStore,
    stages: Arc<StageExecutors>,
    running: Arc<Mutex<HashMap<String, Arc<AtomicBool>>>>,
    supported_extensions: Vec<String>,
    // Provider sections kept for merging per-task overrides at run time.
    transcription: TranscriptionConfig,
    analysis: AnalysisConfig,
    caption: CaptionConfig,
}

impl TaskManager {
    /// Build a manager with the production collaborators selected by config.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let media: Arc<dyn MediaEngine> = Arc::new(FfmpegEngine::new(&config.media));
        let transcriber: Arc<dyn Transcriber> = create_transcriber(&config.transcription)?.into();
        let analyzer: Arc<dyn MomentAnalyzer> = create_analyzer(&config.analysis)?.into();
        let captioner: Arc<dyn Captioner> = create_captioner(&config.caption)?.into();
        Ok(Self::new(config, media, transcriber, analyzer, captioner).await?)
    }

    /// Build a manager with explicit collaborators (tests inject mocks here).
    /// Reloads any tasks persisted under the configured state directory.
    pub async fn new(
        config: &Config,
        media: Arc<dyn MediaEngine>,
        transcriber: Arc<dyn Transcriber>,
        analyzer: Arc<dyn MomentAnalyzer>,
        captioner: Arc<dyn Captioner>,
    ) -> Result<Self> {
        let store = CheckpointStore::new(config.storage.state_dir.clone()).await?;
        let stages = Arc::new(StageExecutors::new(
            config, media, transcriber, analyzer, captioner,
        ));

        let mut tasks = HashMap::new();
        let mut checkpoints = HashMap::new();
        for (task, checkpoint) in store.load_all().await? {
            checkpoints.insert(task.id.clone(), checkpoint);
            tasks.insert(task.id.clone(), task);
        }
        if !tasks.is_empty() {
            info!("📂 Recovered {} task(s) from {}", tasks.len(), store.state_dir().display());
        }

        Ok(Self {
            tasks: Arc::new(RwLock::new(tasks)),
            checkpoints: Arc::new(RwLock::new(checkpoints)),
            store,
            stages,
            running: Arc::new(Mutex::new(HashMap::new())),
            supported_extensions: config.processing.supported_extensions.clone(),
            transcription: config.transcription.clone(),
            analysis: config.analysis.clone(),
            caption: config.caption.clone(),
        })
    }

    /// Create a task for a video and persist it immediately. Overrides bind
    /// provider choices to this task; empty overrides use the manager-wide
    /// configuration.
    pub async fn create_task(
        &self,
        video_path: PathBuf,
        overrides: TaskOverrides,
    ) -> Result<String> {
        let metadata = tokio::fs::metadata(&video_path)
            .await
            .map_err(|_| TaskError::InvalidInput(format!("no such file: {}", video_path.display())))?;
        if !metadata.is_file() {
            return Err(TaskError::InvalidInput(format!(
                "not a file: {}",
                video_path.display()
            )));
        }
        if !self.is_supported(&video_path) {
            return Err(TaskError::InvalidInput(format!(
                "unsupported video format: {}",
                video_path.display()
            )));
        }
        if overrides.transcriber == Some(TranscriberKind::OpenAi)
            && overrides.api_key.is_none()
            && self.transcription.api_key.is_none()
        {
            return Err(TaskError::InvalidInput(
                "openai transcription override requires an API key".to_string(),
            ));
        }

        let task = Task::new(video_path, overrides);
        let task_id = task.id.clone();

        self.store.save_task(&task).await?;
        self.store.save_checkpoint(&task_id, &Checkpoint::default()).await?;

        self.tasks.write().await.insert(task_id.clone(), task);
        self.checkpoints
            .write()
            .await
            .insert(task_id.clone(), Checkpoint::default());

        info!("🆕 Created task {}", task_id);
        Ok(task_id)
    }

    fn is_supported(&self, video_path: &Path) -> bool {
        video_path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext = ext.to_ascii_lowercase();
                self.supported_extensions.iter().any(|s| *s == ext)
            })
            .unwrap_or(false)
    }

    /// Run the pipeline for a task, resuming from the last checkpointed
    /// stage. Re-entrant: completed stages are never re-executed.
    ///
    /// The call drives the task to a terminal state (or a stop request) and
    /// returns the stage error if one occurred; callers wanting fire-and-
    /// forget semantics spawn it and poll `get_task`.
    pub async fn process_task(&self, task_id: &str) -> Result<()> {
        // Check-and-insert under one lock so two concurrent calls cannot both
        // pass the guard.
        let stop_flag = {
            let tasks = self.tasks.read().await;
            let task = tasks
                .get(task_id)
                .ok_or_else(|| TaskError::NotFound(task_id.to_string()))?;
            if task.status == TaskStatus::Completed {
                return Err(TaskError::InvalidState(format!(
                    "task {task_id} is already completed"
                )));
            }

            let mut running = self.running.lock().expect("run guard poisoned");
            if running.contains_key(task_id) {
                return Err(TaskError::AlreadyRunning(task_id.to_string()));
            }
            let flag = Arc::new(AtomicBool::new(false));
            running.insert(task_id.to_string(), flag.clone());
            flag
        };

        let result = self.run_pipeline(task_id, &stop_flag).await;

        self.running
            .lock()
            .expect("run guard poisoned")
            .remove(task_id);

        if let Err(e) = &result {
            if e.is_stage_failure() {
                self.mark_failed(task_id, e.to_string()).await;
            }
        }
        result
    }

    /// Executors for one run: the shared set, or a fresh set with providers
    /// built from the task's overrides merged over the manager configuration.
    fn stages_for(&self, task: &Task) -> Result<Arc<StageExecutors>> {
        if task.overrides.is_empty() {
            return Ok(self.stages.clone());
        }

        let mut transcription = self.transcription.clone();
        let mut analysis = self.analysis.clone();
        let mut caption = self.caption.clone();
        if let Some(api_key) = &task.overrides.api_key {
            transcription.api_key = Some(api_key.clone());
            analysis.api_key = Some(api_key.clone());
            caption.api_key = Some(api_key.clone());
        }
        if let Some(kind) = task.overrides.transcriber {
            transcription.provider = kind;
        }

        let transcriber: Arc<dyn Transcriber> = create_transcriber(&transcription)
            .map_err(|e| TaskError::TranscriptionFailed(format!("{e:#}")))?
            .into();
        let analyzer: Arc<dyn MomentAnalyzer> = create_analyzer(&analysis)
            .map_err(|e| TaskError::AnalysisFailed(format!("{e:#}")))?
            .into();
        let captioner: Arc<dyn Captioner> = create_captioner(&caption)
            .map_err(|e| TaskError::CaptionFailed(format!("{e:#}")))?
            .into();

        Ok(Arc::new(
            self.stages.with_providers(transcriber, analyzer, captioner),
        ))
    }

    async fn run_pipeline(&self, task_id: &str, stop_flag: &AtomicBool) -> Result<()> {
        let mut task = {
            let tasks = self.tasks.read().await;
            tasks
                .get(task_id)
                .cloned()
                .ok_or_else(|| TaskError::NotFound(task_id.to_string()))?
        };
        let mut checkpoint = {
            let checkpoints = self.checkpoints.read().await;
            checkpoints.get(task_id).cloned().unwrap_or_default()
        };
        let stages = self.stages_for(&task)?;

        info!("🚀 Processing task {} ({})", task_id, task.video_path.display());

        loop {
            if stop_flag.load(Ordering::SeqCst) {
                info!("🛑 Stop requested; task {} paused at {}", task_id, task.status);
                return Ok(());
            }

            let stage = match checkpoint.next_stage() {
                Some(stage) => stage,
                None => {
                    let result = TaskResult {
                        transcription: checkpoint.transcription.clone().unwrap_or_default(),
                        screenshots: checkpoint.screenshots.clone(),
                    };
                    task.complete(result);
                    self.store.save_task(&task).await?;
                    self.publish(task.clone(), checkpoint.clone()).await;
                    info!(
                        "🎉 Task {} completed: {} screenshot(s), {} skipped",
                        task_id,
                        checkpoint.screenshots.len(),
                        checkpoint.skipped_candidates.len()
                    );
                    return Ok(());
                }
            };

            let status = match stage {
                Stage::ExtractAudio => TaskStatus::Extracting,
                Stage::Transcribe => TaskStatus::Transcribing,
                Stage::Analyze => TaskStatus::Analyzing,
                Stage::CaptureScreenshots => TaskStatus::CapturingScreenshots,
            };
            if task.status != status {
                task.advance(status);
                self.store.save_task(&task).await?;
                self.publish(task.clone(), checkpoint.clone()).await;
            }

            match stage {
                Stage::ExtractAudio => {
                    stages
                        .extract(task_id, &task.video_path, &mut checkpoint)
                        .await?
                }
                Stage::Transcribe => stages.transcribe(task_id, &mut checkpoint).await?,
                Stage::Analyze => stages.analyze(task_id, &mut checkpoint).await?,
                Stage::CaptureScreenshots => {
                    // One candidate per loop turn; the save below makes each
                    // capture individually durable.
                    stages
                        .capture_next(task_id, &task.video_path, &mut checkpoint)
                        .await
                        .map(|_| ())?
                }
            }

            // Durability before observability: the stage result is published
            // only after the checkpoint is on disk.
            self.store.save_checkpoint(task_id, &checkpoint).await?;
            self.publish(task.clone(), checkpoint.clone()).await;
        }
    }

    /// Update the in-memory registry after a durable save.
    async fn publish(&self, task: Task, checkpoint: Checkpoint) {
        let task_id = task.id.clone();
        self.tasks.write().await.insert(task_id.clone(), task);
        self.checkpoints.write().await.insert(task_id, checkpoint);
    }

    async fn mark_failed(&self, task_id: &str, message: String) {
        error!("❌ Task {} failed: {}", task_id, message);
        // Clone-mutate-save-publish, so readers are not blocked on the disk
        // write.
        let task = {
            let tasks = self.tasks.read().await;
            tasks.get(task_id).cloned()
        };
        let Some(mut task) = task else { return };
        task.fail(message);
        if let Err(e) = self.store.save_task(&task).await {
            warn!("could not persist failure for task {}: {}", task_id, e);
        }
        self.tasks.write().await.insert(task_id.to_string(), task);
    }

    pub async fn get_task(&self, task_id: &str) -> Result<TaskSnapshot> {
        let task = {
            let tasks = self.tasks.read().await;
            tasks
                .get(task_id)
                .cloned()
                .ok_or_else(|| TaskError::NotFound(task_id.to_string()))?
        };
        let checkpoint = {
            let checkpoints = self.checkpoints.read().await;
            checkpoints.get(task_id).cloned().unwrap_or_default()
        };
        Ok(TaskSnapshot { task, checkpoint })
    }

    /// All tasks in creation order.
    pub async fn list_tasks(&self) -> Vec<Task> {
        let tasks = self.tasks.read().await;
        let mut all: Vec<Task> = tasks.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        all
    }

    pub async fn tasks_by_status(&self, status: TaskStatus) -> Vec<Task> {
        self.list_tasks()
            .await
            .into_iter()
            .filter(|task| task.status == status)
            .collect()
    }

    /// Oldest task that has not been started yet.
    pub async fn next_pending_task(&self) -> Option<String> {
        self.tasks_by_status(TaskStatus::Pending)
            .await
            .first()
            .map(|task| task.id.clone())
    }

    /// Delete a task and its checkpoint. Refused while a run is in progress,
    /// since the run owns the state being deleted.
    pub async fn remove_task(&self, task_id: &str) -> Result<()> {
        // Hold a guard entry for the duration of the removal, claimed under
        // the same mutex process_task uses, so no run can start on state that
        // is being deleted (and no deletion can start on a running task).
        {
            let mut running = self.running.lock().expect("run guard poisoned");
            if running.contains_key(task_id) {
                return Err(TaskError::AlreadyRunning(task_id.to_string()));
            }
            running.insert(task_id.to_string(), Arc::new(AtomicBool::new(false)));
        }

        let result = self.remove_task_locked(task_id).await;

        self.running
            .lock()
            .expect("run guard poisoned")
            .remove(task_id);
        result
    }

    async fn remove_task_locked(&self, task_id: &str) -> Result<()> {
        let removed = self.tasks.write().await.remove(task_id);
        if removed.is_none() {
            return Err(TaskError::NotFound(task_id.to_string()));
        }
        self.checkpoints.write().await.remove(task_id);
        self.store.remove(task_id).await?;

        info!("🗑️ Removed task {}", task_id);
        Ok(())
    }

    /// Remove every completed task. Returns how many were removed.
    pub async fn clear_completed_tasks(&self) -> Result<usize> {
        let completed: Vec<String> = self
            .tasks_by_status(TaskStatus::Completed)
            .await
            .into_iter()
            .map(|task| task.id)
            .collect();

        for task_id in &completed {
            self.tasks.write().await.remove(task_id);
            self.checkpoints.write().await.remove(task_id);
            self.store.remove(task_id).await?;
        }

        if !completed.is_empty() {
            info!("🧹 Cleared {} completed task(s)", completed.len());
        }
        Ok(completed.len())
    }

    /// Ask a running task to stop at the next stage boundary. Returns whether
    /// a run was there to observe the request. No mid-call cancellation: an
    /// in-flight external call finishes first.
    pub async fn request_stop(&self, task_id: &str) -> Result<bool> {
        if !self.tasks.read().await.contains_key(task_id) {
            return Err(TaskError::NotFound(task_id.to_string()));
        }
        let running = self.running.lock().expect("run guard poisoned");
        match running.get(task_id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Whether a run is currently in progress for this task.
    pub fn is_running(&self, task_id: &str) -> bool {
        self.running
            .lock()
            .expect("run guard poisoned")
            .contains_key(task_id)
    }
}

#[cfg(test)]
mod tests {
    // Behavior is covered end to end in tests/pipeline_tests.rs with mock
    // collaborators; only pure helpers are tested here.
    use super::*;

    fn manager_paths_only() -> Vec<String> {
        vec!["mp4".to_string(), "mov".to_string()]
    }

    #[test]
    fn test_extension_check() {
        let supported = manager_paths_only();
        let check = |p: &str| {
            Path::new(p)
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| supported.iter().any(|s| *s == e.to_ascii_lowercase()))
                .unwrap_or(false)
        };
        assert!(check("/videos/talk.mp4"));
        assert!(check("/videos/TALK.MOV"));
        assert!(!check("/videos/talk.wav"));
        assert!(!check("/videos/noext"));
    }
}
