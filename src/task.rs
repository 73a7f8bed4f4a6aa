use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::checkpoint::{Screenshot, Segment};
use crate::config::TranscriberKind;

/// Lifecycle status of a task.
///
/// Progression is strictly forward through the stage statuses; `Failed` is
/// reachable from any non-terminal status. `Completed` is terminal. `Failed`
/// is terminal for a single run but the task itself remains resumable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Pending,
    Extracting,
    Transcribing,
    Analyzing,
    CapturingScreenshots,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Extracting => "extracting",
            TaskStatus::Transcribing => "transcribing",
            TaskStatus::Analyzing => "analyzing",
            TaskStatus::CapturingScreenshots => "capturing-screenshots",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Final aggregated output of a completed task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskResult {
    pub transcription: Vec<Segment>,
    pub screenshots: Vec<Screenshot>,
}

/// Per-task provider overrides, bound at creation time.
///
/// Overrides travel with the task record so a resumed run binds the same
/// backends the task was created with.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskOverrides {
    /// Replaces the configured API key on every cloud provider section.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Replaces the configured transcription backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcriber: Option<TranscriberKind>,
}

impl TaskOverrides {
    pub fn is_empty(&self) -> bool {
        self.api_key.is_none() && self.transcriber.is_none()
    }
}

/// One end-to-end video-processing job.
///
/// The checkpoint lives in the `CheckpointStore`, not on the task record;
/// `get_task` snapshots join the two.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub video_path: PathBuf,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Last failure message; present only while status is `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Present only once status is `Completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    /// Provider overrides supplied at creation; empty means the manager-wide
    /// configuration applies.
    #[serde(default, skip_serializing_if = "TaskOverrides::is_empty")]
    pub overrides: TaskOverrides,
}

impl Task {
    pub fn new(video_path: PathBuf, overrides: TaskOverrides) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            video_path,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
            error: None,
            result: None,
            overrides,
        }
    }

    /// Advance to the status of the stage about to run (or just finished).
    /// Clears any stale error from a previous failed run.
    pub fn advance(&mut self, status: TaskStatus) {
        self.status = status;
        self.error = None;
        self.updated_at = Utc::now();
    }

    pub fn complete(&mut self, result: TaskResult) {
        self.status = TaskStatus::Completed;
        self.result = Some(result);
        self.error = None;
        self.updated_at = Utc::now();
    }

    pub fn fail(&mut self, error: String) {
        self.status = TaskStatus::Failed;
        self.error = Some(error);
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_is_pending() {
        let task = Task::new(PathBuf::from("/videos/talk.mp4"), TaskOverrides::default());
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.error.is_none());
        assert!(task.result.is_none());
        assert_eq!(task.created_at, task.updated_at);
    }

    #[test]
    fn test_advance_clears_error() {
        let mut task = Task::new(PathBuf::from("/videos/talk.mp4"), TaskOverrides::default());
        task.fail("ffmpeg missing".to_string());
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.is_some());

        task.advance(TaskStatus::Extracting);
        assert_eq!(task.status, TaskStatus::Extracting);
        assert!(task.error.is_none());
    }

    #[test]
    fn test_complete_sets_result() {
        let mut task = Task::new(PathBuf::from("/videos/talk.mp4"), TaskOverrides::default());
        task.complete(TaskResult {
            transcription: vec![],
            screenshots: vec![],
        });
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.status.is_terminal());
        assert!(task.result.is_some());
    }

    #[test]
    fn test_empty_overrides_are_omitted_from_json() {
        let task = Task::new(PathBuf::from("/videos/talk.mp4"), TaskOverrides::default());
        let json = serde_json::to_value(&task).unwrap();
        assert!(json.get("overrides").is_none());

        let task = Task::new(
            PathBuf::from("/videos/talk.mp4"),
            TaskOverrides {
                api_key: Some("sk-per-task".to_string()),
                transcriber: Some(TranscriberKind::OpenAi),
            },
        );
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["overrides"]["api_key"], "sk-per-task");
    }

    #[test]
    fn test_status_display() {
        assert_eq!(TaskStatus::CapturingScreenshots.to_string(), "capturing-screenshots");
        assert_eq!(TaskStatus::Pending.to_string(), "pending");
    }
}
