use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::checkpoint::Checkpoint;
use crate::error::{Result, TaskError};
use crate::task::Task;

/// Durable per-task persistence under a single state directory.
///
/// Each task owns two JSON documents: `<id>.task.json` (the task record) and
/// `<id>.checkpoint.json` (exactly the checkpoint fields). Writes go to a
/// temp file in the same directory and are renamed into place, so a reader
/// never observes a half-written document and a failed write leaves the
/// previous copy intact.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    state_dir: PathBuf,
}

impl CheckpointStore {
    pub async fn new(state_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&state_dir)
            .await
            .map_err(|e| TaskError::Persistence(format!("create state dir: {e}")))?;
        Ok(Self { state_dir })
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    fn task_path(&self, task_id: &str) -> PathBuf {
        self.state_dir.join(format!("{task_id}.task.json"))
    }

    fn checkpoint_path(&self, task_id: &str) -> PathBuf {
        self.state_dir.join(format!("{task_id}.checkpoint.json"))
    }

    pub async fn save_task(&self, task: &Task) -> Result<()> {
        write_json_atomic(&self.task_path(&task.id), task).await?;
        debug!("saved task record {}", task.id);
        Ok(())
    }

    pub async fn save_checkpoint(&self, task_id: &str, checkpoint: &Checkpoint) -> Result<()> {
        write_json_atomic(&self.checkpoint_path(task_id), checkpoint).await?;
        debug!("saved checkpoint for {}", task_id);
        Ok(())
    }

    pub async fn load_checkpoint(&self, task_id: &str) -> Result<Option<Checkpoint>> {
        read_json_opt(&self.checkpoint_path(task_id)).await
    }

    pub async fn load_task(&self, task_id: &str) -> Result<Option<Task>> {
        read_json_opt(&self.task_path(task_id)).await
    }

    /// Load every persisted task with its checkpoint, for restart recovery.
    /// Unreadable documents are logged and skipped rather than aborting
    /// recovery of the rest.
    pub async fn load_all(&self) -> Result<Vec<(Task, Checkpoint)>> {
        let mut entries = fs::read_dir(&self.state_dir)
            .await
            .map_err(|e| TaskError::Persistence(format!("read state dir: {e}")))?;

        let mut loaded = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| TaskError::Persistence(format!("read state dir: {e}")))?
        {
            let path = entry.path();
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(n) => n,
                None => continue,
            };
            let task_id = match name.strip_suffix(".task.json") {
                Some(id) => id,
                None => continue,
            };

            let task: Task = match read_json_opt(&path).await {
                Ok(Some(task)) => task,
                Ok(None) => continue,
                Err(e) => {
                    warn!("skipping unreadable task record {}: {}", path.display(), e);
                    continue;
                }
            };
            let checkpoint = match self.load_checkpoint(task_id).await {
                Ok(cp) => cp.unwrap_or_default(),
                Err(e) => {
                    warn!("skipping task {} with unreadable checkpoint: {}", task_id, e);
                    continue;
                }
            };
            loaded.push((task, checkpoint));
        }

        loaded.sort_by_key(|(task, _)| task.created_at);
        Ok(loaded)
    }

    /// Delete both documents for a task. Missing files are fine.
    pub async fn remove(&self, task_id: &str) -> Result<()> {
        for path in [self.task_path(task_id), self.checkpoint_path(task_id)] {
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(TaskError::Persistence(format!(
                        "remove {}: {e}",
                        path.display()
                    )))
                }
            }
        }
        Ok(())
    }
}

/// Write-to-temp-then-rename. The temp file lives in the target directory so
/// the rename stays on one filesystem.
async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| TaskError::Persistence(format!("serialize {}: {e}", path.display())))?;

    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, json)
        .await
        .map_err(|e| TaskError::Persistence(format!("write {}: {e}", tmp_path.display())))?;
    fs::rename(&tmp_path, path)
        .await
        .map_err(|e| TaskError::Persistence(format!("rename into {}: {e}", path.display())))?;
    Ok(())
}

async fn read_json_opt<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(TaskError::Persistence(format!(
                "read {}: {e}",
                path.display()
            )))
        }
    };
    let value = serde_json::from_str(&content)
        .map_err(|e| TaskError::Persistence(format!("parse {}: {e}", path.display())))?;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::Segment;
    use crate::task::TaskOverrides;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_checkpoint_save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().to_path_buf()).await.unwrap();

        let checkpoint = Checkpoint {
            audio_path: Some(PathBuf::from("/tmp/a.wav")),
            video_duration: Some(61.5),
            transcription: Some(vec![Segment {
                start: 0.0,
                end: 2.0,
                text: "hello".to_string(),
            }]),
            ..Default::default()
        };

        store.save_checkpoint("t1", &checkpoint).await.unwrap();
        let loaded = store.load_checkpoint("t1").await.unwrap().unwrap();
        assert_eq!(loaded, checkpoint);
    }

    #[test]
    fn test_load_missing_checkpoint_is_absent() {
        tokio_test::block_on(async {
            let dir = TempDir::new().unwrap();
            let store = CheckpointStore::new(dir.path().to_path_buf()).await.unwrap();
            assert!(store.load_checkpoint("nope").await.unwrap().is_none());
        });
    }

    #[tokio::test]
    async fn test_save_overwrites_and_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().to_path_buf()).await.unwrap();

        store.save_checkpoint("t1", &Checkpoint::default()).await.unwrap();
        let updated = Checkpoint {
            audio_path: Some(PathBuf::from("/tmp/b.wav")),
            ..Default::default()
        };
        store.save_checkpoint("t1", &updated).await.unwrap();

        let loaded = store.load_checkpoint("t1").await.unwrap().unwrap();
        assert_eq!(loaded, updated);
        assert!(!dir.path().join("t1.checkpoint.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_load_all_sorted_by_creation() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().to_path_buf()).await.unwrap();

        let first = Task::new(PathBuf::from("/v/a.mp4"), TaskOverrides::default());
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = Task::new(PathBuf::from("/v/b.mp4"), TaskOverrides::default());

        // Save in reverse to prove ordering comes from timestamps.
        store.save_task(&second).await.unwrap();
        store.save_task(&first).await.unwrap();
        store.save_checkpoint(&first.id, &Checkpoint::default()).await.unwrap();

        let all = store.load_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].0.id, first.id);
        assert_eq!(all[1].0.id, second.id);
    }

    #[tokio::test]
    async fn test_remove_deletes_both_documents() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().to_path_buf()).await.unwrap();

        let task = Task::new(PathBuf::from("/v/a.mp4"), TaskOverrides::default());
        store.save_task(&task).await.unwrap();
        store.save_checkpoint(&task.id, &Checkpoint::default()).await.unwrap();

        store.remove(&task.id).await.unwrap();
        assert!(store.load_task(&task.id).await.unwrap().is_none());
        assert!(store.load_checkpoint(&task.id).await.unwrap().is_none());

        // Removing again is a no-op.
        store.remove(&task.id).await.unwrap();
    }
}
