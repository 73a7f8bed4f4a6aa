use thiserror::Error;

/// Errors surfaced by the task manager and stage pipeline.
///
/// Stage failures (`ExtractionFailed` through `CaptionFailed`) are terminal
/// for the current `process_task` invocation: the task is marked `Failed` and
/// the error message persisted. They are not terminal for the task itself —
/// a later `process_task` call resumes from the last checkpointed stage.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Bad arguments at task creation; no task is created.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Unknown task id.
    #[error("task not found: {0}")]
    NotFound(String),

    /// A run is already in progress for this task id.
    #[error("task already running: {0}")]
    AlreadyRunning(String),

    /// Operation not valid for the task's current status.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("audio extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("transcription failed: {0}")]
    TranscriptionFailed(String),

    #[error("screenshot analysis failed: {0}")]
    AnalysisFailed(String),

    #[error("frame capture failed: {0}")]
    CaptureFailed(String),

    #[error("captioning failed: {0}")]
    CaptionFailed(String),

    /// Checkpoint or task record could not be durably saved. Status never
    /// advances past an unsaved checkpoint.
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl TaskError {
    /// Whether this error marks the task `Failed` (as opposed to being
    /// rejected up front with no state change).
    pub fn is_stage_failure(&self) -> bool {
        matches!(
            self,
            TaskError::ExtractionFailed(_)
                | TaskError::TranscriptionFailed(_)
                | TaskError::AnalysisFailed(_)
                | TaskError::CaptureFailed(_)
                | TaskError::CaptionFailed(_)
                | TaskError::Persistence(_)
        )
    }
}

pub type Result<T, E = TaskError> = std::result::Result<T, E>;
