/// clipscribe
///
/// Video transcription and annotated-screenshot pipeline. A task walks four
/// stages (extract audio, transcribe, analyze for screenshot moments,
/// capture + caption), checkpointing after each so interrupted work resumes
/// without repeating expensive provider calls.
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod manager;
pub mod media;
pub mod providers;
pub mod stages;
pub mod store;
pub mod task;

// Re-export main types for easy access
pub use crate::checkpoint::{Candidate, Checkpoint, Screenshot, Segment, Stage};
pub use crate::config::{CapturePolicy, Config, ConfigBuilder, TranscriberKind};
pub use crate::error::TaskError;
pub use crate::manager::{TaskManager, TaskSnapshot};
pub use crate::media::{FfmpegEngine, MediaEngine};
pub use crate::providers::{Captioner, MomentAnalyzer, Transcriber};
pub use crate::stages::{CaptureOutcome, StageExecutors};
pub use crate::store::CheckpointStore;
pub use crate::task::{Task, TaskOverrides, TaskResult, TaskStatus};
