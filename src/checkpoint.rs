use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One timestamped transcript segment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Segment {
    /// Start time in seconds.
    pub start: f64,
    /// End time in seconds; always >= `start`.
    pub end: f64,
    pub text: String,
}

/// A moment the analysis provider selected as worth capturing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    /// Target timestamp in seconds, within `[0, video_duration]`.
    pub timestamp: f64,
    /// Provider's rationale for the choice.
    pub reason: String,
    /// Provider confidence in `[0, 1]`.
    pub confidence: f64,
}

/// A captured and captioned frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Screenshot {
    pub timestamp: f64,
    pub image_path: PathBuf,
    pub caption: String,
}

/// The four pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ExtractAudio,
    Transcribe,
    Analyze,
    CaptureScreenshots,
}

/// Durable, resumable snapshot of a task's progress through the pipeline.
///
/// A stage's field is present if and only if that stage has completed at
/// least once. Absence (not `null`) denotes "not yet run", so optional fields
/// are skipped entirely when unset. `screenshots` and `skipped_candidates`
/// grow incrementally during the capture stage; together they form the resume
/// cursor, so a crash mid-capture loses at most the candidate in flight.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    /// Extracted WAV path; set by the extract stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_path: Option<PathBuf>,

    /// Source video duration in seconds, probed during extraction. Bounds
    /// candidate filtering in the analyze stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_duration: Option<f64>,

    /// Ordered transcript segments; present-but-empty is valid (silent audio).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcription: Option<Vec<Segment>>,

    /// Validated screenshot candidates, ascending by timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_candidates: Option<Vec<Candidate>>,

    /// Successfully captured and captioned frames, appended in candidate
    /// order. Never reordered or truncated once written.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub screenshots: Vec<Screenshot>,

    /// Timestamps of candidates that failed capture or captioning and were
    /// skipped under the skip-and-continue policy.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_candidates: Vec<f64>,
}

impl Checkpoint {
    /// Index of the next capture candidate to attempt. Successes and skips
    /// both advance the cursor, in candidate order.
    pub fn capture_cursor(&self) -> usize {
        self.screenshots.len() + self.skipped_candidates.len()
    }

    /// The first stage whose output is not yet recorded, or `None` when the
    /// whole pipeline has run.
    pub fn next_stage(&self) -> Option<Stage> {
        if self.audio_path.is_none() {
            return Some(Stage::ExtractAudio);
        }
        if self.transcription.is_none() {
            return Some(Stage::Transcribe);
        }
        let candidates = match &self.screenshot_candidates {
            None => return Some(Stage::Analyze),
            Some(c) => c,
        };
        if self.capture_cursor() < candidates.len() {
            return Some(Stage::CaptureScreenshots);
        }
        None
    }
}
