use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::checkpoint::{Candidate, Checkpoint, Screenshot, Segment};
use crate::config::{CapturePolicy, Config};
use crate::error::{Result, TaskError};
use crate::media::MediaEngine;
use crate::providers::{render_transcript, Captioner, MomentAnalyzer, Transcriber};

/// Outcome of one capture-stage candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    Captured,
    Skipped,
}

/// The four stage executors, bundling the external collaborators.
///
/// Each executor mutates the checkpoint and leaves persistence and status
/// transitions to the task manager, so a stage result is only ever observable
/// after it has been durably saved.
pub struct StageExecutors {
    media: Arc<dyn MediaEngine>,
    transcriber: Arc<dyn Transcriber>,
    analyzer: Arc<dyn MomentAnalyzer>,
    captioner: Arc<dyn Captioner>,
    media_dir: PathBuf,
    max_screenshots: usize,
    capture_policy: CapturePolicy,
}

impl StageExecutors {
    pub fn new(
        config: &Config,
        media: Arc<dyn MediaEngine>,
        transcriber: Arc<dyn Transcriber>,
        analyzer: Arc<dyn MomentAnalyzer>,
        captioner: Arc<dyn Captioner>,
    ) -> Self {
        Self {
            media,
            transcriber,
            analyzer,
            captioner,
            media_dir: config.storage.media_dir.clone(),
            max_screenshots: config.analysis.max_screenshots,
            capture_policy: config.processing.on_capture_failure,
        }
    }

    /// Clone the executors with different providers, keeping the media
    /// engine and capture settings. Used for tasks carrying per-task
    /// provider overrides.
    pub fn with_providers(
        &self,
        transcriber: Arc<dyn Transcriber>,
        analyzer: Arc<dyn MomentAnalyzer>,
        captioner: Arc<dyn Captioner>,
    ) -> Self {
        Self {
            media: self.media.clone(),
            transcriber,
            analyzer,
            captioner,
            media_dir: self.media_dir.clone(),
            max_screenshots: self.max_screenshots,
            capture_policy: self.capture_policy,
        }
    }

    fn task_media_dir(&self, task_id: &str) -> PathBuf {
        self.media_dir.join(task_id)
    }

    /// Stage 1: extract the audio track and probe the video duration.
    pub async fn extract(
        &self,
        task_id: &str,
        video_path: &std::path::Path,
        checkpoint: &mut Checkpoint,
    ) -> Result<()> {
        let audio_path = self.task_media_dir(task_id).join("audio.wav");

        self.media
            .extract_audio(video_path, &audio_path)
            .await
            .map_err(|e| TaskError::ExtractionFailed(format!("{e:#}")))?;

        let duration = self
            .media
            .probe_duration(video_path)
            .await
            .map_err(|e| TaskError::ExtractionFailed(format!("{e:#}")))?;

        checkpoint.audio_path = Some(audio_path);
        checkpoint.video_duration = Some(duration);
        info!("✅ Audio extracted for task {} ({:.1}s video)", task_id, duration);
        Ok(())
    }

    /// Stage 2: transcribe the extracted audio. Empty output is valid.
    pub async fn transcribe(&self, task_id: &str, checkpoint: &mut Checkpoint) -> Result<()> {
        let audio_path = checkpoint
            .audio_path
            .as_ref()
            .ok_or_else(|| TaskError::TranscriptionFailed("no audio path in checkpoint".into()))?;

        let segments = self
            .transcriber
            .transcribe(audio_path)
            .await
            .map_err(|e| TaskError::TranscriptionFailed(format!("{e:#}")))?;

        let segments = validate_segments(segments)?;
        info!("✅ Transcribed task {}: {} segments", task_id, segments.len());
        checkpoint.transcription = Some(segments);
        Ok(())
    }

    /// Stage 3: pick screenshot candidates from the transcript. Zero
    /// candidates is valid and leads straight to completion.
    pub async fn analyze(&self, task_id: &str, checkpoint: &mut Checkpoint) -> Result<()> {
        let segments = checkpoint
            .transcription
            .as_ref()
            .ok_or_else(|| TaskError::AnalysisFailed("no transcription in checkpoint".into()))?;
        let duration = checkpoint
            .video_duration
            .ok_or_else(|| TaskError::AnalysisFailed("no video duration in checkpoint".into()))?;

        let candidates = if segments.is_empty() {
            // Nothing to reason about in a silent video.
            Vec::new()
        } else {
            self.analyzer
                .analyze(&render_transcript(segments))
                .await
                .map_err(|e| TaskError::AnalysisFailed(format!("{e:#}")))?
        };

        let candidates = validate_candidates(candidates, duration, self.max_screenshots);
        info!("✅ Analysis for task {}: {} candidates", task_id, candidates.len());
        checkpoint.screenshot_candidates = Some(candidates);
        Ok(())
    }

    /// Stage 4, one candidate at a time: capture the frame at the cursor and
    /// caption it. The caller checkpoints after every call, so a crash loses
    /// at most the candidate in flight.
    pub async fn capture_next(
        &self,
        task_id: &str,
        video_path: &std::path::Path,
        checkpoint: &mut Checkpoint,
    ) -> Result<CaptureOutcome> {
        let cursor = checkpoint.capture_cursor();
        let candidate = checkpoint
            .screenshot_candidates
            .as_ref()
            .and_then(|c| c.get(cursor))
            .cloned()
            .ok_or_else(|| TaskError::CaptureFailed("capture cursor out of range".into()))?;

        let image_path = self
            .task_media_dir(task_id)
            .join(format!("shot_{cursor:03}.png"));

        let captured = self
            .media
            .capture_frame(video_path, candidate.timestamp, &image_path)
            .await;

        let caption = match captured {
            Ok(()) => self.captioner.caption(&image_path).await,
            Err(e) => Err(e),
        };

        match caption {
            Ok(caption) => {
                checkpoint.screenshots.push(Screenshot {
                    timestamp: candidate.timestamp,
                    image_path,
                    caption,
                });
                Ok(CaptureOutcome::Captured)
            }
            Err(e) => match self.capture_policy {
                CapturePolicy::SkipAndContinue => {
                    warn!(
                        "⚠️ Skipping candidate at {:.1}s for task {}: {:#}",
                        candidate.timestamp, task_id, e
                    );
                    checkpoint.skipped_candidates.push(candidate.timestamp);
                    Ok(CaptureOutcome::Skipped)
                }
                CapturePolicy::Abort => Err(TaskError::CaptureFailed(format!(
                    "candidate at {:.1}s: {e:#}",
                    candidate.timestamp
                ))),
            },
        }
    }
}

/// Enforce the segment ordering contract: finite, non-negative times with
/// `start <= end`, sorted by start. Bad timing data is a provider bug and
/// fails the stage rather than being papered over.
pub fn validate_segments(mut segments: Vec<Segment>) -> Result<Vec<Segment>> {
    for segment in &segments {
        if !segment.start.is_finite() || !segment.end.is_finite() {
            return Err(TaskError::TranscriptionFailed(
                "segment with non-finite timestamps".into(),
            ));
        }
        if segment.start < 0.0 || segment.start > segment.end {
            return Err(TaskError::TranscriptionFailed(format!(
                "segment with invalid timing: start={} end={}",
                segment.start, segment.end
            )));
        }
    }
    segments.sort_by(|a, b| a.start.total_cmp(&b.start));
    Ok(segments)
}

/// Sort candidates ascending, drop duplicates and out-of-bounds timestamps,
/// and cap the list. Dropped entries are logged, never silently kept.
pub fn validate_candidates(
    candidates: Vec<Candidate>,
    video_duration: f64,
    max: usize,
) -> Vec<Candidate> {
    let mut kept: Vec<Candidate> = Vec::new();
    let mut sorted = candidates;
    sorted.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));

    for candidate in sorted {
        if !candidate.timestamp.is_finite()
            || candidate.timestamp < 0.0
            || candidate.timestamp > video_duration
        {
            warn!(
                "dropping out-of-bounds candidate at {:?}s (video is {:.1}s)",
                candidate.timestamp, video_duration
            );
            continue;
        }
        if kept.last().is_some_and(|prev: &Candidate| prev.timestamp == candidate.timestamp) {
            warn!("dropping duplicate candidate at {:.1}s", candidate.timestamp);
            continue;
        }
        kept.push(candidate);
    }

    if kept.len() > max {
        warn!("capping candidates at {} (provider returned {})", max, kept.len());
        kept.truncate(max);
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(timestamp: f64, confidence: f64) -> Candidate {
        Candidate {
            timestamp,
            reason: "test".to_string(),
            confidence,
        }
    }

    #[test]
    fn test_validate_segments_sorts_by_start() {
        let segments = vec![
            Segment { start: 5.0, end: 8.0, text: "b".into() },
            Segment { start: 0.0, end: 4.0, text: "a".into() },
        ];
        let sorted = validate_segments(segments).unwrap();
        assert_eq!(sorted[0].text, "a");
        assert_eq!(sorted[1].text, "b");
    }

    #[test]
    fn test_validate_segments_rejects_inverted_timing() {
        let segments = vec![Segment { start: 9.0, end: 4.0, text: "bad".into() }];
        assert!(matches!(
            validate_segments(segments),
            Err(TaskError::TranscriptionFailed(_))
        ));
    }

    #[test]
    fn test_validate_segments_rejects_negative_start() {
        let segments = vec![Segment { start: -1.0, end: 4.0, text: "bad".into() }];
        assert!(validate_segments(segments).is_err());
    }

    #[test]
    fn test_validate_segments_accepts_empty() {
        assert!(validate_segments(vec![]).unwrap().is_empty());
    }

    #[test]
    fn test_validate_candidates_sorts_and_bounds() {
        let candidates = vec![
            candidate(90.0, 0.9),
            candidate(10.0, 0.8),
            candidate(150.0, 0.95), // beyond the 120s video
            candidate(-3.0, 0.9),
        ];
        let kept = validate_candidates(candidates, 120.0, 10);
        let timestamps: Vec<f64> = kept.iter().map(|c| c.timestamp).collect();
        assert_eq!(timestamps, vec![10.0, 90.0]);
    }

    #[test]
    fn test_validate_candidates_drops_duplicates() {
        let candidates = vec![candidate(10.0, 0.8), candidate(10.0, 0.9), candidate(20.0, 0.8)];
        let kept = validate_candidates(candidates, 60.0, 10);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_validate_candidates_caps_count() {
        let candidates = (0..20).map(|i| candidate(i as f64, 0.9)).collect();
        let kept = validate_candidates(candidates, 100.0, 5);
        assert_eq!(kept.len(), 5);
        assert_eq!(kept.last().unwrap().timestamp, 4.0);
    }
}
