pub mod openrouter;
pub mod whisper;

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

use crate::checkpoint::{Candidate, Segment};
use crate::config::{AnalysisConfig, CaptionConfig, TranscriberKind, TranscriptionConfig};

pub use openrouter::OpenRouterClient;
pub use whisper::{LocalWhisper, OpenAiWhisper};

/// Speech-to-text backend.
///
/// Adapters own response validation: they return well-formed segments or an
/// error, never raw provider text. An empty segment list is a valid result.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio_path: &Path) -> Result<Vec<Segment>>;
}

/// Reasoning backend that selects screenshot-worthy moments from a rendered
/// transcript. Zero candidates is a valid result.
#[async_trait]
pub trait MomentAnalyzer: Send + Sync {
    async fn analyze(&self, transcript: &str) -> Result<Vec<Candidate>>;
}

/// Vision backend that describes a captured frame.
#[async_trait]
pub trait Captioner: Send + Sync {
    async fn caption(&self, image_path: &Path) -> Result<String>;
}

/// Create the configured transcription backend.
pub fn create_transcriber(config: &TranscriptionConfig) -> Result<Box<dyn Transcriber>> {
    match config.provider {
        TranscriberKind::Local => Ok(Box::new(LocalWhisper::new(config.clone())?)),
        TranscriberKind::OpenAi => Ok(Box::new(OpenAiWhisper::new(config.clone())?)),
    }
}

pub fn create_analyzer(config: &AnalysisConfig) -> Result<Box<dyn MomentAnalyzer>> {
    Ok(Box::new(OpenRouterClient::analyzer(config.clone())?))
}

pub fn create_captioner(config: &CaptionConfig) -> Result<Box<dyn Captioner>> {
    Ok(Box::new(OpenRouterClient::captioner(config.clone())?))
}

/// Render segments into the timestamped text form the analysis prompt
/// expects, one `[start-end]: text` line per segment.
pub fn render_transcript(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(|s| format!("[{:.1}s-{:.1}s]: {}", s.start, s.end, s.text.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_transcript_format() {
        let segments = vec![
            Segment {
                start: 0.0,
                end: 4.5,
                text: " welcome ".to_string(),
            },
            Segment {
                start: 4.5,
                end: 9.25,
                text: "here is a chart".to_string(),
            },
        ];
        let rendered = render_transcript(&segments);
        assert_eq!(rendered, "[0.0s-4.5s]: welcome\n[4.5s-9.2s]: here is a chart");
    }

    #[test]
    fn test_render_empty_transcript() {
        assert_eq!(render_transcript(&[]), "");
    }
}
