use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::MediaConfig;

/// External media tooling: audio extraction, frame capture, duration probing.
///
/// The pipeline only sees this trait; production uses [`FfmpegEngine`], tests
/// inject mocks.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Extract the audio track to a mono 16kHz WAV at `out_wav`.
    async fn extract_audio(&self, video_path: &Path, out_wav: &Path) -> Result<()>;

    /// Capture a single frame at `timestamp` seconds into `out_image` (PNG).
    async fn capture_frame(&self, video_path: &Path, timestamp: f64, out_image: &Path)
        -> Result<()>;

    /// Source duration in seconds.
    async fn probe_duration(&self, video_path: &Path) -> Result<f64>;
}

/// ffmpeg/ffprobe-backed engine.
#[derive(Debug, Clone)]
pub struct FfmpegEngine {
    ffmpeg_bin: String,
    ffprobe_bin: String,
    sample_rate: u32,
}

impl FfmpegEngine {
    pub fn new(config: &MediaConfig) -> Self {
        Self {
            ffmpeg_bin: config.ffmpeg_bin.clone(),
            ffprobe_bin: config.ffprobe_bin.clone(),
            sample_rate: config.sample_rate,
        }
    }
}

#[async_trait]
impl MediaEngine for FfmpegEngine {
    async fn extract_audio(&self, video_path: &Path, out_wav: &Path) -> Result<()> {
        info!("🎵 Extracting audio: {}", video_path.display());

        if let Some(parent) = out_wav.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let output = Command::new(&self.ffmpeg_bin)
            .arg("-i")
            .arg(video_path)
            .args(["-vn", "-acodec", "pcm_s16le"])
            .args(["-ar", &self.sample_rate.to_string()])
            .args(["-ac", "1", "-f", "wav", "-y"])
            .arg(out_wav)
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.ffmpeg_bin))?;

        if !output.status.success() {
            return Err(anyhow!(
                "ffmpeg exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        debug!("audio written to {}", out_wav.display());
        Ok(())
    }

    async fn capture_frame(
        &self,
        video_path: &Path,
        timestamp: f64,
        out_image: &Path,
    ) -> Result<()> {
        debug!("📸 Capturing frame at {:.1}s", timestamp);

        if let Some(parent) = out_image.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // -ss before -i would be faster but less frame-accurate; captures are
        // few, so accuracy wins.
        let output = Command::new(&self.ffmpeg_bin)
            .arg("-i")
            .arg(video_path)
            .args(["-ss", &timestamp.to_string()])
            .args(["-vframes", "1", "-f", "image2", "-y"])
            .arg(out_image)
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.ffmpeg_bin))?;

        if !output.status.success() {
            return Err(anyhow!(
                "ffmpeg exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        Ok(())
    }

    async fn probe_duration(&self, video_path: &Path) -> Result<f64> {
        let output = Command::new(&self.ffprobe_bin)
            .args(["-v", "quiet", "-print_format", "json", "-show_format"])
            .arg(video_path)
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.ffprobe_bin))?;

        if !output.status.success() {
            return Err(anyhow!(
                "ffprobe exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        let probe: serde_json::Value = serde_json::from_slice(&output.stdout)
            .context("malformed ffprobe output")?;
        let duration: f64 = probe["format"]["duration"]
            .as_str()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| anyhow!("no duration in ffprobe output for {}", video_path.display()))?;

        Ok(duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MediaConfig;

    #[test]
    fn test_engine_uses_configured_binaries() {
        let config = MediaConfig {
            ffmpeg_bin: "/opt/ffmpeg/bin/ffmpeg".to_string(),
            ffprobe_bin: "/opt/ffmpeg/bin/ffprobe".to_string(),
            sample_rate: 22050,
        };
        let engine = FfmpegEngine::new(&config);
        assert_eq!(engine.ffmpeg_bin, "/opt/ffmpeg/bin/ffmpeg");
        assert_eq!(engine.ffprobe_bin, "/opt/ffmpeg/bin/ffprobe");
        assert_eq!(engine.sample_rate, 22050);
    }
}
