use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the clipscribe pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Task store and media output locations
    pub storage: StorageConfig,

    /// External media tooling
    pub media: MediaConfig,

    /// Task creation constraints
    pub processing: ProcessingConfig,

    /// Transcription provider settings
    pub transcription: TranscriptionConfig,

    /// Screenshot-moment analysis settings
    pub analysis: AnalysisConfig,

    /// Image captioning settings
    pub caption: CaptionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for task records and checkpoints
    pub state_dir: PathBuf,

    /// Directory for extracted audio and captured frames
    pub media_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,

    /// Target sample rate for extracted audio (16kHz is the Whisper optimum)
    pub sample_rate: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Video extensions accepted by `create_task`
    pub supported_extensions: Vec<String>,

    /// What to do when a single screenshot candidate fails to capture or
    /// caption
    pub on_capture_failure: CapturePolicy,
}

/// Per-candidate failure policy for the capture stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CapturePolicy {
    /// Record the candidate as skipped and keep going (default; partial
    /// results are more useful than none)
    SkipAndContinue,
    /// Fail the whole task on the first bad candidate
    Abort,
}

/// Which transcription backend to use.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TranscriberKind {
    /// Whisper via a local Python subprocess
    Local,
    /// OpenAI-compatible transcription HTTP API
    OpenAi,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    pub provider: TranscriberKind,

    /// Model name passed to the provider
    pub model: String,

    /// API key for the cloud provider
    pub api_key: Option<String>,

    /// Endpoint for the cloud provider
    pub endpoint: String,

    /// Whisper driver script for the local provider
    pub script_path: Option<PathBuf>,

    /// Python interpreter for the local provider
    pub python_bin: String,

    /// Request timeout in seconds
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub model: String,
    pub api_key: Option<String>,
    pub endpoint: String,

    /// Upper bound on candidates kept per video
    pub max_screenshots: usize,

    /// Candidates below this confidence are dropped
    pub min_confidence: f64,

    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptionConfig {
    pub model: String,
    pub api_key: Option<String>,
    pub endpoint: String,
    pub timeout_seconds: u64,
}

impl Config {
    /// Load configuration from the usual file locations, falling back to env
    /// overrides on defaults.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "clipscribe.toml",
            "config/clipscribe.toml",
            "~/.config/clipscribe/config.toml",
        ];

        for path in &config_paths {
            if let Ok(config_str) = std::fs::read_to_string(path) {
                match toml::from_str(&config_str) {
                    Ok(config) => {
                        tracing::info!("📄 Loaded configuration from: {}", path);
                        return Ok(config);
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse config file {}: {}", path, e);
                    }
                }
            }
        }

        Self::from_env()
    }

    /// Defaults with environment variable overrides applied.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(state_dir) = std::env::var("CLIPSCRIBE_STATE_DIR") {
            config.storage.state_dir = PathBuf::from(state_dir);
        }
        if let Ok(media_dir) = std::env::var("CLIPSCRIBE_MEDIA_DIR") {
            config.storage.media_dir = PathBuf::from(media_dir);
        }
        if let Ok(api_key) = std::env::var("CLIPSCRIBE_API_KEY") {
            config.set_api_key(api_key);
        }
        if let Ok(ffmpeg) = std::env::var("CLIPSCRIBE_FFMPEG") {
            config.media.ffmpeg_bin = ffmpeg;
        }
        if let Ok(provider) = std::env::var("CLIPSCRIBE_TRANSCRIBER") {
            config.transcription.provider = match provider.as_str() {
                "local" => TranscriberKind::Local,
                "openai" => TranscriberKind::OpenAi,
                other => return Err(anyhow!("unknown transcriber provider: {}", other)),
            };
        }

        Ok(config)
    }

    /// Set the same API key on every cloud provider section. The usual
    /// workflow uses one OpenRouter key for analysis and captioning.
    pub fn set_api_key(&mut self, api_key: String) {
        self.transcription.api_key = Some(api_key.clone());
        self.analysis.api_key = Some(api_key.clone());
        self.caption.api_key = Some(api_key);
    }

    pub fn validate(&self) -> Result<()> {
        if self.media.sample_rate == 0 {
            return Err(anyhow!("sample_rate must be greater than 0"));
        }
        if self.processing.supported_extensions.is_empty() {
            return Err(anyhow!("supported_extensions must not be empty"));
        }
        if self.analysis.max_screenshots == 0 {
            return Err(anyhow!("max_screenshots must be greater than 0"));
        }
        if !(0.0..=1.0).contains(&self.analysis.min_confidence) {
            return Err(anyhow!("min_confidence must be within [0, 1]"));
        }
        if self.transcription.provider == TranscriberKind::OpenAi
            && self.transcription.api_key.is_none()
        {
            return Err(anyhow!("API key required for the OpenAI transcription provider"));
        }
        if self.analysis.api_key.is_none() {
            return Err(anyhow!("API key required for the analysis provider"));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                state_dir: PathBuf::from("./state"),
                media_dir: PathBuf::from("./media"),
            },
            media: MediaConfig {
                ffmpeg_bin: "ffmpeg".to_string(),
                ffprobe_bin: "ffprobe".to_string(),
                sample_rate: 16000,
            },
            processing: ProcessingConfig {
                supported_extensions: vec![
                    "mp4".to_string(),
                    "mkv".to_string(),
                    "avi".to_string(),
                    "mov".to_string(),
                    "webm".to_string(),
                    "m4v".to_string(),
                ],
                on_capture_failure: CapturePolicy::SkipAndContinue,
            },
            transcription: TranscriptionConfig {
                provider: TranscriberKind::Local,
                model: "whisper-1".to_string(),
                api_key: None,
                endpoint: "https://api.openai.com/v1/audio/transcriptions".to_string(),
                script_path: Some(PathBuf::from("scripts/transcribe.py")),
                python_bin: "python3".to_string(),
                timeout_seconds: 600,
            },
            analysis: AnalysisConfig {
                model: "openai/gpt-4o-mini".to_string(),
                api_key: None,
                endpoint: "https://openrouter.ai/api/v1/chat/completions".to_string(),
                max_screenshots: 10,
                min_confidence: 0.7,
                timeout_seconds: 120,
            },
            caption: CaptionConfig {
                model: "openai/gpt-4o-mini".to_string(),
                api_key: None,
                endpoint: "https://openrouter.ai/api/v1/chat/completions".to_string(),
                timeout_seconds: 120,
            },
        }
    }
}

/// Builder for programmatic config creation.
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_state_dir(mut self, dir: PathBuf) -> Self {
        self.config.storage.state_dir = dir;
        self
    }

    pub fn with_media_dir(mut self, dir: PathBuf) -> Self {
        self.config.storage.media_dir = dir;
        self
    }

    pub fn with_api_key(mut self, api_key: String) -> Self {
        self.config.set_api_key(api_key);
        self
    }

    pub fn with_transcriber(mut self, provider: TranscriberKind) -> Self {
        self.config.transcription.provider = provider;
        self
    }

    pub fn with_max_screenshots(mut self, max: usize) -> Self {
        self.config.analysis.max_screenshots = max;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.media.sample_rate, 16000);
        assert_eq!(config.analysis.max_screenshots, 10);
        assert_eq!(config.transcription.provider, TranscriberKind::Local);
    }

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .with_state_dir(PathBuf::from("/var/lib/clipscribe"))
            .with_api_key("sk-test".to_string())
            .with_max_screenshots(5)
            .build();

        assert_eq!(config.storage.state_dir, PathBuf::from("/var/lib/clipscribe"));
        assert_eq!(config.analysis.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.caption.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.analysis.max_screenshots, 5);
    }

    #[test]
    fn test_validation_requires_analysis_key() {
        let config = Config::default();
        assert!(config.validate().is_err());

        let config = ConfigBuilder::new().with_api_key("sk-test".to_string()).build();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_confidence() {
        let mut config = ConfigBuilder::new().with_api_key("k".to_string()).build();
        config.analysis.min_confidence = 1.5;
        assert!(config.validate().is_err());
    }
}
