use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

use super::Transcriber;
use crate::checkpoint::Segment;
use crate::config::TranscriptionConfig;

/// Whisper running as a local Python subprocess.
///
/// The driver script prints a single JSON object on stdout, possibly preceded
/// by diagnostic lines ("Detected language: ..."). Anything that doesn't
/// parse under that contract is an error, never a silently-empty transcript.
pub struct LocalWhisper {
    python_bin: String,
    script_path: PathBuf,
}

impl LocalWhisper {
    pub fn new(config: TranscriptionConfig) -> Result<Self> {
        let script_path = config
            .script_path
            .ok_or_else(|| anyhow!("local whisper requires transcription.script_path"))?;
        Ok(Self {
            python_bin: config.python_bin,
            script_path,
        })
    }
}

#[async_trait]
impl Transcriber for LocalWhisper {
    async fn transcribe(&self, audio_path: &Path) -> Result<Vec<Segment>> {
        if !self.script_path.exists() {
            return Err(anyhow!(
                "whisper script not found: {}",
                self.script_path.display()
            ));
        }

        info!("🎙️ Transcribing locally: {}", audio_path.display());

        let output = Command::new(&self.python_bin)
            .arg(&self.script_path)
            .arg(audio_path)
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.python_bin))?;

        if !output.status.success() {
            return Err(anyhow!(
                "whisper subprocess exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_whisper_stdout(&stdout)
    }
}

#[derive(Debug, Deserialize)]
struct WhisperDocument {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    segments: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    start: f64,
    end: f64,
    text: String,
}

/// Parse the whisper driver's stdout under the strict contract: optional
/// diagnostics prefix, then one JSON document with a `segments` array.
pub(crate) fn parse_whisper_stdout(stdout: &str) -> Result<Vec<Segment>> {
    let json_start = stdout
        .find('{')
        .ok_or_else(|| anyhow!("no JSON document in whisper output"))?;

    let document: WhisperDocument = serde_json::from_str(&stdout[json_start..])
        .context("malformed whisper JSON output")?;

    if let Some(error) = document.error {
        return Err(anyhow!("whisper reported an error: {}", error));
    }

    Ok(document
        .segments
        .into_iter()
        .map(|s| Segment {
            start: s.start,
            end: s.end,
            text: s.text,
        })
        .collect())
}

/// OpenAI-compatible transcription HTTP API (`verbose_json` response format).
pub struct OpenAiWhisper {
    config: TranscriptionConfig,
    client: reqwest::Client,
}

impl OpenAiWhisper {
    pub fn new(config: TranscriptionConfig) -> Result<Self> {
        if config.api_key.is_none() {
            return Err(anyhow!("OpenAI transcription requires an API key"));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self { config, client })
    }
}

#[derive(Debug, Deserialize)]
struct VerboseJsonResponse {
    #[serde(default)]
    segments: Vec<WhisperSegment>,
}

#[async_trait]
impl Transcriber for OpenAiWhisper {
    async fn transcribe(&self, audio_path: &Path) -> Result<Vec<Segment>> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| anyhow!("transcription API key not configured"))?;

        info!("🎙️ Uploading audio for transcription: {}", audio_path.display());

        let audio_bytes = tokio::fs::read(audio_path)
            .await
            .with_context(|| format!("read {}", audio_path.display()))?;
        let file_name = audio_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.wav".to_string());

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio_bytes)
                    .file_name(file_name)
                    .mime_str("audio/wav")?,
            )
            .text("model", self.config.model.clone())
            .text("response_format", "verbose_json");

        debug!("posting audio to {}", self.config.endpoint);

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(api_key)
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("transcription API error {}: {}", status, text));
        }

        let parsed: VerboseJsonResponse = response
            .json()
            .await
            .context("malformed transcription API response")?;

        Ok(parsed
            .segments
            .into_iter()
            .map(|s| Segment {
                start: s.start,
                end: s.end,
                text: s.text,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json_output() {
        let stdout = r#"{"segments": [{"id": 0, "start": 0.0, "end": 3.2, "text": "hello"}], "text": "hello"}"#;
        let segments = parse_whisper_stdout(stdout).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "hello");
        assert_eq!(segments[0].end, 3.2);
    }

    #[test]
    fn test_parse_skips_diagnostics_prefix() {
        let stdout = "Detected language: English\n{\"segments\": [], \"text\": \"\"}";
        let segments = parse_whisper_stdout(stdout).unwrap();
        assert!(segments.is_empty());
    }

    #[test]
    fn test_parse_rejects_missing_json() {
        let err = parse_whisper_stdout("no json here").unwrap_err();
        assert!(err.to_string().contains("no JSON document"));
    }

    #[test]
    fn test_parse_rejects_malformed_json() {
        assert!(parse_whisper_stdout("{\"segments\": [{\"start\": }]}").is_err());
    }

    #[test]
    fn test_parse_surfaces_script_error() {
        let stdout = r#"{"error": "model download failed"}"#;
        let err = parse_whisper_stdout(stdout).unwrap_err();
        assert!(err.to_string().contains("model download failed"));
    }

    #[test]
    fn test_parse_rejects_segments_missing_fields() {
        // A segment without timestamps violates the contract.
        let stdout = r#"{"segments": [{"text": "hello"}]}"#;
        assert!(parse_whisper_stdout(stdout).is_err());
    }
}
