use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use super::{Captioner, MomentAnalyzer};
use crate::checkpoint::Candidate;
use crate::config::{AnalysisConfig, CaptionConfig};

const ANALYSIS_PROMPT: &str = "Analyze this video transcription and identify moments that would \
benefit from a screenshot to capture important visual content. Look for mentions of charts, \
graphs, code, demonstrations, important visual elements, or key concepts that would be better \
understood with an image.";

const CAPTION_PROMPT: &str = "Describe this image in detail, focusing on any text, charts, code, \
or important visual elements visible in the screenshot.";

/// OpenRouter chat-completions client, used for both transcript analysis and
/// image captioning.
pub struct OpenRouterClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    min_confidence: f64,
}

impl OpenRouterClient {
    pub fn analyzer(config: AnalysisConfig) -> Result<Self> {
        Self::build(
            config.endpoint,
            config.model,
            config.api_key,
            config.timeout_seconds,
            config.min_confidence,
        )
    }

    pub fn captioner(config: CaptionConfig) -> Result<Self> {
        Self::build(
            config.endpoint,
            config.model,
            config.api_key,
            config.timeout_seconds,
            0.0,
        )
    }

    fn build(
        endpoint: String,
        model: String,
        api_key: Option<String>,
        timeout_seconds: u64,
        min_confidence: f64,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()?;
        Ok(Self {
            client,
            endpoint,
            model,
            api_key,
            min_confidence,
        })
    }

    async fn chat(&self, payload: serde_json::Value) -> Result<String> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| anyhow!("OpenRouter API key not configured"))?;

        debug!("posting chat request to {}", self.endpoint);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("OpenRouter API error {}: {}", status, text));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .context("malformed OpenRouter response")?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("empty choices in OpenRouter response"))?
            .message
            .content;

        Ok(content)
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[async_trait]
impl MomentAnalyzer for OpenRouterClient {
    async fn analyze(&self, transcript: &str) -> Result<Vec<Candidate>> {
        info!("🔎 Analyzing transcript for screenshot moments");

        let prompt = format!(
            "{}\n\nTranscription segments:\n{}\n\nReturn a JSON object with a 'screenshots' array \
             of objects carrying 'timestamp' (float seconds), 'reason' (string), and 'confidence' \
             (float 0-1) fields.",
            ANALYSIS_PROMPT, transcript
        );

        let payload = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": 0.3,
            "response_format": { "type": "json_object" }
        });

        let content = self.chat(payload).await?;
        parse_candidates(&content, self.min_confidence)
    }
}

#[derive(Debug, Deserialize)]
struct CandidateDocument {
    screenshots: Vec<WireCandidate>,
}

#[derive(Debug, Deserialize)]
struct WireCandidate {
    timestamp: f64,
    reason: String,
    #[serde(default)]
    confidence: Option<f64>,
}

/// Parse the analysis response under a strict contract: a JSON object with a
/// `screenshots` array whose entries all carry a timestamp. Entries below the
/// confidence floor are dropped; a missing confidence counts as zero.
pub(crate) fn parse_candidates(content: &str, min_confidence: f64) -> Result<Vec<Candidate>> {
    let document: CandidateDocument =
        serde_json::from_str(content).context("malformed analysis response")?;

    Ok(document
        .screenshots
        .into_iter()
        .filter_map(|c| {
            let confidence = c.confidence.unwrap_or(0.0);
            (confidence >= min_confidence).then_some(Candidate {
                timestamp: c.timestamp,
                reason: c.reason,
                confidence,
            })
        })
        .collect())
}

#[async_trait]
impl Captioner for OpenRouterClient {
    async fn caption(&self, image_path: &Path) -> Result<String> {
        debug!("🖼️ Captioning {}", image_path.display());

        let image_bytes = tokio::fs::read(image_path)
            .await
            .with_context(|| format!("read {}", image_path.display()))?;
        let data_url = format!("data:image/png;base64,{}", BASE64.encode(&image_bytes));

        let payload = json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": CAPTION_PROMPT },
                    { "type": "image_url", "image_url": { "url": data_url } }
                ]
            }],
            "temperature": 0.3
        });

        let content = self.chat(payload).await?;
        let caption = content.trim().to_string();
        if caption.is_empty() {
            return Err(anyhow!("empty caption in OpenRouter response"));
        }
        Ok(caption)
    }
}
