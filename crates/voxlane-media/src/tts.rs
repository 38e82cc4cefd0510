//! Text-to-speech providers.
//!
//! Both providers collect the full audio body for a sentence; framing for
//! transport happens in the session pipeline.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, warn};

use voxlane_core::config::TtsConfig;

use crate::SpeechSynthesizer;

const ELEVENLABS_BASE_URL: &str = "https://api.elevenlabs.io";
const OPENAI_BASE_URL: &str = "https://api.openai.com";

fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(60))
        .build()?)
}

/// Log and swallow synthesis failures.
fn audio_or_none(provider: &str, text: &str, result: Result<Vec<u8>>) -> Option<Vec<u8>> {
    match result {
        Ok(audio) if audio.is_empty() => {
            warn!(provider, text_len = text.len(), "TTS returned no audio");
            None
        }
        Ok(audio) => Some(audio),
        Err(e) => {
            warn!(provider, error = %e, "TTS generation failed");
            None
        }
    }
}

/// ElevenLabs streaming endpoint, collected into one buffer.
pub struct ElevenLabsSynthesizer {
    base_url: String,
    api_key: Option<String>,
    voice: String,
    model: String,
    format: String,
    client: reqwest::Client,
}

impl ElevenLabsSynthesizer {
    pub fn new(config: &TtsConfig) -> Result<Self> {
        Ok(Self {
            base_url: config
                .base_url
                .as_deref()
                .unwrap_or(ELEVENLABS_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key: config.resolve_api_key(),
            voice: config.voice.clone().unwrap_or_else(|| "Rachel".into()),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| "eleven_turbo_v2".into()),
            format: config.format.clone().unwrap_or_else(|| "pcm_16000".into()),
            client: http_client()?,
        })
    }

    pub fn stream_url(&self) -> String {
        format!(
            "{}/v1/text-to-speech/{}/stream?output_format={}",
            self.base_url, self.voice, self.format
        )
    }

    async fn request_audio(&self, text: &str) -> Result<Vec<u8>> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("No TTS API key configured"))?;

        debug!(voice = %self.voice, model = %self.model, text_len = text.len(), "Starting TTS stream");

        let resp = self
            .client
            .post(self.stream_url())
            .header("xi-api-key", api_key)
            .header("Content-Type", "application/json")
            .json(&serde_json::json!({
                "text": text,
                "model_id": self.model,
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("TTS API error {status}: {body}");
        }

        let mut audio = Vec::new();
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| anyhow::anyhow!("TTS stream error: {e}"))?;
            audio.extend_from_slice(&chunk);
        }
        Ok(audio)
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsSynthesizer {
    fn id(&self) -> &str {
        "elevenlabs"
    }

    async fn synthesize_audio(&self, text: &str) -> Option<Vec<u8>> {
        audio_or_none(self.id(), text, self.request_audio(text).await)
    }
}

/// OpenAI-compatible `/v1/audio/speech`.
pub struct OpenAiSpeechSynthesizer {
    base_url: String,
    api_key: Option<String>,
    voice: String,
    model: String,
    format: String,
    client: reqwest::Client,
}

impl OpenAiSpeechSynthesizer {
    pub fn new(config: &TtsConfig) -> Result<Self> {
        // The ElevenLabs env default does not apply here.
        let api_key = config.resolve_api_key().or_else(|| {
            std::env::var("OPENAI_API_KEY")
                .ok()
                .filter(|k| !k.is_empty())
        });

        Ok(Self {
            base_url: config
                .base_url
                .as_deref()
                .unwrap_or(OPENAI_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key,
            voice: config.voice.clone().unwrap_or_else(|| "alloy".into()),
            model: config.model.clone().unwrap_or_else(|| "tts-1".into()),
            format: config.format.clone().unwrap_or_else(|| "wav".into()),
            client: http_client()?,
        })
    }

    fn request_body(&self, text: &str) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "input": text,
            "voice": self.voice,
            "response_format": self.format,
        })
    }

    async fn request_audio(&self, text: &str) -> Result<Vec<u8>> {
        debug!(voice = %self.voice, model = %self.model, text_len = text.len(), "Requesting speech");

        let mut request = self
            .client
            .post(format!("{}/v1/audio/speech", self.base_url))
            .json(&self.request_body(text));
        if let Some(ref key) = self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let resp = request.send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Speech API error {status}: {body}");
        }

        Ok(resp.bytes().await?.to_vec())
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiSpeechSynthesizer {
    fn id(&self) -> &str {
        "openai"
    }

    async fn synthesize_audio(&self, text: &str) -> Option<Vec<u8>> {
        audio_or_none(self.id(), text, self.request_audio(text).await)
    }
}
