//! Speech-to-text over Whisper-style transcription endpoints.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use voxlane_core::config::AsrConfig;

use crate::SpeechRecognizer;
use crate::utterance::{Utterance, UtteranceBuffer};

/// Wrap raw 16-bit PCM in a WAV container.
pub fn pcm_to_wav(pcm: &[i16], sample_rate: u32, channels: u16, bits_per_sample: u16) -> Vec<u8> {
    let data_len = pcm.len() * 2;
    let byte_rate = sample_rate * channels as u32 * bits_per_sample as u32 / 8;
    let block_align = channels * bits_per_sample / 8;
    let file_size = 36 + data_len as u32;

    let mut wav = Vec::with_capacity(44 + data_len);

    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&file_size.to_le_bytes());
    wav.extend_from_slice(b"WAVE");

    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&channels.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&bits_per_sample.to_le_bytes());

    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&(data_len as u32).to_le_bytes());
    for &sample in pcm {
        wav.extend_from_slice(&sample.to_le_bytes());
    }

    wav
}

/// Transcription endpoint for the configured provider.
pub fn provider_url(config: &AsrConfig) -> &str {
    if let Some(ref url) = config.api_url {
        return url;
    }
    match config.provider.as_str() {
        "openai" => "https://api.openai.com/v1/audio/transcriptions",
        _ => "https://api.groq.com/openai/v1/audio/transcriptions",
    }
}

fn default_model(provider: &str) -> &'static str {
    match provider {
        "openai" => "whisper-1",
        _ => "whisper-large-v3-turbo",
    }
}

/// Resolved request settings shared with background transcription tasks.
#[derive(Debug, Clone)]
struct Endpoint {
    url: String,
    api_key: Option<String>,
    model: String,
    language: Option<String>,
    sample_rate: u32,
}

impl Endpoint {
    async fn transcribe(&self, client: &reqwest::Client, utterance: &Utterance) -> Result<String> {
        let wav = pcm_to_wav(&utterance.pcm, self.sample_rate, 1, 16);
        debug!(url = %self.url, model = %self.model, wav_bytes = wav.len(), duration_ms = utterance.duration_ms, "Sending audio for transcription");

        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")?;
        let mut form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .text("response_format", "text")
            .part("file", part);
        if let Some(ref language) = self.language {
            form = form.text("language", language.clone());
        }

        let mut request = client.post(&self.url).multipart(form);
        if let Some(ref key) = self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let resp = request.send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Transcription API error {status}: {body}");
        }

        Ok(resp.text().await?.trim().to_string())
    }
}

struct RecognitionState {
    on_final: Option<mpsc::UnboundedSender<String>>,
    buffer: UtteranceBuffer,
    /// A recognition session is open and has not been finished.
    active: bool,
    session: u64,
}

/// Buffers one utterance of PCM and transcribes it when the utterance ends.
///
/// The end of an utterance is either an explicit `finish_audio` or, with
/// VAD enabled, sustained silence. The next audio chunk opens a new
/// recognition session.
pub struct WhisperRecognizer {
    endpoint: Arc<Endpoint>,
    client: reqwest::Client,
    state: Mutex<RecognitionState>,
}

impl WhisperRecognizer {
    pub fn new(config: &AsrConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        let api_key = config.resolve_api_key();
        if api_key.is_none() && config.api_url.is_none() {
            warn!(provider = %config.provider, "No transcription API key configured");
        }

        Ok(Self {
            endpoint: Arc::new(Endpoint {
                url: provider_url(config).to_string(),
                api_key,
                model: config
                    .model
                    .clone()
                    .unwrap_or_else(|| default_model(&config.provider).to_string()),
                language: config.language.clone(),
                sample_rate: config.sample_rate,
            }),
            client,
            state: Mutex::new(RecognitionState {
                on_final: None,
                buffer: UtteranceBuffer::new(config.sample_rate, config.vad),
                active: false,
                session: 0,
            }),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, RecognitionState>> {
        self.state
            .lock()
            .map_err(|_| anyhow::anyhow!("recognizer state poisoned"))
    }

    /// Close the current recognition session and transcribe in the background.
    fn finish_session(&self, state: &mut RecognitionState) {
        if !state.active {
            return;
        }
        state.active = false;

        let Some(utterance) = state.buffer.take() else {
            debug!(session = state.session, "Recognition session finished without audio");
            return;
        };
        let Some(on_final) = state.on_final.clone() else {
            warn!("Recognizer finished before start; dropping utterance");
            return;
        };

        let endpoint = Arc::clone(&self.endpoint);
        let client = self.client.clone();
        let session = state.session;
        tokio::spawn(async move {
            match endpoint.transcribe(&client, &utterance).await {
                Ok(text) if text.is_empty() => {
                    debug!(session, "Transcription was empty");
                }
                Ok(text) => {
                    info!(session, chars = text.chars().count(), "Final transcript");
                    if on_final.send(text).is_err() {
                        debug!(session, "Transcript receiver dropped");
                    }
                }
                Err(e) => warn!(session, error = %e, "Transcription failed"),
            }
        });
    }
}

#[async_trait]
impl SpeechRecognizer for WhisperRecognizer {
    fn id(&self) -> &str {
        "whisper"
    }

    async fn start(&self, on_final: mpsc::UnboundedSender<String>) -> Result<()> {
        let mut state = self.lock()?;
        state.on_final = Some(on_final);
        state.buffer.clear();
        state.active = true;
        state.session += 1;
        debug!(session = state.session, url = %self.endpoint.url, "Recognition session started");
        Ok(())
    }

    async fn send_audio(&self, chunk: &[u8]) -> Result<()> {
        let mut state = self.lock()?;
        if !state.active {
            state.active = true;
            state.session += 1;
            debug!(session = state.session, "Recognition session restarted");
        }
        if state.buffer.push(chunk) {
            self.finish_session(&mut state);
        }
        Ok(())
    }

    async fn finish_audio(&self) -> Result<()> {
        let mut state = self.lock()?;
        self.finish_session(&mut state);
        Ok(())
    }
}
