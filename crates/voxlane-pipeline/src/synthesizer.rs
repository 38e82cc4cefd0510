//! Sentence translation, synthesis and audio framing.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::{debug, info, warn};

use voxlane_core::protocol::ServerFrame;
use voxlane_media::SpeechSynthesizer;
use voxlane_providers::Translator;

use crate::pool::WorkerPool;

/// A slice of one sentence's synthesized audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub data: Vec<u8>,
    pub is_final: bool,
}

impl AudioFrame {
    /// Encode for the wire.
    pub fn into_server_frame(self) -> ServerFrame {
        ServerFrame::Audio {
            data: STANDARD.encode(&self.data),
            is_final: self.is_final,
        }
    }
}

/// Split `audio` into frames of at most `chunk_bytes`, flagging the last.
pub fn frame_audio(audio: &[u8], chunk_bytes: usize) -> Vec<AudioFrame> {
    let chunk_bytes = chunk_bytes.max(1);
    let count = audio.len().div_ceil(chunk_bytes);
    audio
        .chunks(chunk_bytes)
        .enumerate()
        .map(|(index, chunk)| AudioFrame {
            data: chunk.to_vec(),
            is_final: index + 1 == count,
        })
        .collect()
}

/// Translates and voices completed sentences.
pub struct SentenceSynthesizer {
    translator: Arc<dyn Translator>,
    tts: Arc<dyn SpeechSynthesizer>,
    pool: WorkerPool,
    chunk_bytes: usize,
}

impl SentenceSynthesizer {
    pub fn new(
        translator: Arc<dyn Translator>,
        tts: Arc<dyn SpeechSynthesizer>,
        pool: WorkerPool,
        chunk_bytes: usize,
    ) -> Self {
        Self {
            translator,
            tts,
            pool,
            chunk_bytes,
        }
    }

    /// Produce the audio frames for one sentence. Every failure is logged
    /// and yields no frames.
    pub async fn synthesize(&self, sentence: &str) -> Vec<AudioFrame> {
        let translator = Arc::clone(&self.translator);
        let text = sentence.to_string();
        let translated = match self
            .pool
            .run(async move { translator.translate(&text).await })
            .await
        {
            Ok(Ok(translated)) => translated,
            Ok(Err(e)) => {
                warn!(error = %e, sentence_len = sentence.len(), "Translation failed; skipping sentence");
                return Vec::new();
            }
            Err(e) => {
                warn!(error = %e, "Translation worker failed; skipping sentence");
                return Vec::new();
            }
        };
        debug!(translated = %translated, "Translated sentence");

        let tts = Arc::clone(&self.tts);
        let text = translated.clone();
        let audio = match self
            .pool
            .run(async move { tts.synthesize_audio(&text).await })
            .await
        {
            Ok(Some(audio)) if !audio.is_empty() => audio,
            Ok(_) => {
                warn!(provider = self.tts.id(), "TTS produced no audio; skipping sentence");
                return Vec::new();
            }
            Err(e) => {
                warn!(error = %e, "Synthesis worker failed; skipping sentence");
                return Vec::new();
            }
        };

        let frames = frame_audio(&audio, self.chunk_bytes);
        info!(audio_bytes = audio.len(), frames = frames.len(), "Synthesized sentence");
        frames
    }
}
