//! Speech capabilities: recognition (VAD + STT) and synthesis (TTS).
//!
//! The session pipeline talks to these only through [`SpeechRecognizer`] and
//! [`SpeechSynthesizer`].

use async_trait::async_trait;
use tokio::sync::mpsc;

pub mod stt;
pub mod tts;
pub mod utterance;
pub mod vad;

pub use stt::WhisperRecognizer;
pub use tts::{ElevenLabsSynthesizer, OpenAiSpeechSynthesizer};

/// Streaming speech recognition for one connection.
///
/// A recognition session begins with [`start`](SpeechRecognizer::start) or,
/// after a previous session finished, implicitly on the next audio chunk.
/// The final transcript of each session is delivered at most once through
/// the sender passed to `start`.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    fn id(&self) -> &str;

    async fn start(&self, on_final: mpsc::UnboundedSender<String>) -> anyhow::Result<()>;

    /// Feed raw 16-bit little-endian mono PCM.
    async fn send_audio(&self, chunk: &[u8]) -> anyhow::Result<()>;

    /// Mark the end of the current utterance.
    async fn finish_audio(&self) -> anyhow::Result<()>;
}

/// Text-to-speech. Failures are reported as `None`, never as errors.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    fn id(&self) -> &str;

    async fn synthesize_audio(&self, text: &str) -> Option<Vec<u8>>;
}
