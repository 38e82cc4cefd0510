//! Scripted capability fakes for pipeline tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use voxlane_core::types::ContextEntry;
use voxlane_media::SpeechSynthesizer;
use voxlane_providers::{FragmentStream, LanguageModel, Translator};

/// Streams a fixed script of fragments, optionally ending in an error.
pub struct FakeModel {
    fragments: Vec<String>,
    error: Option<String>,
    delay: Duration,
    pub contexts: Arc<Mutex<Vec<Vec<ContextEntry>>>>,
}

impl FakeModel {
    pub fn new(fragments: &[&str]) -> Self {
        Self {
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
            error: None,
            delay: Duration::ZERO,
            contexts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing_after(fragments: &[&str], error: &str) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::new(fragments)
        }
    }

    /// Wait `delay` before each fragment.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl LanguageModel for FakeModel {
    fn id(&self) -> &str {
        "fake"
    }

    async fn generate(&self, context: &[ContextEntry]) -> anyhow::Result<FragmentStream> {
        self.contexts.lock().unwrap().push(context.to_vec());

        let mut items: Vec<anyhow::Result<String>> =
            self.fragments.iter().cloned().map(Ok).collect();
        if let Some(ref error) = self.error {
            items.push(Err(anyhow::anyhow!("{error}")));
        }

        let delay = self.delay;
        let stream = futures::stream::iter(items).then(move |item| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            item
        });
        Ok(Box::pin(stream))
    }
}

pub enum FakeTranslator {
    Prefix(String),
    Failing,
}

impl FakeTranslator {
    pub fn prefix(prefix: &str) -> Self {
        Self::Prefix(prefix.to_string())
    }

    pub fn failing() -> Self {
        Self::Failing
    }
}

#[async_trait]
impl Translator for FakeTranslator {
    fn id(&self) -> &str {
        "fake"
    }

    async fn translate(&self, text: &str) -> anyhow::Result<String> {
        match self {
            Self::Prefix(prefix) => Ok(format!("{prefix}{text}")),
            Self::Failing => anyhow::bail!("translation service unavailable"),
        }
    }
}

/// "Synthesizes" the text's own bytes, recording every call.
pub struct FakeTts {
    calls: Arc<Mutex<Vec<String>>>,
    delay: Duration,
    silent: bool,
}

impl FakeTts {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            delay: Duration::ZERO,
            silent: false,
        }
    }

    pub fn silent() -> Self {
        Self {
            silent: true,
            ..Self::new()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new()
        }
    }

    pub fn calls(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeTts {
    fn id(&self) -> &str {
        "fake"
    }

    async fn synthesize_audio(&self, text: &str) -> Option<Vec<u8>> {
        self.calls.lock().unwrap().push(text.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (!self.silent).then(|| text.as_bytes().to_vec())
    }
}
