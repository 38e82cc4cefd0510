//! Sentence translators.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_stream::StreamExt;
use tracing::debug;

use voxlane_core::types::ContextEntry;

use crate::{LanguageModel, Translator};

/// Human-readable name for a target language code.
pub fn language_name(code: &str) -> &str {
    match code {
        "ja" => "Japanese",
        "zh" => "Chinese",
        "en" => "English",
        other => other,
    }
}

/// Translates by prompting a language model and collecting its full reply.
pub struct LlmTranslator {
    model: Arc<dyn LanguageModel>,
    target_language: String,
}

impl LlmTranslator {
    pub fn new(model: Arc<dyn LanguageModel>, target_language: impl Into<String>) -> Self {
        Self {
            model,
            target_language: target_language.into(),
        }
    }

    fn prompt(&self, text: &str) -> String {
        format!(
            "Translate the following text into {}. Output only the translation, without any explanation:\n\n{text}",
            language_name(&self.target_language)
        )
    }
}

#[async_trait]
impl Translator for LlmTranslator {
    fn id(&self) -> &str {
        "llm"
    }

    async fn translate(&self, text: &str) -> anyhow::Result<String> {
        let mut stream = self
            .model
            .generate(&[ContextEntry::user(self.prompt(text))])
            .await?;

        let mut translated = String::new();
        while let Some(fragment) = stream.next().await {
            translated.push_str(&fragment?);
        }

        let translated = translated.trim();
        if translated.is_empty() {
            anyhow::bail!("Translator returned an empty result");
        }
        debug!(target = %self.target_language, chars = translated.chars().count(), "Translated sentence");
        Ok(translated.to_string())
    }
}

/// Leaves text untouched; used when the voice speaks the model's language.
pub struct PassthroughTranslator;

#[async_trait]
impl Translator for PassthroughTranslator {
    fn id(&self) -> &str {
        "passthrough"
    }

    async fn translate(&self, text: &str) -> anyhow::Result<String> {
        Ok(text.to_string())
    }
}
