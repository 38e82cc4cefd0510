//! Language model and translation capabilities.
//!
//! The session pipeline only sees the [`LanguageModel`] and [`Translator`]
//! traits; concrete providers are chosen by name once at startup.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use voxlane_core::types::ContextEntry;

pub mod openai;
pub mod sse;
pub mod translator;

pub use openai::OpenAiChatModel;
pub use translator::{LlmTranslator, PassthroughTranslator};

/// A lazy, finite stream of text fragments from one model invocation.
pub type FragmentStream = Pin<Box<dyn Stream<Item = anyhow::Result<String>> + Send>>;

/// Token-streaming language model.
///
/// Each call to [`generate`](LanguageModel::generate) starts a fresh
/// invocation; a returned stream cannot be restarted.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Provider identifier (e.g. "openai").
    fn id(&self) -> &str;

    /// Stream the reply to the given context window.
    async fn generate(&self, context: &[ContextEntry]) -> anyhow::Result<FragmentStream>;
}

/// Text translation into a configured target language.
#[async_trait]
pub trait Translator: Send + Sync {
    fn id(&self) -> &str;

    async fn translate(&self, text: &str) -> anyhow::Result<String>;
}
