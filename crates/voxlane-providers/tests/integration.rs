//! Provider integration tests against the live OpenAI API.
//!
//! Skipped when `OPENAI_API_KEY` is not set.
//! Run with: `cargo test -p voxlane-providers --test integration`

use std::sync::Arc;

use tokio_stream::StreamExt;
use voxlane_core::config::LlmConfig;
use voxlane_core::types::ContextEntry;
use voxlane_providers::{LanguageModel, LlmTranslator, OpenAiChatModel, Translator};

fn openai_key() -> Option<String> {
    std::env::var("OPENAI_API_KEY")
        .ok()
        .filter(|k| !k.is_empty())
}

fn model() -> OpenAiChatModel {
    OpenAiChatModel::new(&LlmConfig {
        max_tokens: Some(50),
        temperature: Some(0.0),
        system_prompt: Some("You are a helpful assistant. Follow instructions exactly.".into()),
        ..LlmConfig::default()
    })
    .expect("client")
}

#[tokio::test]
async fn openai_streams_fragments() {
    if openai_key().is_none() {
        eprintln!("Skipping: OPENAI_API_KEY not set");
        return;
    }

    let model = model();
    let mut stream = model
        .generate(&[ContextEntry::user("Reply with exactly the word 'hello'.")])
        .await
        .expect("stream creation");

    let mut text = String::new();
    let mut fragments = 0;
    while let Some(fragment) = stream.next().await {
        text.push_str(&fragment.expect("fragment"));
        fragments += 1;
    }

    assert!(fragments > 0, "no fragments received");
    assert!(text.to_lowercase().contains("hello"), "unexpected reply: {text}");
}

#[tokio::test]
async fn openai_translates_to_japanese() {
    if openai_key().is_none() {
        eprintln!("Skipping: OPENAI_API_KEY not set");
        return;
    }

    let model = model().with_sampling(1024, 0.3).without_system_prompt();
    let translator = LlmTranslator::new(Arc::new(model), "ja");
    let out = translator.translate("Good morning.").await.expect("translation");

    assert!(!out.is_empty());
    assert!(!out.is_ascii(), "expected Japanese output, got: {out}");
}

#[tokio::test]
async fn openai_rejects_bad_key() {
    if openai_key().is_none() {
        eprintln!("Skipping: OPENAI_API_KEY not set");
        return;
    }

    let model = OpenAiChatModel::new(&LlmConfig {
        api_key: Some("sk-invalid".into()),
        api_key_env: None,
        ..LlmConfig::default()
    })
    .expect("client");
    let result = model.generate(&[ContextEntry::user("Hi")]).await;
    assert!(result.is_err());
}
