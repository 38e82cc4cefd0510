//! OpenAI-compatible Chat Completions provider.
//!
//! Streams `/v1/chat/completions` with `stream: true` and yields the text
//! deltas. Works against OpenAI, OpenRouter, vLLM, Ollama and other servers
//! speaking the same dialect.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_stream::StreamExt;
use tracing::{debug, trace};

use voxlane_core::config::LlmConfig;
use voxlane_core::types::ContextEntry;

use crate::sse::parse_sse_stream;
use crate::{FragmentStream, LanguageModel};

const OPENAI_BASE_URL: &str = "https://api.openai.com";

/// Streaming chat model over an OpenAI-compatible endpoint.
pub struct OpenAiChatModel {
    pub base_url: String,
    pub model: String,
    api_key: Option<String>,
    system_prompt: Option<String>,
    max_tokens: u32,
    temperature: f64,
    client: reqwest::Client,
}

impl OpenAiChatModel {
    pub fn new(config: &LlmConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs()))
            .build()?;

        Ok(Self {
            base_url: config
                .base_url
                .as_deref()
                .unwrap_or(OPENAI_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            model: config.model().to_string(),
            api_key: config.resolve_api_key(),
            system_prompt: config.system_prompt.clone(),
            max_tokens: config.max_tokens(),
            temperature: config.temperature(),
            client,
        })
    }

    /// Override sampling for auxiliary uses such as translation.
    pub fn with_sampling(mut self, max_tokens: u32, temperature: f64) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }

    pub fn without_system_prompt(mut self) -> Self {
        self.system_prompt = None;
        self
    }

    fn build_request(&self, context: &[ContextEntry]) -> ChatRequest {
        let mut messages = Vec::with_capacity(context.len() + 1);
        if let Some(ref system) = self.system_prompt {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.extend(
            context
                .iter()
                .map(|entry| json!({ "role": entry.role.as_str(), "content": entry.content })),
        );

        ChatRequest {
            model: self.model.clone(),
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream: true,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<serde_json::Value>,
    max_tokens: u32,
    temperature: f64,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Extract the text delta from one SSE `data:` payload.
///
/// Returns `Ok(None)` for the `[DONE]` sentinel, `Ok(Some(""))` for chunks
/// that carry no text (role announcements, usage, finish reasons).
fn parse_delta(data: &str) -> anyhow::Result<Option<String>> {
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(None);
    }
    let chunk: ChatCompletionChunk = serde_json::from_str(data)?;
    Ok(Some(
        chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .unwrap_or_default(),
    ))
}

#[async_trait]
impl LanguageModel for OpenAiChatModel {
    fn id(&self) -> &str {
        "openai"
    }

    async fn generate(&self, context: &[ContextEntry]) -> anyhow::Result<FragmentStream> {
        let body = self.build_request(context);
        debug!(model = %body.model, base_url = %self.base_url, turns = context.len(), "Streaming chat completion");

        let mut request = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("content-type", "application/json");
        // Local servers commonly run without a key.
        if let Some(ref key) = self.api_key {
            request = request.header("authorization", format!("Bearer {key}"));
        }

        let response = request.json(&body).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Chat completion error {status}: {body}");
        }

        let events = Box::pin(parse_sse_stream(response));
        let fragments = futures::stream::unfold(Some(events), |state| async move {
            let mut events = state?;
            loop {
                match events.next().await {
                    Some(Ok(event)) => match parse_delta(&event.data) {
                        Ok(Some(text)) if text.is_empty() => continue,
                        Ok(Some(text)) => return Some((Ok(text), Some(events))),
                        Ok(None) => return None,
                        Err(e) => {
                            trace!(%e, data = %event.data, "Skipping unparseable chunk");
                            continue;
                        }
                    },
                    // Stop after surfacing a transport error.
                    Some(Err(e)) => return Some((Err(e), None)),
                    None => return None,
                }
            }
        });

        Ok(Box::pin(fragments))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(config: LlmConfig) -> OpenAiChatModel {
        OpenAiChatModel::new(&config).unwrap()
    }

    #[test]
    fn test_defaults_and_base_url_trimming() {
        let m = model(LlmConfig {
            base_url: Some("http://localhost:8000/".into()),
            ..LlmConfig::default()
        });
        assert_eq!(m.base_url, "http://localhost:8000");
        assert_eq!(m.model, "gpt-4o-mini");
        assert_eq!(m.id(), "openai");

        let m = model(LlmConfig::default());
        assert_eq!(m.base_url, OPENAI_BASE_URL);
    }

    #[test]
    fn test_request_includes_system_prompt_and_context() {
        let m = model(LlmConfig {
            system_prompt: Some("You are Maho.".into()),
            ..LlmConfig::default()
        });
        let req = m.build_request(&[
            ContextEntry::user("Hi"),
            ContextEntry::assistant("Hello!"),
            ContextEntry::user("How are you?"),
        ]);
        assert!(req.stream);
        assert_eq!(req.messages.len(), 4);
        assert_eq!(req.messages[0]["role"], "system");
        assert_eq!(req.messages[1], json!({"role": "user", "content": "Hi"}));
        assert_eq!(req.messages[2]["role"], "assistant");
        assert_eq!(req.max_tokens, 512);
    }

    #[test]
    fn test_translation_sampling_override() {
        let m = model(LlmConfig {
            system_prompt: Some("persona".into()),
            ..LlmConfig::default()
        })
        .with_sampling(1024, 0.3)
        .without_system_prompt();
        let req = m.build_request(&[ContextEntry::user("translate")]);
        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.max_tokens, 1024);
        assert!((req.temperature - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_delta_variants() {
        let text = r#"{"id":"c1","choices":[{"index":0,"delta":{"content":"Hello"},"finish_reason":null}]}"#;
        assert_eq!(parse_delta(text).unwrap(), Some("Hello".into()));

        let role_only = r#"{"choices":[{"index":0,"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_delta(role_only).unwrap(), Some(String::new()));

        let usage_only = r#"{"choices":[],"usage":{"prompt_tokens":3}}"#;
        assert_eq!(parse_delta(usage_only).unwrap(), Some(String::new()));

        assert_eq!(parse_delta(" [DONE] ").unwrap(), None);
        assert!(parse_delta("not json").is_err());
    }
}
