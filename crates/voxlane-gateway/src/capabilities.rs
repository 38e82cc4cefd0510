//! Capability providers resolved from configuration by name.

use std::sync::Arc;

use tracing::info;

use voxlane_core::config::{AsrConfig, Config, LlmConfig, TranslatorConfig, TtsConfig};
use voxlane_core::error::{Result, VoxlaneError};
use voxlane_media::{
    ElevenLabsSynthesizer, OpenAiSpeechSynthesizer, SpeechRecognizer, SpeechSynthesizer,
    WhisperRecognizer,
};
use voxlane_pipeline::WorkerPool;
use voxlane_providers::{
    LanguageModel, LlmTranslator, OpenAiChatModel, PassthroughTranslator, Translator,
};

/// Builds a fresh recognizer for each connection.
pub type RecognizerFactory =
    Arc<dyn Fn() -> anyhow::Result<Arc<dyn SpeechRecognizer>> + Send + Sync>;

/// Translation sampling: deterministic enough to keep the voice on script.
const TRANSLATION_MAX_TOKENS: u32 = 1024;
const TRANSLATION_TEMPERATURE: f64 = 0.3;

/// The four capability roles plus the shared worker pool.
///
/// The language model, translator and synthesizer are shared by all
/// connections; recognizers hold per-connection audio and are built per
/// connection.
#[derive(Clone)]
pub struct Capabilities {
    pub model: Arc<dyn LanguageModel>,
    pub translator: Arc<dyn Translator>,
    pub tts: Arc<dyn SpeechSynthesizer>,
    pub recognizer: RecognizerFactory,
    pub pool: WorkerPool,
}

fn provider_error(e: anyhow::Error) -> VoxlaneError {
    VoxlaneError::Provider(e.to_string())
}

impl Capabilities {
    pub fn from_config(config: &Config) -> Result<Self> {
        let llm = config.llm();
        let capabilities = Self {
            model: build_model(&llm)?,
            translator: build_translator(&config.translator(), &llm)?,
            tts: build_tts(&config.tts())?,
            recognizer: build_recognizer(config.asr())?,
            pool: WorkerPool::new(config.worker_threads()),
        };
        info!(
            llm = capabilities.model.id(),
            translator = capabilities.translator.id(),
            tts = capabilities.tts.id(),
            workers = capabilities.pool.workers(),
            "Capabilities resolved"
        );
        Ok(capabilities)
    }

    pub fn new_recognizer(&self) -> anyhow::Result<Arc<dyn SpeechRecognizer>> {
        (self.recognizer)()
    }
}

fn build_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiChatModel::new(config).map_err(provider_error)?)),
        other => Err(VoxlaneError::Config(format!("Unknown llm provider: {other}"))),
    }
}

/// Translator settings fall back to the main LLM connection field by field.
fn translator_llm_config(translator: &TranslatorConfig, llm: &LlmConfig) -> LlmConfig {
    let has_own_key = translator.api_key.is_some() || translator.api_key_env.is_some();
    LlmConfig {
        base_url: translator.base_url.clone().or_else(|| llm.base_url.clone()),
        api_key: if has_own_key {
            translator.api_key.clone()
        } else {
            llm.api_key.clone()
        },
        api_key_env: if has_own_key {
            translator.api_key_env.clone()
        } else {
            llm.api_key_env.clone()
        },
        model: translator.model.clone().or_else(|| llm.model.clone()),
        system_prompt: None,
        ..llm.clone()
    }
}

fn build_translator(config: &TranslatorConfig, llm: &LlmConfig) -> Result<Arc<dyn Translator>> {
    match config.provider.as_str() {
        "llm" => {
            let model = OpenAiChatModel::new(&translator_llm_config(config, llm))
                .map_err(provider_error)?
                .with_sampling(TRANSLATION_MAX_TOKENS, TRANSLATION_TEMPERATURE)
                .without_system_prompt();
            Ok(Arc::new(LlmTranslator::new(
                Arc::new(model),
                config.target_language.clone(),
            )))
        }
        "passthrough" => Ok(Arc::new(PassthroughTranslator)),
        other => Err(VoxlaneError::Config(format!("Unknown translator provider: {other}"))),
    }
}

fn build_tts(config: &TtsConfig) -> Result<Arc<dyn SpeechSynthesizer>> {
    match config.provider.as_str() {
        "elevenlabs" => Ok(Arc::new(ElevenLabsSynthesizer::new(config).map_err(provider_error)?)),
        "openai" => Ok(Arc::new(OpenAiSpeechSynthesizer::new(config).map_err(provider_error)?)),
        other => Err(VoxlaneError::Config(format!("Unknown tts provider: {other}"))),
    }
}

fn build_recognizer(config: AsrConfig) -> Result<RecognizerFactory> {
    match config.provider.as_str() {
        "groq" | "openai" => Ok(Arc::new(move || {
            let recognizer: Arc<dyn SpeechRecognizer> = Arc::new(WhisperRecognizer::new(&config)?);
            Ok(recognizer)
        })),
        other => Err(VoxlaneError::Config(format!("Unknown asr provider: {other}"))),
    }
}
