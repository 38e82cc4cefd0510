//! Configuration loading and validation.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VoxlaneError};

/// Default audio frame size: 30 KiB, a multiple of both 3 (base64) and 2 (16-bit samples).
pub const DEFAULT_AUDIO_CHUNK_BYTES: usize = 30 * 1024;

/// Top-level voxlane configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm: Option<LlmConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub translator: Option<TranslatorConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts: Option<TtsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub asr: Option<AsrConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<PipelineConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<GatewayAuthConfig>,
}

fn default_port() -> u16 {
    8765
}

/// Authentication for privileged session commands (`chat`, `audio`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayAuthConfig {
    /// Auth mode: "none" or "token". Default: "none".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,
}

impl GatewayAuthConfig {
    /// Resolve the auth token from direct value or env var.
    pub fn resolve_token(&self) -> Option<String> {
        resolve_secret_field(&self.token, &self.token_env)
    }

    /// Get the effective auth mode.
    pub fn effective_mode(&self) -> &str {
        self.mode.as_deref().unwrap_or("none")
    }
}

/// Streaming language model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Registry name of the model provider (default: "openai").
    #[serde(default = "default_llm_provider")]
    pub provider: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    /// Persona prompt sent ahead of the context window on every turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Request timeout in seconds (default: 60).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

fn default_llm_provider() -> String {
    "openai".into()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            base_url: None,
            api_key: None,
            api_key_env: Some("OPENAI_API_KEY".into()),
            model: None,
            max_tokens: None,
            temperature: None,
            system_prompt: None,
            timeout_secs: None,
        }
    }
}

impl LlmConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }

    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or("gpt-4o-mini")
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens.unwrap_or(512)
    }

    pub fn temperature(&self) -> f64 {
        self.temperature.unwrap_or(0.7)
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs.unwrap_or(60)
    }
}

/// Sentence translation settings. Unset connection fields fall back to `llm`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslatorConfig {
    /// "llm" (default) or "passthrough".
    #[serde(default = "default_translator_provider")]
    pub provider: String,

    /// Target language code (default: "ja").
    #[serde(default = "default_target_language")]
    pub target_language: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

fn default_translator_provider() -> String {
    "llm".into()
}

fn default_target_language() -> String {
    "ja".into()
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            provider: default_translator_provider(),
            target_language: default_target_language(),
            base_url: None,
            api_key: None,
            api_key_env: None,
            model: None,
        }
    }
}

impl TranslatorConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

/// Speech synthesis settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    /// "elevenlabs" (default) or "openai".
    #[serde(default = "default_tts_provider")]
    pub provider: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Provider-specific output format (e.g. "pcm_16000", "wav").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

fn default_tts_provider() -> String {
    "elevenlabs".into()
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            provider: default_tts_provider(),
            api_key: None,
            api_key_env: Some("ELEVENLABS_API_KEY".into()),
            base_url: None,
            voice: None,
            model: None,
            format: None,
        }
    }
}

impl TtsConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

/// Speech recognition settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsrConfig {
    /// Transcription backend: "groq" (default) or "openai".
    #[serde(default = "default_asr_provider")]
    pub provider: String,

    /// Override for the transcription endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// Sample rate of inbound 16-bit mono PCM (default: 16000).
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// End recognition automatically after sustained silence.
    #[serde(default)]
    pub vad: bool,
}

fn default_asr_provider() -> String {
    "groq".into()
}

fn default_sample_rate() -> u32 {
    16_000
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self {
            provider: default_asr_provider(),
            api_url: None,
            api_key: None,
            api_key_env: Some("GROQ_API_KEY".into()),
            model: None,
            language: None,
            sample_rate: default_sample_rate(),
            vad: false,
        }
    }
}

impl AsrConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

/// Per-session pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum bytes of raw audio per outbound `audio` frame.
    #[serde(default = "default_audio_chunk_bytes")]
    pub audio_chunk_bytes: usize,

    /// Concurrent translation/synthesis calls allowed across all sessions.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
}

fn default_audio_chunk_bytes() -> usize {
    DEFAULT_AUDIO_CHUNK_BYTES
}

fn default_worker_threads() -> usize {
    4
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            audio_chunk_bytes: default_audio_chunk_bytes(),
            worker_threads: default_worker_threads(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "voxlane_pipeline=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            level: None,
            filters: Vec::new(),
            output: default_log_output(),
        }
    }
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

static ENV_REF: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"\$\{([^}]+)\}").expect("env reference pattern"));

/// Replace `${VAR}` references with environment values (empty when unset).
fn substitute_env_vars(input: &str) -> String {
    ENV_REF
        .replace_all(input, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    ///
    /// A missing file yields the default config.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    /// Parse a JSON5 document, substituting `${ENV_VAR}` references first.
    pub fn parse(raw: &str) -> Result<Self> {
        let substituted = substitute_env_vars(raw);
        json5::from_str(&substituted).map_err(|e| VoxlaneError::Config(e.to_string()))
    }

    /// Default config file location: `~/.voxlane/config.json5`.
    pub fn default_path() -> PathBuf {
        data_dir().join("config.json5")
    }

    pub fn gateway_port(&self) -> u16 {
        self.gateway
            .as_ref()
            .map(|g| g.port)
            .unwrap_or_else(default_port)
    }

    pub fn gateway_bind(&self) -> String {
        self.gateway
            .as_ref()
            .and_then(|g| g.bind.clone())
            .unwrap_or_else(|| "0.0.0.0".to_string())
    }

    pub fn auth(&self) -> GatewayAuthConfig {
        self.gateway
            .as_ref()
            .and_then(|g| g.auth.clone())
            .unwrap_or_default()
    }

    pub fn llm(&self) -> LlmConfig {
        self.llm.clone().unwrap_or_default()
    }

    pub fn translator(&self) -> TranslatorConfig {
        self.translator.clone().unwrap_or_default()
    }

    pub fn tts(&self) -> TtsConfig {
        self.tts.clone().unwrap_or_default()
    }

    pub fn asr(&self) -> AsrConfig {
        self.asr.clone().unwrap_or_default()
    }

    pub fn logging(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }

    pub fn audio_chunk_bytes(&self) -> usize {
        self.pipeline
            .as_ref()
            .map(|p| p.audio_chunk_bytes)
            .unwrap_or(DEFAULT_AUDIO_CHUNK_BYTES)
    }

    pub fn worker_threads(&self) -> usize {
        self.pipeline
            .as_ref()
            .map(|p| p.worker_threads)
            .unwrap_or_else(default_worker_threads)
    }

    /// Validate the configuration. Returns `(warnings, errors)`.
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if self.gateway_port() == 0 {
            errors.push("Gateway port cannot be 0".to_string());
        }

        let auth = self.auth();
        match auth.effective_mode() {
            "none" => {}
            "token" => {
                if auth.resolve_token().is_none() {
                    errors.push("Token auth enabled but no token configured".to_string());
                }
            }
            other => errors.push(format!("Unknown auth mode: {other}")),
        }

        let chunk = self.audio_chunk_bytes();
        if chunk == 0 {
            errors.push("pipeline.audio_chunk_bytes cannot be 0".to_string());
        } else if chunk % 6 != 0 {
            errors.push(format!(
                "pipeline.audio_chunk_bytes ({chunk}) must be a multiple of 6 so frames \
                 neither split samples nor pad base64"
            ));
        }

        if self.worker_threads() == 0 {
            errors.push("pipeline.worker_threads cannot be 0".to_string());
        }

        let llm = self.llm();
        if llm.resolve_api_key().is_none() && llm.base_url.is_none() {
            warnings.push(format!(
                "LLM provider '{}' has no API key configured",
                llm.provider
            ));
        }

        let tts = self.tts();
        if tts.resolve_api_key().is_none() {
            warnings.push(format!(
                "TTS provider '{}' has no API key configured",
                tts.provider
            ));
        }

        let asr = self.asr();
        if asr.resolve_api_key().is_none() {
            warnings.push(format!(
                "ASR provider '{}' has no API key configured",
                asr.provider
            ));
        }

        (warnings, errors)
    }
}

/// Base directory for voxlane data: `~/.voxlane/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".voxlane")
}
