use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::pipeline::PipelineSettings;

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_timeout() -> u64 {
    600
}

fn default_llm_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_min_chapter_chars() -> usize {
    1000
}

fn default_max_chapter_attempts() -> usize {
    10
}

fn default_speech_base_url() -> String {
    "https://api.replicate.com/v1".to_string()
}

fn default_speech_token_env() -> String {
    "REPLICATE_API_TOKEN".to_string()
}

fn default_speech_model_version() -> String {
    "684bc3855b37866c0c65add2ff39c78f3dea3f4ff103a436465326e0f438d55e".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1500
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A named connection to a text-generation service.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LlmConfig {
    #[serde(default)]
    pub api_key: String,
    /// Environment variable consulted when `api_key` is blank.
    #[serde(default = "default_llm_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub interface_format: String,
    #[serde(default)]
    pub model_name: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Request token-streamed responses when the service supports them.
    #[serde(default)]
    pub stream: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_key_env: default_llm_key_env(),
            base_url: String::new(),
            interface_format: String::new(),
            model_name: String::new(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout: default_timeout(),
            stream: false,
        }
    }
}

impl LlmConfig {
    pub fn resolved_api_key(&self) -> String {
        resolve_secret(&self.api_key, &self.api_key_env)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BookConfig {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub output_dir: String,
    #[serde(default = "default_min_chapter_chars")]
    pub min_chapter_chars: usize,
    #[serde(default = "default_max_chapter_attempts")]
    pub max_chapter_attempts: usize,
}

impl Default for BookConfig {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            output_dir: String::new(),
            min_chapter_chars: default_min_chapter_chars(),
            max_chapter_attempts: default_max_chapter_attempts(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SpeechConfig {
    #[serde(default)]
    pub api_token: String,
    #[serde(default = "default_speech_token_env")]
    pub api_token_env: String,
    #[serde(default = "default_speech_base_url")]
    pub base_url: String,
    #[serde(default = "default_speech_model_version")]
    pub model_version: String,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            api_token: String::new(),
            api_token_env: default_speech_token_env(),
            base_url: default_speech_base_url(),
            model_version: default_speech_model_version(),
            timeout: default_timeout(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl SpeechConfig {
    pub fn resolved_api_token(&self) -> String {
        resolve_secret(&self.api_token, &self.api_token_env)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PromptConfig {
    #[serde(default)]
    pub custom_directories: Vec<PathBuf>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct RecentUsage {
    #[serde(default)]
    pub last_llm_interface: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub llm_profiles: BTreeMap<String, LlmConfig>,
    #[serde(default)]
    pub book: BookConfig,
    #[serde(default)]
    pub speech: SpeechConfig,
    #[serde(default)]
    pub prompts: PromptConfig,
    #[serde(default)]
    pub recent: RecentUsage,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_llm_profile(&self, name: &str) -> Option<&LlmConfig> {
        self.llm_profiles.get(name)
    }

    pub fn upsert_llm_profile<S: Into<String>>(&mut self, name: S, profile: LlmConfig) {
        self.llm_profiles.insert(name.into(), profile);
    }

    /// Pipeline settings derived from the `book` section and a profile's
    /// sampling parameters.
    pub fn pipeline_settings(&self, profile: Option<&LlmConfig>) -> PipelineSettings {
        let defaults = PipelineSettings::default();
        PipelineSettings {
            min_chapter_chars: self.book.min_chapter_chars.max(1),
            max_chapter_attempts: self.book.max_chapter_attempts.max(1),
            max_tokens: profile
                .map(|p| p.max_tokens)
                .filter(|tokens| *tokens > 0)
                .or(defaults.max_tokens),
            temperature: profile.map(|p| p.temperature).or(defaults.temperature),
        }
    }

    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(input)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    pub fn to_path(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let serialized = serde_json::to_string_pretty(self)?;
        fs::write(path, serialized)?;
        Ok(())
    }
}

fn resolve_secret(inline: &str, env_name: &str) -> String {
    let inline = inline.trim();
    if !inline.is_empty() {
        return inline.to_string();
    }
    let env_name = env_name.trim();
    if env_name.is_empty() {
        return String::new();
    }
    env::var(env_name)
        .map(|value| value.trim().to_string())
        .unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    config: Config,
}

impl ConfigStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let config = if path.exists() {
            Config::from_path(&path)?
        } else {
            Config::default()
        };

        Ok(Self { path, config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.config.to_path(&self.path)
    }

    pub fn touch_llm_interface<S: Into<String>>(&mut self, name: S) {
        self.config.recent.last_llm_interface = Some(name.into());
    }

    pub fn last_llm_interface(&self) -> Option<&str> {
        self.config
            .recent
            .last_llm_interface
            .as_deref()
            .filter(|name| self.config.llm_profiles.contains_key(*name))
    }

    pub fn ensure_recent_defaults(&mut self) {
        if self.last_llm_interface().is_none() {
            self.config.recent.last_llm_interface = self.config.llm_profiles.keys().next().cloned();
        }
    }
}
