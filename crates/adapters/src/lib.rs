mod audio;
mod base_url;
mod error;
mod llm;
mod replicate;
mod retry;

pub use audio::{load_voice_sample, wav_duration};
pub use base_url::{join_url, resolve_base_url};
pub use error::AdapterError;
pub use llm::{create_llm_adapter, create_llm_adapter_from_profile, CONNECTION_TEST_PROMPT};
pub use replicate::{create_speech_adapter, ReplicateSpeechAdapter};
pub use retry::{call_with_retry, RetryConfig};

pub use book_core::config::{BookConfig, Config, ConfigStore, LlmConfig, SpeechConfig};
pub use book_core::{LanguageModel, LanguageModelError, SpeechError, SpeechSynthesizer};
