use std::io::{BufRead, BufReader};
use std::time::Duration;

use book_core::config::{Config, LlmConfig};
use book_core::{GenerationRequest, LanguageModel, LanguageModelError, TextStream};
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::blocking::{Client, Response};
use reqwest::header::{self, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::base_url::resolve_base_url;
use crate::error::AdapterError;
use crate::retry::{call_with_retry, RetryConfig};

pub const CONNECTION_TEST_PROMPT: &str = "Please reply 'OK'";

pub fn create_llm_adapter(
    config: &Config,
    profile_name: &str,
) -> Result<Box<dyn LanguageModel>, AdapterError> {
    let profile = config.get_llm_profile(profile_name).ok_or_else(|| {
        AdapterError::InvalidConfig(format!("unknown LLM profile `{}`", profile_name))
    })?;
    create_llm_adapter_from_profile(profile)
}

pub fn create_llm_adapter_from_profile(
    profile: &LlmConfig,
) -> Result<Box<dyn LanguageModel>, AdapterError> {
    let adapter = ChatCompletionsAdapter::from_profile(profile)?;
    debug!(
        "created {} adapter for model `{}` at {}",
        profile.interface_format, profile.model_name, adapter.url
    );
    Ok(Box::new(adapter))
}

/// Default endpoint of each OpenAI-compatible interface format.
fn default_base_url(interface_format: &str) -> Option<&'static str> {
    match interface_format {
        "openai" => Some("https://api.openai.com/v1"),
        "deepseek" => Some("https://api.deepseek.com/v1"),
        "ollama" => Some("http://localhost:11434/v1"),
        "lm studio" | "ml studio" => Some("http://localhost:1234/v1"),
        "grok" => Some("https://api.x.ai/v1"),
        "openai compatible" => Some(""),
        _ => None,
    }
}

#[derive(Debug)]
enum Auth {
    Bearer(Option<String>),
    ApiKeyHeader(HeaderValue),
}

/// `POST {base}/chat/completions` client shared by every supported interface.
#[derive(Debug)]
struct ChatCompletionsAdapter {
    client: Client,
    url: String,
    auth: Auth,
    model_name: Option<String>,
    max_tokens: Option<u32>,
    temperature: f32,
    stream: bool,
    retry: RetryConfig,
}

impl ChatCompletionsAdapter {
    fn from_profile(profile: &LlmConfig) -> Result<Self, AdapterError> {
        let format = profile.interface_format.trim().to_lowercase();
        let api_key = profile.resolved_api_key();

        let (url, auth, model_name) = if format == "azure openai" {
            let url = azure_chat_url(&profile.base_url)?;
            if api_key.is_empty() {
                return Err(AdapterError::InvalidConfig(
                    "Azure OpenAI api_key must not be empty".to_string(),
                ));
            }
            let header = HeaderValue::from_str(&api_key).map_err(|err| {
                AdapterError::InvalidConfig(format!("invalid api key header: {}", err))
            })?;
            (url, Auth::ApiKeyHeader(header), None)
        } else {
            let default = default_base_url(&format).ok_or_else(|| {
                AdapterError::InvalidConfig(format!("unknown interface_format: {}", format))
            })?;
            let base_url = resolve_base_url(&profile.base_url, default);
            if base_url.is_empty() {
                return Err(AdapterError::InvalidConfig(
                    "base_url must not be empty".to_string(),
                ));
            }
            if profile.model_name.trim().is_empty() {
                return Err(AdapterError::InvalidConfig(
                    "model_name must not be empty".to_string(),
                ));
            }
            let key = (!api_key.is_empty()).then_some(api_key);
            (
                format!("{}/chat/completions", base_url),
                Auth::Bearer(key),
                Some(profile.model_name.trim().to_string()),
            )
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(profile.timeout.max(1)))
            .build()?;

        Ok(Self {
            client,
            url,
            auth,
            model_name,
            max_tokens: (profile.max_tokens > 0).then_some(profile.max_tokens),
            temperature: profile.temperature,
            stream: profile.stream,
            retry: RetryConfig::default(),
        })
    }

    fn body<'a>(&'a self, request: &'a GenerationRequest, stream: bool) -> ChatCompletionRequest<'a> {
        let mut messages = Vec::with_capacity(2);
        if !request.system.trim().is_empty() {
            messages.push(ChatMessageRequest {
                role: "system",
                content: &request.system,
            });
        }
        messages.push(ChatMessageRequest {
            role: "user",
            content: &request.prompt,
        });

        ChatCompletionRequest {
            model: self.model_name.as_deref(),
            messages,
            max_tokens: request.max_tokens.or(self.max_tokens),
            temperature: Some(request.temperature.unwrap_or(self.temperature)),
            stream: stream.then_some(true),
        }
    }

    fn send(&self, body: &ChatCompletionRequest<'_>) -> Result<Response, AdapterError> {
        let mut request = self.client.post(&self.url).header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        request = match &self.auth {
            Auth::Bearer(Some(key)) => request.bearer_auth(key),
            Auth::Bearer(None) => request,
            Auth::ApiKeyHeader(value) => request.header("api-key", value.clone()),
        };

        let response = request.json(body).send()?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(AdapterError::HttpStatus { status, body });
        }
        Ok(response)
    }

    fn invoke_once(&self, request: &GenerationRequest) -> Result<String, AdapterError> {
        let response = self.send(&self.body(request, false))?;
        let parsed: ChatCompletionResponse = response.json()?;
        extract_choice_content(parsed).ok_or(AdapterError::EmptyResponse)
    }
}

impl LanguageModel for ChatCompletionsAdapter {
    fn invoke(&self, request: &GenerationRequest) -> Result<String, LanguageModelError> {
        call_with_retry(|| self.invoke_once(request), &self.retry).map_err(LanguageModelError::new)
    }

    fn supports_streaming(&self) -> bool {
        self.stream
    }

    fn stream<'a>(
        &'a self,
        request: &GenerationRequest,
    ) -> Result<TextStream<'a>, LanguageModelError> {
        if !self.stream {
            let text = self.invoke(request)?;
            return Ok(Box::new(std::iter::once(Ok(text))));
        }

        let body = self.body(request, true);
        let response =
            call_with_retry(|| self.send(&body), &self.retry).map_err(LanguageModelError::new)?;
        let events = SseDeltas::new(BufReader::new(response));
        Ok(Box::new(events.map(|item| item.map_err(LanguageModelError::new))))
    }
}

fn azure_chat_url(base_url: &str) -> Result<String, AdapterError> {
    static AZURE_RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(
            r"^https://([^/]+)/openai/deployments/([^/]+)/chat/completions\?api-version=([^/?&]+)",
        )
        .unwrap()
    });

    let captures = AZURE_RE.captures(base_url.trim()).ok_or_else(|| {
        AdapterError::InvalidConfig(
            "Invalid Azure OpenAI base_url format. Expected https://<resource>.openai.azure.com/openai/deployments/<deployment>/chat/completions?api-version=<version>"
                .to_string(),
        )
    })?;

    Ok(format!(
        "https://{}/openai/deployments/{}/chat/completions?api-version={}",
        &captures[1], &captures[2], &captures[3]
    ))
}

/// Content deltas of a `text/event-stream` chat completion, ending at `[DONE]`
/// or end of input.
struct SseDeltas<R> {
    reader: R,
    line: String,
    done: bool,
}

impl<R: BufRead> SseDeltas<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
            done: false,
        }
    }
}

impl<R: BufRead> Iterator for SseDeltas<R> {
    type Item = Result<String, AdapterError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => self.done = true,
                Ok(_) => {
                    let Some(payload) = self.line.trim_end().strip_prefix("data:") else {
                        continue;
                    };
                    let payload = payload.trim();
                    if payload == "[DONE]" {
                        self.done = true;
                        break;
                    }
                    if payload.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<ChatCompletionChunk>(payload) {
                        Ok(chunk) => {
                            if let Some(text) = chunk.delta_text() {
                                return Some(Ok(text));
                            }
                        }
                        Err(err) => {
                            warn!("discarding malformed stream event: {}", err);
                        }
                    }
                }
                Err(err) => {
                    self.done = true;
                    return Some(Err(AdapterError::Stream(err)));
                }
            }
        }
        None
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: Vec<ChatMessageRequest<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Serialize)]
struct ChatMessageRequest<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    #[serde(default)]
    message: Option<ChatMessage>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChatMessage>,
}

impl ChatCompletionChunk {
    fn delta_text(self) -> Option<String> {
        self.choices
            .into_iter()
            .filter_map(|choice| choice.delta.and_then(|delta| delta.content))
            .find(|content| !content.is_empty())
    }
}

/// First non-blank choice, or an empty string when every choice is blank.
/// `None` only when the reply carries no choices at all.
fn extract_choice_content(response: ChatCompletionResponse) -> Option<String> {
    if response.choices.is_empty() {
        return None;
    }
    let content = response
        .choices
        .into_iter()
        .filter_map(|choice| choice.message.and_then(|m| m.content).or(choice.text))
        .find(|content| !content.trim().is_empty())
        .unwrap_or_default();
    Some(content)
}
