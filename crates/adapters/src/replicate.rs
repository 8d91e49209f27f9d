use std::thread;
use std::time::{Duration, Instant};

use book_core::config::SpeechConfig;
use book_core::speech::validate_request;
use book_core::{SpeechError, SpeechSynthesizer, SynthesizedAudio, VoiceSample};
use log::{debug, info};
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::base_url::join_url;
use crate::error::AdapterError;
use crate::retry::{call_with_retry, RetryConfig};

/// Voice-cloning text-to-speech through a Replicate-hosted XTTS-v2 model.
#[derive(Debug)]
pub struct ReplicateSpeechAdapter {
    client: Client,
    base_url: String,
    token: String,
    model_version: String,
    poll_interval: Duration,
    timeout: Duration,
    retry: RetryConfig,
}

pub fn create_speech_adapter(config: &SpeechConfig) -> Result<ReplicateSpeechAdapter, AdapterError> {
    ReplicateSpeechAdapter::from_config(config)
}

impl ReplicateSpeechAdapter {
    pub fn from_config(config: &SpeechConfig) -> Result<Self, AdapterError> {
        let token = config.resolved_api_token();
        if token.is_empty() {
            return Err(AdapterError::InvalidConfig(format!(
                "speech api_token is empty and `{}` is not set",
                config.api_token_env
            )));
        }
        let base_url = config.base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(AdapterError::InvalidConfig(
                "speech base_url must not be empty".to_string(),
            ));
        }
        if config.model_version.trim().is_empty() {
            return Err(AdapterError::InvalidConfig(
                "speech model_version must not be empty".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout.max(1)))
            .build()?;

        Ok(Self {
            client,
            base_url,
            token,
            model_version: config.model_version.trim().to_string(),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(100)),
            timeout: Duration::from_secs(config.timeout.max(1)),
            retry: RetryConfig::default(),
        })
    }

    /// Downloads a finished audio file.
    pub fn fetch_audio(&self, url: &str) -> Result<Vec<u8>, AdapterError> {
        call_with_retry(
            || {
                let response = checked(self.client.get(url).send()?)?;
                Ok(response.bytes()?.to_vec())
            },
            &self.retry,
        )
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.bearer_auth(&self.token)
    }

    fn upload(&self, voice: &VoiceSample) -> Result<String, AdapterError> {
        let uploaded: UploadedFile = call_with_retry(
            || {
                let part = Part::bytes(voice.bytes.clone())
                    .file_name(voice.file_name.clone())
                    .mime_str(voice.format.mime_type())?;
                let form = Form::new().part("content", part);
                let request = self
                    .authorized(self.client.post(join_url(&self.base_url, "files")))
                    .multipart(form);
                Ok(checked(request.send()?)?.json()?)
            },
            &self.retry,
        )?;

        let url = uploaded.urls.get.ok_or(AdapterError::EmptyResponse)?;
        debug!("uploaded voice sample {} as {}", voice.file_name, url);
        Ok(url)
    }

    fn create_prediction(&self, text: &str, speaker_url: &str) -> Result<Prediction, AdapterError> {
        let body = PredictionRequest {
            version: &self.model_version,
            input: SpeechInput {
                text,
                speaker: speaker_url,
            },
        };
        call_with_retry(
            || {
                let request = self
                    .authorized(self.client.post(join_url(&self.base_url, "predictions")))
                    .json(&body);
                Ok(checked(request.send()?)?.json()?)
            },
            &self.retry,
        )
    }

    fn poll(&self, prediction: &Prediction) -> Result<Prediction, AdapterError> {
        let url = prediction
            .urls
            .get
            .clone()
            .unwrap_or_else(|| join_url(&self.base_url, &format!("predictions/{}", prediction.id)));
        call_with_retry(
            || Ok(checked(self.authorized(self.client.get(&url)).send()?)?.json()?),
            &self.retry,
        )
    }

    fn wait_for_output(&self, mut prediction: Prediction) -> Result<String, AdapterError> {
        let started = Instant::now();
        loop {
            match prediction.outcome()? {
                Some(url) => return Ok(url),
                None if started.elapsed() >= self.timeout => {
                    return Err(AdapterError::PredictionTimeout {
                        id: prediction.id,
                        waited: started.elapsed(),
                    })
                }
                None => {
                    debug!("prediction {} is {}", prediction.id, prediction.status);
                    thread::sleep(self.poll_interval);
                    prediction = self.poll(&prediction)?;
                }
            }
        }
    }

    fn synthesize_inner(&self, text: &str, voice: &VoiceSample) -> Result<String, AdapterError> {
        let speaker_url = self.upload(voice)?;
        let prediction = self.create_prediction(text, &speaker_url)?;
        info!("speech prediction {} created", prediction.id);
        let url = self.wait_for_output(prediction)?;
        info!("speech ready at {}", url);
        Ok(url)
    }
}

impl SpeechSynthesizer for ReplicateSpeechAdapter {
    fn synthesize(
        &self,
        text: &str,
        voice: &VoiceSample,
    ) -> Result<SynthesizedAudio, SpeechError> {
        validate_request(text, voice)?;
        let url = self
            .synthesize_inner(text.trim(), voice)
            .map_err(SpeechError::service)?;
        Ok(SynthesizedAudio { url })
    }
}

fn checked(response: Response) -> Result<Response, AdapterError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().unwrap_or_default();
    Err(AdapterError::HttpStatus { status, body })
}

#[derive(Serialize)]
struct PredictionRequest<'a> {
    version: &'a str,
    input: SpeechInput<'a>,
}

#[derive(Serialize)]
struct SpeechInput<'a> {
    text: &'a str,
    speaker: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct ResourceUrls {
    #[serde(default)]
    get: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadedFile {
    #[serde(default)]
    urls: ResourceUrls,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    id: String,
    status: String,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    urls: ResourceUrls,
}

impl Prediction {
    /// `Some(url)` once succeeded, `None` while still running.
    fn outcome(&self) -> Result<Option<String>, AdapterError> {
        match self.status.as_str() {
            "succeeded" => output_url(self.output.as_ref())
                .map(Some)
                .ok_or(AdapterError::EmptyResponse),
            "failed" | "canceled" => Err(AdapterError::PredictionFailed {
                id: self.id.clone(),
                status: self.status.clone(),
                detail: match &self.error {
                    Some(Value::String(message)) => message.clone(),
                    Some(other) => other.to_string(),
                    None => "no error detail".to_string(),
                },
            }),
            _ => Ok(None),
        }
    }
}

fn output_url(output: Option<&Value>) -> Option<String> {
    match output? {
        Value::String(url) if !url.is_empty() => Some(url.clone()),
        Value::Array(items) => items.iter().rev().find_map(|item| output_url(Some(item))),
        _ => None,
    }
}
