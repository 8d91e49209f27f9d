use std::io;
use std::path::Path;
use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to parse response: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid adapter configuration: {0}")]
    InvalidConfig(String),
    #[error("unexpected http status {status}: {body}")]
    HttpStatus { status: StatusCode, body: String },
    #[error("io error at `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to read streamed response: {0}")]
    Stream(#[source] io::Error),
    #[error("operation failed after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: usize,
        #[source]
        source: Box<AdapterError>,
    },
    #[error("API returned an empty response")]
    EmptyResponse,
    #[error("prediction {id} ended with status `{status}`: {detail}")]
    PredictionFailed {
        id: String,
        status: String,
        detail: String,
    },
    #[error("prediction {id} did not finish within {waited:?}")]
    PredictionTimeout { id: String, waited: Duration },
    #[error("unsupported audio file `{0}` (expected .wav or .mp3)")]
    UnsupportedAudio(String),
    #[error("invalid wav file `{path}`: {source}")]
    InvalidWav {
        path: String,
        #[source]
        source: hound::Error,
    },
}

impl AdapterError {
    pub fn retry_exhausted(attempts: usize, source: AdapterError) -> Self {
        AdapterError::RetryExhausted {
            attempts,
            source: Box::new(source),
        }
    }

    pub fn io(path: &Path, source: io::Error) -> Self {
        AdapterError::Io {
            path: path.display().to_string(),
            source,
        }
    }

    /// Whether repeating the same request could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            AdapterError::Http(_) | AdapterError::Stream(_) | AdapterError::EmptyResponse => true,
            AdapterError::HttpStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }
}
