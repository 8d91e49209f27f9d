//! Text-to-speech contract. The synthesizer itself lives in the adapters.

use std::error::Error as StdError;
use std::fmt;
use std::path::Path;
use thiserror::Error;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum AudioFormat {
    Wav,
    Mp3,
}

impl AudioFormat {
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "wav" | "wave" => Some(Self::Wav),
            "mp3" => Some(Self::Mp3),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|extension| extension.to_str())
            .and_then(Self::from_extension)
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Wav => "audio/wav",
            Self::Mp3 => "audio/mpeg",
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Wav => "wav",
            Self::Mp3 => "mp3",
        })
    }
}

/// Reference recording of the voice to clone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoiceSample {
    pub file_name: String,
    pub format: AudioFormat,
    pub bytes: Vec<u8>,
}

impl VoiceSample {
    pub fn new(file_name: impl Into<String>, format: AudioFormat, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            format,
            bytes,
        }
    }
}

/// Where the service published the synthesized speech.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SynthesizedAudio {
    pub url: String,
}

#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("there is no text to synthesize")]
    EmptyText,
    #[error("the voice sample `{0}` is empty")]
    EmptyVoiceSample(String),
    #[error("speech synthesis failed: {0}")]
    Service(#[source] Box<dyn StdError + Send + Sync>),
}

impl SpeechError {
    pub fn service<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Service(Box::new(error))
    }
}

pub trait SpeechSynthesizer: Send + Sync {
    fn synthesize(
        &self,
        text: &str,
        voice: &VoiceSample,
    ) -> Result<SynthesizedAudio, SpeechError>;
}

/// Checks shared by every synthesizer before any upload happens.
pub fn validate_request(text: &str, voice: &VoiceSample) -> Result<(), SpeechError> {
    if text.trim().is_empty() {
        return Err(SpeechError::EmptyText);
    }
    if voice.bytes.is_empty() {
        return Err(SpeechError::EmptyVoiceSample(voice.file_name.clone()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_formats_from_paths() {
        assert_eq!(
            AudioFormat::from_path(Path::new("voices/Narrator.WAV")),
            Some(AudioFormat::Wav)
        );
        assert_eq!(
            AudioFormat::from_path(Path::new("sample.mp3")),
            Some(AudioFormat::Mp3)
        );
        assert_eq!(AudioFormat::from_path(Path::new("sample.ogg")), None);
        assert_eq!(AudioFormat::from_path(Path::new("sample")), None);
        assert_eq!(AudioFormat::Mp3.mime_type(), "audio/mpeg");
    }

    #[test]
    fn rejects_blank_text_and_empty_sample() {
        let voice = VoiceSample::new("a.wav", AudioFormat::Wav, vec![1, 2, 3]);
        assert!(matches!(
            validate_request("  ", &voice),
            Err(SpeechError::EmptyText)
        ));

        let silent = VoiceSample::new("b.wav", AudioFormat::Wav, Vec::new());
        assert!(matches!(
            validate_request("Hello", &silent),
            Err(SpeechError::EmptyVoiceSample(name)) if name == "b.wav"
        ));

        assert!(validate_request("Hello", &voice).is_ok());
    }
}
