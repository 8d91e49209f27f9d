use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::time::Duration;

use book_core::{AudioFormat, VoiceSample};
use log::info;

use crate::error::AdapterError;

/// Reads a reference recording from disk. WAV files must parse as WAV; MP3 is
/// accepted on its extension alone.
pub fn load_voice_sample(path: &Path) -> Result<VoiceSample, AdapterError> {
    let display = path.display().to_string();
    let format =
        AudioFormat::from_path(path).ok_or_else(|| AdapterError::UnsupportedAudio(display.clone()))?;
    let bytes = fs::read(path).map_err(|err| AdapterError::io(path, err))?;

    if format == AudioFormat::Wav {
        let duration = wav_duration(&bytes).map_err(|source| AdapterError::InvalidWav {
            path: display.clone(),
            source,
        })?;
        info!(
            "voice sample {} lasts {:.2}s",
            display,
            duration.as_secs_f64()
        );
    }

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("voice")
        .to_string();
    Ok(VoiceSample::new(file_name, format, bytes))
}

pub fn wav_duration(bytes: &[u8]) -> Result<Duration, hound::Error> {
    let reader = hound::WavReader::new(Cursor::new(bytes))?;
    let sample_rate = reader.spec().sample_rate;
    if sample_rate == 0 {
        return Err(hound::Error::FormatError("sample rate is zero"));
    }
    Ok(Duration::from_secs_f64(
        f64::from(reader.duration()) / f64::from(sample_rate),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_tone(path: &Path, seconds: u32) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..(8000 * seconds) {
            writer.write_sample(((i % 100) as i16 - 50) * 100).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn loads_wav_and_measures_duration() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("narrator.wav");
        write_tone(&path, 2);

        let sample = load_voice_sample(&path).unwrap();
        assert_eq!(sample.file_name, "narrator.wav");
        assert_eq!(sample.format, AudioFormat::Wav);
        assert_eq!(wav_duration(&sample.bytes).unwrap(), Duration::from_secs(2));
    }

    #[test]
    fn corrupt_wav_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.wav");
        fs::write(&path, b"definitely not riff data").unwrap();

        assert!(matches!(
            load_voice_sample(&path),
            Err(AdapterError::InvalidWav { .. })
        ));
    }

    #[test]
    fn mp3_is_accepted_by_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("voice.mp3");
        fs::write(&path, [0xFF, 0xFB, 0x90, 0x00]).unwrap();

        let sample = load_voice_sample(&path).unwrap();
        assert_eq!(sample.format, AudioFormat::Mp3);
        assert_eq!(sample.bytes.len(), 4);
    }

    #[test]
    fn other_formats_are_unsupported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("voice.ogg");
        fs::write(&path, b"OggS").unwrap();

        assert!(matches!(
            load_voice_sample(&path),
            Err(AdapterError::UnsupportedAudio(_))
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            load_voice_sample(&dir.path().join("absent.wav")),
            Err(AdapterError::Io { .. })
        ));
    }
}
