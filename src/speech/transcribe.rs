//! Utterance transcription over an OpenAI-compatible `/audio/transcriptions`
//! endpoint (OpenAI, Groq, a local whisper.cpp or faster-whisper server).
//!
//! Audio is uploaded as 16-bit mono WAV at the rate it was captured; the
//! server resamples.

use crate::config::IntakeConfig;
use crate::error::{IntakeError, SpeechError};
use async_trait::async_trait;
use hound::{SampleFormat, WavSpec, WavWriter};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::io::Cursor;
use std::time::Duration;
use tracing::debug;

/// Mono PCM captured during one Listening period.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapturedAudio {
    pub sample_rate_hz: u32,
    /// Samples in `-1.0..=1.0`.
    pub samples: Vec<f32>,
}

impl CapturedAudio {
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate_hz == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate_hz))
    }
}

/// Turns one recorded utterance into text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe `audio`. `language` is a BCP-47 tag such as `en-US`.
    async fn transcribe(
        &self,
        audio: &CapturedAudio,
        language: &str,
    ) -> Result<String, SpeechError>;
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// [`Transcriber`] that posts a WAV upload to `{stt_endpoint}/audio/transcriptions`.
#[derive(Debug, Clone)]
pub struct HttpTranscriber {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpTranscriber {
    pub fn new(config: &IntakeConfig) -> Result<Self, IntakeError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("edgequake-intake/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| IntakeError::InvalidConfig(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: format!("{}/audio/transcriptions", config.stt_endpoint),
            model: config.stt_model.clone(),
            api_key: config.stt_api_key.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(
        &self,
        audio: &CapturedAudio,
        language: &str,
    ) -> Result<String, SpeechError> {
        if audio.is_empty() {
            return Ok(String::new());
        }
        debug!(
            "Uploading {:.1}s of audio to {}",
            audio.duration().as_secs_f32(),
            self.url
        );

        let wav = encode_wav(audio)?;
        let file = Part::bytes(wav)
            .file_name("speech.wav")
            .mime_str("audio/wav")
            .map_err(|e| SpeechError::TranscriptionFailed(format!("audio part: {e}")))?;
        let mut form = Form::new()
            .part("file", file)
            .text("model", self.model.clone())
            .text("response_format", "json");
        if let Some(code) = primary_subtag(language) {
            form = form.text("language", code);
        }

        let mut request = self.client.post(&self.url).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| SpeechError::TranscriptionFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SpeechError::TranscriptionFailed(format!(
                "HTTP {status}: {}",
                body.trim()
            )));
        }
        let body: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| SpeechError::TranscriptionFailed(format!("response: {e}")))?;
        Ok(body.text.trim().to_string())
    }
}

/// `en-US` → `en`. Whisper wants ISO-639-1; `auto` and blank leave it to the server.
fn primary_subtag(language: &str) -> Option<String> {
    let code = language.trim().split(['-', '_']).next()?.to_ascii_lowercase();
    (!code.is_empty() && code != "auto").then_some(code)
}

fn encode_wav(audio: &CapturedAudio) -> Result<Vec<u8>, SpeechError> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: audio.sample_rate_hz,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let wav_err = |e: hound::Error| SpeechError::TranscriptionFailed(format!("WAV encoding: {e}"));

    let mut cursor = Cursor::new(Vec::new());
    let mut writer = WavWriter::new(&mut cursor, spec).map_err(wav_err)?;
    for sample in &audio.samples {
        let pcm = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
        writer.write_sample(pcm).map_err(wav_err)?;
    }
    writer.finalize().map_err(wav_err)?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn tone() -> CapturedAudio {
        CapturedAudio {
            sample_rate_hz: 16_000,
            samples: (0..1600).map(|i| (i as f32 * 0.05).sin() * 0.5).collect(),
        }
    }

    fn transcriber(endpoint: &str, key: Option<&str>) -> HttpTranscriber {
        let mut builder = IntakeConfig::builder().stt_endpoint(endpoint);
        if let Some(key) = key {
            builder = builder.stt_api_key(key);
        }
        HttpTranscriber::new(&builder.build().unwrap()).unwrap()
    }

    #[test]
    fn wav_header_carries_capture_rate() {
        let audio = CapturedAudio {
            sample_rate_hz: 44_100,
            samples: vec![0.0, 2.0, -2.0],
        };
        let bytes = encode_wav(&audio).unwrap();
        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.spec().sample_rate, 44_100);
        assert_eq!(reader.spec().channels, 1);
        let samples: Vec<i16> = reader.into_samples().map(Result::unwrap).collect();
        assert_eq!(samples, vec![0, i16::MAX, -i16::MAX]);
    }

    #[test]
    fn language_is_reduced_to_primary_subtag() {
        assert_eq!(primary_subtag("en-US").as_deref(), Some("en"));
        assert_eq!(primary_subtag("pt_BR").as_deref(), Some("pt"));
        assert_eq!(primary_subtag("auto"), None);
        assert_eq!(primary_subtag(""), None);
    }

    #[test]
    fn duration_follows_sample_rate() {
        let half_second = CapturedAudio {
            sample_rate_hz: 16_000,
            samples: vec![0.0; 8_000],
        };
        assert_eq!(half_second.duration(), Duration::from_millis(500));
        assert_eq!(CapturedAudio::default().duration(), Duration::ZERO);
    }

    #[tokio::test]
    async fn uploads_wav_and_returns_trimmed_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/transcriptions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "text": " Hello there. " })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let stt = transcriber(&format!("{}/v1", server.uri()), Some("sk-test"));
        assert!(stt.url().ends_with("/v1/audio/transcriptions"));
        let text = stt.transcribe(&tone(), "en-US").await.unwrap();
        assert_eq!(text, "Hello there.");
    }

    #[tokio::test]
    async fn server_error_is_transcription_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let stt = transcriber(&server.uri(), None);
        let err = stt.transcribe(&tone(), "en-US").await.unwrap_err();
        match err {
            SpeechError::TranscriptionFailed(detail) => {
                assert!(detail.contains("401"), "{detail}");
                assert!(detail.contains("bad key"), "{detail}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn silence_skips_the_upload() {
        let stt = transcriber("http://127.0.0.1:9", None);
        let text = stt.transcribe(&CapturedAudio::default(), "en-US").await.unwrap();
        assert_eq!(text, "");
    }
}
