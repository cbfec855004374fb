//! Record-then-transcribe speech backend.
//!
//! Starting a capture opens an [`AudioSource`]. Stopping it closes the
//! recording and uploads the utterance to a [`Transcriber`]; the text comes
//! back as one final result followed by the end of the capture, so
//! [`super::TranscriptionSession::stop`] returns once the transcript is in.

use super::transcribe::{CapturedAudio, Transcriber};
use super::{Capture, CaptureControl, ChannelSpeechBackend, SpeechBackend, SpeechFeed};
use crate::error::SpeechError;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Something that can record audio, typically a microphone.
pub trait AudioSource: Send + Sync {
    /// Open the device and start recording.
    fn start(&self) -> Result<Box<dyn Recording>, SpeechError>;
}

/// A running recording. Dropping it discards the audio.
pub trait Recording: Send {
    /// Stop recording and hand back everything captured.
    fn finish(self: Box<Self>) -> Result<CapturedAudio, SpeechError>;
}

/// [`SpeechBackend`] that records while Listening and transcribes on stop.
pub struct RecordingSpeechBackend {
    source: Arc<dyn AudioSource>,
    transcriber: Arc<dyn Transcriber>,
    channel: ChannelSpeechBackend,
    feed: SpeechFeed,
}

impl RecordingSpeechBackend {
    pub fn new(source: Arc<dyn AudioSource>, transcriber: Arc<dyn Transcriber>) -> Self {
        let (channel, feed) = ChannelSpeechBackend::new();
        Self {
            source,
            transcriber,
            channel,
            feed,
        }
    }
}

impl SpeechBackend for RecordingSpeechBackend {
    fn is_supported(&self) -> bool {
        true
    }

    fn begin(&self, language: &str) -> Result<Capture, SpeechError> {
        let recording = self.source.start()?;
        let capture = self.channel.begin(language)?;
        info!("Recording started ({})", language);
        Ok(Capture {
            events: capture.events,
            control: Box::new(RecordingControl {
                recording: Some(recording),
                transcriber: Arc::clone(&self.transcriber),
                feed: self.feed.clone(),
                language: language.to_string(),
            }),
        })
    }
}

struct RecordingControl {
    recording: Option<Box<dyn Recording>>,
    transcriber: Arc<dyn Transcriber>,
    feed: SpeechFeed,
    language: String,
}

impl CaptureControl for RecordingControl {
    fn stop(&mut self) {
        let Some(recording) = self.recording.take() else {
            return;
        };
        let audio = match recording.finish() {
            Ok(audio) => audio,
            Err(e) => {
                warn!("Recording could not be finished: {}", e);
                self.feed.end();
                return;
            }
        };
        debug!(
            "Recording stopped: {} samples at {} Hz",
            audio.samples.len(),
            audio.sample_rate_hz
        );

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime to transcribe on; dropping the recording");
            self.feed.end();
            return;
        };
        let transcriber = Arc::clone(&self.transcriber);
        let feed = self.feed.clone();
        let language = self.language.clone();
        runtime.spawn(async move {
            match transcriber.transcribe(&audio, &language).await {
                Ok(text) if !text.is_empty() => {
                    info!("Transcribed {} chars", text.len());
                    feed.push_result(text, true);
                }
                Ok(_) => debug!("Transcription came back empty"),
                Err(e) => warn!("{}", e),
            }
            feed.end();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speech::{SessionEvent, TranscriptionSession};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeSource {
        samples: Vec<f32>,
        open_fails: bool,
        finish_fails: bool,
    }

    impl FakeSource {
        fn with(samples: Vec<f32>) -> Arc<Self> {
            Arc::new(Self {
                samples,
                open_fails: false,
                finish_fails: false,
            })
        }
    }

    struct FakeRecording {
        samples: Vec<f32>,
        fails: bool,
    }

    impl AudioSource for FakeSource {
        fn start(&self) -> Result<Box<dyn Recording>, SpeechError> {
            if self.open_fails {
                return Err(SpeechError::CaptureFailed("no input device".into()));
            }
            Ok(Box::new(FakeRecording {
                samples: self.samples.clone(),
                fails: self.finish_fails,
            }))
        }
    }

    impl Recording for FakeRecording {
        fn finish(self: Box<Self>) -> Result<CapturedAudio, SpeechError> {
            if self.fails {
                return Err(SpeechError::CaptureFailed("stream stalled".into()));
            }
            Ok(CapturedAudio {
                sample_rate_hz: 16_000,
                samples: self.samples,
            })
        }
    }

    #[derive(Default)]
    struct FakeTranscriber {
        reply: Option<Result<String, SpeechError>>,
        calls: Mutex<Vec<(usize, String)>>,
    }

    impl FakeTranscriber {
        fn replying(reply: Result<String, SpeechError>) -> Arc<Self> {
            Arc::new(Self {
                reply: Some(reply),
                calls: Mutex::default(),
            })
        }
    }

    #[async_trait]
    impl Transcriber for FakeTranscriber {
        async fn transcribe(
            &self,
            audio: &CapturedAudio,
            language: &str,
        ) -> Result<String, SpeechError> {
            self.calls
                .lock()
                .unwrap()
                .push((audio.samples.len(), language.to_string()));
            self.reply.clone().unwrap_or_else(|| Ok(String::new()))
        }
    }

    fn session(
        source: Arc<dyn AudioSource>,
        transcriber: Arc<dyn Transcriber>,
    ) -> TranscriptionSession {
        let backend = RecordingSpeechBackend::new(source, transcriber);
        TranscriptionSession::new(Arc::new(backend), "en-US").unwrap()
    }

    #[tokio::test]
    async fn stop_delivers_transcript_then_ends() {
        let stt = FakeTranscriber::replying(Ok("Book a table for two".into()));
        let mut s = session(FakeSource::with(vec![0.1; 320]), stt.clone());

        s.start().unwrap();
        assert!(s.is_listening());
        s.stop().await;

        assert_eq!(
            s.next_event().await,
            Some(SessionEvent::Interim("Book a table for two".into()))
        );
        assert_eq!(s.next_event().await, Some(SessionEvent::Ended));
        assert_eq!(s.next_event().await, None);
        assert_eq!(s.accumulated_text(), "Book a table for two");
        assert_eq!(*stt.calls.lock().unwrap(), vec![(320, "en-US".to_string())]);
    }

    #[tokio::test]
    async fn failed_transcription_ends_with_empty_text() {
        let failure = SpeechError::TranscriptionFailed("HTTP 500".into());
        let stt = FakeTranscriber::replying(Err(failure));
        let mut s = session(FakeSource::with(vec![0.1; 16]), stt);

        s.start().unwrap();
        s.stop().await;

        assert_eq!(s.next_event().await, Some(SessionEvent::Ended));
        assert_eq!(s.accumulated_text(), "");
    }

    #[tokio::test]
    async fn empty_transcript_emits_no_interim() {
        let stt = Arc::new(FakeTranscriber::default());
        let mut s = session(FakeSource::with(vec![0.0; 16]), stt);

        s.start().unwrap();
        s.stop().await;

        assert_eq!(s.next_event().await, Some(SessionEvent::Ended));
        assert_eq!(s.accumulated_text(), "");
    }

    #[tokio::test]
    async fn unfinished_recording_skips_transcription() {
        let source = Arc::new(FakeSource {
            samples: vec![0.1; 16],
            open_fails: false,
            finish_fails: true,
        });
        let stt = FakeTranscriber::replying(Ok("never".into()));
        let mut s = session(source, stt.clone());

        s.start().unwrap();
        s.stop().await;

        assert_eq!(s.next_event().await, Some(SessionEvent::Ended));
        assert!(stt.calls.lock().unwrap().is_empty());
        assert!(!s.is_listening());
    }

    #[tokio::test]
    async fn device_failure_keeps_session_idle() {
        let source = Arc::new(FakeSource {
            samples: Vec::new(),
            open_fails: true,
            finish_fails: false,
        });
        let mut s = session(source, Arc::new(FakeTranscriber::default()));

        let err = s.start().unwrap_err();
        assert!(matches!(err, SpeechError::CaptureFailed(_)));
        assert!(!s.is_listening());
        assert_eq!(s.next_event().await, None);
    }

    #[tokio::test]
    async fn each_listening_period_gets_its_own_transcript() {
        let stt = FakeTranscriber::replying(Ok("again".into()));
        let mut s = session(FakeSource::with(vec![0.2; 8]), stt.clone());

        for _ in 0..2 {
            s.start().unwrap();
            s.stop().await;
            assert_eq!(s.next_event().await, Some(SessionEvent::Interim("again".into())));
            assert_eq!(s.next_event().await, Some(SessionEvent::Ended));
            assert_eq!(s.accumulated_text(), "again");
        }
        assert_eq!(stt.calls.lock().unwrap().len(), 2);
    }
}
