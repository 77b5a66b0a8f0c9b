//! Push-to-talk session state machine.
//!
//! `voice:start` and `voice:stop` map to [`VoiceSession::on_press`] and
//! [`VoiceSession::on_release`]. The session guards against double presses,
//! overlapping transcriptions, and sub-minimum utterances, and hands the
//! drained audio to the worker pool so the read loop never waits on Whisper.

use crate::audio::{CaptureBuffer, UtteranceDrain, TARGET_RATE};
use crate::config::AppConfig;
use crate::log_debug;
use crate::pool::WorkerPool;
use crate::protocol::{DeviceDescriptor, Event, EventSink};
use crate::stt::SpeechToText;
use anyhow::Result;
use regex::Regex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// Drains shorter than a tenth of a second carry no usable speech.
pub const MIN_UTTERANCE_SAMPLES: usize = TARGET_RATE as usize / 10;

pub struct VoiceSession {
    buffer: CaptureBuffer,
    pool: Arc<WorkerPool>,
    sink: Arc<dyn EventSink>,
    stt: Option<Arc<dyn SpeechToText>>,
    capturing: bool,
    in_flight: Arc<AtomicBool>,
}

impl VoiceSession {
    pub fn new(
        config: &AppConfig,
        pool: Arc<WorkerPool>,
        sink: Arc<dyn EventSink>,
        stt: Option<Arc<dyn SpeechToText>>,
    ) -> Self {
        Self {
            buffer: CaptureBuffer::new(config),
            pool,
            sink,
            stt,
            capturing: false,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle `voice:start`. A press while already capturing is ignored; a
    /// press while the previous utterance is still transcribing is rejected
    /// so two jobs never race on the same queue.
    pub fn on_press(&mut self) {
        if self.capturing {
            return;
        }
        if self.in_flight.load(Ordering::Acquire) {
            self.sink.emit(&Event::Error {
                text: "Still transcribing previous recording".to_string(),
            });
            return;
        }
        match self.buffer.begin_capture() {
            Ok(()) => {
                self.capturing = true;
                self.sink.emit(&Event::VoiceStart {});
            }
            Err(err) => {
                log_debug(&format!("failed to start capture: {err}"));
            }
        }
    }

    /// Handle `voice:stop`: stop admitting audio and queue the transcription.
    pub fn on_release(&mut self) {
        if !self.capturing {
            return;
        }
        self.buffer.end_capture();
        self.capturing = false;
        self.sink.emit(&Event::VoiceStop {});

        let Some(stt) = self.stt.clone() else {
            self.sink.emit(&Event::Error {
                text: "Whisper model not loaded".to_string(),
            });
            self.buffer.drain_handle().clear();
            self.sink.emit(&Event::Status {
                text: "Ready".to_string(),
            });
            return;
        };

        self.in_flight.store(true, Ordering::Release);
        let drain = self.buffer.drain_handle();
        let sink = self.sink.clone();
        let in_flight = self.in_flight.clone();
        let accepted = self.pool.execute(move || {
            transcribe_utterance(&drain, stt.as_ref(), sink.as_ref());
            in_flight.store(false, Ordering::Release);
        });
        if !accepted {
            self.in_flight.store(false, Ordering::Release);
            self.sink.emit(&Event::Error {
                text: "Transcription queue is full".to_string(),
            });
        }
    }

    pub fn set_device(&mut self, index: usize) -> Result<()> {
        self.buffer.set_device(index)
    }

    pub fn list_devices(&self) -> Vec<DeviceDescriptor> {
        CaptureBuffer::list_devices()
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing
    }

    #[cfg(test)]
    pub(crate) fn feed_chunk(&self, data: &[f32], channels: usize, device_rate: u32) {
        self.buffer.push_chunk(data, channels, device_rate);
    }

    #[cfg(test)]
    pub(crate) fn device_index(&self) -> Option<usize> {
        self.buffer.device_index()
    }

    #[cfg(test)]
    pub(crate) fn in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub(crate) fn force_in_flight(&self) {
        self.in_flight.store(true, Ordering::Release);
    }

    #[cfg(test)]
    pub(crate) fn fail_stream_open(&mut self) {
        self.buffer.fail_open = true;
    }
}

/// Worker-side half of a release: drain, transcribe, report. Always ends by
/// announcing readiness so the frontend's status line recovers after errors.
fn transcribe_utterance(drain: &UtteranceDrain, stt: &dyn SpeechToText, sink: &dyn EventSink) {
    let samples = drain.drain();
    if samples.len() < MIN_UTTERANCE_SAMPLES {
        log_debug(&format!(
            "utterance too short ({} samples), skipping",
            samples.len()
        ));
        sink.emit(&Event::Status {
            text: "Ready".to_string(),
        });
        return;
    }

    sink.emit(&Event::Status {
        text: "Transcribing...".to_string(),
    });
    match stt.transcribe(&samples) {
        Ok(raw) => {
            let text = sanitize_transcript(&raw);
            if !text.is_empty() {
                sink.emit(&Event::Transcription { text });
            }
        }
        Err(err) => {
            sink.emit(&Event::Error {
                text: format!("Transcription failed: {err}"),
            });
        }
    }
    sink.emit(&Event::Status {
        text: "Ready".to_string(),
    });
}

/// Strip Whisper's bracketed non-speech markers and collapse whitespace.
pub(crate) fn sanitize_transcript(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    static NON_SPEECH_RE: OnceLock<Regex> = OnceLock::new();
    let re = NON_SPEECH_RE.get_or_init(|| {
        Regex::new(
            r"(?i)\[\s*\]|\(\s*\)|\[(?:\s*(?:silence|noise|inaudible|blank_audio|blank audio|music|laughter|applause|cough|breath(?:ing)?)\s*)\]|\((?:\s*(?:silence|noise|inaudible|blank audio|music|laughter|applause|cough|breath(?:ing)?)\s*)\)",
        )
        .expect("non-speech regex should compile")
    });
    let without_markers = re.replace_all(trimmed, " ");
    without_markers
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
