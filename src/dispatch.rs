//! Command routing for the stdin read loop.
//!
//! One blocking loop reads lines, decodes them, and routes by message type.
//! Handlers that finish in microseconds run inline; anything that touches
//! Whisper, the LLM, or the filesystem goes through the worker pool so the
//! next command is picked up immediately.

use crate::hook::InputHook;
use crate::log_debug;
use crate::ollama::LanguageModel;
use crate::pool::WorkerPool;
use crate::protocol::{decode_line, payload_index, payload_str, Event, EventSink};
use crate::scan::scan_models;
use crate::session::VoiceSession;
use crate::stt::SpeechToText;
use std::fs;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

pub struct Dispatcher {
    session: VoiceSession,
    stt: Option<Arc<dyn SpeechToText>>,
    llm: Arc<dyn LanguageModel>,
    hook: Box<dyn InputHook>,
    pool: Arc<WorkerPool>,
    sink: Arc<dyn EventSink>,
    default_model: String,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session: VoiceSession,
        stt: Option<Arc<dyn SpeechToText>>,
        llm: Arc<dyn LanguageModel>,
        hook: Box<dyn InputHook>,
        pool: Arc<WorkerPool>,
        sink: Arc<dyn EventSink>,
        default_model: String,
    ) -> Self {
        Self {
            session,
            stt,
            llm,
            hook,
            pool,
            sink,
            default_model,
        }
    }

    /// Consume lines until EOF or a read error. Undecodable lines are skipped
    /// without a response so a garbled frontend write cannot wedge the loop.
    pub fn run(&mut self, reader: impl BufRead) {
        for line in reader.lines() {
            match line {
                Ok(line) => self.handle_line(&line),
                Err(err) => {
                    log_debug(&format!("stdin read error: {err}"));
                    break;
                }
            }
        }
        log_debug("stdin closed, shutting down");
    }

    pub fn handle_line(&mut self, line: &str) {
        let Some(envelope) = decode_line(line) else {
            if !line.trim().is_empty() {
                log_debug("skipping undecodable input line");
            }
            return;
        };
        match envelope.msg_type.as_str() {
            "config:update" => self.hook.update(&envelope.payload),
            "voice:get-devices" => {
                let devices = self.session.list_devices();
                self.sink.emit(&Event::Devices { devices });
            }
            "voice:set-device" => match payload_index(&envelope.payload, "index") {
                Some(index) => {
                    if let Err(err) = self.session.set_device(index) {
                        log_debug(&format!("failed to switch to device {index}: {err}"));
                    }
                }
                None => self.sink.emit(&Event::Error {
                    text: "voice:set-device requires a device index".to_string(),
                }),
            },
            "voice:start" => self.session.on_press(),
            "voice:stop" => self.session.on_release(),
            "transcribe:file" => self.handle_transcribe_file(&envelope.payload),
            "ai:send" => self.handle_ai_send(&envelope.payload),
            "tts:scan-models" => self.handle_scan_models(&envelope.payload),
            other => log_debug(&format!("ignoring unknown message type '{other}'")),
        }
    }

    fn handle_transcribe_file(&self, payload: &serde_json::Value) {
        let Some(filepath) = payload_str(payload, "filepath") else {
            self.sink.emit(&Event::Error {
                text: "transcribe:file requires a filepath".to_string(),
            });
            return;
        };
        let path = PathBuf::from(filepath);
        if !path.exists() {
            self.sink.emit(&Event::Error {
                text: format!("File not found: {}", path.display()),
            });
            return;
        }
        let Some(stt) = self.stt.clone() else {
            self.sink.emit(&Event::Error {
                text: "Whisper model not loaded".to_string(),
            });
            return;
        };

        let sink = self.sink.clone();
        let accepted = self.pool.execute(move || {
            sink.emit(&Event::Status {
                text: "Transcribing...".to_string(),
            });
            match stt.transcribe_file(&path) {
                Ok(text) => sink.emit(&Event::Transcription { text }),
                Err(err) => sink.emit(&Event::Error {
                    text: format!("Transcription failed: {err}"),
                }),
            }
            // the frontend hands us throwaway recordings; best-effort cleanup
            if let Err(err) = fs::remove_file(&path) {
                log_debug(&format!("could not remove {}: {err}", path.display()));
            }
        });
        if !accepted {
            self.sink.emit(&Event::Error {
                text: "Transcription queue is full".to_string(),
            });
        }
    }

    fn handle_ai_send(&self, payload: &serde_json::Value) {
        let Some(prompt) = payload_str(payload, "prompt") else {
            self.sink.emit(&Event::Error {
                text: "ai:send requires a prompt".to_string(),
            });
            return;
        };
        let model = payload_str(payload, "model")
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| self.default_model.clone());
        let system = payload_str(payload, "systemPrompt");

        let llm = self.llm.clone();
        let sink = self.sink.clone();
        let accepted = self.pool.execute(move || {
            match llm.generate(&model, &prompt, system.as_deref()) {
                Ok(text) => sink.emit(&Event::AiResponse { text }),
                Err(err) => sink.emit(&Event::Error {
                    text: format!("AI request failed: {err}"),
                }),
            }
        });
        if !accepted {
            self.sink.emit(&Event::Error {
                text: "AI request queue is full".to_string(),
            });
        }
    }

    fn handle_scan_models(&self, payload: &serde_json::Value) {
        let base_path = payload_str(payload, "base_path")
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);

        let sink = self.sink.clone();
        let accepted = self.pool.execute(move || {
            let scan = scan_models(base_path.as_deref());
            sink.emit(&Event::TtsModels {
                gpt: scan.gpt,
                sovits: scan.sovits,
            });
        });
        if !accepted {
            self.sink.emit(&Event::Error {
                text: "Model scan queue is full".to_string(),
            });
        }
    }

    #[cfg(test)]
    pub(crate) fn session_mut(&mut self) -> &mut VoiceSession {
        &mut self.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::protocol::testing::CollectingSink;
    use anyhow::{anyhow, Result};
    use clap::Parser;
    use std::io::Write;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;

    struct EchoStt;

    impl SpeechToText for EchoStt {
        fn transcribe(&self, samples: &[f32]) -> Result<String> {
            Ok(format!("heard {} samples", samples.len()))
        }

        fn transcribe_file(&self, path: &Path) -> Result<String> {
            Ok(format!("file {}", path.display()))
        }
    }

    struct RecordingLlm {
        calls: Mutex<Vec<(String, String, Option<String>)>>,
        reply: Result<String, String>,
    }

    impl RecordingLlm {
        fn replying(text: &str) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                reply: Ok(text.to_string()),
            }
        }
    }

    impl LanguageModel for RecordingLlm {
        fn generate(&self, model: &str, prompt: &str, system: Option<&str>) -> Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push((model.to_string(), prompt.to_string(), system.map(String::from)));
            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err(msg) => Err(anyhow!(msg.clone())),
            }
        }
    }

    struct NullHook;

    impl InputHook for NullHook {
        fn update(&mut self, _payload: &serde_json::Value) {}
    }

    fn dispatcher_with(
        llm: Arc<RecordingLlm>,
    ) -> (Dispatcher, Arc<CollectingSink>) {
        let config = AppConfig::parse_from(["voxbridge"]);
        let sink = Arc::new(CollectingSink::new());
        let pool = Arc::new(WorkerPool::new(2));
        let stt: Arc<dyn SpeechToText> = Arc::new(EchoStt);
        let session =
            VoiceSession::new(&config, pool.clone(), sink.clone(), Some(stt.clone()));
        let dispatcher = Dispatcher::new(
            session,
            Some(stt),
            llm,
            Box::new(NullHook),
            pool,
            sink.clone(),
            "llama3".to_string(),
        );
        (dispatcher, sink)
    }

    fn wait_ready(sink: &CollectingSink) -> Vec<Event> {
        sink.wait_for(Duration::from_secs(2), |events| {
            events.iter().any(|e| matches!(e, Event::Status { text } if text == "Ready"))
        })
    }

    #[test]
    fn voice_round_trip_over_the_wire() {
        let (mut dispatcher, sink) = dispatcher_with(Arc::new(RecordingLlm::replying("")));
        dispatcher.handle_line(r#"{"type":"voice:start"}"#);
        dispatcher
            .session_mut()
            .feed_chunk(&vec![0.5; 8000], 1, crate::audio::TARGET_RATE);
        dispatcher.handle_line(r#"{"type":"voice:stop"}"#);

        let events = wait_ready(&sink);
        assert_eq!(events[0], Event::VoiceStart {});
        assert_eq!(events[1], Event::VoiceStop {});
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::Transcription { text } if text == "heard 8000 samples")));
    }

    #[test]
    fn malformed_line_is_skipped_and_loop_continues() {
        let (mut dispatcher, sink) = dispatcher_with(Arc::new(RecordingLlm::replying("")));
        dispatcher.handle_line("{{{ not json");
        dispatcher.handle_line(r#"{"type":"voice:get-devices"}"#);
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Event::Devices { .. }));
    }

    #[test]
    fn device_index_accepts_numeric_string() {
        let (mut dispatcher, _sink) = dispatcher_with(Arc::new(RecordingLlm::replying("")));
        dispatcher.handle_line(r#"{"type":"voice:set-device","payload":{"index":"1"}}"#);
        assert_eq!(dispatcher.session_mut().device_index(), Some(1));
    }

    #[test]
    fn set_device_without_index_is_an_error() {
        let (mut dispatcher, sink) = dispatcher_with(Arc::new(RecordingLlm::replying("")));
        dispatcher.handle_line(r#"{"type":"voice:set-device","payload":{}}"#);
        assert!(sink
            .events()
            .iter()
            .any(|e| matches!(e, Event::Error { text } if text.contains("device index"))));
    }

    #[test]
    fn ai_send_uses_default_model_and_forwards_system_prompt() {
        let llm = Arc::new(RecordingLlm::replying("the answer"));
        let (mut dispatcher, sink) = dispatcher_with(llm.clone());
        dispatcher.handle_line(
            r#"{"type":"ai:send","payload":{"prompt":"hi","systemPrompt":"be brief"}}"#,
        );

        let events = sink.wait_for(Duration::from_secs(2), |events| {
            events.iter().any(|e| matches!(e, Event::AiResponse { .. }))
        });
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::AiResponse { text } if text == "the answer")));
        let calls = llm.calls.lock().unwrap();
        assert_eq!(calls[0].0, "llama3");
        assert_eq!(calls[0].1, "hi");
        assert_eq!(calls[0].2.as_deref(), Some("be brief"));
    }

    #[test]
    fn ai_send_without_prompt_is_an_error() {
        let llm = Arc::new(RecordingLlm::replying(""));
        let (mut dispatcher, sink) = dispatcher_with(llm.clone());
        dispatcher.handle_line(r#"{"type":"ai:send","payload":{"model":"llama3"}}"#);
        assert!(sink
            .events()
            .iter()
            .any(|e| matches!(e, Event::Error { text } if text.contains("prompt"))));
        assert!(llm.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn transcribe_file_deletes_the_recording_afterwards() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.wav");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"not really wav").unwrap();
        drop(file);

        let (mut dispatcher, sink) = dispatcher_with(Arc::new(RecordingLlm::replying("")));
        let line = serde_json::json!({
            "type": "transcribe:file",
            "payload": { "filepath": path.to_string_lossy() },
        });
        dispatcher.handle_line(&line.to_string());

        let events = sink.wait_for(Duration::from_secs(2), |events| {
            events.iter().any(|e| matches!(e, Event::Transcription { .. }))
        });
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::Transcription { .. })));
        // give the worker a moment to finish the cleanup half of the job
        let deadline = std::time::Instant::now() + Duration::from_secs(1);
        while path.exists() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(!path.exists());
    }

    #[test]
    fn transcribe_missing_file_is_an_error() {
        let (mut dispatcher, sink) = dispatcher_with(Arc::new(RecordingLlm::replying("")));
        dispatcher
            .handle_line(r#"{"type":"transcribe:file","payload":{"filepath":"/no/such/file.wav"}}"#);
        assert!(sink
            .events()
            .iter()
            .any(|e| matches!(e, Event::Error { text } if text.contains("File not found"))));
    }

    #[test]
    fn scan_models_reports_empty_sets_for_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let (mut dispatcher, sink) = dispatcher_with(Arc::new(RecordingLlm::replying("")));
        let line = serde_json::json!({
            "type": "tts:scan-models",
            "payload": { "base_path": dir.path().join("nowhere").to_string_lossy() },
        });
        dispatcher.handle_line(&line.to_string());

        let events = sink.wait_for(Duration::from_secs(2), |events| {
            events.iter().any(|e| matches!(e, Event::TtsModels { .. }))
        });
        assert!(events.iter().any(
            |e| matches!(e, Event::TtsModels { gpt, sovits } if gpt.is_empty() && sovits.is_empty())
        ));
    }

    #[test]
    fn unknown_type_is_ignored() {
        let (mut dispatcher, sink) = dispatcher_with(Arc::new(RecordingLlm::replying("")));
        dispatcher.handle_line(r#"{"type":"nonsense:do-thing","payload":{}}"#);
        assert!(sink.events().is_empty());
    }

    #[test]
    fn run_exits_on_eof_after_processing_lines() {
        let (mut dispatcher, sink) = dispatcher_with(Arc::new(RecordingLlm::replying("")));
        let input = b"{\"type\":\"voice:get-devices\"}\n" as &[u8];
        dispatcher.run(input);
        assert!(sink
            .events()
            .iter()
            .any(|e| matches!(e, Event::Devices { .. })));
    }
}
