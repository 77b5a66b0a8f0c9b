use clap::Parser;
use std::io;
use std::process::ExitCode;
use std::sync::Arc;
use voxbridge::config::AppConfig;
use voxbridge::dispatch::Dispatcher;
use voxbridge::hook::HookBridge;
use voxbridge::logging::init_logging;
use voxbridge::ollama::{LanguageModel, OllamaClient, UnavailableModel};
use voxbridge::pool::WorkerPool;
use voxbridge::protocol::{Event, EventSink, StdoutSink};
use voxbridge::stt::{SpeechToText, Transcriber};
use voxbridge::{log_debug, VoiceSession};

fn main() -> ExitCode {
    let config = AppConfig::parse();
    if let Err(err) = config.validate() {
        eprintln!("voxbridge: {err}");
        return ExitCode::from(2);
    }
    init_logging(&config);
    log_debug("voxbridge starting");

    let sink: Arc<dyn EventSink> = Arc::new(StdoutSink);
    sink.emit(&Event::Status {
        text: "Initializing...".to_string(),
    });

    // A failed collaborator degrades that feature; the bridge itself stays up
    // so the frontend keeps its device list and error reporting.
    let stt: Option<Arc<dyn SpeechToText>> = match &config.whisper_model_path {
        Some(path) => match Transcriber::new(path, &config.lang) {
            Ok(transcriber) => Some(Arc::new(transcriber)),
            Err(err) => {
                sink.emit(&Event::Error {
                    text: format!("Failed to load Whisper model: {err}"),
                });
                None
            }
        },
        None => {
            sink.emit(&Event::Error {
                text: "No Whisper model configured; transcription disabled".to_string(),
            });
            None
        }
    };

    let llm: Arc<dyn LanguageModel> = match OllamaClient::new(&config.ollama_url) {
        Ok(client) => Arc::new(client),
        Err(err) => {
            sink.emit(&Event::Error {
                text: format!("Failed to set up AI client: {err}"),
            });
            Arc::new(UnavailableModel)
        }
    };

    let pool = Arc::new(WorkerPool::new(config.workers));
    let session = VoiceSession::new(&config, pool.clone(), sink.clone(), stt.clone());
    let mut dispatcher = Dispatcher::new(
        session,
        stt,
        llm,
        Box::new(HookBridge::new()),
        pool,
        sink.clone(),
        config.ollama_model.clone(),
    );

    sink.emit(&Event::Status {
        text: "Ready".to_string(),
    });
    dispatcher.run(io::stdin().lock());
    ExitCode::SUCCESS
}
