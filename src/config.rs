//! Command-line parsing and validation helpers.

use anyhow::{anyhow, Result};
use clap::Parser;

pub const DEFAULT_SILENCE_THRESHOLD: f32 = 0.01;
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;
pub const DEFAULT_WORKERS: usize = 3;
const MAX_WORKERS: usize = 16;

/// CLI options for the voxbridge sidecar. Validated values keep the audio
/// callback and worker pool within sane bounds.
#[derive(Debug, Parser, Clone)]
#[command(about = "Stdio JSON sidecar for voice capture, transcription and local LLM calls", version)]
pub struct AppConfig {
    /// Whisper model path (GGML format)
    #[arg(long = "whisper-model", env = "VOXBRIDGE_WHISPER_MODEL")]
    pub whisper_model_path: Option<String>,

    /// Language passed to Whisper ("auto" enables detection)
    #[arg(long, default_value = "en")]
    pub lang: String,

    /// Preferred audio input device index (omit for the system default)
    #[arg(long = "input-device")]
    pub input_device: Option<usize>,

    /// Base URL of the local LLM server
    #[arg(
        long = "ollama-url",
        env = "VOXBRIDGE_OLLAMA_URL",
        default_value = "http://localhost:11434"
    )]
    pub ollama_url: String,

    /// Model used for ai:send when the payload omits one
    #[arg(long = "ollama-model", default_value = "llama3")]
    pub ollama_model: String,

    /// RMS level below which an audio chunk counts as silence
    #[arg(long = "silence-threshold", default_value_t = DEFAULT_SILENCE_THRESHOLD)]
    pub silence_threshold: f32,

    /// Capture queue capacity in chunks; overflow drops the newest chunk
    #[arg(long = "queue-capacity", default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    /// Worker pool size for offloaded handlers
    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    /// Enable file logging (debug)
    #[arg(long = "logs", env = "VOXBRIDGE_LOGS", default_value_t = false)]
    pub logs: bool,

    /// Disable all file logging (overrides --logs and log env vars)
    #[arg(long = "no-logs", env = "VOXBRIDGE_NO_LOGS", default_value_t = false)]
    pub no_logs: bool,

    /// Allow logging prompt/transcript snippets (debug log only)
    #[arg(
        long = "log-content",
        env = "VOXBRIDGE_LOG_CONTENT",
        default_value_t = false
    )]
    pub log_content: bool,
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.silence_threshold > 0.0 && self.silence_threshold < 1.0) {
            return Err(anyhow!(
                "--silence-threshold must be between 0 and 1, got {}",
                self.silence_threshold
            ));
        }
        if self.queue_capacity == 0 {
            return Err(anyhow!("--queue-capacity must be at least 1"));
        }
        if self.workers == 0 || self.workers > MAX_WORKERS {
            return Err(anyhow!(
                "--workers must be between 1 and {MAX_WORKERS}, got {}",
                self.workers
            ));
        }
        if self.ollama_url.trim().is_empty() {
            return Err(anyhow!("--ollama-url must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> AppConfig {
        let mut full = vec!["voxbridge"];
        full.extend_from_slice(args);
        AppConfig::parse_from(full)
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = parse(&[]);
        cfg.validate().expect("defaults should validate");
        assert_eq!(cfg.ollama_model, "llama3");
        assert_eq!(cfg.workers, DEFAULT_WORKERS);
        assert_eq!(cfg.queue_capacity, DEFAULT_QUEUE_CAPACITY);
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let cfg = parse(&["--silence-threshold", "1.5"]);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_capacity_and_workers() {
        assert!(parse(&["--queue-capacity", "0"]).validate().is_err());
        assert!(parse(&["--workers", "0"]).validate().is_err());
        assert!(parse(&["--workers", "64"]).validate().is_err());
    }

    #[test]
    fn accepts_device_index() {
        let cfg = parse(&["--input-device", "2"]);
        assert_eq!(cfg.input_device, Some(2));
    }
}
