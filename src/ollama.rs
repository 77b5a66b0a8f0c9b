//! Blocking client for a local Ollama server.

use crate::{log_debug, log_debug_content};
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

// Local models can take a while on first load.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Text generation backend for `ai:send`.
pub trait LanguageModel: Send + Sync {
    fn generate(&self, model: &str, prompt: &str, system: Option<&str>) -> Result<String>;
}

pub struct OllamaClient {
    base_url: String,
    client: reqwest::blocking::Client,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

impl OllamaClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn request_body(model: &str, prompt: &str, system: Option<&str>) -> Value {
        let mut body = json!({
            "model": model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "num_ctx": 2048,
                "num_predict": 256,
                "temperature": 0.7,
                "top_k": 30,
                "top_p": 0.85,
                "repeat_penalty": 1.1,
                "num_thread": 4,
            },
        });
        if let (Some(system), Some(map)) = (system, body.as_object_mut()) {
            map.insert("system".to_string(), Value::String(system.to_string()));
        }
        body
    }

    fn send_once(&self, body: &Value) -> Result<String, SendFailure> {
        let url = format!("{}/api/generate", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .map_err(|err| SendFailure::Retryable(anyhow!("request to {url} failed: {err}")))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(SendFailure::Retryable(anyhow!("Ollama returned {status}")));
        }
        if !status.is_success() {
            let detail = response.text().unwrap_or_default();
            return Err(SendFailure::Fatal(anyhow!(
                "Ollama returned {status}: {detail}"
            )));
        }

        let parsed: GenerateResponse = response
            .json()
            .context("failed to decode Ollama response")
            .map_err(SendFailure::Fatal)?;
        let text = parsed.response.trim().to_string();
        if text.is_empty() {
            return Err(SendFailure::Fatal(anyhow!(
                "Ollama returned an empty response"
            )));
        }
        Ok(text)
    }
}

/// Transport errors and 5xx responses get one retry; everything else is final.
enum SendFailure {
    Retryable(anyhow::Error),
    Fatal(anyhow::Error),
}

impl SendFailure {
    fn into_error(self) -> anyhow::Error {
        match self {
            SendFailure::Retryable(err) | SendFailure::Fatal(err) => err,
        }
    }
}

impl LanguageModel for OllamaClient {
    fn generate(&self, model: &str, prompt: &str, system: Option<&str>) -> Result<String> {
        log_debug_content(&format!(
            "ollama request model={model} prompt_len={}",
            prompt.len()
        ));
        let body = Self::request_body(model, prompt, system);
        match self.send_once(&body) {
            Ok(text) => Ok(text),
            Err(SendFailure::Fatal(err)) => Err(err),
            Err(SendFailure::Retryable(first)) => {
                log_debug(&format!("ollama request failed, retrying: {first}"));
                std::thread::sleep(RETRY_BACKOFF);
                self.send_once(&body).map_err(SendFailure::into_error)
            }
        }
    }
}

/// Stands in when the HTTP client could not be built at startup; every call
/// reports the same failure instead of tearing the process down.
pub struct UnavailableModel;

impl LanguageModel for UnavailableModel {
    fn generate(&self, _model: &str, _prompt: &str, _system: Option<&str>) -> Result<String> {
        Err(anyhow!("AI backend is unavailable"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_carries_generation_options() {
        let body = OllamaClient::request_body("llama3", "hello", None);
        assert_eq!(body["model"], "llama3");
        assert_eq!(body["prompt"], "hello");
        assert_eq!(body["stream"], false);
        assert_eq!(body["options"]["num_ctx"], 2048);
        assert_eq!(body["options"]["num_predict"], 256);
        assert_eq!(body["options"]["top_k"], 30);
        assert!(body.get("system").is_none());
    }

    #[test]
    fn system_prompt_is_optional() {
        let body = OllamaClient::request_body("llama3", "hi", Some("be terse"));
        assert_eq!(body["system"], "be terse");
    }

    #[test]
    fn base_url_trailing_slash_is_normalized() {
        let client = OllamaClient::new("http://localhost:11434/").unwrap();
        assert_eq!(client.base_url, "http://localhost:11434");
    }

    #[test]
    fn unavailable_model_always_errors() {
        let model = UnavailableModel;
        assert!(model.generate("llama3", "hi", None).is_err());
    }

    #[test]
    fn empty_response_field_decodes_to_default() {
        let parsed: GenerateResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.response.is_empty());
    }
}
