//! Line-delimited JSON protocol over the standard streams.
//!
//! Both directions use the same envelope: one JSON object per line with a
//! `type` string and a `payload` object. Inbound lines decode into a loose
//! [`Envelope`] (payload fields are coerced explicitly because frontends are
//! sloppy about number vs. string); outbound events are a typed enum written
//! with an explicit flush per line.

use serde::Serialize;
use serde_json::{Map, Value};
use std::io::{self, Write};

/// One enumerated audio input device, snapshot at listing time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceDescriptor {
    pub index: usize,
    pub name: String,
    #[serde(rename = "hostApi")]
    pub host_api: String,
}

/// Decoded inbound command line.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub msg_type: String,
    pub payload: Value,
}

/// Parse one inbound line. Returns `None` for anything undecodable; the read
/// loop skips those silently.
pub fn decode_line(line: &str) -> Option<Envelope> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    let value: Value = serde_json::from_str(trimmed).ok()?;
    let msg_type = value.get("type")?.as_str()?.to_string();
    let payload = value
        .get("payload")
        .cloned()
        .unwrap_or_else(|| Value::Object(Map::new()));
    Some(Envelope { msg_type, payload })
}

/// Read a string field from a payload object.
pub fn payload_str(payload: &Value, key: &str) -> Option<String> {
    payload.get(key)?.as_str().map(str::to_string)
}

/// Read an index field, accepting either a JSON number or a numeric string.
pub fn payload_index(payload: &Value, key: &str) -> Option<usize> {
    match payload.get(key)? {
        Value::Number(n) => n.as_u64().map(|v| v as usize),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Events emitted on stdout, serialized as `{"type": ..., "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum Event {
    #[serde(rename = "status")]
    Status { text: String },
    #[serde(rename = "error")]
    Error { text: String },
    #[serde(rename = "transcription")]
    Transcription { text: String },
    #[serde(rename = "voice:devices")]
    Devices { devices: Vec<DeviceDescriptor> },
    #[serde(rename = "voice:start")]
    VoiceStart {},
    #[serde(rename = "voice:stop")]
    VoiceStop {},
    #[serde(rename = "ai:response")]
    AiResponse { text: String },
    #[serde(rename = "tts:models")]
    TtsModels {
        gpt: Vec<String>,
        sovits: Vec<String>,
    },
}

/// Outbound message sink. Handlers run on worker threads, so implementations
/// must be shareable.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &Event);
}

/// Production sink: one JSON line per event on stdout, flushed immediately so
/// the frontend never waits on buffering.
pub struct StdoutSink;

impl EventSink for StdoutSink {
    fn emit(&self, event: &Event) {
        if let Ok(json) = serde_json::to_string(event) {
            let mut stdout = io::stdout().lock();
            let _ = writeln!(stdout, "{json}");
            let _ = stdout.flush();
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_envelope_with_payload() {
        let env = decode_line(r#"{"type":"ai:send","payload":{"prompt":"hi"}}"#).unwrap();
        assert_eq!(env.msg_type, "ai:send");
        assert_eq!(payload_str(&env.payload, "prompt").as_deref(), Some("hi"));
    }

    #[test]
    fn missing_payload_defaults_to_empty_object() {
        let env = decode_line(r#"{"type":"voice:start"}"#).unwrap();
        assert_eq!(env.msg_type, "voice:start");
        assert!(env.payload.as_object().map(|o| o.is_empty()).unwrap_or(false));
    }

    #[test]
    fn rejects_garbage_and_blank_lines() {
        assert!(decode_line("not json at all").is_none());
        assert!(decode_line("").is_none());
        assert!(decode_line("   ").is_none());
        assert!(decode_line(r#"{"payload":{}}"#).is_none());
        assert!(decode_line(r#"{"type":42}"#).is_none());
    }

    #[test]
    fn index_accepts_number_or_numeric_string() {
        let payload: Value = serde_json::from_str(r#"{"a":3,"b":"3","c":"x","d":[1]}"#).unwrap();
        assert_eq!(payload_index(&payload, "a"), Some(3));
        assert_eq!(payload_index(&payload, "b"), Some(3));
        assert_eq!(payload_index(&payload, "c"), None);
        assert_eq!(payload_index(&payload, "d"), None);
        assert_eq!(payload_index(&payload, "missing"), None);
    }

    #[test]
    fn events_serialize_with_type_and_payload() {
        let json = serde_json::to_string(&Event::Status {
            text: "Ready".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"status","payload":{"text":"Ready"}}"#);

        let json = serde_json::to_string(&Event::VoiceStart {}).unwrap();
        assert_eq!(json, r#"{"type":"voice:start","payload":{}}"#);
    }

    #[test]
    fn device_list_uses_wire_field_names() {
        let event = Event::Devices {
            devices: vec![DeviceDescriptor {
                index: 1,
                name: "Internal Mic".to_string(),
                host_api: "ALSA".to_string(),
            }],
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"voice:devices""#));
        assert!(json.contains(r#""hostApi":"ALSA""#));
    }

    #[test]
    fn model_scan_event_carries_both_sets() {
        let json = serde_json::to_string(&Event::TtsModels {
            gpt: vec!["a.ckpt".to_string()],
            sovits: vec![],
        })
        .unwrap();
        assert!(json.contains(r#""gpt":["a.ckpt"]"#));
        assert!(json.contains(r#""sovits":[]"#));
    }
}
