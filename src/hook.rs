//! Frontend configuration updates for the push-to-talk binding.
//!
//! The frontend owns the actual key hook; `config:update` just tells us what
//! it bound so state survives a frontend reload and shows up in the debug log.

use crate::log_debug;
use serde_json::Value;

pub trait InputHook {
    fn update(&mut self, payload: &Value);
}

#[derive(Default)]
pub struct HookBridge {
    binding: Option<String>,
    enabled: bool,
}

impl HookBridge {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn binding(&self) -> Option<&str> {
        self.binding.as_deref()
    }

    #[cfg(test)]
    pub(crate) fn enabled(&self) -> bool {
        self.enabled
    }
}

impl InputHook for HookBridge {
    fn update(&mut self, payload: &Value) {
        if let Some(enabled) = payload.get("voiceEnabled").and_then(Value::as_bool) {
            self.enabled = enabled;
        }
        let key = payload
            .get("pushToTalkKey")
            .or_else(|| payload.get("pushToTalk"))
            .and_then(Value::as_str);
        if let Some(key) = key {
            self.binding = Some(key.to_string());
        }
        match (&self.binding, self.enabled) {
            (Some(key), true) => log_debug(&format!("push-to-talk bound to {key}")),
            (Some(key), false) => log_debug(&format!("push-to-talk disabled (was {key})")),
            (None, _) => log_debug("push-to-talk binding cleared"),
        }
    }
}
