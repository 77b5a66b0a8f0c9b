pub mod audio;
pub mod config;
pub mod dispatch;
pub mod hook;
pub mod logging;
pub mod ollama;
pub mod pool;
pub mod protocol;
pub mod scan;
pub mod session;
pub mod stt;

pub use logging::{log_debug, log_debug_content};
pub use session::VoiceSession;
