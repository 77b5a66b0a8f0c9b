//! Microphone capture pipeline.
//!
//! Audio arrives on a cpal callback thread, gets downmixed to mono, resampled
//! to 16 kHz, gated by an RMS silence check, and pushed onto a bounded queue
//! that the transcription workers drain. The callback never blocks; anything
//! that cannot be admitted immediately is dropped.

/// Sample rate every admitted chunk is normalized to before queueing.
pub const TARGET_RATE: u32 = 16_000;

mod capture;
mod gate;
mod resample;

pub use capture::{CaptureBuffer, UtteranceDrain};
pub use gate::VadGate;
pub(crate) use resample::resample_to_target_rate;
