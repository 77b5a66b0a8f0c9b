//! Whisper speech-to-text integration.
//!
//! Wraps `whisper_rs` behind a trait so the session and dispatcher can run
//! against a stub in tests. The model is loaded once at startup and reused
//! for every transcription.

use crate::audio::resample_to_target_rate;
use crate::log_debug;
use anyhow::{anyhow, Context, Result};
use std::os::raw::{c_char, c_uint, c_void};
use std::path::Path;
use std::sync::Once;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

/// Transcription backend used by the voice session and file handler.
pub trait SpeechToText: Send + Sync {
    /// Transcribe 16 kHz mono PCM samples.
    fn transcribe(&self, samples: &[f32]) -> Result<String>;

    /// Transcribe a WAV file from disk.
    fn transcribe_file(&self, path: &Path) -> Result<String>;
}

/// Whisper model context. Create once at startup; whisper state is per call.
pub struct Transcriber {
    ctx: WhisperContext,
    lang: String,
}

impl Transcriber {
    pub fn new(model_path: &str, lang: &str) -> Result<Self> {
        install_whisper_log_silencer();
        let ctx = WhisperContext::new_with_params(model_path, WhisperContextParameters::default())
            .context("failed to load whisper model")?;
        Ok(Self {
            ctx,
            lang: lang.to_string(),
        })
    }
}

impl SpeechToText for Transcriber {
    fn transcribe(&self, samples: &[f32]) -> Result<String> {
        let mut state = self
            .ctx
            .create_state()
            .context("failed to create whisper state")?;
        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        if self.lang.eq_ignore_ascii_case("auto") {
            params.set_language(None);
            params.set_detect_language(true);
        } else {
            params.set_language(Some(&self.lang));
            params.set_detect_language(false);
        }
        // Limit CPU usage so laptops don't max out all cores.
        params.set_n_threads(num_cpus::get().min(8) as i32);
        params.set_print_progress(false);
        params.set_print_timestamps(false);
        params.set_print_special(false);
        params.set_print_realtime(false);
        params.set_translate(false);
        params.set_token_timestamps(false);
        state.full(params, samples)?;

        let mut transcript = String::new();
        let num_segments = match state.full_n_segments() {
            Ok(count) => count,
            Err(err) => {
                log_debug(&format!("whisper failed to read segment count: {err}"));
                return Ok(transcript);
            }
        };
        if num_segments < 0 {
            log_debug("whisper returned a negative segment count");
            return Ok(transcript);
        }
        // Whisper splits output into small segments; stitch them together.
        for i in 0..num_segments {
            match state.full_get_segment_text_lossy(i) {
                Ok(text) => transcript.push_str(&text),
                Err(err) => log_debug(&format!("failed to read whisper segment {i}: {err}")),
            }
        }
        Ok(transcript.replace("[BLANK_AUDIO]", ""))
    }

    fn transcribe_file(&self, path: &Path) -> Result<String> {
        let samples = load_wav_mono_16k(path)?;
        self.transcribe(&samples)
    }
}

/// Decode a WAV file into 16 kHz mono f32 samples, downmixing and resampling
/// as needed.
pub fn load_wav_mono_16k(path: &Path) -> Result<Vec<f32>> {
    let mut reader = hound::WavReader::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .context("failed to decode float samples")?,
        hound::SampleFormat::Int => {
            let max = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max))
                .collect::<std::result::Result<_, _>>()
                .context("failed to decode integer samples")?
        }
    };
    if interleaved.is_empty() {
        return Err(anyhow!("{} contains no audio", path.display()));
    }

    let mono: Vec<f32> = if channels <= 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    };
    Ok(resample_to_target_rate(&mono, spec.sample_rate))
}

fn install_whisper_log_silencer() {
    static INSTALL_LOG_CALLBACK: Once = Once::new();
    INSTALL_LOG_CALLBACK.call_once(|| unsafe {
        whisper_rs::set_log_callback(Some(whisper_log_callback), std::ptr::null_mut());
    });
}

unsafe extern "C" fn whisper_log_callback(
    _level: c_uint,
    _text: *const c_char,
    _user_data: *mut c_void,
) {
    // Silence whisper.cpp's default logger; stdout must stay protocol-only.
}
