//! RMS-based silence gate applied inside the capture callback.

/// Decides per chunk whether audio enters the utterance queue.
///
/// A chunk whose RMS clears the threshold always enters and re-arms the gate.
/// After speech has been seen, quiet chunks still enter until a trailing
/// silence budget (counted in samples) runs out, so word endings and short
/// pauses survive. Before any speech, silence never enters.
pub struct VadGate {
    threshold: f32,
    trailing_budget_samples: usize,
    speech_detected: bool,
    trailing_silence_samples: usize,
}

impl VadGate {
    pub fn new(threshold: f32, trailing_budget_samples: usize) -> Self {
        Self {
            threshold,
            trailing_budget_samples,
            speech_detected: false,
            trailing_silence_samples: 0,
        }
    }

    /// Forget all speech history; called at the start of each capture session.
    pub fn reset(&mut self) {
        self.speech_detected = false;
        self.trailing_silence_samples = 0;
    }

    pub fn speech_detected(&self) -> bool {
        self.speech_detected
    }

    /// Returns true if the chunk should be queued.
    pub fn admit(&mut self, chunk: &[f32]) -> bool {
        if rms(chunk) > self.threshold {
            self.speech_detected = true;
            self.trailing_silence_samples = 0;
            return true;
        }
        if self.speech_detected && self.trailing_silence_samples < self.trailing_budget_samples {
            self.trailing_silence_samples += chunk.len();
            return true;
        }
        false
    }
}

pub(crate) fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loud(len: usize) -> Vec<f32> {
        vec![0.5; len]
    }

    fn quiet(len: usize) -> Vec<f32> {
        vec![0.0; len]
    }

    #[test]
    fn rms_of_constant_signal() {
        assert!((rms(&[0.5; 100]) - 0.5).abs() < 1e-6);
        assert_eq!(rms(&[]), 0.0);
    }

    #[test]
    fn silence_before_speech_is_rejected() {
        let mut gate = VadGate::new(0.01, 1000);
        assert!(!gate.admit(&quiet(512)));
        assert!(!gate.admit(&quiet(512)));
        assert!(!gate.speech_detected());
    }

    #[test]
    fn speech_admits_and_arms_trailing_window() {
        let mut gate = VadGate::new(0.01, 1000);
        assert!(gate.admit(&loud(512)));
        assert!(gate.speech_detected());
        // trailing silence rides along until the sample budget runs out
        assert!(gate.admit(&quiet(512)));
        assert!(gate.admit(&quiet(512)));
        assert!(!gate.admit(&quiet(512)));
    }

    #[test]
    fn speech_resets_trailing_counter() {
        let mut gate = VadGate::new(0.01, 600);
        assert!(gate.admit(&loud(256)));
        assert!(gate.admit(&quiet(512)));
        // fresh speech rewinds the silence budget
        assert!(gate.admit(&loud(256)));
        assert!(gate.admit(&quiet(512)));
        assert!(gate.admit(&quiet(80)));
        assert!(!gate.admit(&quiet(512)));
    }

    #[test]
    fn reset_forgets_speech_history() {
        let mut gate = VadGate::new(0.01, 1000);
        assert!(gate.admit(&loud(256)));
        gate.reset();
        assert!(!gate.speech_detected());
        assert!(!gate.admit(&quiet(256)));
    }
}
