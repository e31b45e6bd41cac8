//! Feedback delay modifier

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::effects::Modifier;
use crate::types::{AtomicF32, Sample};

/// Longest supported delay in seconds
const MAX_DELAY_SECONDS: f32 = 2.0;

/// A per-channel feedback delay line
pub struct DelayModifier {
    delay_seconds: AtomicF32,
    feedback: AtomicF32,
    /// Wet/dry mix, 0.0 = dry only
    mix: AtomicF32,
    enabled: AtomicBool,
    state: Mutex<DelayState>,
}

struct DelayState {
    /// One ring per channel
    lines: Vec<Vec<Sample>>,
    write_pos: usize,
    sample_rate: u32,
}

impl DelayModifier {
    pub fn new(delay_seconds: f32, feedback: f32, mix: f32) -> Self {
        Self {
            delay_seconds: AtomicF32::new(delay_seconds.clamp(0.001, MAX_DELAY_SECONDS)),
            feedback: AtomicF32::new(feedback.clamp(0.0, 0.95)),
            mix: AtomicF32::new(mix.clamp(0.0, 1.0)),
            enabled: AtomicBool::new(true),
            state: Mutex::new(DelayState { lines: Vec::new(), write_pos: 0, sample_rate: 0 }),
        }
    }

    pub fn set_delay_seconds(&self, seconds: f32) {
        self.delay_seconds.store(seconds.clamp(0.001, MAX_DELAY_SECONDS));
    }

    pub fn set_feedback(&self, feedback: f32) {
        self.feedback.store(feedback.clamp(0.0, 0.95));
    }

    pub fn set_mix(&self, mix: f32) {
        self.mix.store(mix.clamp(0.0, 1.0));
    }
}

impl Modifier for DelayModifier {
    fn name(&self) -> &str {
        "Delay"
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    fn process(&self, buffer: &mut [Sample], channels: usize, sample_rate: u32) {
        let mut state = self.state.lock();

        // (Re)build the delay lines when the format changes
        let line_len = (MAX_DELAY_SECONDS * sample_rate as f32) as usize + 1;
        if state.sample_rate != sample_rate || state.lines.len() != channels {
            state.lines = vec![vec![0.0; line_len]; channels];
            state.write_pos = 0;
            state.sample_rate = sample_rate;
        }

        let delay_frames =
            ((self.delay_seconds.load() * sample_rate as f32) as usize).clamp(1, line_len - 1);
        let feedback = self.feedback.load();
        let mix = self.mix.load();

        let mut write_pos = state.write_pos;
        for frame in buffer.chunks_exact_mut(channels) {
            let read_pos = (write_pos + line_len - delay_frames) % line_len;
            for (ch, sample) in frame.iter_mut().enumerate() {
                let line = &mut state.lines[ch];
                let delayed = line[read_pos];
                line[write_pos] = *sample + delayed * feedback;
                *sample += (delayed - *sample) * mix;
            }
            write_pos = (write_pos + 1) % line_len;
        }
        state.write_pos = write_pos;
    }

    fn reset(&self) {
        let mut state = self.state.lock();
        for line in &mut state.lines {
            line.fill(0.0);
        }
        state.write_pos = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_appears_after_delay() {
        let delay = DelayModifier::new(0.01, 0.0, 1.0); // 480 frames at 48k, fully wet
        let mut buffer = vec![0.0f32; 1000];
        buffer[0] = 1.0;
        delay.process(&mut buffer, 1, 48000);

        // The impulse reappears 480 samples later
        assert!(buffer[0].abs() < 1e-6);
        assert!((buffer[480] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_dry_mix_passthrough() {
        let delay = DelayModifier::new(0.01, 0.5, 0.0);
        let mut buffer = vec![0.25f32; 256];
        delay.process(&mut buffer, 2, 48000);
        assert!(buffer.iter().all(|&s| (s - 0.25).abs() < 1e-6));
    }
}
