//! Linear resampler
//!
//! Streaming variable-ratio resampling with a fractional position
//! accumulator. The position advances by the exact real ratio per output
//! frame and is never re-rounded per block, so long runs do not drift.

use crate::types::Sample;

/// Streaming linear resampler over interleaved frames
///
/// Feed input with `process`; it produces as many output frames as the
/// buffered input allows. `needed_input` tells a pull-model caller how many
/// source frames to fetch for a desired output count.
#[derive(Debug)]
pub struct LinearResampler {
    channels: usize,
    /// Source frames consumed per output frame
    ratio: f64,
    /// Fractional read position into the pending input
    pos: f64,
    /// Pending interleaved input frames
    pending: Vec<Sample>,
}

impl LinearResampler {
    /// Create a resampler; `ratio` is source frames per output frame
    /// (2.0 = consume twice as fast = double speed)
    pub fn new(channels: usize, ratio: f64) -> Self {
        Self {
            channels: channels.max(1),
            ratio: ratio.max(1e-6),
            pos: 0.0,
            pending: Vec::with_capacity(8192),
        }
    }

    /// Change the ratio; takes effect for the next output frame
    pub fn set_ratio(&mut self, ratio: f64) {
        self.ratio = ratio.max(1e-6);
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Source frames the caller should feed to produce `output_frames`
    pub fn needed_input(&self, output_frames: usize) -> usize {
        let buffered = self.pending.len() / self.channels;
        // The last output frame reads floor(pos + (n-1)·ratio) and its
        // successor, so we need that index + 2 frames in total
        let last_pos = self.pos + output_frames.saturating_sub(1) as f64 * self.ratio;
        let needed = last_pos.floor() as usize + 2;
        needed.saturating_sub(buffered)
    }

    /// Append `input` and write resampled frames to `output`
    ///
    /// Returns the number of output frames produced (may be short when the
    /// buffered input runs out).
    pub fn process(&mut self, input: &[Sample], output: &mut [Sample]) -> usize {
        debug_assert_eq!(input.len() % self.channels, 0);
        self.pending.extend_from_slice(input);

        let channels = self.channels;
        let buffered = self.pending.len() / channels;
        let mut produced = 0;

        for frame in output.chunks_exact_mut(channels) {
            let idx = self.pos.floor() as usize;
            if idx + 1 >= buffered {
                break;
            }
            let frac = (self.pos - idx as f64) as f32;
            let s0 = &self.pending[idx * channels..(idx + 1) * channels];
            let s1 = &self.pending[(idx + 1) * channels..(idx + 2) * channels];
            for (ch, out) in frame.iter_mut().enumerate() {
                *out = s0[ch] + (s1[ch] - s0[ch]) * frac;
            }
            self.pos += self.ratio;
            produced += 1;
        }

        // Drop frames the read position has fully passed
        let consumed = (self.pos.floor() as usize).min(buffered);
        if consumed > 0 {
            self.pending.drain(..consumed * channels);
            self.pos -= consumed as f64;
        }

        produced
    }

    /// Clear buffered input and the fractional accumulator
    pub fn reset(&mut self) {
        self.pending.clear();
        self.pos = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unity_ratio_passthrough() {
        let mut rs = LinearResampler::new(1, 1.0);
        let input: Vec<f32> = (0..100).map(|i| i as f32).collect();
        let mut output = vec![0.0; 99];
        let produced = rs.process(&input, &mut output);
        assert_eq!(produced, 99);
        for (i, &v) in output[..produced].iter().enumerate() {
            assert!((v - i as f32).abs() < 1e-6);
        }
    }

    #[test]
    fn test_half_speed_interpolates() {
        let mut rs = LinearResampler::new(1, 0.5);
        let input = [0.0, 1.0, 2.0, 3.0];
        let mut output = vec![0.0; 6];
        let produced = rs.process(&input, &mut output);
        assert_eq!(produced, 6);
        assert_eq!(&output[..6], &[0.0, 0.5, 1.0, 1.5, 2.0, 2.5]);
    }

    #[test]
    fn test_needed_input_is_sufficient() {
        let mut rs = LinearResampler::new(2, 1.7);
        let mut total_out = 0;
        for _ in 0..50 {
            let want = 128;
            let need = rs.needed_input(want);
            let input: Vec<f32> = vec![0.25; need * 2];
            let mut output = vec![0.0; want * 2];
            let produced = rs.process(&input, &mut output);
            assert_eq!(produced, want, "short read after {total_out} frames");
            total_out += produced;
        }
    }

    #[test]
    fn test_no_long_run_drift() {
        // At ratio 1.5, after N output frames exactly 1.5·N input frames
        // must have been consumed (within one frame of latency)
        let ratio = 1.5;
        let mut rs = LinearResampler::new(1, ratio);
        let mut consumed = 0usize;
        let mut produced = 0usize;
        for _ in 0..1000 {
            let need = rs.needed_input(64);
            consumed += need;
            let input = vec![0.0f32; need];
            let mut output = vec![0.0f32; 64];
            produced += rs.process(&input, &mut output);
        }
        let expected = produced as f64 * ratio;
        assert!(
            (consumed as f64 - expected).abs() < 4.0,
            "consumed {consumed}, expected {expected}"
        );
    }

    #[test]
    fn test_reset_clears_state() {
        let mut rs = LinearResampler::new(1, 1.0);
        let mut output = vec![0.0; 4];
        rs.process(&[1.0, 2.0, 3.0, 4.0, 5.0], &mut output);
        rs.reset();
        let produced = rs.process(&[], &mut output);
        assert_eq!(produced, 0);
    }
}
