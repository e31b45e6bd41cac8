//! Oscillators

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Oscillator waveform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    #[default]
    Sine,
    Sawtooth,
    Square,
    Triangle,
    Noise,
}

/// A phase-accumulating oscillator
#[derive(Debug, Clone)]
pub struct Oscillator {
    waveform: Waveform,
    /// Phase in [0, 1)
    phase: f64,
}

impl Oscillator {
    pub fn new(waveform: Waveform) -> Self {
        Self { waveform, phase: 0.0 }
    }

    pub fn waveform(&self) -> Waveform {
        self.waveform
    }

    pub fn reset(&mut self) {
        self.phase = 0.0;
    }

    /// Produce one sample at `frequency` Hz
    #[inline]
    pub fn next(&mut self, frequency: f64, sample_rate: u32) -> f32 {
        let value = match self.waveform {
            Waveform::Sine => (self.phase * 2.0 * PI).sin() as f32,
            Waveform::Sawtooth => (2.0 * self.phase - 1.0) as f32,
            Waveform::Square => {
                if self.phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Triangle => (4.0 * (self.phase - 0.5).abs() - 1.0) as f32,
            Waveform::Noise => fastrand::f32() * 2.0 - 1.0,
        };

        self.phase += frequency / sample_rate as f64;
        if self.phase >= 1.0 {
            self.phase -= self.phase.floor();
        }
        value
    }

    /// Fill `out` at a fixed frequency
    pub fn render(&mut self, out: &mut [f32], frequency: f64, sample_rate: u32) {
        for v in out.iter_mut() {
            *v = self.next(frequency, sample_rate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::rms;

    #[test]
    fn test_sine_frequency() {
        let mut osc = Oscillator::new(Waveform::Sine);
        let mut out = vec![0.0; 48000];
        osc.render(&mut out, 100.0, 48000);
        // 100 full cycles: count positive-going zero crossings
        let crossings = out.windows(2).filter(|w| w[0] < 0.0 && w[1] >= 0.0).count();
        assert!((99..=101).contains(&crossings), "crossings {crossings}");
    }

    #[test]
    fn test_sine_rms() {
        let mut osc = Oscillator::new(Waveform::Sine);
        let mut out = vec![0.0; 48000];
        osc.render(&mut out, 440.0, 48000);
        assert!((rms(&out) - std::f32::consts::FRAC_1_SQRT_2).abs() < 0.01);
    }

    #[test]
    fn test_square_is_full_scale() {
        let mut osc = Oscillator::new(Waveform::Square);
        let mut out = vec![0.0; 1000];
        osc.render(&mut out, 440.0, 48000);
        assert!(out.iter().all(|&s| s == 1.0 || s == -1.0));
    }

    #[test]
    fn test_triangle_bounds() {
        let mut osc = Oscillator::new(Waveform::Triangle);
        let mut out = vec![0.0; 1000];
        osc.render(&mut out, 440.0, 48000);
        assert!(out.iter().all(|&s| (-1.0..=1.0).contains(&s)));
    }
}
