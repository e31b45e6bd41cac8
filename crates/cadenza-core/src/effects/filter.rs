//! Biquad filter modifier

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use parking_lot::Mutex;

use crate::dsp::{Biquad, BiquadCoeffs, BiquadKind};
use crate::effects::Modifier;
use crate::types::{AtomicF32, Sample};

/// Maximum channel count the per-channel state is sized for
const MAX_CHANNELS: usize = 8;

/// A retunable biquad in the modifier chain
///
/// Cutoff, Q, and gain are atomics; the audio thread rebuilds coefficients
/// on the block after a change. Filter memory survives retuning so sweeps
/// stay click-free.
pub struct FilterModifier {
    kind: AtomicU8,
    cutoff_hz: AtomicF32,
    q: AtomicF32,
    gain_db: AtomicF32,
    enabled: AtomicBool,
    dirty: AtomicBool,
    state: Mutex<FilterState>,
}

struct FilterState {
    biquad: Biquad,
    sample_rate: u32,
}

fn kind_to_u8(kind: BiquadKind) -> u8 {
    match kind {
        BiquadKind::LowPass => 0,
        BiquadKind::HighPass => 1,
        BiquadKind::BandPass => 2,
        BiquadKind::Notch => 3,
        BiquadKind::Peaking => 4,
        BiquadKind::LowShelf => 5,
        BiquadKind::HighShelf => 6,
    }
}

fn kind_from_u8(v: u8) -> BiquadKind {
    match v {
        0 => BiquadKind::LowPass,
        1 => BiquadKind::HighPass,
        2 => BiquadKind::BandPass,
        3 => BiquadKind::Notch,
        4 => BiquadKind::Peaking,
        5 => BiquadKind::LowShelf,
        _ => BiquadKind::HighShelf,
    }
}

impl FilterModifier {
    pub fn new(kind: BiquadKind, cutoff_hz: f32, q: f32) -> Self {
        Self {
            kind: AtomicU8::new(kind_to_u8(kind)),
            cutoff_hz: AtomicF32::new(cutoff_hz),
            q: AtomicF32::new(q),
            gain_db: AtomicF32::new(0.0),
            enabled: AtomicBool::new(true),
            dirty: AtomicBool::new(true),
            state: Mutex::new(FilterState {
                biquad: Biquad::new(kind, cutoff_hz, q, 0.0, 48000.0, MAX_CHANNELS),
                sample_rate: 48000,
            }),
        }
    }

    pub fn set_kind(&self, kind: BiquadKind) {
        self.kind.store(kind_to_u8(kind), Ordering::Relaxed);
        self.dirty.store(true, Ordering::Release);
    }

    pub fn set_cutoff(&self, hz: f32) {
        self.cutoff_hz.store(hz);
        self.dirty.store(true, Ordering::Release);
    }

    pub fn cutoff(&self) -> f32 {
        self.cutoff_hz.load()
    }

    pub fn set_q(&self, q: f32) {
        self.q.store(q);
        self.dirty.store(true, Ordering::Release);
    }

    pub fn set_gain_db(&self, db: f32) {
        self.gain_db.store(db);
        self.dirty.store(true, Ordering::Release);
    }
}

impl Modifier for FilterModifier {
    fn name(&self) -> &str {
        "Filter"
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    fn process(&self, buffer: &mut [Sample], channels: usize, sample_rate: u32) {
        let channels = channels.min(MAX_CHANNELS);
        let mut state = self.state.lock();

        if self.dirty.swap(false, Ordering::AcqRel) || state.sample_rate != sample_rate {
            state.sample_rate = sample_rate;
            let coeffs = BiquadCoeffs::new(
                kind_from_u8(self.kind.load(Ordering::Relaxed)),
                self.cutoff_hz.load(),
                self.q.load(),
                self.gain_db.load(),
                sample_rate as f32,
            );
            state.biquad.set_coeffs(coeffs);
        }

        state.biquad.process(buffer, channels);
    }

    fn reset(&self) {
        self.state.lock().biquad.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowpass_attenuates_noise_energy() {
        let filter = FilterModifier::new(BiquadKind::LowPass, 500.0, 0.707);
        // Alternating ±1 is the highest representable frequency
        let mut buffer: Vec<f32> = (0..4800).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        filter.process(&mut buffer, 1, 48000);
        let tail = &buffer[2400..];
        assert!(crate::types::rms(tail) < 0.05);
    }

    #[test]
    fn test_retune_applies_next_block() {
        let filter = FilterModifier::new(BiquadKind::LowPass, 500.0, 0.707);
        let mut buffer = vec![0.0f32; 64];
        filter.process(&mut buffer, 2, 48000);
        filter.set_cutoff(2000.0);
        filter.process(&mut buffer, 2, 48000);
        assert_eq!(filter.cutoff(), 2000.0);
    }
}
