//! Synthesizer voices
//!
//! A voice is one note in flight: unison oscillator layers, an amplitude
//! envelope, an optional cutoff-modulated filter, and per-note MPE
//! expression. Voices render mono layers panned into a stereo bed and are
//! destroyed once the amplitude envelope finishes.

use crate::dsp::{Biquad, BiquadCoeffs, BiquadKind};
use crate::graph::equal_power_gains;
use crate::synth::envelope::AdsrEnvelope;
use crate::synth::instrument::VoiceDefinition;
use crate::synth::oscillator::Oscillator;
use crate::types::Sample;

/// MIDI note number → frequency in Hz (A4 = 69 = 440 Hz)
#[inline]
pub fn note_frequency(note: u8) -> f64 {
    440.0 * 2.0_f64.powf((note as f64 - 69.0) / 12.0)
}

struct LayerState {
    osc: Oscillator,
    detune_ratio: f32,
    pan: f32,
}

struct VoiceFilter {
    biquad: Biquad,
    q: f32,
    envelope: AdsrEnvelope,
}

/// One note in flight
pub struct Voice {
    note: u8,
    velocity: u8,
    layers: Vec<LayerState>,
    amp_envelope: AdsrEnvelope,
    filter: Option<VoiceFilter>,
    /// Per-note pitch bend in semitones (MPE)
    note_bend: f32,
    /// Per-note pressure, 0..=1 (MPE)
    pressure: f32,
    /// Per-note timbre (CC 74), 0..=1 (MPE)
    timbre: f32,
    /// Note-off arrived while the sustain pedal was latched
    sustained: bool,
    /// Allocation order, for oldest-voice stealing
    age: u64,
    // Per-voice scratch, reused across blocks
    amp_buf: Vec<Sample>,
    env_buf: Vec<Sample>,
    mono_buf: Vec<Sample>,
    work_buf: Vec<Sample>,
}

impl Voice {
    pub fn new(definition: &VoiceDefinition, note: u8, velocity: u8, age: u64, sample_rate: u32) -> Self {
        let layers = definition
            .layers
            .iter()
            .map(|spec| LayerState {
                osc: Oscillator::new(spec.waveform),
                detune_ratio: spec.detune_ratio,
                pan: spec.pan,
            })
            .collect();

        let filter = definition.filter.map(|spec| VoiceFilter {
            biquad: Biquad::new(BiquadKind::LowPass, 1000.0, spec.q, 0.0, sample_rate as f32, 2),
            q: spec.q,
            envelope: AdsrEnvelope::new(spec.envelope),
        });

        Self {
            note,
            velocity,
            layers,
            amp_envelope: AdsrEnvelope::new(definition.amp_envelope),
            filter,
            note_bend: 0.0,
            pressure: 0.0,
            timbre: 0.0,
            sustained: false,
            age,
            amp_buf: Vec::new(),
            env_buf: Vec::new(),
            mono_buf: Vec::new(),
            work_buf: Vec::new(),
        }
    }

    pub fn note(&self) -> u8 {
        self.note
    }

    pub fn age(&self) -> u64 {
        self.age
    }

    pub fn is_releasing(&self) -> bool {
        self.amp_envelope.is_releasing()
    }

    /// Eligible for destruction
    pub fn is_finished(&self) -> bool {
        self.amp_envelope.is_finished()
    }

    pub fn is_sustained(&self) -> bool {
        self.sustained
    }

    /// Handle note-off; latches instead of releasing while the pedal is down
    pub fn note_off(&mut self, pedal_down: bool) {
        if pedal_down {
            self.sustained = true;
        } else {
            self.release();
        }
    }

    /// Enter release now (pedal lift, all-notes-off, steal)
    pub fn release(&mut self) {
        self.sustained = false;
        self.amp_envelope.release();
        if let Some(filter) = &mut self.filter {
            filter.envelope.release();
        }
    }

    /// Per-note pitch bend in semitones
    pub fn set_note_bend(&mut self, semitones: f32) {
        self.note_bend = semitones;
    }

    pub fn note_bend(&self) -> f32 {
        self.note_bend
    }

    /// Per-note pressure, 0..=1
    pub fn set_pressure(&mut self, pressure: f32) {
        self.pressure = pressure.clamp(0.0, 1.0);
    }

    pub fn pressure(&self) -> f32 {
        self.pressure
    }

    /// Per-note timbre (CC 74), 0..=1
    pub fn set_timbre(&mut self, timbre: f32) {
        self.timbre = timbre.clamp(0.0, 1.0);
    }

    pub fn timbre(&self) -> f32 {
        self.timbre
    }

    /// Render one stereo block and accumulate into `out`
    ///
    /// `channel_bend` is the channel-wide pitch bend in semitones.
    pub fn render(&mut self, out: &mut [Sample], channel_bend: f32, sample_rate: u32) {
        let frames = out.len() / 2;
        if frames == 0 || self.layers.is_empty() || self.is_finished() {
            return;
        }

        self.amp_buf.resize(frames, 0.0);
        self.amp_envelope.render(&mut self.amp_buf, sample_rate);

        if let Some(filter) = &mut self.filter {
            self.env_buf.resize(frames, 0.0);
            filter.envelope.render(&mut self.env_buf, sample_rate);
        }

        self.work_buf.resize(frames * 2, 0.0);
        self.work_buf.fill(0.0);
        self.mono_buf.resize(frames, 0.0);

        // Unison layers: detuned oscillators, equal-power panned
        let base = note_frequency(self.note);
        let bend_ratio = 2.0_f64.powf((self.note_bend + channel_bend) as f64 / 12.0);
        for layer in &mut self.layers {
            let freq = base * layer.detune_ratio as f64 * bend_ratio;
            layer.osc.render(&mut self.mono_buf, freq, sample_rate);
            let (l, r) = equal_power_gains(layer.pan);
            for (frame, &mono) in self.work_buf.chunks_exact_mut(2).zip(self.mono_buf.iter()) {
                frame[0] += mono * l;
                frame[1] += mono * r;
            }
        }

        let norm = 1.0 / (self.layers.len() as f32).sqrt();
        crate::types::scale(&mut self.work_buf, norm);

        // Cutoff follows velocity, pressure, timbre, and the filter envelope
        if let Some(filter) = &mut self.filter {
            let velocity = self.velocity as f32 / 127.0;
            let nyquist = sample_rate as f32 * 0.45;
            for (i, frame) in self.work_buf.chunks_exact_mut(2).enumerate() {
                let cutoff = (200.0
                    + velocity * 4000.0
                    + self.pressure * 2000.0
                    + self.timbre * 3000.0
                    + self.env_buf[i] * 8000.0)
                    .min(nyquist);
                filter.biquad.set_coeffs(BiquadCoeffs::new(
                    BiquadKind::LowPass,
                    cutoff,
                    filter.q,
                    0.0,
                    sample_rate as f32,
                ));
                frame[0] = filter.biquad.process_sample(frame[0], 0);
                frame[1] = filter.biquad.process_sample(frame[1], 1);
            }
        }

        // Amplitude envelope, then accumulate
        let gain = self.velocity as f32 / 127.0;
        for ((frame, &amp), out_frame) in self
            .work_buf
            .chunks_exact(2)
            .zip(self.amp_buf.iter())
            .zip(out.chunks_exact_mut(2))
        {
            out_frame[0] += frame[0] * amp * gain;
            out_frame[1] += frame[1] * amp * gain;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::instrument::Instrument;

    fn voice(note: u8, velocity: u8) -> Voice {
        let inst = Instrument::default_instrument();
        let def = inst.resolve(note, velocity).unwrap();
        Voice::new(&def, note, velocity, 0, 48000)
    }

    #[test]
    fn test_note_frequency() {
        assert!((note_frequency(69) - 440.0).abs() < 1e-9);
        assert!((note_frequency(81) - 880.0).abs() < 1e-9);
        assert!((note_frequency(57) - 220.0).abs() < 1e-9);
    }

    #[test]
    fn test_render_is_nonsilent() {
        let mut v = voice(69, 100);
        let mut out = vec![0.0f32; 4800 * 2];
        v.render(&mut out, 0.0, 48000);
        assert!(crate::types::rms(&out) > 0.01);
    }

    #[test]
    fn test_finishes_after_release() {
        let mut v = voice(60, 100);
        let mut out = vec![0.0f32; 480 * 2];
        v.render(&mut out, 0.0, 48000);

        v.note_off(false);
        assert!(v.is_releasing());

        // Default release is 0.2 s; a little over covers it
        for _ in 0..30 {
            out.fill(0.0);
            v.render(&mut out, 0.0, 48000);
        }
        assert!(v.is_finished());
    }

    #[test]
    fn test_sustain_latch_defers_release() {
        let mut v = voice(60, 100);
        v.note_off(true);
        assert!(v.is_sustained());
        assert!(!v.is_releasing());

        v.release();
        assert!(v.is_releasing());
        assert!(!v.is_sustained());
    }

    #[test]
    fn test_bend_raises_pitch() {
        // +12 semitones doubles the zero-crossing count
        let count = |bend: f32| {
            let mut v = voice(69, 100);
            let mut out = vec![0.0f32; 48000 * 2];
            v.render(&mut out, bend, 48000);
            let left: Vec<f32> = out.iter().step_by(2).copied().collect();
            left.windows(2).filter(|w| w[0] < 0.0 && w[1] >= 0.0).count()
        };
        let base = count(0.0);
        let octave = count(12.0);
        let ratio = octave as f64 / base as f64;
        assert!((ratio - 2.0).abs() < 0.1, "ratio {ratio}");
    }
}
