//! Instruments
//!
//! An instrument maps (note-range × velocity-range) cells to voice
//! definitions: unison layer specs, the amplitude envelope, and an optional
//! modulated filter.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::synth::envelope::AdsrParams;
use crate::synth::oscillator::Waveform;

/// One unison layer: oscillator shape, detune, and stereo placement
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UnisonLayer {
    pub waveform: Waveform,
    /// Frequency multiplier (1.0 = in tune)
    pub detune_ratio: f32,
    /// Equal-power pan position in [0, 1]
    pub pan: f32,
}

/// Modulated low-pass filter settings
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FilterSpec {
    /// Resonance
    pub q: f32,
    /// Cutoff modulation envelope
    pub envelope: AdsrParams,
}

/// Everything needed to construct a voice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceDefinition {
    pub layers: Vec<UnisonLayer>,
    pub amp_envelope: AdsrParams,
    pub filter: Option<FilterSpec>,
}

/// One cell of the mapping table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingEntry {
    /// Inclusive note range
    pub note_range: (u8, u8),
    /// Inclusive velocity range
    pub velocity_range: (u8, u8),
    pub definition: Arc<VoiceDefinition>,
}

/// A playable instrument: named mapping table over voice definitions
#[derive(Debug, Clone)]
pub struct Instrument {
    name: String,
    entries: Vec<MappingEntry>,
}

impl Instrument {
    pub fn new(name: impl Into<String>, entries: Vec<MappingEntry>) -> Self {
        Self { name: name.into(), entries }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolve (note, velocity) through the mapping table; first match wins
    pub fn resolve(&self, note: u8, velocity: u8) -> Option<Arc<VoiceDefinition>> {
        self.entries
            .iter()
            .find(|e| {
                (e.note_range.0..=e.note_range.1).contains(&note)
                    && (e.velocity_range.0..=e.velocity_range.1).contains(&velocity)
            })
            .map(|e| e.definition.clone())
    }

    /// A full-range two-layer detuned saw patch with a filter envelope
    pub fn default_instrument() -> Self {
        let definition = Arc::new(VoiceDefinition {
            layers: vec![
                UnisonLayer { waveform: Waveform::Sawtooth, detune_ratio: 0.997, pan: 0.3 },
                UnisonLayer { waveform: Waveform::Sawtooth, detune_ratio: 1.003, pan: 0.7 },
            ],
            amp_envelope: AdsrParams::default(),
            filter: Some(FilterSpec {
                q: 0.9,
                envelope: AdsrParams { attack: 0.01, decay: 0.3, sustain: 0.4, release: 0.2 },
            }),
        });
        Self::new(
            "Default",
            vec![MappingEntry {
                note_range: (0, 127),
                velocity_range: (0, 127),
                definition,
            }],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_covers_full_range() {
        let inst = Instrument::default_instrument();
        assert!(inst.resolve(0, 1).is_some());
        assert!(inst.resolve(127, 127).is_some());
    }

    #[test]
    fn test_velocity_split() {
        let soft = Arc::new(VoiceDefinition {
            layers: vec![UnisonLayer { waveform: Waveform::Sine, detune_ratio: 1.0, pan: 0.5 }],
            amp_envelope: AdsrParams::default(),
            filter: None,
        });
        let hard = Arc::new(VoiceDefinition {
            layers: vec![UnisonLayer { waveform: Waveform::Sawtooth, detune_ratio: 1.0, pan: 0.5 }],
            amp_envelope: AdsrParams::default(),
            filter: None,
        });
        let inst = Instrument::new(
            "Split",
            vec![
                MappingEntry { note_range: (0, 127), velocity_range: (0, 63), definition: soft },
                MappingEntry { note_range: (0, 127), velocity_range: (64, 127), definition: hard },
            ],
        );

        assert_eq!(inst.resolve(60, 40).unwrap().layers[0].waveform, Waveform::Sine);
        assert_eq!(inst.resolve(60, 100).unwrap().layers[0].waveform, Waveform::Sawtooth);
        // Out-of-table lookups miss
        let narrow = Instrument::new(
            "Narrow",
            vec![MappingEntry {
                note_range: (60, 72),
                velocity_range: (1, 127),
                definition: Arc::new(VoiceDefinition {
                    layers: vec![],
                    amp_envelope: AdsrParams::default(),
                    filter: None,
                }),
            }],
        );
        assert!(narrow.resolve(59, 100).is_none());
    }
}
