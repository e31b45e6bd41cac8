//! Polyphonic synthesizer
//!
//! Sixteen channels, each with its own voice pool, channel-wide pitch bend,
//! and sustain latch. The synthesizer renders into the pull graph as a
//! component and consumes MIDI as a route destination. MPE mode maps each
//! sounding note to its channel and routes that channel's bend, pressure,
//! and timbre messages to the note's voice.

mod envelope;
mod instrument;
mod oscillator;
mod voice;

pub use envelope::{AdsrEnvelope, AdsrParams};
pub use instrument::{FilterSpec, Instrument, MappingEntry, UnisonLayer, VoiceDefinition};
pub use oscillator::{Oscillator, Waveform};
pub use voice::{note_frequency, Voice};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use cadenza_midi::{MidiCommand, MidiDestination, MidiMessage, MidiResult, CC_ALL_NOTES_OFF, CC_SUSTAIN, CC_TIMBRE};

use crate::channels::ChannelMatrix;
use crate::graph::{Component, ComponentState};
use crate::types::Sample;

/// Voice pool size per channel
const VOICES_PER_CHANNEL: usize = 32;

/// Channel pitch-bend range in semitones (full deflection)
const CHANNEL_BEND_RANGE: f32 = 2.0;

/// MPE per-note pitch-bend range in semitones (full deflection)
const MPE_BEND_RANGE: f32 = 48.0;

struct SynthChannel {
    voices: Vec<Voice>,
    bend_semitones: f32,
    sustain: bool,
}

impl SynthChannel {
    fn new() -> Self {
        Self {
            voices: Vec::with_capacity(VOICES_PER_CHANNEL),
            bend_semitones: 0.0,
            sustain: false,
        }
    }

    fn release_all(&mut self) {
        for voice in &mut self.voices {
            voice.release();
        }
        self.sustain = false;
    }
}

struct SynthInner {
    channels: Vec<SynthChannel>,
    /// MPE: sounding note → channel index
    mpe_notes: HashMap<u8, usize>,
    next_age: u64,
    /// Stereo mix bed
    mix_buf: Vec<Sample>,
    matrix: Option<ChannelMatrix>,
}

impl SynthInner {
    /// MPE: the voice addressed by expression on `channel_index` — the
    /// newest voice sounding the note currently mapped to that channel.
    /// A releasing predecessor on the same channel is never touched.
    fn mpe_voice_mut(&mut self, channel_index: usize) -> Option<&mut Voice> {
        let note = self
            .mpe_notes
            .iter()
            .find_map(|(&note, &ch)| (ch == channel_index).then_some(note))?;
        self.channels[channel_index]
            .voices
            .iter_mut()
            .filter(|v| v.note() == note)
            .max_by_key(|v| v.age())
    }
}

/// The MIDI-driven synthesizer node
pub struct Synthesizer {
    state: ComponentState,
    instrument: Mutex<Arc<Instrument>>,
    mpe: AtomicBool,
    inner: Mutex<SynthInner>,
}

impl Synthesizer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            state: ComponentState::new(name),
            instrument: Mutex::new(Arc::new(Instrument::default_instrument())),
            mpe: AtomicBool::new(false),
            inner: Mutex::new(SynthInner {
                channels: (0..16).map(|_| SynthChannel::new()).collect(),
                mpe_notes: HashMap::new(),
                next_age: 0,
                mix_buf: Vec::new(),
                matrix: None,
            }),
        }
    }

    /// Replace the instrument bank reference
    pub fn set_instrument(&self, instrument: Arc<Instrument>) {
        *self.instrument.lock() = instrument;
    }

    pub fn instrument(&self) -> Arc<Instrument> {
        self.instrument.lock().clone()
    }

    /// Enable or disable MPE; switching sends an implicit All-Notes-Off
    pub fn set_mpe_enabled(&self, enabled: bool) {
        if self.mpe.swap(enabled, Ordering::AcqRel) != enabled {
            let mut inner = self.inner.lock();
            for channel in &mut inner.channels {
                channel.release_all();
            }
            inner.mpe_notes.clear();
            log::debug!("Synth: MPE {}", if enabled { "enabled" } else { "disabled" });
        }
    }

    pub fn is_mpe_enabled(&self) -> bool {
        self.mpe.load(Ordering::Acquire)
    }

    /// Number of voices currently alive (including releasing)
    pub fn active_voices(&self) -> usize {
        self.inner.lock().channels.iter().map(|c| c.voices.len()).sum()
    }

    /// Feed one MIDI message into the synthesizer
    pub fn process_midi_message(&self, message: &MidiMessage) {
        let mpe = self.is_mpe_enabled();
        let mut inner = self.inner.lock();
        let channel_index = (message.channel() - 1) as usize;

        match message.command() {
            MidiCommand::NoteOn => {
                let definition = self
                    .instrument
                    .lock()
                    .resolve(message.note(), message.velocity());
                let Some(definition) = definition else {
                    return;
                };

                let age = inner.next_age;
                inner.next_age += 1;
                let channel = &mut inner.channels[channel_index];

                if channel.voices.len() >= VOICES_PER_CHANNEL {
                    // Steal the oldest releasing voice, or the oldest overall
                    let steal = channel
                        .voices
                        .iter()
                        .enumerate()
                        .filter(|(_, v)| v.is_releasing())
                        .min_by_key(|(_, v)| v.age())
                        .or_else(|| {
                            channel.voices.iter().enumerate().min_by_key(|(_, v)| v.age())
                        })
                        .map(|(i, _)| i);
                    if let Some(index) = steal {
                        channel.voices.swap_remove(index);
                    }
                }

                channel.voices.push(Voice::new(
                    &definition,
                    message.note(),
                    message.velocity(),
                    age,
                    48000,
                ));
                if mpe {
                    inner.mpe_notes.insert(message.note(), channel_index);
                }
            }

            MidiCommand::NoteOff => {
                let channel = &mut inner.channels[channel_index];
                let pedal = channel.sustain;
                if let Some(voice) = channel
                    .voices
                    .iter_mut()
                    .filter(|v| v.note() == message.note() && !v.is_releasing() && !v.is_sustained())
                    .min_by_key(|v| v.age())
                {
                    voice.note_off(pedal);
                }
                if mpe {
                    inner.mpe_notes.remove(&message.note());
                }
            }

            MidiCommand::ControlChange => match message.controller() {
                CC_SUSTAIN => {
                    let channel = &mut inner.channels[channel_index];
                    let down = message.value() >= 64;
                    channel.sustain = down;
                    if !down {
                        // Every latched voice releases in the same block
                        for voice in &mut channel.voices {
                            if voice.is_sustained() {
                                voice.release();
                            }
                        }
                    }
                }
                CC_TIMBRE => {
                    let timbre = message.value() as f32 / 127.0;
                    if mpe {
                        if let Some(voice) = inner.mpe_voice_mut(channel_index) {
                            voice.set_timbre(timbre);
                        }
                    } else {
                        for voice in &mut inner.channels[channel_index].voices {
                            voice.set_timbre(timbre);
                        }
                    }
                }
                CC_ALL_NOTES_OFF => {
                    inner.channels[channel_index].release_all();
                }
                _ => {}
            },

            MidiCommand::PitchBend => {
                if mpe {
                    let semitones = message.bend() as f32 * MPE_BEND_RANGE;
                    if let Some(voice) = inner.mpe_voice_mut(channel_index) {
                        voice.set_note_bend(semitones);
                    }
                } else {
                    inner.channels[channel_index].bend_semitones =
                        message.bend() as f32 * CHANNEL_BEND_RANGE;
                }
            }

            MidiCommand::ChannelPressure => {
                let pressure = message.note() as f32 / 127.0; // data1 for channel pressure
                if mpe {
                    if let Some(voice) = inner.mpe_voice_mut(channel_index) {
                        voice.set_pressure(pressure);
                    }
                } else {
                    for voice in &mut inner.channels[channel_index].voices {
                        voice.set_pressure(pressure);
                    }
                }
            }

            _ => {}
        }
    }
}

impl Component for Synthesizer {
    fn state(&self) -> &ComponentState {
        &self.state
    }

    fn render(&self, buffer: &mut [Sample], channels: usize, sample_rate: u32) {
        buffer.fill(0.0);
        let frames = buffer.len() / channels;
        let mut inner = self.inner.lock();

        inner.mix_buf.resize(frames * 2, 0.0);
        inner.mix_buf.fill(0.0);

        let SynthInner { channels: synth_channels, mix_buf, .. } = &mut *inner;
        for channel in synth_channels.iter_mut() {
            let bend = channel.bend_semitones;
            for voice in &mut channel.voices {
                voice.render(mix_buf, bend, sample_rate);
            }
            // Reap voices whose amplitude envelope has finished
            channel.voices.retain(|v| !v.is_finished());
        }

        // Fit the stereo bed to the graph's channel count
        let rebuild = match &inner.matrix {
            Some(m) => m.dst_channels() != channels,
            None => true,
        };
        if rebuild {
            inner.matrix = Some(ChannelMatrix::new(2, channels));
        }
        if let Some(matrix) = &inner.matrix {
            matrix.apply(&inner.mix_buf, buffer);
        }
    }
}

impl MidiDestination for Synthesizer {
    fn name(&self) -> &str {
        self.state.name()
    }

    fn receive(&self, message: &MidiMessage) -> MidiResult<()> {
        self.process_midi_message(message);
        Ok(())
    }
}
