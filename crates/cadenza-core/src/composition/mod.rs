//! Compositions
//!
//! A composition is the multi-track timeline: ordered audio tracks, MIDI
//! tracks, and the tempo map. `render` produces the mixed buffer for any
//! requested window; `CompositionPlayer` drives a composition from a moving
//! cursor so timelines play through the device graph.

mod segment;
mod tempo;
mod track;

pub use segment::{
    fade_gain, AudioSegment, FadeCurve, MidiEventList, MidiEventSource, MidiSegment,
    SegmentSettings,
};
pub use tempo::{
    TempoMap, TempoMarker, TimeSignatureMarker, DEFAULT_MICROS_PER_QUARTER,
    DEFAULT_TICKS_PER_QUARTER,
};
pub use track::{AudioTrack, MidiTrack};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::graph::{Component, ComponentState};
use crate::types::{AtomicF64, Sample};

/// State shared with tracks and segments through back-references
pub struct CompositionShared {
    pub(crate) dirty: AtomicBool,
}

/// The multi-track timeline
pub struct Composition {
    shared: Arc<CompositionShared>,
    audio_tracks: Vec<Arc<AudioTrack>>,
    midi_tracks: Vec<Arc<MidiTrack>>,
    tempo: TempoMap,
    sample_rate: u32,
}

impl Composition {
    pub fn new(sample_rate: u32, ticks_per_quarter: u32) -> Self {
        Self {
            shared: Arc::new(CompositionShared { dirty: AtomicBool::new(false) }),
            audio_tracks: Vec::new(),
            midi_tracks: Vec::new(),
            tempo: TempoMap::new(ticks_per_quarter),
            sample_rate,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn tempo(&self) -> &TempoMap {
        &self.tempo
    }

    /// Mutable tempo access; marks the project dirty
    pub fn tempo_mut(&mut self) -> &mut TempoMap {
        self.mark_dirty();
        &mut self.tempo
    }

    /// Append a new audio track
    pub fn add_track(&mut self, name: impl Into<String>) -> Arc<AudioTrack> {
        let track = Arc::new(AudioTrack::new(name));
        *track.shared.lock() = Arc::downgrade(&self.shared);
        self.audio_tracks.push(track.clone());
        self.mark_dirty();
        track
    }

    /// Append a new MIDI track
    pub fn add_midi_track(&mut self, name: impl Into<String>) -> Arc<MidiTrack> {
        let track = Arc::new(MidiTrack::new(name));
        *track.shared.lock() = Arc::downgrade(&self.shared);
        self.midi_tracks.push(track.clone());
        self.mark_dirty();
        track
    }

    /// Remove an audio track by identity; severs its back-reference
    pub fn remove_track(&mut self, track: &Arc<AudioTrack>) {
        if let Some(pos) = self.audio_tracks.iter().position(|t| Arc::ptr_eq(t, track)) {
            let removed = self.audio_tracks.remove(pos);
            *removed.shared.lock() = std::sync::Weak::new();
            self.mark_dirty();
        }
    }

    /// Remove a MIDI track by identity
    pub fn remove_midi_track(&mut self, track: &Arc<MidiTrack>) {
        if let Some(pos) = self.midi_tracks.iter().position(|t| Arc::ptr_eq(t, track)) {
            let removed = self.midi_tracks.remove(pos);
            *removed.shared.lock() = std::sync::Weak::new();
            self.mark_dirty();
        }
    }

    pub fn audio_tracks(&self) -> &[Arc<AudioTrack>] {
        &self.audio_tracks
    }

    pub fn midi_tracks(&self) -> &[Arc<MidiTrack>] {
        &self.midi_tracks
    }

    /// Whether unsaved edits exist
    pub fn is_dirty(&self) -> bool {
        self.shared.dirty.load(Ordering::Acquire)
    }

    /// Clear the dirty flag (after a save)
    pub fn clear_dirty(&self) {
        self.shared.dirty.store(false, Ordering::Release);
    }

    fn mark_dirty(&self) {
        self.shared.dirty.store(true, Ordering::Release);
    }

    /// Total timeline length in seconds
    pub fn calculate_duration(&self) -> f64 {
        let audio = self.audio_tracks.iter().map(|t| t.duration()).fold(0.0, f64::max);
        let midi = self.midi_tracks.iter().map(|t| t.duration()).fold(0.0, f64::max);
        audio.max(midi)
    }

    /// Render the window starting at `t0` covering `buffer.len() / channels`
    /// frames: audio tracks sum into the buffer, MIDI tracks schedule into
    /// their destinations
    pub fn render(&self, t0: f64, buffer: &mut [Sample], channels: usize, sample_rate: u32) {
        buffer.fill(0.0);
        let frames = buffer.len() / channels;
        let t1 = t0 + frames as f64 / sample_rate as f64;

        let any_soloed = self.audio_tracks.iter().any(|t| t.is_soloed());
        for track in &self.audio_tracks {
            track.render_window(t0, buffer, channels, sample_rate, any_soloed);
        }
        for track in &self.midi_tracks {
            track.render_window(t0, t1, &self.tempo);
        }
    }
}

/// A graph component that plays a composition from a moving cursor
pub struct CompositionPlayer {
    state: ComponentState,
    composition: Arc<Mutex<Composition>>,
    /// Timeline cursor in seconds
    cursor: AtomicF64,
    playing: AtomicBool,
}

impl CompositionPlayer {
    pub fn new(name: impl Into<String>, composition: Arc<Mutex<Composition>>) -> Self {
        Self {
            state: ComponentState::new(name),
            composition,
            cursor: AtomicF64::new(0.0),
            playing: AtomicBool::new(false),
        }
    }

    pub fn composition(&self) -> &Arc<Mutex<Composition>> {
        &self.composition
    }

    pub fn play(&self) {
        self.playing.store(true, Ordering::Release);
    }

    pub fn pause(&self) {
        self.playing.store(false, Ordering::Release);
    }

    pub fn stop(&self) {
        self.playing.store(false, Ordering::Release);
        self.cursor.store(0.0);
    }

    pub fn seek_to(&self, seconds: f64) {
        self.cursor.store(seconds.max(0.0));
    }

    pub fn position(&self) -> f64 {
        self.cursor.load()
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }
}

impl Component for CompositionPlayer {
    fn state(&self) -> &ComponentState {
        &self.state
    }

    fn render(&self, buffer: &mut [Sample], channels: usize, sample_rate: u32) {
        if !self.is_playing() {
            buffer.fill(0.0);
            return;
        }
        let t0 = self.cursor.load();
        self.composition.lock().render(t0, buffer, channels, sample_rate);
        let frames = buffer.len() / channels;
        self.cursor.store(t0 + frames as f64 / sample_rate as f64);
    }
}
