//! Composition tracks
//!
//! An audio track owns an ordered segment list (re-sorted on insert so
//! timeline starts stay monotonic), mute/solo, volume/pan, and a modifier
//! chain. A MIDI track owns MIDI segments, a processor chain, and a
//! destination; window renders deliver events in non-decreasing tick order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use cadenza_midi::{MidiDestination, MidiProcessor};

use crate::composition::segment::{AudioSegment, MidiSegment};
use crate::composition::tempo::TempoMap;
use crate::composition::CompositionShared;
use crate::effects::ModifierChain;
use crate::graph::{apply_volume_pan, ScratchBuffer};
use crate::types::{AtomicF32, Sample};

/// An audio track: ordered segments summed into the composition
pub struct AudioTrack {
    name: String,
    segments: Mutex<Vec<Arc<AudioSegment>>>,
    muted: AtomicBool,
    soloed: AtomicBool,
    volume: AtomicF32,
    pan: AtomicF32,
    modifiers: ModifierChain,
    pub(crate) shared: Mutex<Weak<CompositionShared>>,
}

impl AudioTrack {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            segments: Mutex::new(Vec::new()),
            muted: AtomicBool::new(false),
            soloed: AtomicBool::new(false),
            volume: AtomicF32::new(1.0),
            pan: AtomicF32::new(0.5),
            modifiers: ModifierChain::new(),
            shared: Mutex::new(Weak::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert a segment; the list is re-sorted by timeline start
    pub fn add_segment(&self, segment: Arc<AudioSegment>) {
        *segment.shared.lock() = self.shared.lock().clone();
        let mut segments = self.segments.lock();
        segments.push(segment);
        segments.sort_by(|a, b| a.timeline_start().total_cmp(&b.timeline_start()));
        drop(segments);
        self.mark_dirty();
    }

    /// Remove a segment by identity; severs its back-reference
    pub fn remove_segment(&self, segment: &Arc<AudioSegment>) {
        let mut segments = self.segments.lock();
        if let Some(pos) = segments.iter().position(|s| Arc::ptr_eq(s, segment)) {
            let removed = segments.remove(pos);
            *removed.shared.lock() = Weak::new();
        }
        drop(segments);
        self.mark_dirty();
    }

    /// Re-sort after segments were moved on the timeline
    pub fn resort_segments(&self) {
        self.segments
            .lock()
            .sort_by(|a, b| a.timeline_start().total_cmp(&b.timeline_start()));
    }

    pub fn segment_count(&self) -> usize {
        self.segments.lock().len()
    }

    pub fn segments(&self) -> Vec<Arc<AudioSegment>> {
        self.segments.lock().clone()
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    pub fn is_soloed(&self) -> bool {
        self.soloed.load(Ordering::Relaxed)
    }

    pub fn set_soloed(&self, soloed: bool) {
        self.soloed.store(soloed, Ordering::Relaxed);
    }

    pub fn volume(&self) -> f32 {
        self.volume.load()
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume.store(volume.max(0.0));
        self.mark_dirty();
    }

    pub fn set_pan(&self, pan: f32) {
        self.pan.store(pan.clamp(0.0, 1.0));
        self.mark_dirty();
    }

    pub fn modifiers(&self) -> &ModifierChain {
        &self.modifiers
    }

    /// Latest segment end on this track, in seconds
    pub fn duration(&self) -> f64 {
        self.segments
            .lock()
            .iter()
            .map(|s| s.timeline_end())
            .fold(0.0, f64::max)
    }

    fn mark_dirty(&self) {
        if let Some(shared) = self.shared.lock().upgrade() {
            shared.dirty.store(true, Ordering::Release);
        }
    }

    /// Render the track's contribution to the window starting at `t0` and
    /// accumulate into `out`. `any_soloed` mutes non-soloed tracks.
    pub fn render_window(
        &self,
        t0: f64,
        out: &mut [Sample],
        channels: usize,
        sample_rate: u32,
        any_soloed: bool,
    ) {
        if self.is_muted() || (any_soloed && !self.is_soloed()) {
            return;
        }

        let t1 = t0 + (out.len() / channels) as f64 / sample_rate as f64;
        let mut scratch = ScratchBuffer::rent(out.len());

        let segments = self.segments.lock();
        for segment in segments.iter() {
            // Sorted by start: nothing past the window end can overlap
            if segment.timeline_start() >= t1 {
                break;
            }
            if segment.timeline_end() <= t0 {
                continue;
            }
            segment.render_window(t0, &mut scratch, channels, sample_rate);
        }
        drop(segments);

        self.modifiers.process(&mut scratch, channels, sample_rate);
        apply_volume_pan(&mut scratch, channels, self.volume.load(), self.pan.load());
        crate::types::mix_into(out, &scratch);
    }
}

/// A MIDI track: segments scheduled against the tempo map into a destination
pub struct MidiTrack {
    name: String,
    segments: Mutex<Vec<Arc<MidiSegment>>>,
    processors: Mutex<Vec<Arc<dyn MidiProcessor>>>,
    destination: Mutex<Option<Arc<dyn MidiDestination>>>,
    muted: AtomicBool,
    pub(crate) shared: Mutex<Weak<CompositionShared>>,
}

impl MidiTrack {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            segments: Mutex::new(Vec::new()),
            processors: Mutex::new(Vec::new()),
            destination: Mutex::new(None),
            muted: AtomicBool::new(false),
            shared: Mutex::new(Weak::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_destination(&self, destination: Arc<dyn MidiDestination>) {
        *self.destination.lock() = Some(destination);
    }

    pub fn add_processor(&self, processor: Arc<dyn MidiProcessor>) {
        self.processors.lock().push(processor);
    }

    /// Insert a segment; the list is re-sorted by timeline start
    pub fn add_segment(&self, segment: Arc<MidiSegment>) {
        *segment.shared.lock() = self.shared.lock().clone();
        let mut segments = self.segments.lock();
        segments.push(segment);
        segments.sort_by(|a, b| a.timeline_start().total_cmp(&b.timeline_start()));
        drop(segments);
        if let Some(shared) = self.shared.lock().upgrade() {
            shared.dirty.store(true, Ordering::Release);
        }
    }

    pub fn segment_count(&self) -> usize {
        self.segments.lock().len()
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    /// Latest segment end on this track, in seconds
    pub fn duration(&self) -> f64 {
        self.segments
            .lock()
            .iter()
            .map(|s| s.timeline_end())
            .fold(0.0, f64::max)
    }

    /// Schedule the window `[t0, t1)` into the destination
    ///
    /// Segment-relative seconds convert to ticks through the tempo map;
    /// events are delivered in non-decreasing tick order with timeline
    /// timestamps in microseconds.
    pub fn render_window(&self, t0: f64, t1: f64, tempo: &TempoMap) {
        if self.is_muted() {
            return;
        }
        let destination = self.destination.lock().clone();
        let Some(destination) = destination else {
            return;
        };

        let mut scheduled = Vec::new();
        let segments = self.segments.lock();
        for segment in segments.iter() {
            if segment.timeline_start() >= t1 {
                break;
            }
            if segment.timeline_end() <= t0 {
                continue;
            }

            let seg_start = segment.timeline_start();
            let rel0 = (t0 - seg_start).max(0.0);
            let rel1 = (t1 - seg_start).min(segment.duration());
            let tick0 = tempo.seconds_to_ticks(rel0).round() as u64;
            let tick1 = tempo.seconds_to_ticks(rel1).round() as u64;
            if tick0 >= tick1 {
                continue;
            }

            for (tick, message) in segment.source().events_in_tick_range(tick0, tick1) {
                let seconds = seg_start + tempo.ticks_to_seconds(tick as f64);
                scheduled.push((tick, message.at((seconds * 1e6) as u64)));
            }
        }
        drop(segments);

        // Strictly non-decreasing tick order across segments
        scheduled.sort_by_key(|(tick, _)| *tick);

        let processors = self.processors.lock().clone();
        let mut current = Vec::new();
        let mut next = Vec::new();
        for (_, message) in &scheduled {
            current.clear();
            current.push(*message);
            for processor in &processors {
                if !processor.is_enabled() {
                    continue;
                }
                next.clear();
                for msg in &current {
                    processor.process(msg, &mut next);
                }
                std::mem::swap(&mut current, &mut next);
            }
            for msg in &current {
                if let Err(e) = destination.receive(msg) {
                    log::warn!("MIDI track '{}': destination failed: {}", self.name, e);
                    return;
                }
            }
        }
    }
}
