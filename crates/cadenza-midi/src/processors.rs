//! Route processors
//!
//! A processor receives one message and produces zero or more messages into
//! the route's scratch list; the route feeds each stage's output into the
//! next. Parameters are atomics so the control thread can retune a processor
//! while a hardware callback is mid-delivery.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::message::{MidiCommand, MidiMessage};

/// A stage in a route's processor chain
///
/// `process` maps one message to 0..N messages. `tick` is called by the
/// router's clock pump for processors that emit on their own schedule
/// (the arpeggiator); most stages leave it empty.
pub trait MidiProcessor: Send + Sync {
    /// Display name
    fn name(&self) -> &str;

    /// Whether this stage is active; disabled stages pass messages through
    fn is_enabled(&self) -> bool;

    /// Enable or disable this stage
    fn set_enabled(&self, enabled: bool);

    /// Transform one message into zero or more output messages
    fn process(&self, message: &MidiMessage, out: &mut Vec<MidiMessage>);

    /// Clock pump hook; `now` is in microseconds on the router's clock
    fn tick(&self, _now: u64, _out: &mut Vec<MidiMessage>) {}
}

// ─────────────────────────────────────────────────────────────────────────────
// Transpose
// ─────────────────────────────────────────────────────────────────────────────

/// Shifts note messages by a fixed number of semitones, clamped to 0..127
pub struct Transpose {
    semitones: AtomicI32,
    enabled: AtomicBool,
}

impl Transpose {
    pub fn new(semitones: i32) -> Self {
        Self {
            semitones: AtomicI32::new(semitones),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn set_semitones(&self, semitones: i32) {
        self.semitones.store(semitones, Ordering::Relaxed);
    }

    pub fn semitones(&self) -> i32 {
        self.semitones.load(Ordering::Relaxed)
    }
}

impl MidiProcessor for Transpose {
    fn name(&self) -> &str {
        "Transpose"
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    fn process(&self, message: &MidiMessage, out: &mut Vec<MidiMessage>) {
        if message.is_note() {
            let note = (message.note() as i32 + self.semitones.load(Ordering::Relaxed))
                .clamp(0, 127) as u8;
            out.push(message.with_note(note));
        } else {
            out.push(*message);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Channel filter
// ─────────────────────────────────────────────────────────────────────────────

/// Drops channel messages whose channel does not match
pub struct ChannelFilter {
    /// Channel to keep (1-16)
    channel: AtomicU32,
    enabled: AtomicBool,
}

impl ChannelFilter {
    pub fn new(channel: u8) -> Self {
        Self {
            channel: AtomicU32::new(channel.clamp(1, 16) as u32),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn set_channel(&self, channel: u8) {
        self.channel
            .store(channel.clamp(1, 16) as u32, Ordering::Relaxed);
    }
}

impl MidiProcessor for ChannelFilter {
    fn name(&self) -> &str {
        "Channel Filter"
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    fn process(&self, message: &MidiMessage, out: &mut Vec<MidiMessage>) {
        if message.command() == MidiCommand::System
            || message.channel() as u32 == self.channel.load(Ordering::Relaxed)
        {
            out.push(*message);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Velocity scale
// ─────────────────────────────────────────────────────────────────────────────

/// Scales Note On velocity by a factor; result clamps to 1..127 so a scaled
/// note can never degenerate into a Note Off
pub struct VelocityScale {
    /// Scale factor bits (f32 over AtomicU32)
    scale_bits: AtomicU32,
    enabled: AtomicBool,
}

impl VelocityScale {
    pub fn new(scale: f32) -> Self {
        Self {
            scale_bits: AtomicU32::new(scale.max(0.0).to_bits()),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn set_scale(&self, scale: f32) {
        self.scale_bits.store(scale.max(0.0).to_bits(), Ordering::Relaxed);
    }

    pub fn scale(&self) -> f32 {
        f32::from_bits(self.scale_bits.load(Ordering::Relaxed))
    }
}

impl MidiProcessor for VelocityScale {
    fn name(&self) -> &str {
        "Velocity Scale"
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    fn process(&self, message: &MidiMessage, out: &mut Vec<MidiMessage>) {
        if message.command() == MidiCommand::NoteOn {
            let scaled = (message.velocity() as f32 * self.scale()).round() as i32;
            out.push(message.with_velocity(scaled.clamp(1, 127) as u8));
        } else {
            out.push(*message);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Arpeggiator
// ─────────────────────────────────────────────────────────────────────────────

/// Arpeggio traversal pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpPattern {
    Up,
    Down,
    UpDown,
    Random,
}

#[derive(Default)]
struct ArpState {
    /// Held notes in ascending order
    held: Vec<u8>,
    /// Channel and velocity of the most recent Note On
    channel: u8,
    velocity: u8,
    /// Next step due time (microseconds)
    next_due: u64,
    /// Step index into the pattern traversal
    step: usize,
    /// Note currently sounding (to Note Off before the next step)
    sounding: Option<u8>,
}

/// Swallows held notes and replays them on a tempo clock
///
/// Note On/Off messages are consumed into the held-note list; the router's
/// `pump()` drives `tick`, which steps through the pattern at the configured
/// rate. All other messages pass through untouched.
pub struct Arpeggiator {
    pattern: Mutex<ArpPattern>,
    /// Step interval in microseconds
    interval_us: AtomicU64,
    state: Mutex<ArpState>,
    enabled: AtomicBool,
}

impl Arpeggiator {
    /// Create an arpeggiator stepping at `rate` notes per beat at `bpm`
    pub fn new(bpm: f64, rate: f64, pattern: ArpPattern) -> Self {
        let arp = Self {
            pattern: Mutex::new(pattern),
            interval_us: AtomicU64::new(60_000_000),
            state: Mutex::new(ArpState::default()),
            enabled: AtomicBool::new(true),
        };
        arp.set_tempo(bpm, rate);
        arp
    }

    /// Retune the step clock; `rate` is steps per beat
    pub fn set_tempo(&self, bpm: f64, rate: f64) {
        let bpm = bpm.clamp(20.0, 400.0);
        let rate = rate.clamp(0.25, 16.0);
        let interval = (60_000_000.0 / (bpm * rate)) as u64;
        self.interval_us.store(interval.max(1), Ordering::Relaxed);
    }

    pub fn set_pattern(&self, pattern: ArpPattern) {
        *self.pattern.lock() = pattern;
    }

    fn pick_note(&self, state: &mut ArpState) -> Option<u8> {
        if state.held.is_empty() {
            return None;
        }
        let len = state.held.len();
        let pattern = *self.pattern.lock();
        let index = match pattern {
            ArpPattern::Up => state.step % len,
            ArpPattern::Down => len - 1 - (state.step % len),
            ArpPattern::UpDown => {
                if len == 1 {
                    0
                } else {
                    // Bounce without repeating the endpoints
                    let period = 2 * (len - 1);
                    let pos = state.step % period;
                    if pos < len { pos } else { period - pos }
                }
            }
            ArpPattern::Random => fastrand::usize(..len),
        };
        state.step = state.step.wrapping_add(1);
        state.held.get(index).copied()
    }
}

impl MidiProcessor for Arpeggiator {
    fn name(&self) -> &str {
        "Arpeggiator"
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        if !enabled {
            let mut state = self.state.lock();
            state.held.clear();
            state.sounding = None;
        }
    }

    fn process(&self, message: &MidiMessage, out: &mut Vec<MidiMessage>) {
        match message.command() {
            MidiCommand::NoteOn => {
                let mut state = self.state.lock();
                if let Err(pos) = state.held.binary_search(&message.note()) {
                    state.held.insert(pos, message.note());
                }
                state.channel = message.channel();
                state.velocity = message.velocity();
            }
            MidiCommand::NoteOff => {
                let mut state = self.state.lock();
                if let Ok(pos) = state.held.binary_search(&message.note()) {
                    state.held.remove(pos);
                }
            }
            _ => out.push(*message),
        }
    }

    fn tick(&self, now: u64, out: &mut Vec<MidiMessage>) {
        let mut state = self.state.lock();
        if now < state.next_due {
            return;
        }
        state.next_due = now + self.interval_us.load(Ordering::Relaxed);

        if let Some(prev) = state.sounding.take() {
            out.push(MidiMessage::note_off(state.channel.max(1), prev).at(now));
        }
        if let Some(note) = self.pick_note(&mut state) {
            let (channel, velocity) = (state.channel.max(1), state.velocity.max(1));
            out.push(MidiMessage::note_on(channel, note, velocity).at(now));
            state.sounding = Some(note);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Harmonizer
// ─────────────────────────────────────────────────────────────────────────────

/// Emits parallel copies of note messages at configured intervals
pub struct Harmonizer {
    /// Intervals in semitones relative to the played note
    intervals: Mutex<Vec<i8>>,
    enabled: AtomicBool,
}

impl Harmonizer {
    pub fn new(intervals: Vec<i8>) -> Self {
        Self {
            intervals: Mutex::new(intervals),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn set_intervals(&self, intervals: Vec<i8>) {
        *self.intervals.lock() = intervals;
    }
}

impl MidiProcessor for Harmonizer {
    fn name(&self) -> &str {
        "Harmonizer"
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    fn process(&self, message: &MidiMessage, out: &mut Vec<MidiMessage>) {
        out.push(*message);
        if !message.is_note() {
            return;
        }
        for &interval in self.intervals.lock().iter() {
            let note = message.note() as i32 + interval as i32;
            if (0..=127).contains(&note) {
                out.push(message.with_note(note as u8));
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Randomizer
// ─────────────────────────────────────────────────────────────────────────────

/// Applies bounded timing and velocity jitter to note messages
pub struct Randomizer {
    /// Maximum velocity deviation (steps, ±)
    velocity_range: AtomicU32,
    /// Maximum timestamp deviation (microseconds, ±)
    time_range_us: AtomicU64,
    enabled: AtomicBool,
}

impl Randomizer {
    pub fn new(velocity_range: u8, time_range_us: u64) -> Self {
        Self {
            velocity_range: AtomicU32::new(velocity_range as u32),
            time_range_us: AtomicU64::new(time_range_us),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn set_velocity_range(&self, range: u8) {
        self.velocity_range.store(range as u32, Ordering::Relaxed);
    }

    pub fn set_time_range_us(&self, range: u64) {
        self.time_range_us.store(range, Ordering::Relaxed);
    }
}

impl MidiProcessor for Randomizer {
    fn name(&self) -> &str {
        "Randomizer"
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    fn process(&self, message: &MidiMessage, out: &mut Vec<MidiMessage>) {
        let mut message = *message;

        let time_range = self.time_range_us.load(Ordering::Relaxed);
        if time_range > 0 {
            let jitter = fastrand::i64(-(time_range as i64)..=time_range as i64);
            message.timestamp = message.timestamp.saturating_add_signed(jitter);
        }

        let vel_range = self.velocity_range.load(Ordering::Relaxed) as i32;
        if vel_range > 0 && message.command() == MidiCommand::NoteOn {
            let jitter = fastrand::i32(-vel_range..=vel_range);
            let velocity = (message.velocity() as i32 + jitter).clamp(1, 127);
            message = message.with_velocity(velocity as u8);
        }

        out.push(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transpose_clamps() {
        let t = Transpose::new(12);
        let mut out = Vec::new();
        t.process(&MidiMessage::note_on(1, 60, 100), &mut out);
        assert_eq!(out[0].note(), 72);

        out.clear();
        t.set_semitones(30);
        t.process(&MidiMessage::note_on(1, 120, 100), &mut out);
        assert_eq!(out[0].note(), 127);
    }

    #[test]
    fn test_transpose_passes_non_notes() {
        let t = Transpose::new(12);
        let mut out = Vec::new();
        t.process(&MidiMessage::control_change(1, 7, 100), &mut out);
        assert_eq!(out[0].controller(), 7);
        assert_eq!(out[0].value(), 100);
    }

    #[test]
    fn test_channel_filter() {
        let f = ChannelFilter::new(2);
        let mut out = Vec::new();
        f.process(&MidiMessage::note_on(1, 60, 100), &mut out);
        assert!(out.is_empty());
        f.process(&MidiMessage::note_on(2, 60, 100), &mut out);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_velocity_scale_never_zero() {
        let v = VelocityScale::new(0.001);
        let mut out = Vec::new();
        v.process(&MidiMessage::note_on(1, 60, 100), &mut out);
        assert_eq!(out[0].velocity(), 1);
    }

    #[test]
    fn test_harmonizer_intervals() {
        let h = Harmonizer::new(vec![4, 7]);
        let mut out = Vec::new();
        h.process(&MidiMessage::note_on(1, 60, 100), &mut out);
        let notes: Vec<u8> = out.iter().map(|m| m.note()).collect();
        assert_eq!(notes, vec![60, 64, 67]);
    }

    #[test]
    fn test_harmonizer_drops_out_of_range() {
        let h = Harmonizer::new(vec![12]);
        let mut out = Vec::new();
        h.process(&MidiMessage::note_on(1, 120, 100), &mut out);
        assert_eq!(out.len(), 1); // 132 is out of range
    }

    #[test]
    fn test_arpeggiator_steps() {
        let arp = Arpeggiator::new(120.0, 4.0, ArpPattern::Up);
        let mut out = Vec::new();
        arp.process(&MidiMessage::note_on(1, 60, 100), &mut out);
        arp.process(&MidiMessage::note_on(1, 64, 100), &mut out);
        assert!(out.is_empty()); // notes swallowed

        arp.tick(0, &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].note(), 60);

        out.clear();
        arp.tick(1_000_000, &mut out);
        // Note off for 60, note on for 64
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].command(), MidiCommand::NoteOff);
        assert_eq!(out[1].note(), 64);
    }

    #[test]
    fn test_arpeggiator_not_due() {
        let arp = Arpeggiator::new(120.0, 4.0, ArpPattern::Up);
        let mut out = Vec::new();
        arp.process(&MidiMessage::note_on(1, 60, 100), &mut out);
        arp.tick(0, &mut out);
        out.clear();
        arp.tick(1, &mut out); // interval at 120 BPM / 4 steps is 125ms
        assert!(out.is_empty());
    }

    #[test]
    fn test_randomizer_bounds() {
        let r = Randomizer::new(10, 0);
        for _ in 0..100 {
            let mut out = Vec::new();
            r.process(&MidiMessage::note_on(1, 60, 100), &mut out);
            let v = out[0].velocity();
            assert!((90..=110).contains(&v), "velocity {} out of bounds", v);
        }
    }
}
