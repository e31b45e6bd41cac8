//! Voice-activity detection
//!
//! An RMS energy gate with attack and hangover counters: speech starts after
//! `attack_blocks` consecutive loud blocks and ends only after
//! `hangover_blocks` consecutive quiet ones, so short pauses between words
//! do not retrigger.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::effects::Analyzer;
use crate::events::EventDispatcher;
use crate::types::{rms, AtomicF32, Sample};

/// Speech-state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    SpeechStarted,
    SpeechEnded,
}

struct VadState {
    loud_streak: u32,
    quiet_streak: u32,
}

/// Energy-gate voice-activity analyzer
pub struct VoiceActivityAnalyzer {
    /// RMS threshold separating speech from background
    threshold: AtomicF32,
    attack_blocks: u32,
    hangover_blocks: u32,
    active: AtomicBool,
    state: Mutex<VadState>,
    events: EventDispatcher<VadEvent>,
}

impl VoiceActivityAnalyzer {
    pub fn new(threshold: f32, attack_blocks: u32, hangover_blocks: u32) -> Self {
        Self {
            threshold: AtomicF32::new(threshold),
            attack_blocks: attack_blocks.max(1),
            hangover_blocks: hangover_blocks.max(1),
            active: AtomicBool::new(false),
            state: Mutex::new(VadState { loud_streak: 0, quiet_streak: 0 }),
            events: EventDispatcher::new(),
        }
    }

    pub fn set_threshold(&self, threshold: f32) {
        self.threshold.store(threshold);
    }

    /// Whether speech is currently detected
    pub fn is_speech_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    /// Speech start/end events
    pub fn events(&self) -> &EventDispatcher<VadEvent> {
        &self.events
    }
}

impl Analyzer for VoiceActivityAnalyzer {
    fn name(&self) -> &str {
        "Voice Activity"
    }

    fn observe(&self, buffer: &[Sample], _channels: usize, _sample_rate: u32) {
        let loud = rms(buffer) >= self.threshold.load();
        let mut state = self.state.lock();

        if loud {
            state.loud_streak += 1;
            state.quiet_streak = 0;
            if !self.active.load(Ordering::Relaxed) && state.loud_streak >= self.attack_blocks {
                self.active.store(true, Ordering::Relaxed);
                self.events.emit(&VadEvent::SpeechStarted);
            }
        } else {
            state.quiet_streak += 1;
            state.loud_streak = 0;
            if self.active.load(Ordering::Relaxed) && state.quiet_streak >= self.hangover_blocks {
                self.active.store(false, Ordering::Relaxed);
                self.events.emit(&VadEvent::SpeechEnded);
            }
        }
    }
}
