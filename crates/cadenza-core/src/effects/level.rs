//! Level analyzer

use crate::effects::Analyzer;
use crate::events::EventDispatcher;
use crate::types::{peak, rms, AtomicF32, Sample};

/// One block's level measurement
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelReading {
    pub rms: f32,
    pub peak: f32,
}

/// Publishes RMS and peak per observed block
///
/// The latest reading is always available lock-free via `reading()`; each
/// block also emits a `LevelReading` event.
pub struct LevelAnalyzer {
    rms: AtomicF32,
    peak: AtomicF32,
    events: EventDispatcher<LevelReading>,
}

impl LevelAnalyzer {
    pub fn new() -> Self {
        Self {
            rms: AtomicF32::new(0.0),
            peak: AtomicF32::new(0.0),
            events: EventDispatcher::new(),
        }
    }

    /// Latest measurement
    pub fn reading(&self) -> LevelReading {
        LevelReading { rms: self.rms.load(), peak: self.peak.load() }
    }

    /// Per-block reading events
    pub fn events(&self) -> &EventDispatcher<LevelReading> {
        &self.events
    }
}

impl Default for LevelAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl Analyzer for LevelAnalyzer {
    fn name(&self) -> &str {
        "Level"
    }

    fn observe(&self, buffer: &[Sample], _channels: usize, _sample_rate: u32) {
        let reading = LevelReading { rms: rms(buffer), peak: peak(buffer) };
        self.rms.store(reading.rms);
        self.peak.store(reading.peak);
        self.events.emit(&reading);
    }
}
