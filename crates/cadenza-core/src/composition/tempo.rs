//! Tempo and time-signature maps
//!
//! Piecewise-linear tick↔seconds mapping built from sorted tempo markers.
//! Between two markers one tick lasts `μ / (ppq · 1e6)` seconds, where μ is
//! the microseconds-per-quarter at the earlier marker. Lookups are O(log N)
//! over precomputed per-marker second offsets.

use serde::{Deserialize, Serialize};

/// 120 BPM
pub const DEFAULT_MICROS_PER_QUARTER: u32 = 500_000;

/// Ticks per quarter note used when none is specified
pub const DEFAULT_TICKS_PER_QUARTER: u32 = 480;

/// A tempo change at a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempoMarker {
    pub tick: u64,
    pub micros_per_quarter: u32,
}

/// A time-signature change at a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignatureMarker {
    pub tick: u64,
    pub numerator: u8,
    pub denominator: u8,
}

/// Sorted tempo and time-signature markers with binary-search conversion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TempoMap {
    ticks_per_quarter: u32,
    markers: Vec<TempoMarker>,
    /// Seconds elapsed at each marker's tick (parallel to `markers`)
    #[serde(skip)]
    offsets: Vec<f64>,
    time_signatures: Vec<TimeSignatureMarker>,
}

impl TempoMap {
    /// Create a map with the 120 BPM / 4-4 sentinels at tick 0
    pub fn new(ticks_per_quarter: u32) -> Self {
        let mut map = Self {
            ticks_per_quarter: ticks_per_quarter.max(1),
            markers: vec![TempoMarker { tick: 0, micros_per_quarter: DEFAULT_MICROS_PER_QUARTER }],
            offsets: Vec::new(),
            time_signatures: vec![TimeSignatureMarker { tick: 0, numerator: 4, denominator: 4 }],
        };
        map.rebuild_offsets();
        map
    }

    pub fn ticks_per_quarter(&self) -> u32 {
        self.ticks_per_quarter
    }

    /// Seconds per tick under a given tempo
    fn seconds_per_tick(&self, micros_per_quarter: u32) -> f64 {
        micros_per_quarter as f64 / (self.ticks_per_quarter as f64 * 1_000_000.0)
    }

    /// Insert or replace a tempo marker; the list stays sorted by tick
    pub fn set_tempo(&mut self, tick: u64, micros_per_quarter: u32) {
        match self.markers.binary_search_by_key(&tick, |m| m.tick) {
            Ok(i) => self.markers[i].micros_per_quarter = micros_per_quarter,
            Err(i) => self.markers.insert(i, TempoMarker { tick, micros_per_quarter }),
        }
        self.rebuild_offsets();
    }

    /// Insert or replace a time-signature marker
    pub fn set_time_signature(&mut self, tick: u64, numerator: u8, denominator: u8) {
        match self.time_signatures.binary_search_by_key(&tick, |m| m.tick) {
            Ok(i) => {
                self.time_signatures[i].numerator = numerator;
                self.time_signatures[i].denominator = denominator;
            }
            Err(i) => self
                .time_signatures
                .insert(i, TimeSignatureMarker { tick, numerator, denominator }),
        }
    }

    pub fn markers(&self) -> &[TempoMarker] {
        &self.markers
    }

    pub fn time_signatures(&self) -> &[TimeSignatureMarker] {
        &self.time_signatures
    }

    /// The time signature in force at `tick`
    pub fn time_signature_at(&self, tick: u64) -> TimeSignatureMarker {
        let i = self
            .time_signatures
            .partition_point(|m| m.tick <= tick)
            .saturating_sub(1);
        self.time_signatures[i]
    }

    fn rebuild_offsets(&mut self) {
        self.offsets.clear();
        self.offsets.reserve(self.markers.len());
        let mut seconds = 0.0;
        let mut prev: Option<TempoMarker> = None;
        for marker in &self.markers {
            if let Some(p) = prev {
                seconds += (marker.tick - p.tick) as f64 * self.seconds_per_tick(p.micros_per_quarter);
            }
            self.offsets.push(seconds);
            prev = Some(*marker);
        }
    }

    /// Convert a tick position to seconds
    pub fn ticks_to_seconds(&self, tick: f64) -> f64 {
        let i = self
            .markers
            .partition_point(|m| (m.tick as f64) <= tick)
            .saturating_sub(1);
        let marker = self.markers[i];
        self.offsets[i]
            + (tick - marker.tick as f64) * self.seconds_per_tick(marker.micros_per_quarter)
    }

    /// Convert seconds to a (fractional) tick position
    pub fn seconds_to_ticks(&self, seconds: f64) -> f64 {
        let i = self.offsets.partition_point(|&o| o <= seconds).saturating_sub(1);
        let marker = self.markers[i];
        marker.tick as f64
            + (seconds - self.offsets[i]) / self.seconds_per_tick(marker.micros_per_quarter)
    }
}

impl Default for TempoMap {
    fn default() -> Self {
        Self::new(DEFAULT_TICKS_PER_QUARTER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_at_zero() {
        let map = TempoMap::new(480);
        assert_eq!(map.markers()[0].tick, 0);
        assert_eq!(map.time_signatures()[0].tick, 0);
    }

    #[test]
    fn test_constant_tempo_conversion() {
        // 120 BPM, 480 ppq: one quarter = 0.5 s = 480 ticks
        let map = TempoMap::new(480);
        assert!((map.ticks_to_seconds(480.0) - 0.5).abs() < 1e-12);
        assert!((map.ticks_to_seconds(960.0) - 1.0).abs() < 1e-12);
        assert!((map.seconds_to_ticks(1.0) - 960.0).abs() < 1e-9);
    }

    #[test]
    fn test_tempo_change_piecewise() {
        let mut map = TempoMap::new(480);
        // Double tempo (240 BPM) from tick 960 (= 1.0 s in)
        map.set_tempo(960, 250_000);

        assert!((map.ticks_to_seconds(960.0) - 1.0).abs() < 1e-12);
        // The next 960 ticks take only 0.5 s
        assert!((map.ticks_to_seconds(1920.0) - 1.5).abs() < 1e-12);
        assert!((map.seconds_to_ticks(1.5) - 1920.0).abs() < 1e-9);
        // Interior of the fast section
        assert!((map.seconds_to_ticks(1.25) - 1440.0).abs() < 1e-9);
    }

    #[test]
    fn test_markers_stay_sorted() {
        let mut map = TempoMap::new(480);
        map.set_tempo(2000, 400_000);
        map.set_tempo(1000, 300_000);
        map.set_tempo(1500, 350_000);
        let ticks: Vec<u64> = map.markers().iter().map(|m| m.tick).collect();
        assert_eq!(ticks, vec![0, 1000, 1500, 2000]);
    }

    #[test]
    fn test_replace_existing_marker() {
        let mut map = TempoMap::new(480);
        map.set_tempo(0, 250_000);
        assert_eq!(map.markers().len(), 1);
        assert!((map.ticks_to_seconds(480.0) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_time_signature_lookup() {
        let mut map = TempoMap::new(480);
        map.set_time_signature(1920, 3, 4);
        assert_eq!(map.time_signature_at(0).numerator, 4);
        assert_eq!(map.time_signature_at(1919).numerator, 4);
        assert_eq!(map.time_signature_at(1920).numerator, 3);
        assert_eq!(map.time_signature_at(5000).numerator, 3);
    }
}
