//! Surround player
//!
//! Positions a source around a listener and derives per-speaker gains with
//! the selected panning method. VBAP picks the two speakers nearest in
//! bearing and solves the planar triangle for their gains.

use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;
use crate::graph::{Component, ComponentState, ScratchBuffer};
use crate::provider::SoundDataProvider;
use crate::player::SoundPlayer;
use crate::types::Sample;

/// A point on the listening plane (listener at the origin by default)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PlanePosition {
    pub x: f32,
    pub y: f32,
}

impl PlanePosition {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Bearing in radians; front (positive y) is 0, right is positive
    fn bearing_from(&self, origin: PlanePosition) -> f32 {
        (self.x - origin.x).atan2(self.y - origin.y)
    }
}

/// Gain derivation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PanningMethod {
    /// Linear crossfade between the two nearest speakers
    Linear,
    /// Equal-power crossfade between the two nearest speakers
    #[default]
    ConstantPower,
    /// Vector-base amplitude panning over the nearest speaker pair
    Vbap,
}

impl PanningMethod {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Linear,
            2 => Self::Vbap,
            _ => Self::ConstantPower,
        }
    }
}

/// A player that pans its source across a speaker layout
pub struct SurroundPlayer {
    state: ComponentState,
    player: SoundPlayer,
    method: AtomicU8,
    listener: Mutex<PlanePosition>,
    source: Mutex<PlanePosition>,
    speakers: Mutex<Vec<PlanePosition>>,
}

impl SurroundPlayer {
    /// Create a player over `provider` with the standard layout for
    /// `channels` speakers
    pub fn new(
        name: impl Into<String>,
        provider: Box<dyn SoundDataProvider>,
        channels: usize,
    ) -> Self {
        let name = name.into();
        Self {
            state: ComponentState::new(name.clone()),
            player: SoundPlayer::new(name, provider),
            method: AtomicU8::new(PanningMethod::ConstantPower as u8),
            listener: Mutex::new(PlanePosition::default()),
            source: Mutex::new(PlanePosition::new(0.0, 1.0)),
            speakers: Mutex::new(Self::standard_layout(channels)),
        }
    }

    /// Standard speaker bearings for common layouts (unit circle)
    pub fn standard_layout(channels: usize) -> Vec<PlanePosition> {
        let degrees: &[f32] = match channels {
            1 => &[0.0],
            2 => &[-30.0, 30.0],
            // 5.1: FL FR FC LFE BL BR (LFE co-located with center)
            6 => &[-30.0, 30.0, 0.0, 0.0, -110.0, 110.0],
            // 7.1 adds SL SR
            8 => &[-30.0, 30.0, 0.0, 0.0, -135.0, 135.0, -90.0, 90.0],
            n => {
                // Even ring for anything unusual
                return (0..n)
                    .map(|i| {
                        let angle = 2.0 * std::f32::consts::PI * i as f32 / n as f32;
                        PlanePosition::new(angle.sin(), angle.cos())
                    })
                    .collect();
            }
        };
        degrees
            .iter()
            .map(|d| {
                let rad = d.to_radians();
                PlanePosition::new(rad.sin(), rad.cos())
            })
            .collect()
    }

    /// Transport and speed controls of the underlying player
    pub fn player(&self) -> &SoundPlayer {
        &self.player
    }

    pub fn play(&self) {
        self.player.play();
    }

    pub fn pause(&self) {
        self.player.pause();
    }

    pub fn stop(&self) {
        self.player.stop();
    }

    pub fn seek(&self, seconds: f64) -> EngineResult<()> {
        self.player.seek(seconds)
    }

    pub fn set_panning_method(&self, method: PanningMethod) {
        self.method.store(method as u8, Ordering::Relaxed);
    }

    pub fn panning_method(&self) -> PanningMethod {
        PanningMethod::from_u8(self.method.load(Ordering::Relaxed))
    }

    /// Move the phantom source
    pub fn set_source_position(&self, position: PlanePosition) {
        *self.source.lock() = position;
    }

    /// Move the listener
    pub fn set_listener_position(&self, position: PlanePosition) {
        *self.listener.lock() = position;
    }

    /// Replace the speaker layout (one position per output channel)
    pub fn set_speaker_positions(&self, speakers: Vec<PlanePosition>) {
        *self.speakers.lock() = speakers;
    }

    /// Per-channel gains for the current geometry
    fn compute_gains(&self, gains: &mut [f32]) {
        gains.fill(0.0);
        let listener = *self.listener.lock();
        let source = *self.source.lock();
        let speakers = self.speakers.lock();
        let count = speakers.len().min(gains.len());
        if count == 0 {
            return;
        }
        if count == 1 {
            gains[0] = 1.0;
            return;
        }

        let source_bearing = source.bearing_from(listener);
        let bearing = |i: usize| speakers[i].bearing_from(listener);
        let diff = |i: usize| {
            let d = (bearing(i) - source_bearing).abs();
            d.min(2.0 * std::f32::consts::PI - d)
        };

        // The two speakers nearest in bearing
        let mut first = 0;
        let mut second = 1;
        if diff(second) < diff(first) {
            std::mem::swap(&mut first, &mut second);
        }
        for i in 2..count {
            if diff(i) < diff(first) {
                second = first;
                first = i;
            } else if diff(i) < diff(second) {
                second = i;
            }
        }

        match PanningMethod::from_u8(self.method.load(Ordering::Relaxed)) {
            PanningMethod::Linear => {
                let total = diff(first) + diff(second);
                let t = if total > 1e-6 { diff(first) / total } else { 0.0 };
                gains[first] = 1.0 - t;
                gains[second] = t;
            }
            PanningMethod::ConstantPower => {
                let total = diff(first) + diff(second);
                let t = if total > 1e-6 { diff(first) / total } else { 0.0 };
                let angle = t * std::f32::consts::FRAC_PI_2;
                gains[first] = angle.cos();
                gains[second] = angle.sin();
            }
            PanningMethod::Vbap => {
                // Planar VBAP: solve p = g1·l1 + g2·l2 for the speaker pair
                let l1 = speakers[first];
                let l2 = speakers[second];
                let p = PlanePosition::new(source_bearing.sin(), source_bearing.cos());
                let det = l1.x * l2.y - l2.x * l1.y;
                if det.abs() < 1e-6 {
                    gains[first] = 1.0;
                } else {
                    let g1 = ((p.x * l2.y - p.y * l2.x) / det).max(0.0);
                    let g2 = ((p.y * l1.x - p.x * l1.y) / det).max(0.0);
                    let norm = (g1 * g1 + g2 * g2).sqrt();
                    if norm > 1e-6 {
                        gains[first] = g1 / norm;
                        gains[second] = g2 / norm;
                    } else {
                        gains[first] = 1.0;
                    }
                }
            }
        }
    }
}

impl Component for SurroundPlayer {
    fn state(&self) -> &ComponentState {
        &self.state
    }

    fn render(&self, buffer: &mut [Sample], channels: usize, sample_rate: u32) {
        buffer.fill(0.0);
        let frames = buffer.len() / channels;

        // Pull the source mono, then fan it out through the speaker gains
        let mut mono = ScratchBuffer::rent(frames);
        self.player.render(&mut mono, 1, sample_rate);

        let mut gains = [0.0f32; 16];
        let gains = &mut gains[..channels.min(16)];
        self.compute_gains(gains);

        for (frame, &sample) in buffer.chunks_exact_mut(channels).zip(mono.iter()) {
            for (out, &gain) in frame.iter_mut().zip(gains.iter()) {
                *out = sample * gain;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{AudioFormat, SampleEncoding};
    use crate::provider::ConstantProvider;

    fn player(channels: usize) -> SurroundPlayer {
        let format = AudioFormat::new(48000, 1, SampleEncoding::F32).unwrap();
        let provider = Box::new(ConstantProvider::new(format, 1.0, 480_000));
        SurroundPlayer::new("surround", provider, channels)
    }

    #[test]
    fn test_front_source_feeds_front_pair() {
        let p = player(2);
        p.set_source_position(PlanePosition::new(0.0, 1.0));
        p.play();

        let mut buffer = vec![0.0f32; 32 * 2];
        p.render(&mut buffer, 2, 48000);

        // Dead center between L and R: equal energy in both
        let (l, r) = (buffer[0], buffer[1]);
        assert!(l > 0.1 && r > 0.1);
        assert!((l - r).abs() < 1e-3);
    }

    #[test]
    fn test_hard_side_source_prefers_that_speaker() {
        let p = player(2);
        p.set_panning_method(PanningMethod::Vbap);
        p.set_source_position(PlanePosition::new(-1.0, 1.0)); // front-left
        p.play();

        let mut buffer = vec![0.0f32; 8 * 2];
        p.render(&mut buffer, 2, 48000);
        assert!(buffer[0] > buffer[1], "L {} R {}", buffer[0], buffer[1]);
    }

    #[test]
    fn test_vbap_gains_normalized() {
        let p = player(6);
        p.set_panning_method(PanningMethod::Vbap);
        // 15°: inside the front-center / front-right arc
        let bearing = 15.0f32.to_radians();
        p.set_source_position(PlanePosition::new(bearing.sin(), bearing.cos()));

        let mut gains = vec![0.0f32; 6];
        p.compute_gains(&mut gains);
        let power: f32 = gains.iter().map(|g| g * g).sum();
        assert!((power - 1.0).abs() < 1e-3, "power {power}");
        // Exactly two speakers active
        assert_eq!(gains.iter().filter(|&&g| g > 1e-4).count(), 2);
    }

    #[test]
    fn test_constant_power_sums_to_unit_power() {
        let p = player(8);
        p.set_panning_method(PanningMethod::ConstantPower);
        for angle in [-2.0f32, -1.0, 0.0, 0.7, 2.4] {
            p.set_source_position(PlanePosition::new(angle.sin(), angle.cos()));
            let mut gains = vec![0.0f32; 8];
            p.compute_gains(&mut gains);
            let power: f32 = gains.iter().map(|g| g * g).sum();
            assert!((power - 1.0).abs() < 1e-3, "angle {angle}: power {power}");
        }
    }
}
