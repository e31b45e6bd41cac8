//! ADSR envelope
//!
//! Linear segments. Release always ramps from the current level, not from
//! the sustain level, so an early note-off cannot jump the gain.

use serde::{Deserialize, Serialize};

/// Envelope timing and sustain level
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdsrParams {
    /// Attack time in seconds
    pub attack: f32,
    /// Decay time in seconds
    pub decay: f32,
    /// Sustain level (0..=1)
    pub sustain: f32,
    /// Release time in seconds
    pub release: f32,
}

impl Default for AdsrParams {
    fn default() -> Self {
        Self { attack: 0.005, decay: 0.1, sustain: 0.7, release: 0.2 }
    }
}

impl AdsrParams {
    /// Upper bound on the envelope's audible lifetime after note-off
    pub fn total_seconds(&self) -> f32 {
        self.attack + self.decay + self.release
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Attack,
    Decay,
    Sustain,
    Release,
    Finished,
}

/// A running envelope instance
#[derive(Debug, Clone)]
pub struct AdsrEnvelope {
    params: AdsrParams,
    stage: Stage,
    /// Current output level
    level: f32,
    /// Level the release segment started from
    release_from: f32,
    /// Seconds into the current stage
    elapsed: f32,
}

impl AdsrEnvelope {
    /// Start a new envelope in the attack stage
    pub fn new(params: AdsrParams) -> Self {
        Self {
            params,
            stage: Stage::Attack,
            level: 0.0,
            release_from: 0.0,
            elapsed: 0.0,
        }
    }

    /// Current output level
    pub fn level(&self) -> f32 {
        self.level
    }

    /// Whether the release segment has completed
    pub fn is_finished(&self) -> bool {
        self.stage == Stage::Finished
    }

    /// Whether the envelope is in (or past) its release segment
    pub fn is_releasing(&self) -> bool {
        matches!(self.stage, Stage::Release | Stage::Finished)
    }

    /// Enter the release segment from the current level
    pub fn release(&mut self) {
        if !self.is_releasing() {
            self.release_from = self.level;
            self.stage = Stage::Release;
            self.elapsed = 0.0;
        }
    }

    /// Advance one sample and return the new level
    #[inline]
    pub fn next(&mut self, sample_rate: u32) -> f32 {
        let dt = 1.0 / sample_rate as f32;
        match self.stage {
            Stage::Attack => {
                if self.params.attack <= 0.0 {
                    self.level = 1.0;
                } else {
                    self.level = (self.elapsed / self.params.attack).min(1.0);
                }
                if self.level >= 1.0 {
                    self.stage = Stage::Decay;
                    self.elapsed = 0.0;
                }
            }
            Stage::Decay => {
                if self.params.decay <= 0.0 {
                    self.level = self.params.sustain;
                } else {
                    let t = (self.elapsed / self.params.decay).min(1.0);
                    self.level = 1.0 + (self.params.sustain - 1.0) * t;
                }
                if self.elapsed >= self.params.decay {
                    self.stage = Stage::Sustain;
                    self.elapsed = 0.0;
                }
            }
            Stage::Sustain => {
                self.level = self.params.sustain;
            }
            Stage::Release => {
                if self.params.release <= 0.0 {
                    self.level = 0.0;
                } else {
                    let t = (self.elapsed / self.params.release).min(1.0);
                    self.level = self.release_from * (1.0 - t);
                }
                if self.level <= 0.0 {
                    self.level = 0.0;
                    self.stage = Stage::Finished;
                }
            }
            Stage::Finished => {
                self.level = 0.0;
            }
        }
        self.elapsed += dt;
        self.level
    }

    /// Fill `out` with per-sample levels
    pub fn render(&mut self, out: &mut [f32], sample_rate: u32) {
        for v in out.iter_mut() {
            *v = self.next(sample_rate);
        }
    }
}
