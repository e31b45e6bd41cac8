//! Graph node contract
//!
//! Every node in the pull graph — mixers, players, the synthesizer — carries
//! a `ComponentState` (name, enabled, volume, pan, modifier chain, analyzer
//! set, parent back-reference) and implements `Component::render`. Parents
//! pull children; the shared harness in `render_child_into` applies the
//! child's chain, analyzers, volume, and pan, and accumulates into the
//! parent's buffer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::effects::{AnalyzerSet, ModifierChain};
use crate::error::EngineError;
use crate::graph::{Mixer, ScratchBuffer};
use crate::types::{AtomicF32, Sample};

/// A node in the pull graph
///
/// `render` fills the buffer (overwriting) with the node's own output at the
/// requested channel count and rate. It runs on the audio thread: no
/// blocking, no steady-state allocation.
pub trait Component: Send + Sync {
    /// The node's shared state
    fn state(&self) -> &ComponentState;

    /// Produce one block into `buffer` (interleaved, overwritten)
    fn render(&self, buffer: &mut [Sample], channels: usize, sample_rate: u32);
}

/// State shared by every graph node
pub struct ComponentState {
    name: String,
    enabled: AtomicBool,
    volume: AtomicF32,
    /// Equal-power pan position in [0, 1]; 0.5 is center
    pan: AtomicF32,
    modifiers: ModifierChain,
    analyzers: AnalyzerSet,
    /// Back-reference to the owning mixer: relation + lookup, never ownership
    parent: Mutex<Weak<Mixer>>,
    /// Sticky error set by the audio thread, drained by the control pump
    error: Mutex<Option<EngineError>>,
}

impl ComponentState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: AtomicBool::new(true),
            volume: AtomicF32::new(1.0),
            pan: AtomicF32::new(0.5),
            modifiers: ModifierChain::new(),
            analyzers: AnalyzerSet::new(),
            parent: Mutex::new(Weak::new()),
            error: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn volume(&self) -> f32 {
        self.volume.load()
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume.store(volume.max(0.0));
    }

    pub fn pan(&self) -> f32 {
        self.pan.load()
    }

    /// Set the pan position, clamped to [0, 1]
    pub fn set_pan(&self, pan: f32) {
        self.pan.store(pan.clamp(0.0, 1.0));
    }

    pub fn modifiers(&self) -> &ModifierChain {
        &self.modifiers
    }

    pub fn analyzers(&self) -> &AnalyzerSet {
        &self.analyzers
    }

    /// The owning mixer, if the node is attached
    pub fn parent(&self) -> Option<Arc<Mixer>> {
        self.parent.lock().upgrade()
    }

    pub(crate) fn set_parent(&self, parent: Weak<Mixer>) {
        *self.parent.lock() = parent;
    }

    /// Record an error observed on the audio thread; keeps the first
    pub fn set_error(&self, error: EngineError) {
        let mut slot = self.error.lock();
        if slot.is_none() {
            *slot = Some(error);
        }
    }

    /// Drain the sticky error (control-thread pump)
    pub fn take_error(&self) -> Option<EngineError> {
        self.error.lock().take()
    }
}

/// Equal-power pan gains for a pan position in [0, 1]
#[inline]
pub fn equal_power_gains(pan: f32) -> (f32, f32) {
    let angle = pan.clamp(0.0, 1.0) * std::f32::consts::FRAC_PI_2;
    (angle.cos(), angle.sin())
}

/// Scale a block by volume and equal-power pan
///
/// Pan applies to the first two channels of a frame (center = 1/√2 on
/// both); mono and surround beds get volume only.
pub fn apply_volume_pan(buffer: &mut [Sample], channels: usize, volume: f32, pan: f32) {
    if channels >= 2 {
        let (l, r) = equal_power_gains(pan);
        let (l, r) = (l * volume, r * volume);
        for frame in buffer.chunks_exact_mut(channels) {
            frame[0] *= l;
            frame[1] *= r;
            for sample in &mut frame[2..] {
                *sample *= volume;
            }
        }
    } else {
        crate::types::scale(buffer, volume);
    }
}

/// Pull one child into `out` through the standard harness:
/// render → child modifiers → child analyzers → volume/pan → accumulate
pub fn render_child_into(
    child: &Arc<dyn Component>,
    out: &mut [Sample],
    channels: usize,
    sample_rate: u32,
) {
    let state = child.state();
    if !state.is_enabled() {
        return;
    }

    let mut scratch = ScratchBuffer::rent(out.len());
    child.render(&mut scratch, channels, sample_rate);
    state.modifiers().process(&mut scratch, channels, sample_rate);
    state.analyzers().observe(&scratch, channels, sample_rate);
    apply_volume_pan(&mut scratch, channels, state.volume(), state.pan());
    crate::types::mix_into(out, &scratch);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_power_endpoints() {
        let (l, r) = equal_power_gains(0.0);
        assert!((l - 1.0).abs() < 1e-6 && r.abs() < 1e-6);

        let (l, r) = equal_power_gains(1.0);
        assert!(l.abs() < 1e-6 && (r - 1.0).abs() < 1e-6);

        // Center: both at 1/√2, power preserved
        let (l, r) = equal_power_gains(0.5);
        assert!((l * l + r * r - 1.0).abs() < 1e-6);
        assert!((l - r).abs() < 1e-6);
    }

    #[test]
    fn test_center_pan_applies_minus_3db() {
        let mut buffer = vec![0.5f32; 8];
        apply_volume_pan(&mut buffer, 2, 1.0, 0.5);
        let expected = 0.5 * std::f32::consts::FRAC_1_SQRT_2;
        assert!(buffer.iter().all(|&s| (s - expected).abs() < 1e-6));
    }

    #[test]
    fn test_hard_left_silences_right() {
        let mut buffer = vec![0.5f32; 8];
        apply_volume_pan(&mut buffer, 2, 1.0, 0.0);
        for frame in buffer.chunks(2) {
            assert!(frame[1].abs() < 1e-6);
            assert!((frame[0] - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn test_sticky_error_keeps_first() {
        let state = ComponentState::new("test");
        state.set_error(EngineError::Device("first".into()));
        state.set_error(EngineError::Device("second".into()));
        match state.take_error() {
            Some(EngineError::Device(msg)) => assert_eq!(msg, "first"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(state.take_error().is_none());
    }
}
