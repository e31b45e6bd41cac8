//! Mixer node
//!
//! Pull-model composition: on render the mixer pulls each enabled child into
//! a rented scratch buffer through the shared harness (child modifiers,
//! analyzers, volume, pan) and accumulates the results. The child list sits
//! behind a readers-writer lock — the audio thread reads, control threads
//! write — so structural edits never tear a traversal.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::graph::node::{render_child_into, Component, ComponentState};
use crate::types::Sample;

/// A summing node over an ordered child list
pub struct Mixer {
    state: ComponentState,
    children: RwLock<Vec<Arc<dyn Component>>>,
}

impl Mixer {
    /// Create an empty mixer
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            state: ComponentState::new(name),
            children: RwLock::new(Vec::new()),
        })
    }

    /// Attach a component; sets its parent back-reference
    pub fn add_component(self: &Arc<Self>, child: Arc<dyn Component>) {
        child.state().set_parent(Arc::downgrade(self));
        self.children.write().push(child);
    }

    /// Detach a component by identity; clears its parent back-reference
    pub fn remove_component(&self, child: &Arc<dyn Component>) {
        let mut children = self.children.write();
        if let Some(pos) = children.iter().position(|c| Arc::ptr_eq(c, child)) {
            let removed = children.remove(pos);
            removed.state().set_parent(std::sync::Weak::new());
        }
    }

    /// Number of attached children
    pub fn child_count(&self) -> usize {
        self.children.read().len()
    }

    /// Snapshot of the current children (control-thread use)
    pub fn children(&self) -> Vec<Arc<dyn Component>> {
        self.children.read().clone()
    }

    /// Detach all children at once, returning them in order.
    /// Used by device switching to move a subtree between masters.
    pub fn take_children(&self) -> Vec<Arc<dyn Component>> {
        let mut children = self.children.write();
        for child in children.iter() {
            child.state().set_parent(std::sync::Weak::new());
        }
        std::mem::take(&mut *children)
    }
}

impl Component for Mixer {
    fn state(&self) -> &ComponentState {
        &self.state
    }

    fn render(&self, buffer: &mut [Sample], channels: usize, sample_rate: u32) {
        buffer.fill(0.0);

        // Pre-order, deterministic within one callback
        let children = self.children.read();
        for child in children.iter() {
            render_child_into(child, buffer, channels, sample_rate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A component producing a constant value
    struct Dc {
        state: ComponentState,
        value: f32,
    }

    impl Dc {
        fn new(value: f32) -> Arc<Self> {
            Arc::new(Self { state: ComponentState::new("dc"), value })
        }
    }

    impl Component for Dc {
        fn state(&self) -> &ComponentState {
            &self.state
        }

        fn render(&self, buffer: &mut [Sample], _channels: usize, _sample_rate: u32) {
            buffer.fill(self.value);
        }
    }

    #[test]
    fn test_empty_mixer_renders_silence() {
        let mixer = Mixer::new("master");
        let mut buffer = vec![1.0f32; 960];
        mixer.render(&mut buffer, 2, 48000);
        assert!(buffer.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_mixer_sums_children() {
        let mixer = Mixer::new("master");
        let a = Dc::new(0.25);
        let b = Dc::new(0.5);
        mixer.add_component(a.clone());
        mixer.add_component(b);

        let mut buffer = vec![0.0f32; 8];
        mixer.render(&mut buffer, 2, 48000);
        // Center pan applies 1/√2 to both channels
        let expected = 0.75 * std::f32::consts::FRAC_1_SQRT_2;
        assert!(buffer.iter().all(|&s| (s - expected).abs() < 1e-6));
    }

    #[test]
    fn test_disabled_child_is_skipped() {
        let mixer = Mixer::new("master");
        let a = Dc::new(0.5);
        a.state.set_enabled(false);
        mixer.add_component(a);

        let mut buffer = vec![0.0f32; 8];
        mixer.render(&mut buffer, 2, 48000);
        assert!(buffer.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_child_volume_scales() {
        let mixer = Mixer::new("master");
        let a = Dc::new(1.0);
        a.state().set_volume(0.5);
        mixer.add_component(a);

        let mut buffer = vec![0.0f32; 4];
        mixer.render(&mut buffer, 2, 48000);
        let expected = 0.5 * std::f32::consts::FRAC_1_SQRT_2;
        assert!(buffer.iter().all(|&s| (s - expected).abs() < 1e-6));
    }

    #[test]
    fn test_parent_backreference() {
        let mixer = Mixer::new("master");
        let a = Dc::new(0.1);
        let a_dyn: Arc<dyn Component> = a.clone();
        mixer.add_component(a_dyn.clone());
        assert!(a.state().parent().is_some());

        mixer.remove_component(&a_dyn);
        assert!(a.state().parent().is_none());
        assert_eq!(mixer.child_count(), 0);
    }

    #[test]
    fn test_nested_mixers() {
        let master = Mixer::new("master");
        let submix = Mixer::new("drums");
        submix.add_component(Dc::new(0.5));
        master.add_component(submix);

        let mut buffer = vec![0.0f32; 4];
        master.render(&mut buffer, 2, 48000);
        // Two levels of center pan: 0.5 · (1/√2)²  = 0.25
        assert!(buffer.iter().all(|&s| (s - 0.25).abs() < 1e-6));
    }
}
