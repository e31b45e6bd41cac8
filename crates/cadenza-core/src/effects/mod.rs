//! Modifiers and analyzers
//!
//! A modifier is a pure block transformer over interleaved f32; an analyzer
//! is a read-only observer over the post-modifier buffer. Both run on the
//! audio thread: no blocking, no steady-state allocation, no user locks.
//! Parameters crossed from control threads use atomic loads; DSP state lives
//! behind a short mutex only the audio thread takes.

mod delay;
mod filter;
mod level;
mod spectrum;
mod vad;

pub use delay::DelayModifier;
pub use filter::FilterModifier;
pub use level::{LevelAnalyzer, LevelReading};
pub use spectrum::SpectrumAnalyzer;
pub use vad::{VadEvent, VoiceActivityAnalyzer};

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::types::Sample;

/// A pure in-place block transformer
pub trait Modifier: Send + Sync {
    /// Display name
    fn name(&self) -> &str;

    /// Whether the modifier participates in processing
    fn is_enabled(&self) -> bool;

    /// Enable or disable; takes effect on the next block
    fn set_enabled(&self, enabled: bool);

    /// Transform the interleaved buffer in place
    fn process(&self, buffer: &mut [Sample], channels: usize, sample_rate: u32);

    /// Clear DSP state (seek, device switch)
    fn reset(&self) {}
}

/// A read-only observer of the post-modifier buffer
///
/// Analyzers publish derived state (level, spectrum, speech activity)
/// through their own events; `observe` must stay short and non-blocking.
pub trait Analyzer: Send + Sync {
    /// Display name
    fn name(&self) -> &str;

    /// Inspect one block
    fn observe(&self, buffer: &[Sample], channels: usize, sample_rate: u32);
}

/// Ordered modifier list with copy-on-write snapshots
///
/// The audio thread loads the snapshot atomically on every block; control
/// threads replace the list on edit. Order is preserved.
pub struct ModifierChain {
    list: ArcSwap<Vec<Arc<dyn Modifier>>>,
}

impl ModifierChain {
    pub fn new() -> Self {
        Self { list: ArcSwap::from_pointee(Vec::new()) }
    }

    /// Append a modifier
    pub fn add(&self, modifier: Arc<dyn Modifier>) {
        self.list.rcu(|old| {
            let mut next = Vec::with_capacity(old.len() + 1);
            next.extend(old.iter().cloned());
            next.push(modifier.clone());
            next
        });
    }

    /// Insert a modifier at `index` (clamped to the list length)
    pub fn insert(&self, index: usize, modifier: Arc<dyn Modifier>) {
        self.list.rcu(|old| {
            let mut next: Vec<_> = old.iter().cloned().collect();
            next.insert(index.min(next.len()), modifier.clone());
            next
        });
    }

    /// Remove a modifier by identity
    pub fn remove(&self, modifier: &Arc<dyn Modifier>) {
        self.list.rcu(|old| {
            old.iter()
                .filter(|m| !Arc::ptr_eq(m, modifier))
                .cloned()
                .collect::<Vec<_>>()
        });
    }

    pub fn len(&self) -> usize {
        self.list.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.load().is_empty()
    }

    /// Run every enabled modifier in order; audio thread
    pub fn process(&self, buffer: &mut [Sample], channels: usize, sample_rate: u32) {
        for modifier in self.list.load().iter() {
            if modifier.is_enabled() {
                modifier.process(buffer, channels, sample_rate);
            }
        }
    }

    /// Reset every modifier's DSP state
    pub fn reset(&self) {
        for modifier in self.list.load().iter() {
            modifier.reset();
        }
    }
}

impl Default for ModifierChain {
    fn default() -> Self {
        Self::new()
    }
}

/// Analyzer set with copy-on-write snapshots
pub struct AnalyzerSet {
    list: ArcSwap<Vec<Arc<dyn Analyzer>>>,
}

impl AnalyzerSet {
    pub fn new() -> Self {
        Self { list: ArcSwap::from_pointee(Vec::new()) }
    }

    pub fn add(&self, analyzer: Arc<dyn Analyzer>) {
        self.list.rcu(|old| {
            let mut next = Vec::with_capacity(old.len() + 1);
            next.extend(old.iter().cloned());
            next.push(analyzer.clone());
            next
        });
    }

    pub fn remove(&self, analyzer: &Arc<dyn Analyzer>) {
        self.list.rcu(|old| {
            old.iter()
                .filter(|a| !Arc::ptr_eq(a, analyzer))
                .cloned()
                .collect::<Vec<_>>()
        });
    }

    pub fn len(&self) -> usize {
        self.list.load().len()
    }

    /// Fan the buffer out to every analyzer; audio thread
    pub fn observe(&self, buffer: &[Sample], channels: usize, sample_rate: u32) {
        for analyzer in self.list.load().iter() {
            analyzer.observe(buffer, channels, sample_rate);
        }
    }
}

impl Default for AnalyzerSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Doubler {
        enabled: AtomicBool,
    }

    impl Modifier for Doubler {
        fn name(&self) -> &str {
            "Doubler"
        }

        fn is_enabled(&self) -> bool {
            self.enabled.load(Ordering::Relaxed)
        }

        fn set_enabled(&self, enabled: bool) {
            self.enabled.store(enabled, Ordering::Relaxed);
        }

        fn process(&self, buffer: &mut [Sample], _channels: usize, _sample_rate: u32) {
            for s in buffer.iter_mut() {
                *s *= 2.0;
            }
        }
    }

    #[test]
    fn test_chain_order_and_disable() {
        let chain = ModifierChain::new();
        let a: Arc<dyn Modifier> = Arc::new(Doubler { enabled: AtomicBool::new(true) });
        let b: Arc<dyn Modifier> = Arc::new(Doubler { enabled: AtomicBool::new(true) });
        chain.add(a.clone());
        chain.add(b.clone());

        let mut buffer = vec![1.0f32; 4];
        chain.process(&mut buffer, 2, 48000);
        assert_eq!(buffer[0], 4.0);

        b.set_enabled(false);
        let mut buffer = vec![1.0f32; 4];
        chain.process(&mut buffer, 2, 48000);
        assert_eq!(buffer[0], 2.0);

        chain.remove(&a);
        assert_eq!(chain.len(), 1);
    }
}
