//! Event fan-out
//!
//! `EventDispatcher` is the engine's broadcast primitive: subscribers live in
//! a copy-on-write snapshot, so emitting from the audio callback is a single
//! atomic load plus inline calls. The contract for audio-thread events is
//! that subscribers are short and non-blocking; long work goes through a
//! channel consumed by a control thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

/// Handle returned by `subscribe`; pass back to `unsubscribe`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Subscriber<T> {
    id: u64,
    callback: Callback<T>,
}

impl<T> Clone for Subscriber<T> {
    fn clone(&self) -> Self {
        Self { id: self.id, callback: self.callback.clone() }
    }
}

/// Multi-subscriber event broadcast with wait-free emission
///
/// Writers (subscribe/unsubscribe, control thread) replace the subscriber
/// list with a new immutable snapshot; `emit` loads the snapshot pointer
/// atomically and never blocks.
pub struct EventDispatcher<T> {
    subscribers: ArcSwap<Vec<Subscriber<T>>>,
    next_id: AtomicU64,
}

impl<T> EventDispatcher<T> {
    /// Create a dispatcher with no subscribers
    pub fn new() -> Self {
        Self {
            subscribers: ArcSwap::from_pointee(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a subscriber; it is invoked inline on the emitting thread
    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let subscriber = Subscriber { id, callback: Arc::new(callback) };
        self.subscribers.rcu(|old| {
            let mut next = Vec::with_capacity(old.len() + 1);
            next.extend(old.iter().cloned());
            next.push(subscriber.clone());
            next
        });
        SubscriptionId(id)
    }

    /// Remove a subscriber
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.rcu(|old| {
            old.iter()
                .filter(|s| s.id != id.0)
                .cloned()
                .collect::<Vec<_>>()
        });
    }

    /// Broadcast an event to the current snapshot of subscribers
    #[inline]
    pub fn emit(&self, event: &T) {
        let snapshot = self.subscribers.load();
        for subscriber in snapshot.iter() {
            (subscriber.callback)(event);
        }
    }

    /// Number of current subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.load().len()
    }
}

impl<T> Default for EventDispatcher<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_subscribe_emit_unsubscribe() {
        let dispatcher = EventDispatcher::<u32>::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        let id = dispatcher.subscribe(move |v| {
            c.fetch_add(*v as usize, Ordering::Relaxed);
        });

        dispatcher.emit(&3);
        assert_eq!(count.load(Ordering::Relaxed), 3);

        dispatcher.unsubscribe(id);
        dispatcher.emit(&5);
        assert_eq!(count.load(Ordering::Relaxed), 3);
        assert_eq!(dispatcher.subscriber_count(), 0);
    }

    #[test]
    fn test_multiple_subscribers() {
        let dispatcher = EventDispatcher::<()>::new();
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..4 {
            let c = count.clone();
            dispatcher.subscribe(move |_| {
                c.fetch_add(1, Ordering::Relaxed);
            });
        }

        dispatcher.emit(&());
        assert_eq!(count.load(Ordering::Relaxed), 4);
    }
}
