//! MIDI routing fabric
//!
//! Sources emit messages, routes carry them through an ordered processor
//! chain to a destination. The processor chain is a copy-on-write snapshot:
//! delivery (driver threads) loads the snapshot atomically and never blocks
//! on structural edits from the control thread.
//!
//! Faulting policy: the first failure from the destination marks the route
//! faulted, publishes a `RouteError`, and drops every subsequent message.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::error::{MidiError, MidiResult};
use crate::message::MidiMessage;
use crate::processors::MidiProcessor;

/// A message consumer: a physical output port or an in-process
/// MIDI-controllable component (e.g. a synthesizer)
pub trait MidiDestination: Send + Sync {
    /// Display name
    fn name(&self) -> &str;

    /// Deliver one channel message
    fn receive(&self, message: &MidiMessage) -> MidiResult<()>;

    /// Deliver a SysEx payload; only meaningful for physical outputs
    fn receive_sysex(&self, _bytes: &[u8]) -> MidiResult<()> {
        Ok(())
    }

    /// Whether this destination is a physical output port
    fn is_physical(&self) -> bool {
        false
    }
}

/// Error event published when a route faults
#[derive(Debug, Clone)]
pub struct RouteError {
    /// The faulted route's id
    pub route_id: u64,
    /// What the destination reported
    pub message: String,
}

/// A message producer: a hardware input port or an internal emitter
///
/// Routes attach themselves on `connect`; `emit_message` fans the message
/// out to every attached route through an atomic snapshot.
pub struct MidiSource {
    name: String,
    routes: ArcSwap<Vec<Arc<MidiRoute>>>,
}

impl MidiSource {
    /// Create a new source with no attached routes
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            routes: ArcSwap::from_pointee(Vec::new()),
        })
    }

    /// Source display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Emit a channel message to every attached route
    pub fn emit_message(&self, message: MidiMessage) {
        for route in self.routes.load().iter() {
            route.deliver(&message);
        }
    }

    /// Emit a SysEx payload; bypasses processor chains, physical outputs only
    pub fn emit_sysex(&self, bytes: &[u8]) {
        for route in self.routes.load().iter() {
            route.deliver_sysex(bytes);
        }
    }

    fn attach(&self, route: Arc<MidiRoute>) {
        self.routes.rcu(|old| {
            let mut next = Vec::with_capacity(old.len() + 1);
            next.extend(old.iter().cloned());
            next.push(route.clone());
            next
        });
    }

    fn detach(&self, route_id: u64) {
        self.routes.rcu(|old| {
            old.iter()
                .filter(|r| r.id() != route_id)
                .cloned()
                .collect::<Vec<_>>()
        });
    }
}

/// A directed edge from a source to a destination
pub struct MidiRoute {
    id: u64,
    destination: Arc<dyn MidiDestination>,
    processors: ArcSwap<Vec<Arc<dyn MidiProcessor>>>,
    faulted: AtomicBool,
    error_tx: flume::Sender<RouteError>,
}

impl MidiRoute {
    /// Route identifier (unique within the router)
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the route has faulted and is dropping traffic
    pub fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::Acquire)
    }

    /// Append a processor stage
    pub fn add_processor(&self, processor: Arc<dyn MidiProcessor>) {
        self.processors.rcu(|old| {
            let mut next = Vec::with_capacity(old.len() + 1);
            next.extend(old.iter().cloned());
            next.push(processor.clone());
            next
        });
    }

    /// Remove a processor stage by identity
    pub fn remove_processor(&self, processor: &Arc<dyn MidiProcessor>) {
        self.processors.rcu(|old| {
            old.iter()
                .filter(|p| !Arc::ptr_eq(p, processor))
                .cloned()
                .collect::<Vec<_>>()
        });
    }

    /// Number of processor stages
    pub fn processor_count(&self) -> usize {
        self.processors.load().len()
    }

    /// Run one message through the chain and into the destination
    pub fn deliver(&self, message: &MidiMessage) {
        if self.is_faulted() {
            return;
        }

        let processors = self.processors.load();
        let mut current = vec![*message];
        let mut next = Vec::new();
        for processor in processors.iter() {
            if !processor.is_enabled() {
                continue;
            }
            next.clear();
            for msg in &current {
                processor.process(msg, &mut next);
            }
            std::mem::swap(&mut current, &mut next);
        }

        for msg in &current {
            if let Err(e) = self.destination.receive(msg) {
                self.fault(e);
                return;
            }
        }
    }

    /// Forward a SysEx payload; skips the chain, physical outputs only
    pub fn deliver_sysex(&self, bytes: &[u8]) {
        if self.is_faulted() || !self.destination.is_physical() {
            return;
        }
        if let Err(e) = self.destination.receive_sysex(bytes) {
            self.fault(e);
        }
    }

    /// Drive clocked processors; emitted messages enter the chain at the
    /// stage after the one that produced them
    pub fn pump(&self, now: u64) {
        if self.is_faulted() {
            return;
        }

        let processors = self.processors.load();
        let mut emitted = Vec::new();
        for (stage, processor) in processors.iter().enumerate() {
            if !processor.is_enabled() {
                continue;
            }
            emitted.clear();
            processor.tick(now, &mut emitted);
            if emitted.is_empty() {
                continue;
            }

            let mut current = emitted.clone();
            let mut next = Vec::new();
            for downstream in processors.iter().skip(stage + 1) {
                if !downstream.is_enabled() {
                    continue;
                }
                next.clear();
                for msg in &current {
                    downstream.process(msg, &mut next);
                }
                std::mem::swap(&mut current, &mut next);
            }
            for msg in &current {
                if let Err(e) = self.destination.receive(msg) {
                    self.fault(e);
                    return;
                }
            }
        }
    }

    fn fault(&self, error: MidiError) {
        if !self.faulted.swap(true, Ordering::AcqRel) {
            log::warn!(
                "MIDI route {} faulted, dropping all traffic: {}",
                self.id,
                error
            );
            let _ = self.error_tx.try_send(RouteError {
                route_id: self.id,
                message: error.to_string(),
            });
        }
    }
}

/// Owns the set of routes and the route-error event channel
pub struct MidiRouter {
    routes: Mutex<Vec<(Arc<MidiSource>, Arc<MidiRoute>)>>,
    next_id: AtomicU64,
    error_tx: flume::Sender<RouteError>,
    error_rx: flume::Receiver<RouteError>,
}

impl MidiRouter {
    /// Create an empty router
    pub fn new() -> Self {
        let (error_tx, error_rx) = flume::bounded(64);
        Self {
            routes: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            error_tx,
            error_rx,
        }
    }

    /// Connect a source to a destination, returning the new route
    pub fn connect(
        &self,
        source: &Arc<MidiSource>,
        destination: Arc<dyn MidiDestination>,
    ) -> Arc<MidiRoute> {
        let route = Arc::new(MidiRoute {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            destination,
            processors: ArcSwap::from_pointee(Vec::new()),
            faulted: AtomicBool::new(false),
            error_tx: self.error_tx.clone(),
        });
        source.attach(route.clone());
        self.routes.lock().push((source.clone(), route.clone()));
        log::debug!("MIDI: connected {} -> route {}", source.name(), route.id());
        route
    }

    /// Tear down a route
    pub fn disconnect(&self, route: &Arc<MidiRoute>) {
        let mut routes = self.routes.lock();
        if let Some(pos) = routes.iter().position(|(_, r)| r.id() == route.id()) {
            let (source, _) = routes.remove(pos);
            source.detach(route.id());
        }
    }

    /// Number of live routes
    pub fn route_count(&self) -> usize {
        self.routes.lock().len()
    }

    /// Drive all clocked processors; call periodically from a control thread
    pub fn pump(&self, now: u64) {
        let snapshot: Vec<Arc<MidiRoute>> =
            self.routes.lock().iter().map(|(_, r)| r.clone()).collect();
        for route in snapshot {
            route.pump(now);
        }
    }

    /// Receiver for route-error events
    pub fn error_events(&self) -> &flume::Receiver<RouteError> {
        &self.error_rx
    }
}

impl Default for MidiRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::Transpose;
    use std::sync::atomic::AtomicUsize;

    struct Sink {
        received: Mutex<Vec<MidiMessage>>,
    }

    impl Sink {
        fn new() -> Arc<Self> {
            Arc::new(Self { received: Mutex::new(Vec::new()) })
        }
    }

    impl MidiDestination for Sink {
        fn name(&self) -> &str {
            "sink"
        }

        fn receive(&self, message: &MidiMessage) -> MidiResult<()> {
            self.received.lock().push(*message);
            Ok(())
        }
    }

    struct FailingSink {
        attempts: AtomicUsize,
    }

    impl MidiDestination for FailingSink {
        fn name(&self) -> &str {
            "failing"
        }

        fn receive(&self, _message: &MidiMessage) -> MidiResult<()> {
            self.attempts.fetch_add(1, Ordering::Relaxed);
            Err(MidiError::DestinationRejected("always fails".into()))
        }
    }

    #[test]
    fn test_route_transpose() {
        let router = MidiRouter::new();
        let source = MidiSource::new("test");
        let sink = Sink::new();
        let route = router.connect(&source, sink.clone());
        route.add_processor(Arc::new(Transpose::new(12)));

        source.emit_message(MidiMessage::note_on(1, 60, 100));

        let received = sink.received.lock();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].note(), 72);
    }

    #[test]
    fn test_route_faults_once_and_drops() {
        let router = MidiRouter::new();
        let source = MidiSource::new("test");
        let sink = Arc::new(FailingSink { attempts: AtomicUsize::new(0) });
        let route = router.connect(&source, sink.clone());

        source.emit_message(MidiMessage::note_on(1, 60, 100));
        assert!(route.is_faulted());
        assert_eq!(sink.attempts.load(Ordering::Relaxed), 1);

        // Subsequent messages are observed zero times
        source.emit_message(MidiMessage::note_on(1, 62, 100));
        source.emit_message(MidiMessage::note_on(1, 64, 100));
        assert_eq!(sink.attempts.load(Ordering::Relaxed), 1);

        let err = router.error_events().try_recv().unwrap();
        assert_eq!(err.route_id, route.id());
    }

    #[test]
    fn test_sysex_bypasses_non_physical() {
        let router = MidiRouter::new();
        let source = MidiSource::new("test");
        let sink = Sink::new();
        router.connect(&source, sink.clone());

        source.emit_sysex(&[0xF0, 0x7E, 0xF7]);
        assert!(sink.received.lock().is_empty());
    }

    #[test]
    fn test_disconnect_stops_delivery() {
        let router = MidiRouter::new();
        let source = MidiSource::new("test");
        let sink = Sink::new();
        let route = router.connect(&source, sink.clone());

        source.emit_message(MidiMessage::note_on(1, 60, 100));
        router.disconnect(&route);
        source.emit_message(MidiMessage::note_on(1, 62, 100));

        assert_eq!(sink.received.lock().len(), 1);
        assert_eq!(router.route_count(), 0);
    }

    #[test]
    fn test_chain_order() {
        let router = MidiRouter::new();
        let source = MidiSource::new("test");
        let sink = Sink::new();
        let route = router.connect(&source, sink.clone());
        route.add_processor(Arc::new(Transpose::new(12)));
        route.add_processor(Arc::new(Transpose::new(-5)));

        source.emit_message(MidiMessage::note_on(1, 60, 100));
        assert_eq!(sink.received.lock()[0].note(), 67);
    }
}
