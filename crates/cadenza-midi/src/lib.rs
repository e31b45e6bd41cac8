//! MIDI support for the cadenza audio engine
//!
//! This crate provides:
//! - The MIDI message model (status/data bytes + timestamp, derived properties)
//! - The routing fabric: sources, destinations, routes with processor chains
//! - Built-in processors (transpose, channel filter, velocity scale,
//!   arpeggiator, harmonizer, randomizer)
//! - Hardware I/O via midir
//!
//! # Architecture
//!
//! ```text
//! MIDI port → midir callback → MidiSource → MidiRoute (processor chain)
//!                                             → MidiDestination (port | synth)
//! ```
//!
//! Route processor chains are copy-on-write snapshots: delivery on the
//! driver thread loads the chain atomically and never blocks on structural
//! edits from the control thread. A route that sees a destination failure
//! faults and drops every subsequent message until reconnected.

mod error;
mod hardware;
mod message;
mod processors;
mod router;

pub use error::{MidiError, MidiResult};
pub use hardware::{list_input_ports, list_output_ports, HardwareDestination, HardwareSource};
pub use message::{MidiCommand, MidiMessage, CC_ALL_NOTES_OFF, CC_SUSTAIN, CC_TIMBRE};
pub use processors::{
    ArpPattern, Arpeggiator, ChannelFilter, Harmonizer, MidiProcessor, Randomizer, Transpose,
    VelocityScale,
};
pub use router::{MidiDestination, MidiRoute, MidiRouter, MidiSource, RouteError};
