//! Pull-model component graph
//!
//! Nodes form a tree rooted at the engine's master mixer. Parents request
//! samples from children by calling their render function; each pulled child
//! passes through its own modifier chain and analyzer set on the way up.

mod mixer;
mod node;
mod scratch;

pub use mixer::Mixer;
pub use node::{apply_volume_pan, equal_power_gains, render_child_into, Component, ComponentState};
pub use scratch::ScratchBuffer;
