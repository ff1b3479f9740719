//! Relay core
//!
//! The connection registry, the broadcaster that fans messages out over it,
//! and the lifecycle handler that ties transport events to both.

mod broadcaster;
mod channel;
mod events;
mod lifecycle;
mod registry;

pub use broadcaster::*;
pub use channel::*;
pub use events::*;
pub use lifecycle::*;
pub use registry::*;
