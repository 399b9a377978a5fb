//! Protocol message definitions.
mod swap;

pub use swap::{BlockPresence, PresenceType, SwapMessage, WireEntry};
