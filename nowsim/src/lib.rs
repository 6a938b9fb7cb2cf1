//! Deterministic multi-node simulation for the nowbus protocol.
//!
//! Wraps each bus in a virtual radio and drives the synchronous handler
//! surface (`handle_rx`, `handle_tx_status`, `handle_timer`) under a
//! stepped shared clock. Links between nodes can be severed per direction
//! and individual frames dropped or re-injected, which is enough to
//! reproduce every interesting protocol situation (lost acks, replays,
//! silent peers) without threads or real radios.

pub mod radio;
pub mod sim;

pub use radio::{SentFrame, SimRadio};
pub use sim::{Delivered, SimClock, SimRandom, Simulator};
