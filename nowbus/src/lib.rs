//! nowbus - an authenticated, group-scoped message bus over short-range
//! radio datagrams.
//!
//! Nodes that share a group name share a key set derived from it; nothing
//! else is configured. On top of a connectionless radio primitive
//! (unicast/broadcast frame delivery with a per-frame completion signal
//! and a small MTU) the bus provides:
//!
//! - named group joining with cryptographic proof that a peer holds the
//!   group secret;
//! - reliable unicast: link-layer retry, optional application-level
//!   acknowledgement, duplicate suppression;
//! - authenticated broadcast with per-sender replay windows;
//! - heartbeat-driven peer liveness with automatic eviction and rejoin.
//!
//! # Platform integration
//!
//! The engine is generic over four traits: [`Radio`] (the datagram
//! driver), [`Crypto`] (SHA-256/HMAC, software impl provided), [`Random`]
//! and [`Clock`]. The driver's callbacks push into a bounded channel and a
//! single-slot signal; one task drives everything through [`Bus::run`].
//!
//! ```ignore
//! let mut bus = Bus::begin(radio, SoftwareCrypto, rng, clock, Config::new("garden"))?;
//! bus.on_receive(|mac, data, _retry, bcast| { /* ... */ });
//! bus.send_to(&peer, b"hello", SendTimeout::Default);
//! spawner.spawn(async move { bus.run().await });
//! ```
//!
//! # Single instance
//!
//! One `Bus` owns the radio for its whole life; create it with
//! [`Bus::begin`] and tear it down with [`Bus::end`] before starting
//! another. The handlers (`handle_rx`, `handle_tx_status`,
//! `handle_timer`) take an explicit `now`, which keeps the engine fully
//! deterministic under simulation.
//!
//! # Security model
//!
//! The group name is the root of every key: anyone who learns it can read
//! historical captures and forge membership. There is no forward secrecy;
//! rotating the group name is the rekey mechanism. This is the deliberate
//! price of zero-configuration onboarding.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod bus;
pub mod config;
pub mod crypto;
pub mod debug;
pub mod keys;
pub mod metrics;
pub mod peers;
pub mod pool;
pub mod queue;
pub mod replay;
pub mod time;
pub mod traits;
pub mod types;
pub mod wire;

mod liveness;
mod rx;
mod tx;

pub use bus::{
    AppAckCallback, BeginError, Bus, JoinEventCallback, ReceiveCallback, SendResultCallback,
};
pub use config::{Capacities, Config, DefaultCapacities, PhyRate, SmallCapacities};
pub use crypto::SoftwareCrypto;
pub use keys::{derive_keys, DerivedKeys};
pub use metrics::BusMetrics;
pub use time::{Duration, Timestamp};
pub use traits::{Clock, Crypto, Radio, Random, RxFrame, RxQueue, TxStatus, TxStatusSignal};
pub use types::{
    HeartbeatKind, Mac, PacketType, SendStatus, SendTimeout, BROADCAST_MAC, MAX_REPLAY_WINDOW,
};
pub use wire::FrameError;
