//! Ambit Server Library
//!
//! Server-authoritative interest management and state replication for a
//! fixed-tick multiplayer simulation.
//!
//! - [`game`] - entity registry, spatial locator, tick clock, and the
//!   per-tick simulation pipeline
//! - [`net`] - wire protocol, message queues, AOI, replication, and tick sync
//! - [`client`] - client-side prediction, reconciliation, and remote entities

pub mod client;
pub mod config;
pub mod game;
pub mod metrics;
pub mod net;
pub mod util;
