//! # cosim-transport
//!
//! Shared-memory channel between two co-simulation processes.
//!
//! A Unix-domain socket carries the handshake and the adapters' intro
//! payloads; after that all traffic moves through two fixed-slot rings in a
//! memory-mapped pool file created by the listening side.
//!
//! ### Key Submodules:
//! - `layout`: ring slot format and the owner-byte handoff
//! - `pool`: the mapped pool file
//! - `handshake`: framing and the base handshake messages
//! - `channel`: `ShmChannel`, the `Channel` implementation

pub mod channel;
pub mod handshake;
pub mod layout;
pub mod pool;

pub use channel::{ShmChannel, MAX_INTRO_LEN};
pub use pool::ShmPool;
