//! # cosim-core
//!
//! Foundation layer shared by every co-simulation crate: virtual time, the
//! cooperative event scheduler, wire message types and the transport
//! boundary an adapter drives.
//!
//! ### Key Submodules:
//! - `time`: `VirtualClock` shared nanosecond counter
//! - `sched`: `Scheduler` trait and the `EventLoop` discrete-event loop
//! - `channel`: `Channel` transport trait, sync negotiation, heartbeat clock
//! - `instrument`: optional per-link counters

pub mod channel;
pub mod error;
pub mod instrument;
pub mod message;
pub mod sched;
pub mod time;

pub use channel::{
    negotiate_sync, Channel, ChannelParams, Interest, OutSlot, SyncClock, SyncMode, SyncOutcome,
};
pub use error::{fatal, ProtoError, TransportError};
pub use instrument::{AdapterStats, Instrumentation, LinkStats, NoInstrumentation};
pub use message::{InMessage, MsgType};
pub use sched::{Event, EventId, EventLoop, Scheduler};
pub use time::VirtualClock;
