//! # cosim-sync
//!
//! Synchronization core for coupling this simulator to external peer
//! simulators over shared-memory channels.
//!
//! ### Key Submodules:
//! - `adapter`: per-link poll/heartbeat engine enforcing timestamp order
//! - `init`: `InitManager`, the bring-up reactor shared by all links
//! - `trunk`: one link fanned out into up to 256 logical ports
//! - `netdev`: one link, one endpoint

pub mod adapter;
pub mod error;
pub mod init;
mod net;
pub mod netdev;
pub mod trunk;

#[cfg(test)]
mod testing;

pub use adapter::{Adapter, AdapterHandler, NullHandler, WeakAdapter, DEFAULT_POLL_INTERVAL_NS};
pub use error::SyncError;
pub use init::{InitManager, InitState};
pub use net::{check_net_intro, net_intro, RxCallback, NET_INTRO_LEN};
pub use netdev::NetDev;
pub use trunk::{Trunk, TrunkPort};
