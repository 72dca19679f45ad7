//! ## cosim-core::instrument
//! **Optional per-link instrumentation hooks**
//!
//! Adapters report spin counts and message traffic through an
//! [`Instrumentation`] chosen at construction. Spin counts stand in for the
//! time spent blocked: they cost nothing to collect on the hot path.

use std::cell::Cell;
use std::fmt;
use std::ops::AddAssign;

use crate::message::MsgType;

/// Observer for one adapter's transmit and receive activity.
pub trait Instrumentation {
    fn message_sent(&self, _ty: MsgType, _len: usize) {}

    fn message_received(&self, _ty: MsgType, _len: usize) {}

    /// Failed allocation attempts before an outbound slot was free.
    fn tx_alloc_spins(&self, _spins: u64) {}

    /// Empty polls while waiting for the peer's timestamp bound to move.
    fn rx_wait_spins(&self, _spins: u64) {}

    /// Counters accumulated so far, if this implementation keeps any.
    fn snapshot(&self) -> Option<LinkStats> {
        None
    }
}

/// Ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoInstrumentation;

impl Instrumentation for NoInstrumentation {}

/// Counter totals for one link.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LinkStats {
    pub packets_tx: u64,
    pub packets_rx: u64,
    pub bytes_tx: u64,
    pub bytes_rx: u64,
    pub syncs_tx: u64,
    pub syncs_rx: u64,
    pub tx_alloc_spins: u64,
    pub rx_wait_spins: u64,
}

impl AddAssign for LinkStats {
    fn add_assign(&mut self, other: Self) {
        self.packets_tx += other.packets_tx;
        self.packets_rx += other.packets_rx;
        self.bytes_tx += other.bytes_tx;
        self.bytes_rx += other.bytes_rx;
        self.syncs_tx += other.syncs_tx;
        self.syncs_rx += other.syncs_rx;
        self.tx_alloc_spins += other.tx_alloc_spins;
        self.rx_wait_spins += other.rx_wait_spins;
    }
}

impl fmt::Display for LinkStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "packets_tx={} packets_rx={} bytes_tx={} bytes_rx={} syncs_tx={} syncs_rx={} \
             tx_alloc_spins={} rx_wait_spins={}",
            self.packets_tx,
            self.packets_rx,
            self.bytes_tx,
            self.bytes_rx,
            self.syncs_tx,
            self.syncs_rx,
            self.tx_alloc_spins,
            self.rx_wait_spins
        )
    }
}

/// Default instrumentation: plain counters, single-threaded.
#[derive(Debug, Default)]
pub struct AdapterStats {
    stats: Cell<LinkStats>,
}

impl AdapterStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> LinkStats {
        self.stats.get()
    }

    fn update(&self, f: impl FnOnce(&mut LinkStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }
}

impl Instrumentation for AdapterStats {
    fn message_sent(&self, ty: MsgType, len: usize) {
        self.update(|s| match ty {
            MsgType::Sync => s.syncs_tx += 1,
            _ => {
                s.packets_tx += 1;
                s.bytes_tx += len as u64;
            }
        });
    }

    fn message_received(&self, ty: MsgType, len: usize) {
        self.update(|s| match ty {
            MsgType::Sync => s.syncs_rx += 1,
            _ => {
                s.packets_rx += 1;
                s.bytes_rx += len as u64;
            }
        });
    }

    fn tx_alloc_spins(&self, spins: u64) {
        self.update(|s| s.tx_alloc_spins += spins);
    }

    fn rx_wait_spins(&self, spins: u64) {
        self.update(|s| s.rx_wait_spins += spins);
    }

    fn snapshot(&self) -> Option<LinkStats> {
        Some(self.get())
    }
}
