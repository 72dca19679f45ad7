//! ## cosim-core::channel
//! **Transport boundary owned by a single adapter**
//!
//! A channel is a socket paired with a shared-memory ring buffer. The
//! handshake half is driven by the init manager's reactor during startup;
//! the steady-state half is driven by the adapter's poll and heartbeat
//! events. Implementations own the ring's byte layout.

use std::fmt;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::message::{InMessage, MsgType};

/// Synchronization requirement of one side of a link.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Free-running: poll at a fixed interval, no heartbeats.
    Disabled,
    /// Refuse to run unless both sides synchronize.
    #[default]
    Required,
    /// Synchronize only if the peer requires it.
    Optional,
}

impl SyncMode {
    pub fn as_u8(self) -> u8 {
        match self {
            SyncMode::Disabled => 0,
            SyncMode::Required => 1,
            SyncMode::Optional => 2,
        }
    }

    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(SyncMode::Disabled),
            1 => Some(SyncMode::Required),
            2 => Some(SyncMode::Optional),
            _ => None,
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncMode::Disabled => "disabled",
            SyncMode::Required => "required",
            SyncMode::Optional => "optional",
        };
        f.write_str(name)
    }
}

/// Decides whether a link runs synchronized given both sides' modes.
pub fn negotiate_sync(local: SyncMode, peer: SyncMode) -> Result<bool, TransportError> {
    use SyncMode::*;
    match (local, peer) {
        (Required, Disabled) | (Disabled, Required) => {
            Err(TransportError::IncompatibleSync { local, peer })
        }
        (Required, _) | (_, Required) => Ok(true),
        _ => Ok(false),
    }
}

/// Transport parameters for one channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelParams {
    pub socket_path: PathBuf,
    pub sync_mode: SyncMode,
    /// Maximum gap between outbound messages before a heartbeat is due.
    pub sync_interval_ns: u64,
    /// Added to every outbound timestamp.
    pub link_latency_ns: u64,
    /// Slots per direction.
    pub queue_entries: usize,
    /// Bytes per slot, header included.
    pub entry_size: usize,
}

impl ChannelParams {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            ..Self::default()
        }
    }
}

impl Default for ChannelParams {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::new(),
            sync_mode: SyncMode::Required,
            sync_interval_ns: 500,
            link_latency_ns: 500,
            queue_entries: 1024,
            entry_size: 2048,
        }
    }
}

/// Readiness a handshake descriptor waits for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interest {
    Readable,
    Writable,
}

/// An outbound slot reserved by [`Channel::out_alloc`].
#[derive(Debug, PartialEq, Eq)]
pub struct OutSlot(usize);

impl OutSlot {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(&self) -> usize {
        self.0
    }
}

/// Result of one heartbeat attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    Sent,
    /// Recent traffic already satisfies the heartbeat interval.
    NotDue,
    /// The outbound ring has no free slot; retry.
    Full,
}

/// Outbound timestamp bookkeeping shared by channel implementations.
#[derive(Clone, Debug)]
pub struct SyncClock {
    sync: bool,
    interval_ns: u64,
    latency_ns: u64,
    last_out_ns: Option<u64>,
}

impl SyncClock {
    pub fn new(sync: bool, interval_ns: u64, latency_ns: u64) -> Self {
        Self {
            sync,
            interval_ns,
            latency_ns,
            last_out_ns: None,
        }
    }

    pub fn sync_enabled(&self) -> bool {
        self.sync
    }

    /// Records an outbound message at `now_ns` and returns its wire timestamp.
    pub fn stamp(&mut self, now_ns: u64) -> u64 {
        self.last_out_ns = Some(now_ns);
        now_ns + self.latency_ns
    }

    pub fn heartbeat_due(&self, now_ns: u64) -> bool {
        if !self.sync {
            return false;
        }
        match self.last_out_ns {
            Some(last) => now_ns.saturating_sub(last) >= self.interval_ns,
            None => true,
        }
    }

    /// Virtual time by which the next heartbeat must go out.
    pub fn next_sync_ns(&self) -> u64 {
        self.last_out_ns.unwrap_or(0) + self.interval_ns
    }
}

/// A bidirectional, timestamped message transport.
pub trait Channel {
    fn socket_path(&self) -> &Path;

    fn is_listener(&self) -> bool;

    /// Descriptor to wait on while connecting or accepting. `None` while
    /// connected, or while a connect attempt must simply be retried.
    fn handshake_fd(&self) -> Option<(RawFd, Interest)>;

    /// Advances the connect/accept state machine without blocking.
    /// Returns `true` once the channel is connected.
    fn poll_connected(&mut self) -> Result<bool, TransportError>;

    /// Descriptor carrying the intro exchange, once connected.
    fn intro_fd(&self) -> Option<RawFd>;

    fn intro_send(&mut self, intro: &[u8]) -> Result<(), TransportError>;

    /// Reads the peer's intro without blocking. `Ok(None)` until complete.
    fn intro_recv(&mut self) -> Result<Option<Bytes>, TransportError>;

    /// Whether the connected link runs synchronized.
    fn sync_enabled(&self) -> bool;

    /// Returns the next inbound message deliverable at `now_ns`. The slot
    /// stays owned by the consumer until [`Channel::in_done`].
    fn in_poll(&mut self, now_ns: u64) -> Option<InMessage>;

    /// Releases the slot returned by the last successful `in_poll`.
    fn in_done(&mut self);

    /// Timestamp of the next queued inbound message, or 0 if none is queued.
    fn in_timestamp(&self) -> u64;

    /// Reserves the next outbound slot, stamping it for `now_ns`.
    fn out_alloc(&mut self, now_ns: u64) -> Option<OutSlot>;

    /// Publishes a reserved slot to the peer.
    fn out_send(&mut self, slot: OutSlot, ty: MsgType, port: u8, payload: &[u8]);

    /// Sends a heartbeat if one is due at `now_ns`.
    fn out_sync(&mut self, now_ns: u64) -> SyncOutcome;

    /// Deadline for the next heartbeat.
    fn out_next_sync(&self) -> u64;

    fn max_payload_len(&self) -> usize;

    /// Announces shutdown to the peer. Idempotent.
    fn close(&mut self, now_ns: u64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn required_against_disabled_is_rejected() {
        assert!(negotiate_sync(SyncMode::Required, SyncMode::Disabled).is_err());
        assert!(negotiate_sync(SyncMode::Disabled, SyncMode::Required).is_err());
    }

    #[test]
    fn optional_follows_the_peer() {
        assert!(negotiate_sync(SyncMode::Optional, SyncMode::Required).unwrap());
        assert!(!negotiate_sync(SyncMode::Optional, SyncMode::Optional).unwrap());
        assert!(!negotiate_sync(SyncMode::Optional, SyncMode::Disabled).unwrap());
        assert!(negotiate_sync(SyncMode::Required, SyncMode::Required).unwrap());
    }

    #[test]
    fn sync_mode_wire_byte() {
        for mode in [SyncMode::Disabled, SyncMode::Required, SyncMode::Optional] {
            assert_eq!(SyncMode::from_u8(mode.as_u8()), Some(mode));
        }
        assert_eq!(SyncMode::from_u8(9), None);
    }

    #[test]
    fn first_heartbeat_is_due_immediately() {
        let clock = SyncClock::new(true, 500, 100);
        assert!(clock.heartbeat_due(0));
        assert_eq!(clock.next_sync_ns(), 500);
    }

    #[test]
    fn free_running_never_needs_heartbeats() {
        let clock = SyncClock::new(false, 500, 100);
        assert!(!clock.heartbeat_due(10_000));
    }

    proptest! {
        #[test]
        fn stamp_resets_the_heartbeat_deadline(
            sent_at in 0u64..1_000_000,
            interval in 1u64..10_000,
            latency in 0u64..10_000,
            elapsed in 0u64..20_000,
        ) {
            let mut clock = SyncClock::new(true, interval, latency);
            prop_assert_eq!(clock.stamp(sent_at), sent_at + latency);
            prop_assert_eq!(clock.next_sync_ns(), sent_at + interval);
            prop_assert_eq!(clock.heartbeat_due(sent_at + elapsed), elapsed >= interval);
        }
    }
}
