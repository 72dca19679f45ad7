//! Per-link adapter configuration.
//!
//! One `LinkConfig` describes one channel to an external peer simulator,
//! whether it backs a single endpoint or a multi-port trunk.

use std::path::PathBuf;
use std::time::Duration;

use cosim_core::{ChannelParams, SyncMode};
use serde::{Deserialize, Serialize};
use validator::{self, Validate};

use crate::validation::{self, as_ns};
use crate::ConfigError;

/// Upper bound on trunk ports: the wire port field is one byte.
pub const MAX_TRUNK_PORTS: u16 = 256;

#[derive(Debug, Serialize, Deserialize, Validate, Clone, PartialEq)]
pub struct LinkConfig {
    /// Unix-domain socket the link connects to or listens on.
    #[validate(length(min = 1))]
    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    /// Shared-memory pool backing file (listening side only).
    /// Defaults to `<socket_path>-shm`.
    #[validate(length(min = 1))]
    #[serde(default)]
    pub shm_path: Option<String>,

    /// Max delay between outgoing messages before a heartbeat is sent.
    #[validate(custom(function = validation::validate_interval))]
    #[serde(default = "default_sync_delay", with = "humantime_serde")]
    pub sync_delay: Duration,

    /// Delay between polls in free-running mode.
    #[validate(custom(function = validation::validate_interval))]
    #[serde(default = "default_poll_delay", with = "humantime_serde")]
    pub poll_delay: Duration,

    /// Link latency added to every outbound timestamp.
    #[validate(custom(function = validation::validate_virtual_time))]
    #[serde(default = "default_eth_latency", with = "humantime_serde")]
    pub eth_latency: Duration,

    #[serde(default)]
    pub sync: SyncMode,

    /// Accept the peer's connection instead of connecting.
    #[serde(default)]
    pub listen: bool,

    /// Push the next heartbeat back whenever a data message goes out.
    #[serde(default)]
    pub reschedule_sync_tx: bool,

    /// Ring slots per direction.
    #[validate(range(min = 2, max = 1048576))]
    #[serde(default = "default_queue_entries")]
    pub queue_entries: usize,

    /// Bytes per ring slot, header included.
    #[validate(range(min = 128, max = 65536))]
    #[serde(default = "default_entry_size")]
    pub entry_size: usize,

    /// Number of logical ports when the link backs a trunk.
    #[validate(range(min = 1, max = 256))]
    #[serde(default = "default_ports")]
    pub ports: u16,
}

fn default_socket_path() -> String {
    "/tmp/cosim-eth".into()
}

fn default_sync_delay() -> Duration {
    Duration::from_nanos(500)
}

fn default_poll_delay() -> Duration {
    Duration::from_nanos(100)
}

fn default_eth_latency() -> Duration {
    Duration::from_nanos(500)
}

fn default_queue_entries() -> usize {
    1024
}

fn default_entry_size() -> usize {
    2048
}

fn default_ports() -> u16 {
    1
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            shm_path: None,
            sync_delay: default_sync_delay(),
            poll_delay: default_poll_delay(),
            eth_latency: default_eth_latency(),
            sync: SyncMode::default(),
            listen: false,
            reschedule_sync_tx: false,
            queue_entries: default_queue_entries(),
            entry_size: default_entry_size(),
            ports: default_ports(),
        }
    }
}

impl LinkConfig {
    pub fn with_socket(socket_path: impl Into<String>) -> Self {
        Self {
            socket_path: socket_path.into(),
            ..Self::default()
        }
    }

    /// Shared-memory pool path, falling back to `<socket_path>-shm`.
    pub fn resolved_shm_path(&self) -> PathBuf {
        match &self.shm_path {
            Some(path) if !path.is_empty() => PathBuf::from(path),
            _ => PathBuf::from(format!("{}-shm", self.socket_path)),
        }
    }

    /// Whether the adapter starts out synchronized. The final mode is
    /// settled by negotiation with the peer.
    pub fn sync_requested(&self) -> bool {
        self.sync != SyncMode::Disabled
    }

    pub fn sync_delay_ns(&self) -> u64 {
        as_ns(self.sync_delay)
    }

    pub fn poll_delay_ns(&self) -> u64 {
        as_ns(self.poll_delay)
    }

    pub fn eth_latency_ns(&self) -> u64 {
        as_ns(self.eth_latency)
    }

    pub fn channel_params(&self) -> ChannelParams {
        ChannelParams {
            socket_path: PathBuf::from(&self.socket_path),
            sync_mode: self.sync,
            sync_interval_ns: self.sync_delay_ns(),
            link_latency_ns: self.eth_latency_ns(),
            queue_entries: self.queue_entries,
            entry_size: self.entry_size,
        }
    }

    /// Field validation plus the cross-field slot layout constraint.
    pub fn check(&self) -> Result<(), ConfigError> {
        self.validate()?;
        validation::validate_entry_size(self.entry_size).map_err(ConfigError::Invalid)
    }
}
