use std::fmt::Display;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by a [`Channel`](crate::Channel) implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid path: {0:?}")]
    InvalidPath(PathBuf),

    #[error("Handshake protocol violation: {0}")]
    Handshake(String),

    #[error("Incompatible sync modes: local {local}, peer {peer}")]
    IncompatibleSync {
        local: crate::SyncMode,
        peer: crate::SyncMode,
    },

    #[error("Unusable ring shape: {entries} slots of {entry_size} bytes")]
    RingShape { entries: usize, entry_size: usize },

    #[error("Intro of {len} bytes exceeds the {max} byte limit")]
    IntroTooLarge { len: usize, max: usize },

    #[error("Channel is not connected")]
    NotConnected,

    #[error("Peer closed the connection")]
    PeerClosed,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Wire-level protocol violations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtoError {
    #[error("Unrecognized message type {0:#04x}")]
    UnknownType(u8),
}

/// Terminates the simulation on an unrecoverable misconfiguration or
/// protocol violation.
///
/// Used from scheduled callbacks, where no caller exists to hand an error to.
#[track_caller]
pub fn fatal(err: impl Display) -> ! {
    tracing::error!(error = %err, "fatal co-simulation error");
    panic!("{}", err);
}
