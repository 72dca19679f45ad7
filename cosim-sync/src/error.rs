use cosim_core::{ProtoError, TransportError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Proto(#[from] ProtoError),

    #[error("Only one InitManager may exist per process")]
    InitManagerExists,

    #[error("Adapter was never registered with an InitManager")]
    NotRegistered,

    #[error("InitManager polled without pending adapters")]
    NothingPending,

    #[error("Intro mismatch: expected {expected} bytes, got {got}")]
    IntroMismatch { expected: usize, got: usize },

    #[error("Intro is not a network intro")]
    IntroTag,

    #[error("Payload of {len} bytes exceeds the {max} byte slot")]
    PayloadTooLarge { len: usize, max: usize },
}
