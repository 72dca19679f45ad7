//! Message types exchanged over a co-simulation channel.

use bytes::Bytes;

use crate::error::ProtoError;

/// One-byte message type tag carried by every ring slot.
///
/// Types below `0x40` belong to the synchronization layer; `0x40` and above
/// are owned by the protocol riding on top of it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MsgType {
    /// Content-free heartbeat advancing the peer's timestamp bound.
    Sync = 0x01,
    /// The peer is shutting down and will send nothing further.
    Terminate = 0x02,
    /// Opaque payload for the network protocol.
    Packet = 0x40,
}

impl MsgType {
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for MsgType {
    type Error = ProtoError;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            0x01 => Ok(MsgType::Sync),
            0x02 => Ok(MsgType::Terminate),
            0x40 => Ok(MsgType::Packet),
            other => Err(ProtoError::UnknownType(other)),
        }
    }
}

/// An inbound message copied out of the receive ring.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InMessage {
    /// Raw type byte; validated by the consumer.
    pub ty: u8,
    /// Virtual time at which the message becomes visible to this side.
    pub timestamp_ns: u64,
    /// Logical port for multiplexed links. Zero on single-endpoint links.
    pub port: u8,
    pub payload: Bytes,
}

impl InMessage {
    pub fn msg_type(&self) -> Result<MsgType, ProtoError> {
        MsgType::try_from(self.ty)
    }
}
