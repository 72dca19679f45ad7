//! ## cosim-transport::handshake
//! **Length-prefixed frames exchanged over the control socket**
//!
//! Every frame is a little-endian `u32` body length followed by the body.
//! The base handshake is two frames:
//!
//! - connector `Hello`: magic, version, requested sync mode
//! - listener `PoolIntro`: magic, version, listener sync mode, ring shape,
//!   pool path
//!
//! Both sides then negotiate the sync mode independently; the outcome is
//! symmetric so no third frame is needed. Adapter intros ride the same
//! framing afterwards.

use std::ffi::OsStr;
use std::io::{self, Read, Write};
use std::os::fd::AsFd;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use cosim_core::{SyncMode, TransportError};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

pub const MAGIC: u32 = 0x4353_494d;
pub const VERSION: u16 = 1;
/// Largest body accepted from the peer.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Connector's opening frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Hello {
    pub sync_mode: SyncMode,
}

/// Listener's reply describing the shared-memory pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolIntro {
    pub sync_mode: SyncMode,
    pub entries: u32,
    pub entry_size: u32,
    pub pool_path: PathBuf,
}

fn check_preamble(buf: &mut &[u8]) -> Result<(), TransportError> {
    need(buf, 6)?;
    let magic = buf.get_u32_le();
    if magic != MAGIC {
        return Err(TransportError::Handshake(format!("bad magic {magic:#010x}")));
    }
    let version = buf.get_u16_le();
    if version != VERSION {
        return Err(TransportError::Handshake(format!(
            "unsupported version {version}"
        )));
    }
    Ok(())
}

fn get_sync_mode(buf: &mut &[u8]) -> Result<SyncMode, TransportError> {
    need(buf, 1)?;
    let raw = buf.get_u8();
    SyncMode::from_u8(raw)
        .ok_or_else(|| TransportError::Handshake(format!("unknown sync mode {raw}")))
}

fn need(buf: &[u8], n: usize) -> Result<(), TransportError> {
    if buf.len() < n {
        return Err(TransportError::Handshake("truncated frame".into()));
    }
    Ok(())
}

impl Hello {
    pub fn encode(&self) -> Bytes {
        let mut body = BytesMut::with_capacity(7);
        body.put_u32_le(MAGIC);
        body.put_u16_le(VERSION);
        body.put_u8(self.sync_mode.as_u8());
        body.freeze()
    }

    pub fn decode(mut body: &[u8]) -> Result<Self, TransportError> {
        check_preamble(&mut body)?;
        let sync_mode = get_sync_mode(&mut body)?;
        Ok(Self { sync_mode })
    }
}

impl PoolIntro {
    pub fn encode(&self) -> Bytes {
        let path = self.pool_path.as_os_str().as_bytes();
        let mut body = BytesMut::with_capacity(17 + path.len());
        body.put_u32_le(MAGIC);
        body.put_u16_le(VERSION);
        body.put_u8(self.sync_mode.as_u8());
        body.put_u32_le(self.entries);
        body.put_u32_le(self.entry_size);
        body.put_u16_le(path.len() as u16);
        body.put_slice(path);
        body.freeze()
    }

    pub fn decode(mut body: &[u8]) -> Result<Self, TransportError> {
        check_preamble(&mut body)?;
        let sync_mode = get_sync_mode(&mut body)?;
        need(body, 10)?;
        let entries = body.get_u32_le();
        let entry_size = body.get_u32_le();
        let path_len = body.get_u16_le() as usize;
        need(body, path_len)?;
        let pool_path = PathBuf::from(OsStr::from_bytes(&body[..path_len]));
        Ok(Self {
            sync_mode,
            entries,
            entry_size,
            pool_path,
        })
    }
}

/// Prefixes `body` with its length.
pub fn frame(body: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(4 + body.len());
    out.put_u32_le(body.len() as u32);
    out.put_slice(body);
    out.freeze()
}

/// Accumulates bytes from a non-blocking stream until a whole frame is in.
///
/// Bytes past the end of one frame are kept for the next.
#[derive(Debug, Default)]
pub struct FrameReader {
    buf: BytesMut,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a complete frame is already buffered.
    pub fn has_frame(&self) -> bool {
        self.buffered_frame_len().is_some_and(|len| self.buf.len() >= 4 + len)
    }

    fn buffered_frame_len(&self) -> Option<usize> {
        (self.buf.len() >= 4).then(|| {
            u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize
        })
    }

    fn take_frame(&mut self) -> Result<Option<Bytes>, TransportError> {
        match self.buffered_frame_len() {
            Some(len) if len > MAX_FRAME_LEN => Err(TransportError::Handshake(format!(
                "frame of {len} bytes exceeds {MAX_FRAME_LEN}"
            ))),
            Some(len) if self.buf.len() >= 4 + len => {
                self.buf.advance(4);
                Ok(Some(self.buf.split_to(len).freeze()))
            }
            _ => Ok(None),
        }
    }

    /// Reads what is available without blocking. `Ok(None)` until a frame
    /// is complete.
    pub fn poll_frame(&mut self, stream: &mut UnixStream) -> Result<Option<Bytes>, TransportError> {
        if let Some(frame) = self.take_frame()? {
            return Ok(Some(frame));
        }

        let mut chunk = [0u8; 4096];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => return Err(TransportError::PeerClosed),
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    if let Some(frame) = self.take_frame()? {
                        return Ok(Some(frame));
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Writes all of `data` to a non-blocking stream, waiting for write
/// readiness whenever the socket buffer is full.
pub fn write_all_blocking(stream: &mut UnixStream, mut data: &[u8]) -> Result<(), TransportError> {
    while !data.is_empty() {
        match stream.write(data) {
            Ok(0) => return Err(TransportError::PeerClosed),
            Ok(n) => data = &data[n..],
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => wait_writable(stream)?,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn wait_writable(stream: &UnixStream) -> io::Result<()> {
    let mut fds = [PollFd::new(stream.as_fd(), PollFlags::POLLOUT)];
    match poll(&mut fds, PollTimeout::NONE) {
        Ok(_) | Err(Errno::EINTR) => Ok(()),
        Err(e) => Err(e.into()),
    }
}
