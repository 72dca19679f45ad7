//! ## cosim-transport::channel
//! **Unix socket plus shared-memory ring implementation of [`Channel`]**
//!
//! Connect and accept are advanced one non-blocking step at a time by the
//! caller's reactor through [`Channel::poll_connected`]. Once the base
//! handshake is done both sides map the same pool: the first region carries
//! listener-to-connector traffic, the second the reverse.

use std::fs;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use cosim_core::{
    fatal, negotiate_sync, Channel, ChannelParams, InMessage, Interest, MsgType, OutSlot,
    SyncClock, SyncMode, SyncOutcome, TransportError,
};
use tracing::{debug, info, trace, warn};

use crate::handshake::{frame, write_all_blocking, FrameReader, Hello, PoolIntro};
use crate::layout::{Ring, HEADER_LEN};
use crate::pool::ShmPool;

/// Largest adapter intro accepted by [`Channel::intro_send`].
pub const MAX_INTRO_LEN: usize = 4096;

#[derive(Debug)]
enum State {
    /// Connector waiting for the socket to appear.
    Connecting,
    SendingHello { stream: UnixStream, hello: Bytes },
    AwaitingPoolIntro { stream: UnixStream },
    Listening { listener: UnixListener },
    AwaitingHello { stream: UnixStream },
    Connected { stream: UnixStream },
    Failed,
}

/// Both rings, valid once connected.
#[derive(Debug)]
struct Rings {
    tx: Ring,
    rx: Ring,
}

pub struct ShmChannel {
    params: ChannelParams,
    listener: bool,
    shm_path: Option<PathBuf>,
    state: State,
    reader: FrameReader,
    clock: SyncClock,
    // Declared before `pool` so the ring views go first.
    rings: Option<Rings>,
    pool: Option<ShmPool>,
    /// Set between a successful `in_poll` and the matching `in_done`.
    in_pending: bool,
    closed: bool,
}

impl ShmChannel {
    /// Starts connecting to `params.socket_path`. Returns immediately; the
    /// listener does not have to exist yet.
    pub fn connect(params: ChannelParams) -> Result<Self, TransportError> {
        check_path(&params.socket_path)?;
        info!(path = %params.socket_path.display(), sync = %params.sync_mode, "connecting");
        Ok(Self::with_state(params, false, None, State::Connecting, None))
    }

    /// Creates the pool at `shm_path` and starts listening on
    /// `params.socket_path`. A stale socket file is replaced.
    pub fn listen(params: ChannelParams, shm_path: &Path) -> Result<Self, TransportError> {
        check_path(&params.socket_path)?;
        check_path(shm_path)?;
        let pool_len = check_ring_shape(params.queue_entries, params.entry_size)?;
        let pool = ShmPool::create(shm_path, pool_len)?;

        match fs::remove_file(&params.socket_path) {
            Ok(()) => debug!(path = %params.socket_path.display(), "removed stale socket"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let listener = UnixListener::bind(&params.socket_path)?;
        listener.set_nonblocking(true)?;

        info!(
            path = %params.socket_path.display(),
            shm = %shm_path.display(),
            sync = %params.sync_mode,
            "listening"
        );
        Ok(Self::with_state(
            params,
            true,
            Some(shm_path.to_path_buf()),
            State::Listening { listener },
            Some(pool),
        ))
    }

    fn with_state(
        params: ChannelParams,
        listener: bool,
        shm_path: Option<PathBuf>,
        state: State,
        pool: Option<ShmPool>,
    ) -> Self {
        let clock = SyncClock::new(
            params.sync_mode != SyncMode::Disabled,
            params.sync_interval_ns,
            params.link_latency_ns,
        );
        Self {
            params,
            listener,
            shm_path,
            state,
            reader: FrameReader::new(),
            clock,
            rings: None,
            pool,
            in_pending: false,
            closed: false,
        }
    }

    pub fn params(&self) -> &ChannelParams {
        &self.params
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, State::Connected { .. })
    }

    fn step(&mut self, state: State) -> Result<(State, bool), TransportError> {
        match state {
            State::Connecting => match UnixStream::connect(&self.params.socket_path) {
                Ok(stream) => {
                    stream.set_nonblocking(true)?;
                    debug!(path = %self.params.socket_path.display(), "socket connected");
                    let hello = frame(&Hello { sync_mode: self.params.sync_mode }.encode());
                    Ok((State::SendingHello { stream, hello }, false))
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
                    ) =>
                {
                    trace!(path = %self.params.socket_path.display(), "listener not up yet");
                    Ok((State::Connecting, false))
                }
                Err(e) => Err(e.into()),
            },

            State::SendingHello { mut stream, hello } => {
                write_all_blocking(&mut stream, &hello)?;
                Ok((State::AwaitingPoolIntro { stream }, false))
            }

            State::AwaitingPoolIntro { mut stream } => {
                let Some(body) = self.reader.poll_frame(&mut stream)? else {
                    return Ok((State::AwaitingPoolIntro { stream }, false));
                };
                let intro = PoolIntro::decode(&body)?;
                let sync = negotiate_sync(self.params.sync_mode, intro.sync_mode)?;
                self.map_connector(&intro, sync)?;
                Ok((State::Connected { stream }, true))
            }

            State::Listening { listener } => match listener.accept() {
                Ok((stream, _)) => {
                    stream.set_nonblocking(true)?;
                    debug!(path = %self.params.socket_path.display(), "peer accepted");
                    Ok((State::AwaitingHello { stream }, false))
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    Ok((State::Listening { listener }, false))
                }
                Err(e) => Err(e.into()),
            },

            State::AwaitingHello { mut stream } => {
                let Some(body) = self.reader.poll_frame(&mut stream)? else {
                    return Ok((State::AwaitingHello { stream }, false));
                };
                let hello = Hello::decode(&body)?;
                let intro = PoolIntro {
                    sync_mode: self.params.sync_mode,
                    entries: self.params.queue_entries as u32,
                    entry_size: self.params.entry_size as u32,
                    pool_path: self.shm_path.clone().unwrap_or_default(),
                };
                // The peer learns our mode even when negotiation fails, so
                // both sides report the same error.
                write_all_blocking(&mut stream, &frame(&intro.encode()))?;
                let sync = negotiate_sync(self.params.sync_mode, hello.sync_mode)?;
                self.map_listener(sync)?;
                Ok((State::Connected { stream }, true))
            }

            State::Connected { stream } => Ok((State::Connected { stream }, true)),
            State::Failed => Err(TransportError::NotConnected),
        }
    }

    fn map_listener(&mut self, sync: bool) -> Result<(), TransportError> {
        let (entries, entry_size) = (self.params.queue_entries, self.params.entry_size);
        let pool = self.pool.as_mut().ok_or(TransportError::NotConnected)?;
        let base = pool.as_mut_ptr();
        let region = check_ring_shape(entries, entry_size)? / 2;
        // SAFETY: the pool was sized for two regions and outlives `rings`
        // (field order in `ShmChannel`).
        let rings = unsafe {
            Rings {
                tx: Ring::new(base, entries, entry_size),
                rx: Ring::new(base.add(region), entries, entry_size),
            }
        };
        self.finish_connect(rings, sync);
        Ok(())
    }

    fn map_connector(&mut self, intro: &PoolIntro, sync: bool) -> Result<(), TransportError> {
        let (entries, entry_size) = (intro.entries as usize, intro.entry_size as usize);
        let region = check_ring_shape(entries, entry_size)? / 2;
        let mut pool = ShmPool::open(&intro.pool_path, 2 * region)?;
        let base = pool.as_mut_ptr();
        // SAFETY: `open` checked the mapping covers both regions; the pool
        // is stored alongside and outlives `rings`.
        let rings = unsafe {
            Rings {
                tx: Ring::new(base.add(region), entries, entry_size),
                rx: Ring::new(base, entries, entry_size),
            }
        };
        self.pool = Some(pool);
        self.finish_connect(rings, sync);
        Ok(())
    }

    fn finish_connect(&mut self, rings: Rings, sync: bool) {
        self.rings = Some(rings);
        self.clock = SyncClock::new(sync, self.params.sync_interval_ns, self.params.link_latency_ns);
        info!(
            path = %self.params.socket_path.display(),
            listener = self.listener,
            sync,
            "channel connected"
        );
    }

    fn stream_mut(&mut self) -> Result<&mut UnixStream, TransportError> {
        match &mut self.state {
            State::Connected { stream } => Ok(stream),
            _ => Err(TransportError::NotConnected),
        }
    }
}

fn check_path(path: &Path) -> Result<(), TransportError> {
    if path.as_os_str().is_empty() {
        return Err(TransportError::InvalidPath(path.to_path_buf()));
    }
    Ok(())
}

/// Returns the pool length for `entries` slots of `entry_size` bytes in each
/// direction. Every slot needs payload room past the header, the payload
/// length must fit the header's u16 field and the shape must fit the pool
/// intro frame.
fn check_ring_shape(entries: usize, entry_size: usize) -> Result<usize, TransportError> {
    let shape_ok = entries > 0
        && entry_size > HEADER_LEN
        && entry_size - HEADER_LEN <= u16::MAX as usize
        && u32::try_from(entries).is_ok();
    Ring::region_len(entries, entry_size)
        .and_then(|region| region.checked_mul(2))
        .filter(|_| shape_ok)
        .ok_or(TransportError::RingShape {
            entries,
            entry_size,
        })
}

impl Channel for ShmChannel {
    fn socket_path(&self) -> &Path {
        &self.params.socket_path
    }

    fn is_listener(&self) -> bool {
        self.listener
    }

    fn handshake_fd(&self) -> Option<(RawFd, Interest)> {
        match &self.state {
            State::SendingHello { stream, .. } => Some((stream.as_raw_fd(), Interest::Writable)),
            State::AwaitingPoolIntro { stream } | State::AwaitingHello { stream } => {
                Some((stream.as_raw_fd(), Interest::Readable))
            }
            State::Listening { listener } => Some((listener.as_raw_fd(), Interest::Readable)),
            State::Connecting | State::Connected { .. } | State::Failed => None,
        }
    }

    fn poll_connected(&mut self) -> Result<bool, TransportError> {
        // Runs the state machine until it either finishes or needs to wait.
        loop {
            let state = std::mem::replace(&mut self.state, State::Failed);
            let before = std::mem::discriminant(&state);
            let (next, done) = self.step(state)?;
            let progressed = before != std::mem::discriminant(&next);
            self.state = next;
            if done || !progressed {
                return Ok(done);
            }
        }
    }

    fn intro_fd(&self) -> Option<RawFd> {
        match &self.state {
            State::Connected { stream } => Some(stream.as_raw_fd()),
            _ => None,
        }
    }

    fn intro_send(&mut self, intro: &[u8]) -> Result<(), TransportError> {
        if intro.len() > MAX_INTRO_LEN {
            return Err(TransportError::IntroTooLarge {
                len: intro.len(),
                max: MAX_INTRO_LEN,
            });
        }
        let stream = self.stream_mut()?;
        write_all_blocking(stream, &frame(intro))
    }

    fn intro_recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        let Self { state, reader, .. } = self;
        match state {
            State::Connected { stream } => reader.poll_frame(stream),
            _ => Err(TransportError::NotConnected),
        }
    }

    fn sync_enabled(&self) -> bool {
        self.clock.sync_enabled()
    }

    fn in_poll(&mut self, now_ns: u64) -> Option<InMessage> {
        let sync = self.clock.sync_enabled();
        let rings = self.rings.as_ref()?;
        let hdr = rings.rx.peek()?;
        if sync && hdr.timestamp_ns > now_ns {
            return None;
        }
        self.in_pending = true;
        Some(InMessage {
            ty: hdr.ty,
            timestamp_ns: hdr.timestamp_ns,
            port: hdr.port,
            payload: rings.rx.read_payload(hdr.len),
        })
    }

    fn in_done(&mut self) {
        if !std::mem::take(&mut self.in_pending) {
            return;
        }
        if let Some(rings) = self.rings.as_mut() {
            rings.rx.release();
        }
    }

    fn in_timestamp(&self) -> u64 {
        self.rings
            .as_ref()
            .and_then(|r| r.rx.peek())
            .map_or(0, |hdr| hdr.timestamp_ns)
    }

    fn out_alloc(&mut self, now_ns: u64) -> Option<OutSlot> {
        let rings = self.rings.as_mut()?;
        if !rings.tx.producer_free() {
            return None;
        }
        let ts = self.clock.stamp(now_ns);
        rings.tx.write_timestamp(ts);
        Some(OutSlot::new(rings.tx.position()))
    }

    fn out_send(&mut self, slot: OutSlot, ty: MsgType, port: u8, payload: &[u8]) {
        let Some(rings) = self.rings.as_mut() else {
            fatal(TransportError::NotConnected);
        };
        if slot.index() != rings.tx.position() {
            fatal(TransportError::Handshake(format!(
                "slot {} sent out of order, expected {}",
                slot.index(),
                rings.tx.position()
            )));
        }
        if payload.len() > rings.tx.max_payload_len() {
            fatal(format!(
                "payload of {} bytes exceeds slot capacity {}",
                payload.len(),
                rings.tx.max_payload_len()
            ));
        }
        rings.tx.publish(ty.as_u8(), port, payload);
    }

    fn out_sync(&mut self, now_ns: u64) -> SyncOutcome {
        if !self.clock.heartbeat_due(now_ns) {
            return SyncOutcome::NotDue;
        }
        match self.out_alloc(now_ns) {
            Some(slot) => {
                self.out_send(slot, MsgType::Sync, 0, &[]);
                SyncOutcome::Sent
            }
            None => SyncOutcome::Full,
        }
    }

    fn out_next_sync(&self) -> u64 {
        self.clock.next_sync_ns()
    }

    fn max_payload_len(&self) -> usize {
        match &self.rings {
            Some(rings) => rings.tx.max_payload_len(),
            None => self.params.entry_size.saturating_sub(HEADER_LEN),
        }
    }

    fn close(&mut self, now_ns: u64) {
        if std::mem::replace(&mut self.closed, true) {
            return;
        }
        match self.out_alloc(now_ns) {
            Some(slot) => {
                self.out_send(slot, MsgType::Terminate, 0, &[]);
                debug!(path = %self.params.socket_path.display(), "terminate sent");
            }
            None if self.rings.is_some() => {
                warn!(path = %self.params.socket_path.display(), "ring full, terminate dropped")
            }
            None => {}
        }
    }
}

impl Drop for ShmChannel {
    fn drop(&mut self) {
        if self.listener {
            match fs::remove_file(&self.params.socket_path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(
                    path = %self.params.socket_path.display(),
                    error = %e,
                    "failed to unlink socket"
                ),
            }
        }
    }
}
