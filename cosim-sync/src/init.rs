//! ## cosim-sync::init
//! **Non-blocking bring-up reactor for every adapter in the process**
//!
//! Each link needs its connect/accept and its intro exchange to finish
//! before simulated time starts, and one link may only complete after the
//! peer side of another has been serviced. [`InitManager::process_events`]
//! therefore waits on all pending descriptors at once and advances whichever
//! become ready, so [`InitManager::wait_ready`] makes progress regardless of
//! the order links are created in.

use std::cell::RefCell;
use std::fmt::Write as _;
use std::os::fd::BorrowedFd;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};

use cosim_core::{Interest, LinkStats, TransportError};
use cosim_transport::MAX_INTRO_LEN;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::{debug, info, trace};

use crate::adapter::{Adapter, WeakAdapter};
use crate::error::SyncError;

static INSTANCE_EXISTS: AtomicBool = AtomicBool::new(false);

/// Poll timeout while some connector is waiting for its listener to appear.
const CONNECT_RETRY_MS: u16 = 10;

/// Bring-up stage of a registered adapter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitState {
    Unconnected,
    WaitingIntroRx,
    Ready,
}

/// Process-wide registry of adapters still being brought up.
///
/// At most one may exist at a time; construct it once at the top of the
/// application and pass it to every adapter's `connect`/`listen`.
pub struct InitManager {
    unconnected: RefCell<Vec<Adapter>>,
    wait_rx: RefCell<Vec<Adapter>>,
    ready: RefCell<Vec<WeakAdapter>>,
}

impl InitManager {
    pub fn new() -> Result<Rc<Self>, SyncError> {
        if INSTANCE_EXISTS
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SyncError::InitManagerExists);
        }
        Ok(Rc::new(Self {
            unconnected: RefCell::new(Vec::new()),
            wait_rx: RefCell::new(Vec::new()),
            ready: RefCell::new(Vec::new()),
        }))
    }

    pub fn register_adapter(&self, adapter: &Adapter) {
        if self.state_of(adapter).is_none() {
            self.unconnected.borrow_mut().push(adapter.clone());
        }
    }

    /// Number of adapters not yet ready.
    pub fn pending(&self) -> usize {
        self.unconnected.borrow().len() + self.wait_rx.borrow().len()
    }

    pub fn state_of(&self, adapter: &Adapter) -> Option<InitState> {
        if self.unconnected.borrow().iter().any(|a| a.ptr_eq(adapter)) {
            Some(InitState::Unconnected)
        } else if self.wait_rx.borrow().iter().any(|a| a.ptr_eq(adapter)) {
            Some(InitState::WaitingIntroRx)
        } else if self
            .ready
            .borrow()
            .iter()
            .filter_map(WeakAdapter::upgrade)
            .any(|a| a.ptr_eq(adapter))
        {
            Some(InitState::Ready)
        } else {
            None
        }
    }

    /// Drives bring-up until `adapter` is neither unconnected nor waiting
    /// for its intro. Other adapters progress along the way.
    pub fn wait_ready(&self, adapter: &Adapter) -> Result<(), SyncError> {
        while matches!(
            self.state_of(adapter),
            Some(InitState::Unconnected | InitState::WaitingIntroRx)
        ) {
            self.process_events()?;
        }
        Ok(())
    }

    /// Moves `adapter` to intro exchange and sends its intro.
    fn connected(&self, adapter: &Adapter) -> Result<(), SyncError> {
        self.unconnected.borrow_mut().retain(|a| !a.ptr_eq(adapter));
        self.wait_rx.borrow_mut().push(adapter.clone());

        let intro = adapter.handler().intro_out_prepare();
        if intro.len() > MAX_INTRO_LEN {
            return Err(TransportError::IntroTooLarge {
                len: intro.len(),
                max: MAX_INTRO_LEN,
            }
            .into());
        }
        adapter
            .with_channel(|c| c.intro_send(&intro))
            .ok_or(TransportError::NotConnected)??;
        debug!(path = %adapter.socket_path().display(), len = intro.len(), "intro sent");
        Ok(())
    }

    /// Reads the peer's intro if it is complete. Returns whether the adapter
    /// became ready.
    fn try_intro(&self, adapter: &Adapter) -> Result<bool, SyncError> {
        let intro = adapter
            .with_channel(|c| c.intro_recv())
            .ok_or(TransportError::NotConnected)??;
        let Some(intro) = intro else {
            return Ok(false);
        };

        adapter.handler().intro_in_received(&intro)?;
        self.wait_rx.borrow_mut().retain(|a| !a.ptr_eq(adapter));
        self.ready.borrow_mut().push(adapter.downgrade());
        info!(path = %adapter.socket_path().display(), "intro received, link ready");
        Ok(true)
    }

    fn try_connect(&self, adapter: &Adapter) -> Result<bool, SyncError> {
        let done = adapter
            .with_channel(|c| c.poll_connected())
            .ok_or(TransportError::NotConnected)??;
        if done {
            self.connected(adapter)?;
        }
        Ok(done)
    }

    /// One reactor round: advance everything that can move without waiting,
    /// otherwise block on all pending descriptors and service the ready ones.
    pub fn process_events(&self) -> Result<(), SyncError> {
        if self.pending() == 0 {
            return Err(SyncError::NothingPending);
        }

        // Connectors without a descriptor retry directly; intros may already
        // be buffered from an earlier read.
        let mut progressed = false;
        let mut retrying = false;
        let unconnected = self.unconnected.borrow().clone();
        for adapter in unconnected {
            if adapter.with_channel(|c| c.handshake_fd()).flatten().is_none() {
                progressed |= self.try_connect(&adapter)?;
                retrying = true;
            }
        }
        let waiting = self.wait_rx.borrow().clone();
        for adapter in waiting {
            progressed |= self.try_intro(&adapter)?;
        }
        if progressed {
            return Ok(());
        }

        let mut raw = Vec::new();
        let mut owners = Vec::new();
        let unconnected = self.unconnected.borrow().clone();
        for adapter in unconnected {
            if let Some((fd, interest)) = adapter.with_channel(|c| c.handshake_fd()).flatten() {
                let events = match interest {
                    Interest::Readable => PollFlags::POLLIN,
                    Interest::Writable => PollFlags::POLLOUT,
                };
                raw.push((fd, events));
                owners.push((adapter, true));
            }
        }
        let waiting = self.wait_rx.borrow().clone();
        for adapter in waiting {
            let fd = adapter
                .with_channel(|c| c.intro_fd())
                .flatten()
                .ok_or(TransportError::NotConnected)?;
            raw.push((fd, PollFlags::POLLIN));
            owners.push((adapter, false));
        }

        // SAFETY: every fd belongs to a channel held by an adapter in `owners`,
        // which outlives `fds`.
        let mut fds: Vec<PollFd> = raw
            .iter()
            .map(|&(fd, events)| PollFd::new(unsafe { BorrowedFd::borrow_raw(fd) }, events))
            .collect();
        let timeout = if retrying {
            PollTimeout::from(CONNECT_RETRY_MS)
        } else {
            PollTimeout::NONE
        };
        trace!(fds = fds.len(), ?timeout, "waiting for handshake progress");
        match poll(&mut fds, timeout) {
            Ok(_) => {}
            Err(Errno::EINTR) => return Ok(()),
            Err(e) => return Err(TransportError::Io(e.into()).into()),
        }
        let ready: Vec<Option<PollFlags>> = fds.iter().map(|fd| fd.revents()).collect();
        drop(fds);

        for (revents, (adapter, connecting)) in ready.into_iter().zip(owners) {
            let Some(revents) = revents.filter(|r| !r.is_empty()) else {
                continue;
            };
            if revents.intersects(PollFlags::POLLERR | PollFlags::POLLNVAL) {
                return Err(TransportError::Handshake(format!(
                    "invalid poll events {revents:?} on {}",
                    adapter.socket_path().display()
                ))
                .into());
            }
            if revents.contains(PollFlags::POLLHUP) && !revents.contains(PollFlags::POLLIN) {
                return Err(TransportError::PeerClosed.into());
            }

            if connecting {
                self.try_connect(&adapter)?;
            } else {
                self.try_intro(&adapter)?;
            }
        }
        Ok(())
    }

    /// Counters of every ready adapter followed by their sum.
    pub fn stats_report(&self) -> String {
        let mut report = String::from("STATS:\n");
        let mut total = LinkStats::default();
        for adapter in self.ready.borrow().iter().filter_map(WeakAdapter::upgrade) {
            let Some(stats) = adapter.stats() else {
                continue;
            };
            let _ = writeln!(report, "  {}: {}", adapter.socket_path().display(), stats);
            total += stats;
        }
        let _ = writeln!(report, "  TOTAL: {total}");
        report
    }
}

impl Drop for InitManager {
    fn drop(&mut self) {
        INSTANCE_EXISTS.store(false, Ordering::Release);
    }
}
