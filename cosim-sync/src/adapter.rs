//! ## cosim-sync::adapter
//! **Per-link poll and heartbeat engine**
//!
//! An [`Adapter`] owns one [`Channel`] and drives it entirely from scheduled
//! events:
//!
//! - the poll event drains every deliverable message, then in synchronized
//!   mode re-arms itself exactly at the peer's next timestamp bound, or after
//!   a fixed interval when free-running
//! - the heartbeat event keeps the peer's bound moving when no data flows
//!
//! Local virtual time never passes an inbound timestamp that has not been
//! consumed. Message semantics are left to the injected [`AdapterHandler`].

use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};
use std::rc::{Rc, Weak};

use cosim_config::LinkConfig;
use cosim_core::{
    fatal, AdapterStats, Channel, ChannelParams, EventId, InMessage, Instrumentation, LinkStats,
    MsgType, OutSlot, Scheduler, SyncMode, SyncOutcome, TransportError,
};
use cosim_transport::ShmChannel;
use tracing::{debug, info, trace};

use crate::error::SyncError;
use crate::init::InitManager;

/// Free-running poll interval used until configured otherwise.
pub const DEFAULT_POLL_INTERVAL_NS: u64 = 500;

/// Message-level behavior plugged into an [`Adapter`].
pub trait AdapterHandler {
    /// Intro payload sent to the peer once the channel is connected.
    fn intro_out_prepare(&self) -> Vec<u8> {
        Vec::new()
    }

    /// Validates the peer's intro. An error aborts bring-up.
    fn intro_in_received(&self, _intro: &[u8]) -> Result<(), SyncError> {
        Ok(())
    }

    /// Every inbound message other than heartbeats and termination notices.
    fn handle_in_msg(&self, msg: InMessage);

    fn peer_terminated(&self) {}
}

/// Accepts any intro and drops every message.
#[derive(Debug, Default)]
pub struct NullHandler;

impl AdapterHandler for NullHandler {
    fn handle_in_msg(&self, msg: InMessage) {
        trace!(ty = msg.ty, len = msg.payload.len(), "message ignored");
    }
}

pub(crate) struct AdapterInner {
    sched: Rc<dyn Scheduler>,
    handler: Rc<dyn AdapterHandler>,
    instr: Rc<dyn Instrumentation>,
    channel: RefCell<Option<Box<dyn Channel>>>,
    init: RefCell<Weak<InitManager>>,

    sync: Cell<bool>,
    sync_configured: Cell<bool>,
    poll_interval_ns: Cell<u64>,
    reschedule_sync_tx: Cell<bool>,

    started: Cell<bool>,
    ready: Cell<bool>,
    stopped: Cell<bool>,
    terminated: Cell<bool>,
    in_event: Cell<Option<EventId>>,
    out_sync_event: Cell<Option<EventId>>,
}

/// Handle to a synchronization adapter. Clones share the same link.
#[derive(Clone)]
pub struct Adapter {
    inner: Rc<AdapterInner>,
}

/// Non-owning handle, for callbacks that must not keep the link alive.
#[derive(Clone)]
pub struct WeakAdapter {
    inner: Weak<AdapterInner>,
}

impl WeakAdapter {
    pub fn upgrade(&self) -> Option<Adapter> {
        self.inner.upgrade().map(|inner| Adapter { inner })
    }
}

impl Adapter {
    pub fn new(sched: Rc<dyn Scheduler>, handler: Rc<dyn AdapterHandler>) -> Self {
        Self::with_instrumentation(sched, handler, Rc::new(AdapterStats::new()))
    }

    pub fn with_instrumentation(
        sched: Rc<dyn Scheduler>,
        handler: Rc<dyn AdapterHandler>,
        instr: Rc<dyn Instrumentation>,
    ) -> Self {
        Self {
            inner: Rc::new(AdapterInner {
                sched,
                handler,
                instr,
                channel: RefCell::new(None),
                init: RefCell::new(Weak::new()),
                sync: Cell::new(false),
                sync_configured: Cell::new(false),
                poll_interval_ns: Cell::new(DEFAULT_POLL_INTERVAL_NS),
                reschedule_sync_tx: Cell::new(false),
                started: Cell::new(false),
                ready: Cell::new(false),
                stopped: Cell::new(false),
                terminated: Cell::new(false),
                in_event: Cell::new(None),
                out_sync_event: Cell::new(None),
            }),
        }
    }

    /// Overrides the mode passed to [`Adapter::connect`] and
    /// [`Adapter::listen`]: `false` forces `Disabled`, `true` upgrades
    /// `Disabled` to `Required`.
    pub fn cfg_set_sync(&self, sync: bool) {
        self.inner.sync.set(sync);
        self.inner.sync_configured.set(true);
    }

    pub fn cfg_set_poll_interval(&self, interval_ns: u64) {
        self.inner.poll_interval_ns.set(interval_ns);
    }

    pub fn cfg_set_reschedule_sync_tx(&self, enabled: bool) {
        self.inner.reschedule_sync_tx.set(enabled);
    }

    pub fn apply_config(&self, cfg: &LinkConfig) {
        self.cfg_set_sync(cfg.sync_requested());
        self.cfg_set_poll_interval(cfg.poll_delay_ns());
        self.cfg_set_reschedule_sync_tx(cfg.reschedule_sync_tx);
    }

    /// Applies `cfg` and connects or listens as it says.
    pub fn open(&self, init: &Rc<InitManager>, cfg: &LinkConfig) -> Result<(), SyncError> {
        self.apply_config(cfg);
        let params = cfg.channel_params();
        if cfg.listen {
            self.listen(init, params, &cfg.resolved_shm_path())
        } else {
            self.connect(init, params)
        }
    }

    /// Starts connecting to the peer. Returns before the link is usable.
    ///
    /// `params.sync_mode` is requested as given unless
    /// [`Adapter::cfg_set_sync`] was called.
    pub fn connect(&self, init: &Rc<InitManager>, mut params: ChannelParams) -> Result<(), SyncError> {
        params.sync_mode = self.requested_mode(params.sync_mode);
        let channel = ShmChannel::connect(params)?;
        self.attach(init, Box::new(channel));
        Ok(())
    }

    /// Starts listening for the peer, creating the pool at `shm_path`.
    /// The sync mode is resolved as for [`Adapter::connect`].
    pub fn listen(
        &self,
        init: &Rc<InitManager>,
        mut params: ChannelParams,
        shm_path: &Path,
    ) -> Result<(), SyncError> {
        params.sync_mode = self.requested_mode(params.sync_mode);
        let channel = ShmChannel::listen(params, shm_path)?;
        self.attach(init, Box::new(channel));
        Ok(())
    }

    fn requested_mode(&self, mode: SyncMode) -> SyncMode {
        if !self.inner.sync_configured.get() {
            return mode;
        }
        match (self.inner.sync.get(), mode) {
            (false, _) => SyncMode::Disabled,
            (true, SyncMode::Disabled) => SyncMode::Required,
            (true, mode) => mode,
        }
    }

    /// Takes ownership of `channel`, registers with `init` and schedules
    /// [`Adapter::start`] at the current time.
    pub fn attach(&self, init: &Rc<InitManager>, channel: Box<dyn Channel>) {
        *self.inner.channel.borrow_mut() = Some(channel);
        *self.inner.init.borrow_mut() = Rc::downgrade(init);
        init.register_adapter(self);

        let weak = self.downgrade();
        self.inner.sched.schedule(
            0,
            Box::new(move || {
                if let Some(adapter) = weak.upgrade() {
                    if let Err(e) = adapter.start() {
                        fatal(e);
                    }
                }
            }),
        );
    }

    /// Waits for the handshake to finish, then arms the poll event and, when
    /// synchronized, the heartbeat event. Runs once; later calls do nothing.
    pub fn start(&self) -> Result<(), SyncError> {
        let inner = &self.inner;
        if inner.started.replace(true) {
            return Ok(());
        }

        let init = inner.init.borrow().upgrade().ok_or(SyncError::NotRegistered)?;
        init.wait_ready(self)?;

        // The negotiated mode wins over what was requested.
        let sync = self.with_channel(|c| c.sync_enabled()).unwrap_or(false);
        inner.sync.set(sync);
        inner.ready.set(true);
        info!(path = %self.socket_path().display(), sync, "adapter ready");

        if inner.stopped.get() {
            return Ok(());
        }
        if sync {
            self.schedule_out_sync(0);
        }
        self.schedule_in(0);
        Ok(())
    }

    /// Cancels both pending events. Idempotent.
    pub fn stop(&self) {
        let inner = &self.inner;
        inner.stopped.set(true);
        if let Some(id) = inner.out_sync_event.take() {
            inner.sched.cancel(id);
        }
        if let Some(id) = inner.in_event.take() {
            inner.sched.cancel(id);
        }
        debug!(path = %self.socket_path().display(), "adapter stopped");
    }

    /// Stops the adapter and tells the peer this side is done.
    pub fn close(&self) {
        self.stop();
        let now = self.inner.sched.now_ns();
        self.with_channel(|c| c.close(now));
    }

    /// Consumes one deliverable message. Returns `false` if none was ready.
    pub fn poll(&self, now_ns: u64) -> bool {
        let msg = {
            let mut guard = self.inner.channel.borrow_mut();
            let Some(channel) = guard.as_deref_mut() else {
                return false;
            };
            let Some(msg) = channel.in_poll(now_ns) else {
                return false;
            };
            channel.in_done();
            msg
        };

        let ty = msg.msg_type();
        if let Ok(ty) = ty {
            self.inner.instr.message_received(ty, msg.payload.len());
        }
        match ty {
            Ok(MsgType::Sync) => trace!(ts = msg.timestamp_ns, "heartbeat received"),
            Ok(MsgType::Terminate) => self.peer_terminated(),
            _ => self.inner.handler.handle_in_msg(msg),
        }
        true
    }

    fn process_in_event(&self) {
        let inner = &self.inner;
        inner.in_event.set(None);
        if inner.stopped.get() {
            return;
        }

        let now = inner.sched.now_ns();
        while self.poll(now) {}

        if inner.terminated.get() {
            return;
        }

        let delay = if inner.sync.get() {
            // Block until the peer's bound moves past `now`.
            let mut spins = 0u64;
            let next = loop {
                let next = self.in_timestamp();
                if next > now || inner.terminated.get() {
                    break next;
                }
                if !self.poll(now) {
                    spins += 1;
                    std::hint::spin_loop();
                }
            };
            if spins > 0 {
                inner.instr.rx_wait_spins(spins);
            }
            if inner.terminated.get() {
                return;
            }
            trace!(now, next, "waiting for peer bound");
            next - now
        } else {
            inner.poll_interval_ns.get()
        };

        if !inner.stopped.get() {
            self.schedule_in(delay);
        }
    }

    fn process_out_sync_event(&self) {
        let inner = &self.inner;
        inner.out_sync_event.set(None);
        if inner.terminated.get() || inner.stopped.get() {
            return;
        }

        let now = inner.sched.now_ns();
        let mut spins = 0u64;
        loop {
            match self.with_channel(|c| c.out_sync(now)) {
                Some(SyncOutcome::Full) => {
                    spins += 1;
                    std::hint::spin_loop();
                }
                Some(SyncOutcome::Sent) => {
                    inner.instr.message_sent(MsgType::Sync, 0);
                    break;
                }
                Some(SyncOutcome::NotDue) | None => break,
            }
        }
        if spins > 0 {
            inner.instr.tx_alloc_spins(spins);
        }

        let next = self.with_channel(|c| c.out_next_sync()).unwrap_or(now);
        self.schedule_out_sync(next.saturating_sub(now));
    }

    /// Moves the pending heartbeat to the channel's current deadline.
    fn reschedule_sync(&self) {
        let inner = &self.inner;
        if inner.terminated.get() || inner.stopped.get() {
            return;
        }
        let now = inner.sched.now_ns();
        let next = self.with_channel(|c| c.out_next_sync()).unwrap_or(now);
        self.schedule_out_sync(next.saturating_sub(now));
    }

    /// Marks the peer as gone. No heartbeat is scheduled afterwards; the
    /// pending poll still delivers what is already queued.
    pub fn peer_terminated(&self) {
        let inner = &self.inner;
        if inner.terminated.replace(true) {
            return;
        }
        if let Some(id) = inner.out_sync_event.take() {
            inner.sched.cancel(id);
        }
        info!(path = %self.socket_path().display(), "peer terminated");
        inner.handler.peer_terminated();
    }

    fn schedule_in(&self, delay_ns: u64) {
        let weak = self.downgrade();
        let id = self.inner.sched.schedule(
            delay_ns,
            Box::new(move || {
                if let Some(adapter) = weak.upgrade() {
                    adapter.process_in_event();
                }
            }),
        );
        if let Some(old) = self.inner.in_event.replace(Some(id)) {
            self.inner.sched.cancel(old);
        }
    }

    fn schedule_out_sync(&self, delay_ns: u64) {
        let weak = self.downgrade();
        let id = self.inner.sched.schedule(
            delay_ns,
            Box::new(move || {
                if let Some(adapter) = weak.upgrade() {
                    adapter.process_out_sync_event();
                }
            }),
        );
        if let Some(old) = self.inner.out_sync_event.replace(Some(id)) {
            self.inner.sched.cancel(old);
        }
    }

    /// Reserves an outbound slot, spinning while the ring is full.
    ///
    /// `None` once the peer has terminated or before the link is ready.
    pub fn out_alloc(&self) -> Option<OutSlot> {
        let inner = &self.inner;
        if inner.terminated.get() || !inner.ready.get() {
            return None;
        }

        let now = inner.sched.now_ns();
        let mut spins = 0u64;
        let slot = loop {
            match self.with_channel(|c| c.out_alloc(now))? {
                Some(slot) => break slot,
                None => {
                    spins += 1;
                    std::hint::spin_loop();
                }
            }
        };
        if spins > 0 {
            inner.instr.tx_alloc_spins(spins);
        }
        Some(slot)
    }

    /// Publishes a slot from [`Adapter::out_alloc`].
    pub fn out_send(
        &self,
        slot: OutSlot,
        ty: MsgType,
        port: u8,
        payload: &[u8],
    ) -> Result<(), SyncError> {
        let max = self.max_payload_len();
        if payload.len() > max {
            return Err(SyncError::PayloadTooLarge {
                len: payload.len(),
                max,
            });
        }

        self.with_channel(|c| c.out_send(slot, ty, port, payload))
            .ok_or(TransportError::NotConnected)?;
        self.inner.instr.message_sent(ty, payload.len());
        trace!(?ty, port, len = payload.len(), "message sent");

        if self.inner.sync.get() && self.inner.reschedule_sync_tx.get() {
            self.reschedule_sync();
        }
        Ok(())
    }

    /// Allocates, fills and sends one message. `Ok(false)` if the link can
    /// no longer carry traffic.
    pub fn send(&self, ty: MsgType, port: u8, payload: &[u8]) -> Result<bool, SyncError> {
        let max = self.max_payload_len();
        if payload.len() > max {
            return Err(SyncError::PayloadTooLarge {
                len: payload.len(),
                max,
            });
        }
        let Some(slot) = self.out_alloc() else {
            return Ok(false);
        };
        self.out_send(slot, ty, port, payload)?;
        Ok(true)
    }

    /// Timestamp of the next queued inbound message, 0 if none.
    pub fn in_timestamp(&self) -> u64 {
        self.with_channel(|c| c.in_timestamp()).unwrap_or(0)
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.terminated.get()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.get()
    }

    pub fn is_sync(&self) -> bool {
        self.inner.sync.get()
    }

    pub fn socket_path(&self) -> PathBuf {
        self.with_channel(|c| c.socket_path().to_path_buf())
            .unwrap_or_default()
    }

    pub fn max_payload_len(&self) -> usize {
        self.with_channel(|c| c.max_payload_len()).unwrap_or(0)
    }

    /// Counters from the adapter's instrumentation, if it keeps any.
    pub fn stats(&self) -> Option<LinkStats> {
        self.inner.instr.snapshot()
    }

    pub fn downgrade(&self) -> WeakAdapter {
        WeakAdapter {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub(crate) fn ptr_eq(&self, other: &Adapter) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn handler(&self) -> &Rc<dyn AdapterHandler> {
        &self.inner.handler
    }

    pub(crate) fn with_channel<R>(&self, f: impl FnOnce(&mut dyn Channel) -> R) -> Option<R> {
        let mut guard = self.inner.channel.borrow_mut();
        match guard.as_deref_mut() {
            Some(channel) => Some(f(channel)),
            None => None,
        }
    }
}

impl Drop for AdapterInner {
    fn drop(&mut self) {
        for id in [self.in_event.take(), self.out_sync_event.take()]
            .into_iter()
            .flatten()
        {
            self.sched.cancel(id);
        }
        let now = self.sched.now_ns();
        if let Some(channel) = self.channel.get_mut() {
            channel.close(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Script, ScriptedChannel};
    use cosim_core::EventLoop;
    use proptest::prelude::*;
    use proptest::test_runner::{Config, TestRunner};
    use serial_test::serial;
    use tracing_test::traced_test;

    struct Recorder {
        sim: Rc<EventLoop>,
        delivered: RefCell<Vec<(u64, InMessage)>>,
        terminations: Cell<u32>,
    }

    impl AdapterHandler for Recorder {
        fn handle_in_msg(&self, msg: InMessage) {
            self.delivered.borrow_mut().push((self.sim.now_ns(), msg));
        }

        fn peer_terminated(&self) {
            self.terminations.set(self.terminations.get() + 1);
        }
    }

    struct Fixture {
        sim: Rc<EventLoop>,
        init: Rc<InitManager>,
        adapter: Adapter,
        recorder: Rc<Recorder>,
        script: Rc<RefCell<Script>>,
    }

    fn fixture(sync: bool, interval_ns: u64) -> Fixture {
        let sim = EventLoop::new();
        let init = InitManager::new().unwrap();
        let recorder = Rc::new(Recorder {
            sim: sim.clone(),
            delivered: RefCell::new(Vec::new()),
            terminations: Cell::new(0),
        });
        let adapter = Adapter::new(sim.clone(), recorder.clone());
        let (channel, script) = ScriptedChannel::new(sync, interval_ns);
        adapter.cfg_set_sync(sync);
        adapter.attach(&init, Box::new(channel));
        Fixture {
            sim,
            init,
            adapter,
            recorder,
            script,
        }
    }

    #[test]
    #[serial(init_manager)]
    fn free_running_ignores_peer_timestamps() {
        let f = fixture(false, 500);
        f.adapter.cfg_set_poll_interval(100);
        f.script.borrow_mut().push_packet(5_000, 0, b"early");

        f.sim.run_until(1_000);

        let delivered = f.recorder.delivered.borrow();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, 0);
        assert!(f.script.borrow().sent_syncs().is_empty());
        assert_eq!(f.sim.next_event_time(), Some(1_100));
    }

    #[test]
    #[serial(init_manager)]
    fn synchronized_delivery_happens_exactly_at_message_time() {
        let mut runner = TestRunner::new(Config {
            cases: 32,
            ..Config::default()
        });
        runner
            .run(
                &(proptest::collection::vec(1u64..20_000, 1..16), 50u64..1_000),
                |(mut stamps, heartbeat)| {
                    stamps.sort_unstable();
                    let f = fixture(true, 500);
                    {
                        let mut script = f.script.borrow_mut();
                        script.peer_heartbeat_ns = Some(heartbeat);
                        for (i, ts) in stamps.iter().enumerate() {
                            script.push_packet(*ts, 0, &[i as u8]);
                        }
                    }

                    f.sim.run_until(stamps[stamps.len() - 1] + 1);

                    let delivered = f.recorder.delivered.borrow();
                    prop_assert_eq!(delivered.len(), stamps.len());
                    for (i, (now, msg)) in delivered.iter().enumerate() {
                        prop_assert_eq!(*now, msg.timestamp_ns);
                        prop_assert_eq!(&msg.payload[..], &[i as u8][..]);
                    }
                    Ok(())
                },
            )
            .unwrap();
    }

    #[test]
    #[serial(init_manager)]
    fn heartbeats_are_never_more_than_the_interval_apart() {
        let f = fixture(true, 500);
        f.script.borrow_mut().peer_heartbeat_ns = Some(250);

        f.sim.run_until(10_000);

        let syncs = f.script.borrow().sent_syncs();
        assert_eq!(syncs.first(), Some(&0));
        assert!(syncs.len() >= 20);
        assert!(syncs.windows(2).all(|w| w[1] - w[0] <= 500));
    }

    fn send_at(f: &Fixture, at_ns: u64) {
        let adapter = f.adapter.clone();
        f.sim.schedule(
            at_ns,
            Box::new(move || {
                assert!(adapter.send(MsgType::Packet, 0, b"data").unwrap());
            }),
        );
    }

    #[test]
    #[serial(init_manager)]
    fn data_send_pushes_back_the_next_heartbeat() {
        let f = fixture(true, 500);
        f.script.borrow_mut().peer_heartbeat_ns = Some(100);
        f.adapter.cfg_set_reschedule_sync_tx(true);
        send_at(&f, 200);

        f.sim.run_until(1_000);

        let script = f.script.borrow();
        assert_eq!(script.sync_polls, vec![0, 700]);
        assert_eq!(script.sent_syncs(), vec![0, 700]);
    }

    #[test]
    #[serial(init_manager)]
    fn recent_traffic_suppresses_a_due_heartbeat() {
        let f = fixture(true, 500);
        f.script.borrow_mut().peer_heartbeat_ns = Some(100);
        send_at(&f, 200);

        f.sim.run_until(1_000);

        let script = f.script.borrow();
        assert_eq!(script.sync_polls, vec![0, 500, 700]);
        assert_eq!(script.sent_syncs(), vec![0, 700]);
    }

    #[test]
    #[serial(init_manager)]
    fn termination_stops_heartbeats_and_allocation() {
        let f = fixture(true, 500);
        {
            let mut script = f.script.borrow_mut();
            script.push_packet(150, 0, b"before");
            script.push(200, MsgType::Terminate.as_u8(), 0, &[]);
            script.push(250, MsgType::Terminate.as_u8(), 0, &[]);
            script.push_packet(300, 0, b"after");
        }

        f.sim.run();

        assert!(f.adapter.is_terminated());
        assert_eq!(f.recorder.terminations.get(), 1);
        assert_eq!(f.recorder.delivered.borrow().len(), 1);
        assert_eq!(f.sim.pending_events(), 0);
        assert!(f.script.borrow().sync_polls.iter().all(|t| *t < 200));

        f.adapter.peer_terminated();
        assert_eq!(f.recorder.terminations.get(), 1);
        assert!(f.adapter.out_alloc().is_none());
        assert!(!f.adapter.send(MsgType::Packet, 0, b"late").unwrap());
    }

    #[test]
    #[serial(init_manager)]
    fn stop_cancels_pending_events() {
        let f = fixture(true, 500);
        f.script.borrow_mut().peer_heartbeat_ns = Some(100);
        f.sim.run_until(250);
        assert!(f.sim.pending_events() > 0);

        f.adapter.stop();
        f.adapter.stop();
        assert_eq!(f.sim.pending_events(), 0);
    }

    #[test]
    #[serial(init_manager)]
    fn nothing_can_be_sent_before_ready() {
        let f = fixture(false, 500);
        assert!(!f.adapter.is_ready());
        assert!(f.adapter.out_alloc().is_none());

        f.sim.run_until(0);
        assert!(f.adapter.is_ready());
        assert!(f.adapter.send(MsgType::Packet, 3, b"ok").unwrap());
    }

    #[test]
    #[serial(init_manager)]
    fn oversized_payload_is_rejected() {
        let f = fixture(false, 500);
        f.sim.run_until(0);
        assert!(matches!(
            f.adapter.send(MsgType::Packet, 0, &[0u8; 1501]),
            Err(SyncError::PayloadTooLarge { len: 1501, max: 1500 })
        ));
    }

    #[test]
    #[serial(init_manager)]
    fn counters_track_traffic() {
        let f = fixture(true, 500);
        f.script.borrow_mut().peer_heartbeat_ns = Some(400);
        send_at(&f, 100);
        f.sim.run_until(1_000);

        let stats = f.adapter.stats().unwrap();
        assert_eq!(stats.packets_tx, 1);
        assert_eq!(stats.bytes_tx, 4);
        assert_eq!(stats.syncs_tx, f.script.borrow().sent_syncs().len() as u64);
        assert!(stats.syncs_rx >= 2);
    }

    #[test]
    #[serial(init_manager)]
    fn dropping_the_last_handle_closes_the_channel() {
        let f = fixture(false, 500);
        f.sim.run_until(0);
        let Fixture {
            sim,
            init,
            adapter,
            script,
            ..
        } = f;

        drop(adapter);
        assert_eq!(script.borrow().closed, 1);
        sim.run_until(10_000);
        drop(init);
    }

    #[traced_test]
    #[test]
    #[serial(init_manager)]
    fn readiness_is_logged() {
        let f = fixture(false, 500);
        f.sim.run_until(0);
        assert!(logs_contain("adapter ready"));
        assert_eq!(
            f.init.state_of(&f.adapter),
            Some(crate::init::InitState::Ready)
        );
    }

    #[test]
    fn requested_mode_follows_params_until_sync_is_configured() {
        let adapter = Adapter::new(EventLoop::new(), Rc::new(NullHandler));
        for mode in [SyncMode::Disabled, SyncMode::Required, SyncMode::Optional] {
            assert_eq!(adapter.requested_mode(mode), mode);
        }

        adapter.cfg_set_sync(false);
        assert_eq!(adapter.requested_mode(SyncMode::Required), SyncMode::Disabled);

        adapter.cfg_set_sync(true);
        assert_eq!(adapter.requested_mode(SyncMode::Disabled), SyncMode::Required);
        assert_eq!(adapter.requested_mode(SyncMode::Optional), SyncMode::Optional);
    }
}
