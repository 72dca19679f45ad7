//! In-memory channel for driving adapters without sockets.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use bytes::Bytes;
use cosim_core::{
    Channel, InMessage, Interest, MsgType, OutSlot, SyncClock, SyncOutcome, TransportError,
};

use crate::net::net_intro;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Sent {
    pub at_ns: u64,
    pub ty: MsgType,
    pub port: u8,
    pub payload: Vec<u8>,
}

/// What the fake peer has queued and what the adapter did.
pub(crate) struct Script {
    pub inbound: VecDeque<InMessage>,
    /// Fake peer emits a heartbeat this long after its last message.
    pub peer_heartbeat_ns: Option<u64>,
    pub peer_intro: Option<Bytes>,
    pub intro_sent: Option<Vec<u8>>,
    pub sent: Vec<Sent>,
    pub sync_polls: Vec<u64>,
    pub closed: usize,
    last_in_ts: u64,
    peer_gone: bool,
    clock: SyncClock,
    alloc_at: u64,
}

impl Script {
    pub fn push(&mut self, ts: u64, ty: u8, port: u8, payload: &[u8]) {
        self.inbound.push_back(InMessage {
            ty,
            timestamp_ns: ts,
            port,
            payload: Bytes::copy_from_slice(payload),
        });
    }

    pub fn push_packet(&mut self, ts: u64, port: u8, payload: &[u8]) {
        self.push(ts, MsgType::Packet.as_u8(), port, payload);
    }

    pub fn sent_syncs(&self) -> Vec<u64> {
        self.sent
            .iter()
            .filter(|s| s.ty == MsgType::Sync)
            .map(|s| s.at_ns)
            .collect()
    }

    fn refill(&mut self) {
        if !self.inbound.is_empty() || self.peer_gone {
            return;
        }
        if let Some(interval) = self.peer_heartbeat_ns {
            let ts = self.last_in_ts + interval;
            self.push(ts, MsgType::Sync.as_u8(), 0, &[]);
        }
    }

    fn alloc(&mut self, now_ns: u64) -> OutSlot {
        self.clock.stamp(now_ns);
        self.alloc_at = now_ns;
        OutSlot::new(self.sent.len())
    }

    fn send(&mut self, ty: MsgType, port: u8, payload: &[u8]) {
        self.sent.push(Sent {
            at_ns: self.alloc_at,
            ty,
            port,
            payload: payload.to_vec(),
        });
    }
}

pub(crate) struct ScriptedChannel {
    path: PathBuf,
    script: Rc<RefCell<Script>>,
}

impl ScriptedChannel {
    pub fn new(sync: bool, interval_ns: u64) -> (Self, Rc<RefCell<Script>>) {
        let script = Rc::new(RefCell::new(Script {
            inbound: VecDeque::new(),
            peer_heartbeat_ns: None,
            peer_intro: Some(Bytes::from(net_intro())),
            intro_sent: None,
            sent: Vec::new(),
            sync_polls: Vec::new(),
            closed: 0,
            last_in_ts: 0,
            peer_gone: false,
            clock: SyncClock::new(sync, interval_ns, 0),
            alloc_at: 0,
        }));
        let channel = Self {
            path: PathBuf::from("/scripted"),
            script: script.clone(),
        };
        (channel, script)
    }
}

impl Channel for ScriptedChannel {
    fn socket_path(&self) -> &Path {
        &self.path
    }

    fn is_listener(&self) -> bool {
        false
    }

    fn handshake_fd(&self) -> Option<(RawFd, Interest)> {
        None
    }

    fn poll_connected(&mut self) -> Result<bool, TransportError> {
        Ok(true)
    }

    fn intro_fd(&self) -> Option<RawFd> {
        None
    }

    fn intro_send(&mut self, intro: &[u8]) -> Result<(), TransportError> {
        self.script.borrow_mut().intro_sent = Some(intro.to_vec());
        Ok(())
    }

    fn intro_recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        Ok(self.script.borrow_mut().peer_intro.take())
    }

    fn sync_enabled(&self) -> bool {
        self.script.borrow().clock.sync_enabled()
    }

    fn in_poll(&mut self, now_ns: u64) -> Option<InMessage> {
        let mut script = self.script.borrow_mut();
        script.refill();
        let sync = script.clock.sync_enabled();
        let msg = script.inbound.front()?;
        if sync && msg.timestamp_ns > now_ns {
            return None;
        }
        Some(msg.clone())
    }

    fn in_done(&mut self) {
        let mut script = self.script.borrow_mut();
        if let Some(msg) = script.inbound.pop_front() {
            script.last_in_ts = msg.timestamp_ns;
            if msg.ty == MsgType::Terminate.as_u8() {
                script.peer_gone = true;
            }
        }
    }

    fn in_timestamp(&self) -> u64 {
        let mut script = self.script.borrow_mut();
        script.refill();
        script.inbound.front().map_or(0, |m| m.timestamp_ns)
    }

    fn out_alloc(&mut self, now_ns: u64) -> Option<OutSlot> {
        Some(self.script.borrow_mut().alloc(now_ns))
    }

    fn out_send(&mut self, _slot: OutSlot, ty: MsgType, port: u8, payload: &[u8]) {
        self.script.borrow_mut().send(ty, port, payload);
    }

    fn out_sync(&mut self, now_ns: u64) -> SyncOutcome {
        let mut script = self.script.borrow_mut();
        script.sync_polls.push(now_ns);
        if !script.clock.heartbeat_due(now_ns) {
            return SyncOutcome::NotDue;
        }
        script.alloc(now_ns);
        script.send(MsgType::Sync, 0, &[]);
        SyncOutcome::Sent
    }

    fn out_next_sync(&self) -> u64 {
        self.script.borrow().clock.next_sync_ns()
    }

    fn max_payload_len(&self) -> usize {
        1500
    }

    fn close(&mut self, _now_ns: u64) {
        self.script.borrow_mut().closed += 1;
    }
}
