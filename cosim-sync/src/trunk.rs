//! ## cosim-sync::trunk
//! **Many logical ports over one adapter**
//!
//! A [`Trunk`] shares one channel, one sync mode and one heartbeat schedule
//! between up to [`MAX_TRUNK_PORTS`] ports. Outbound packets carry the
//! sending port's index in the slot header; inbound packets are routed by
//! it. A port index the trunk never allocated means the two sides disagree
//! on the port map, which is fatal.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use bytes::Bytes;
use cosim_config::{LinkConfig, MAX_TRUNK_PORTS};
use cosim_core::{
    fatal, AdapterStats, Channel, InMessage, Instrumentation, MsgType, ProtoError, Scheduler,
};
use tracing::{debug, info};

use crate::adapter::{Adapter, AdapterHandler};
use crate::error::SyncError;
use crate::init::InitManager;
use crate::net::{check_net_intro, net_intro, RxHook};

struct PortState {
    index: u8,
    address: Cell<[u8; 6]>,
    rx: Rc<RxHook>,
}

/// Inbound demultiplexer installed as the trunk adapter's handler.
struct PortTable {
    sched: Rc<dyn Scheduler>,
    ports: RefCell<Vec<Rc<PortState>>>,
}

impl AdapterHandler for PortTable {
    fn intro_out_prepare(&self) -> Vec<u8> {
        net_intro()
    }

    fn intro_in_received(&self, intro: &[u8]) -> Result<(), SyncError> {
        check_net_intro(intro)
    }

    fn handle_in_msg(&self, msg: InMessage) {
        if msg.ty != MsgType::Packet.as_u8() {
            fatal(ProtoError::UnknownType(msg.ty));
        }

        let port = {
            let ports = self.ports.borrow();
            match ports.get(msg.port as usize) {
                Some(port) => Rc::clone(port),
                None => fatal(format!(
                    "received packet for port {} but only {} ports exist",
                    msg.port,
                    ports.len()
                )),
            }
        };
        port.rx.deliver_later(&*self.sched, msg.payload);
    }

    fn peer_terminated(&self) {
        info!(ports = self.ports.borrow().len(), "trunk peer terminated");
    }
}

pub struct Trunk {
    cfg: LinkConfig,
    adapter: Adapter,
    table: Rc<PortTable>,
}

impl Trunk {
    pub fn new(sched: Rc<dyn Scheduler>, cfg: LinkConfig) -> Self {
        Self::with_instrumentation(sched, cfg, Rc::new(AdapterStats::new()))
    }

    pub fn with_instrumentation(
        sched: Rc<dyn Scheduler>,
        cfg: LinkConfig,
        instr: Rc<dyn Instrumentation>,
    ) -> Self {
        let table = Rc::new(PortTable {
            sched: Rc::clone(&sched),
            ports: RefCell::new(Vec::new()),
        });
        let adapter = Adapter::with_instrumentation(sched, table.clone(), instr);
        Self {
            cfg,
            adapter,
            table,
        }
    }

    /// Connects or listens as configured. The link becomes usable once the
    /// scheduled start has run.
    pub fn start(&self, init: &Rc<InitManager>) -> Result<(), SyncError> {
        info!(
            path = %self.cfg.socket_path,
            listen = self.cfg.listen,
            ports = self.port_count(),
            "starting trunk"
        );
        self.adapter.open(init, &self.cfg)
    }

    /// Like [`Trunk::start`] over a caller-supplied channel.
    pub fn attach(&self, init: &Rc<InitManager>, channel: Box<dyn Channel>) {
        self.adapter.apply_config(&self.cfg);
        self.adapter.attach(init, channel);
    }

    pub fn stop(&self) {
        self.adapter.stop();
    }

    /// Stops and sends the peer a termination notice.
    pub fn close(&self) {
        self.adapter.close();
    }

    /// Allocates the next port, or `None` once every port index is taken.
    pub fn add_port(&self) -> Option<TrunkPort> {
        let mut ports = self.table.ports.borrow_mut();
        if ports.len() >= MAX_TRUNK_PORTS as usize {
            return None;
        }

        let state = Rc::new(PortState {
            index: ports.len() as u8,
            address: Cell::new([0; 6]),
            rx: Rc::new(RxHook::default()),
        });
        ports.push(state.clone());
        debug!(port = state.index, "trunk port added");
        Some(TrunkPort {
            state,
            adapter: self.adapter.clone(),
        })
    }

    pub fn port_count(&self) -> usize {
        self.table.ports.borrow().len()
    }

    /// Sends `payload` tagged with `port`.
    pub fn send(&self, payload: &[u8], port: u8) -> Result<bool, SyncError> {
        self.adapter.send(MsgType::Packet, port, payload)
    }

    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    pub fn config(&self) -> &LinkConfig {
        &self.cfg
    }
}

/// One logical endpoint of a [`Trunk`].
#[derive(Clone)]
pub struct TrunkPort {
    state: Rc<PortState>,
    adapter: Adapter,
}

impl TrunkPort {
    pub fn index(&self) -> u8 {
        self.state.index
    }

    pub fn address(&self) -> [u8; 6] {
        self.state.address.get()
    }

    pub fn set_address(&self, address: [u8; 6]) {
        self.state.address.set(address);
    }

    /// Installs the callback inbound packets for this port are handed to.
    pub fn set_receive_callback(&self, cb: impl FnMut(Bytes) + 'static) {
        self.state.rx.set(Box::new(cb));
    }

    /// `Ok(false)` once the peer has terminated.
    pub fn send(&self, payload: &[u8]) -> Result<bool, SyncError> {
        if self.adapter.is_terminated() {
            return Ok(false);
        }
        self.adapter.send(MsgType::Packet, self.state.index, payload)
    }

    pub fn is_terminated(&self) -> bool {
        self.adapter.is_terminated()
    }
}
