//! Single-endpoint network device over one adapter.

use std::cell::Cell;
use std::rc::Rc;

use bytes::Bytes;
use cosim_config::LinkConfig;
use cosim_core::{fatal, Channel, InMessage, MsgType, ProtoError, Scheduler};
use tracing::info;

use crate::adapter::{Adapter, AdapterHandler};
use crate::error::SyncError;
use crate::init::InitManager;
use crate::net::{check_net_intro, net_intro, RxHook};

struct DevHandler {
    sched: Rc<dyn Scheduler>,
    rx: Rc<RxHook>,
    terminated: Cell<bool>,
}

impl AdapterHandler for DevHandler {
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
        self.rx.deliver_later(&*self.sched, msg.payload);
    }

    fn peer_terminated(&self) {
        self.terminated.set(true);
        info!("netdev peer terminated");
    }
}

pub struct NetDev {
    cfg: LinkConfig,
    adapter: Adapter,
    handler: Rc<DevHandler>,
}

impl NetDev {
    pub fn new(sched: Rc<dyn Scheduler>, cfg: LinkConfig) -> Self {
        let handler = Rc::new(DevHandler {
            sched: Rc::clone(&sched),
            rx: Rc::new(RxHook::default()),
            terminated: Cell::new(false),
        });
        let adapter = Adapter::new(sched, handler.clone());
        Self {
            cfg,
            adapter,
            handler,
        }
    }

    pub fn start(&self, init: &Rc<InitManager>) -> Result<(), SyncError> {
        self.adapter.open(init, &self.cfg)
    }

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

    pub fn set_receive_callback(&self, cb: impl FnMut(Bytes) + 'static) {
        self.handler.rx.set(Box::new(cb));
    }

    /// `Ok(false)` once the peer has terminated.
    pub fn send(&self, payload: &[u8]) -> Result<bool, SyncError> {
        if self.handler.terminated.get() {
            return Ok(false);
        }
        self.adapter.send(MsgType::Packet, 0, payload)
    }

    pub fn is_terminated(&self) -> bool {
        self.handler.terminated.get()
    }

    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedChannel;
    use cosim_core::EventLoop;
    use serial_test::serial;
    use std::cell::RefCell;

    #[test]
    #[serial(init_manager)]
    fn packets_are_delivered_and_sent_on_port_zero() {
        let init = InitManager::new().unwrap();
        let sim = EventLoop::new();
        let dev = NetDev::new(sim.clone(), LinkConfig::with_socket("/scripted"));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        dev.set_receive_callback(move |payload| s.borrow_mut().push(payload));

        let (channel, script) = ScriptedChannel::new(false, 500);
        dev.attach(&init, Box::new(channel));
        script.borrow_mut().push_packet(0, 0, b"hello");
        sim.run_until(0);

        assert_eq!(*seen.borrow(), vec![Bytes::from_static(b"hello")]);
        assert!(dev.send(b"reply").unwrap());
        let script = script.borrow();
        assert_eq!((script.sent[0].port, &script.sent[0].payload[..]), (0, &b"reply"[..]));
        assert_eq!(
            script.intro_sent.as_deref(),
            Some(&crate::net_intro()[..])
        );
    }

    #[test]
    #[serial(init_manager)]
    fn termination_stops_sending() {
        let init = InitManager::new().unwrap();
        let sim = EventLoop::new();
        let dev = NetDev::new(sim.clone(), LinkConfig::with_socket("/scripted"));
        let (channel, script) = ScriptedChannel::new(false, 500);
        dev.attach(&init, Box::new(channel));
        script.borrow_mut().push(0, MsgType::Terminate.as_u8(), 0, &[]);

        sim.run();

        assert!(dev.is_terminated());
        assert!(dev.adapter().is_terminated());
        assert!(!dev.send(b"late").unwrap());
    }
}
