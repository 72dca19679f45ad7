//! Pieces shared by the network-facing adapter handlers.

use std::cell::RefCell;
use std::rc::Rc;

use bytes::Bytes;
use cosim_core::Scheduler;
use tracing::trace;

use crate::error::SyncError;

/// Size of the network intro both sides exchange.
pub const NET_INTRO_LEN: usize = 64;
const NET_INTRO_TAG: &[u8; 8] = b"COSIMNET";

/// The intro this side sends: a tag followed by zero padding.
pub fn net_intro() -> Vec<u8> {
    let mut intro = vec![0u8; NET_INTRO_LEN];
    intro[..NET_INTRO_TAG.len()].copy_from_slice(NET_INTRO_TAG);
    intro
}

pub fn check_net_intro(intro: &[u8]) -> Result<(), SyncError> {
    if intro.len() != NET_INTRO_LEN {
        return Err(SyncError::IntroMismatch {
            expected: NET_INTRO_LEN,
            got: intro.len(),
        });
    }
    if !intro.starts_with(NET_INTRO_TAG) {
        return Err(SyncError::IntroTag);
    }
    Ok(())
}

pub type RxCallback = Box<dyn FnMut(Bytes)>;

/// A replaceable receive callback.
#[derive(Default)]
pub(crate) struct RxHook {
    cb: RefCell<Option<RxCallback>>,
}

impl RxHook {
    pub(crate) fn set(&self, cb: RxCallback) {
        *self.cb.borrow_mut() = Some(cb);
    }

    pub(crate) fn deliver(&self, payload: Bytes) {
        // Taken out for the call so the callback may replace itself.
        let Some(mut cb) = self.cb.borrow_mut().take() else {
            trace!(len = payload.len(), "no receive callback, dropping");
            return;
        };
        cb(payload);
        let mut slot = self.cb.borrow_mut();
        if slot.is_none() {
            *slot = Some(cb);
        }
    }

    /// Hands `payload` to the callback from a fresh zero-delay event, outside
    /// the adapter's poll loop.
    pub(crate) fn deliver_later(self: &Rc<Self>, sched: &dyn Scheduler, payload: Bytes) {
        let hook = Rc::clone(self);
        sched.schedule(0, Box::new(move || hook.deliver(payload)));
    }
}
