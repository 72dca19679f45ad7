//! ## cosim-core::sched
//! **Single-threaded cooperative event scheduler**
//!
//! Adapters never block once the simulation runs. Instead they schedule a
//! callback at the exact virtual time they need to act again and yield back
//! to the loop, so every other simulated entity keeps progressing.

use std::cell::{Cell, RefCell};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::rc::Rc;

use tracing::trace;

use crate::time::VirtualClock;

/// Handle to a scheduled event, used for cancellation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(u64);

/// A callback run by the scheduler at its due time.
pub type Event = Box<dyn FnOnce()>;

/// The host simulator's scheduling surface.
pub trait Scheduler {
    /// Current virtual time in nanoseconds.
    fn now_ns(&self) -> u64;

    /// Runs `event` once `delay_ns` of virtual time has elapsed.
    fn schedule(&self, delay_ns: u64, event: Event) -> EventId;

    /// Prevents a pending event from running. Cancelling an event that
    /// already ran or was cancelled is a no-op.
    fn cancel(&self, id: EventId);
}

/// Discrete-event loop backed by a min-heap of `(time, sequence)` keys.
///
/// Events due at the same instant run in the order they were scheduled.
pub struct EventLoop {
    clock: VirtualClock,
    queue: RefCell<BinaryHeap<Reverse<(u64, u64)>>>,
    pending: RefCell<HashMap<u64, Event>>,
    next_seq: Cell<u64>,
}

impl EventLoop {
    pub fn new() -> Rc<Self> {
        Self::with_clock(VirtualClock::new(0))
    }

    pub fn with_clock(clock: VirtualClock) -> Rc<Self> {
        Rc::new(Self {
            clock,
            queue: RefCell::new(BinaryHeap::new()),
            pending: RefCell::new(HashMap::new()),
            next_seq: Cell::new(0),
        })
    }

    pub fn clock(&self) -> &VirtualClock {
        &self.clock
    }

    /// Number of events still waiting to run.
    pub fn pending_events(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Due time of the earliest live event.
    pub fn next_event_time(&self) -> Option<u64> {
        let mut queue = self.queue.borrow_mut();
        let pending = self.pending.borrow();
        while let Some(Reverse((ts, seq))) = queue.peek().copied() {
            if pending.contains_key(&seq) {
                return Some(ts);
            }
            queue.pop();
        }
        None
    }

    /// Runs the earliest live event. Returns `false` once the queue is empty.
    pub fn step(&self) -> bool {
        let next = loop {
            let Some(Reverse((ts, seq))) = self.queue.borrow_mut().pop() else {
                return false;
            };
            if let Some(event) = self.pending.borrow_mut().remove(&seq) {
                break (ts, event);
            }
        };

        let (ts, event) = next;
        self.clock.advance_to(ts);
        // No borrow is held here: the event is free to schedule and cancel.
        event();
        true
    }

    /// Runs until no events remain.
    pub fn run(&self) {
        while self.step() {}
    }

    /// Runs every event due at or before `end_ns`, then parks the clock at
    /// `end_ns`. Later events stay queued.
    pub fn run_until(&self, end_ns: u64) {
        while let Some(ts) = self.next_event_time() {
            if ts > end_ns {
                break;
            }
            self.step();
        }
        self.clock.advance_to(end_ns);
    }
}

impl Scheduler for EventLoop {
    fn now_ns(&self) -> u64 {
        self.clock.now_ns()
    }

    fn schedule(&self, delay_ns: u64, event: Event) -> EventId {
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);

        let due = self.clock.now_ns().saturating_add(delay_ns);
        trace!(seq, due, "event scheduled");
        self.queue.borrow_mut().push(Reverse((due, seq)));
        self.pending.borrow_mut().insert(seq, event);
        EventId(seq)
    }

    fn cancel(&self, id: EventId) {
        if self.pending.borrow_mut().remove(&id.0).is_some() {
            trace!(seq = id.0, "event cancelled");
        }
    }
}
