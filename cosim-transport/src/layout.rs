//! ## cosim-transport::layout
//! **Slotted single-producer single-consumer ring in shared memory**
//!
//! Every slot is `entry_size` bytes: a 64-byte header followed by payload.
//!
//! | offset | field                                   |
//! |--------|-----------------------------------------|
//! | 0      | timestamp, `u64` little endian          |
//! | 8      | payload length, `u16` little endian     |
//! | 10     | port, `u8`                              |
//! | 63     | owner bit `0x80` plus 7-bit message type |
//!
//! The owner byte is the only field accessed atomically. A producer fills
//! the slot, then publishes it by storing `type | OWN_CONSUMER` with release
//! ordering; the consumer acquires it, reads, and hands the slot back by
//! storing zero.

use std::ptr;
use std::sync::atomic::{AtomicU8, Ordering};

use bytes::Bytes;

pub const HEADER_LEN: usize = 64;

const OFF_TIMESTAMP: usize = 0;
const OFF_LEN: usize = 8;
const OFF_PORT: usize = 10;
const OFF_OWN_TYPE: usize = HEADER_LEN - 1;

/// Set while the slot belongs to the consumer.
pub const OWN_CONSUMER: u8 = 0x80;
const TYPE_MASK: u8 = 0x7f;

/// Header fields of a published slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotHeader {
    pub timestamp_ns: u64,
    pub len: usize,
    pub port: u8,
    pub ty: u8,
}

/// One direction of a channel: a cursor over `entries` fixed-size slots.
///
/// The producer and consumer each hold their own `Ring` over the same
/// memory, usually in different processes.
#[derive(Debug)]
pub struct Ring {
    base: *mut u8,
    entries: usize,
    entry_size: usize,
    pos: usize,
}

impl Ring {
    /// Bytes needed for a ring of the given shape.
    /// Bytes one direction's ring occupies. `None` on overflow.
    pub fn region_len(entries: usize, entry_size: usize) -> Option<usize> {
        entries.checked_mul(entry_size)
    }

    /// # Safety
    ///
    /// `base` must point to `region_len(entries, entry_size)` bytes that stay
    /// mapped, and are touched by at most one producer and one consumer, for
    /// as long as this ring is used. `entry_size` must exceed `HEADER_LEN`.
    pub unsafe fn new(base: *mut u8, entries: usize, entry_size: usize) -> Self {
        debug_assert!(entry_size > HEADER_LEN);
        Self {
            base,
            entries,
            entry_size,
            pos: 0,
        }
    }

    pub fn max_payload_len(&self) -> usize {
        (self.entry_size - HEADER_LEN).min(u16::MAX as usize)
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn slot(&self, idx: usize) -> *mut u8 {
        debug_assert!(idx < self.entries);
        // SAFETY: idx < entries keeps the offset inside the mapped region.
        unsafe { self.base.add(idx * self.entry_size) }
    }

    fn owner(&self, idx: usize) -> &AtomicU8 {
        // SAFETY: AtomicU8 has alignment 1 and the byte lies inside the slot.
        unsafe { &*(self.slot(idx).add(OFF_OWN_TYPE) as *const AtomicU8) }
    }

    // Consumer side

    /// Header of the slot at the cursor, if the producer has published it.
    pub fn peek(&self) -> Option<SlotHeader> {
        let own = self.owner(self.pos).load(Ordering::Acquire);
        if own & OWN_CONSUMER == 0 {
            return None;
        }

        let slot = self.slot(self.pos);
        let mut ts = [0u8; 8];
        let mut len = [0u8; 2];
        // SAFETY: the acquire load above orders these reads after the
        // producer's writes; the slot is ours until `release`.
        let port = unsafe {
            ptr::copy_nonoverlapping(slot.add(OFF_TIMESTAMP), ts.as_mut_ptr(), 8);
            ptr::copy_nonoverlapping(slot.add(OFF_LEN), len.as_mut_ptr(), 2);
            ptr::read(slot.add(OFF_PORT))
        };

        Some(SlotHeader {
            timestamp_ns: u64::from_le_bytes(ts),
            len: (u16::from_le_bytes(len) as usize).min(self.max_payload_len()),
            port,
            ty: own & TYPE_MASK,
        })
    }

    /// Copies `len` payload bytes out of the slot at the cursor.
    pub fn read_payload(&self, len: usize) -> Bytes {
        let len = len.min(self.max_payload_len());
        let mut out = vec![0u8; len];
        // SAFETY: only called between a successful `peek` and `release`.
        unsafe {
            ptr::copy_nonoverlapping(self.slot(self.pos).add(HEADER_LEN), out.as_mut_ptr(), len);
        }
        Bytes::from(out)
    }

    /// Returns the slot at the cursor to the producer and advances.
    pub fn release(&mut self) {
        self.owner(self.pos).store(0, Ordering::Release);
        self.pos = (self.pos + 1) % self.entries;
    }

    // Producer side

    /// Whether the slot at the cursor may be written.
    pub fn producer_free(&self) -> bool {
        self.owner(self.pos).load(Ordering::Acquire) & OWN_CONSUMER == 0
    }

    pub fn write_timestamp(&mut self, timestamp_ns: u64) {
        let bytes = timestamp_ns.to_le_bytes();
        // SAFETY: the slot is producer-owned, checked by `producer_free`.
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), self.slot(self.pos).add(OFF_TIMESTAMP), 8);
        }
    }

    /// Fills in the rest of the slot at the cursor, hands it to the
    /// consumer and advances.
    pub fn publish(&mut self, ty: u8, port: u8, payload: &[u8]) {
        let len = payload.len().min(self.max_payload_len());
        let slot = self.slot(self.pos);
        let len_bytes = (len as u16).to_le_bytes();
        // SAFETY: the slot is producer-owned until the release store below.
        unsafe {
            ptr::copy_nonoverlapping(len_bytes.as_ptr(), slot.add(OFF_LEN), 2);
            ptr::write(slot.add(OFF_PORT), port);
            ptr::copy_nonoverlapping(payload.as_ptr(), slot.add(HEADER_LEN), len);
        }
        self.owner(self.pos)
            .store((ty & TYPE_MASK) | OWN_CONSUMER, Ordering::Release);
        self.pos = (self.pos + 1) % self.entries;
    }
}
