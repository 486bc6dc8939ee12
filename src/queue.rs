//! bounded FIFO of decrypted plaintext, and the partial-copy cursor used
//! to drain it to the caller.
//!
//! Ring-buffer index math below mirrors
//! `xitca_unsafe_collection::array_queue::ArrayQueue` (`front_idx`,
//! `incr_tail_len`), adapted from a const-generic array to a `Box<[_]>`
//! with a runtime capacity, since this crate only ever needs one capacity
//! per process (see `DESIGN.md`).

use std::sync::Mutex;

/// default queue capacity, per the crate's compile-time budget.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// max plaintext bytes the crate will ever allocate as a single packet:
/// 16 KiB of TLS record payload plus slack for records split across two
/// transport reads.
pub const MAX_PACKET_SIZE: usize = 16 * 1024 + 1024;

/// one decrypted payload, not necessarily corresponding to exactly one
/// TLS record. `pos` is the read cursor `read` advances on a partial copy;
/// this replaces the spec's "shift remaining bytes to the front" with an
/// owned buffer plus cursor, which is externally indistinguishable.
pub struct Packet {
    buf: Box<[u8]>,
    pos: usize,
}

impl Packet {
    pub fn new(buf: Box<[u8]>) -> Self {
        Self { buf, pos: 0 }
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// copy up to `dst.len()` bytes, advance the cursor, and report how
    /// many bytes were written. Returns `true` once the packet is fully
    /// drained and can be dropped.
    pub fn copy_into(&mut self, dst: &mut [u8]) -> (usize, bool) {
        let remaining = self.remaining();
        let n = remaining.min(dst.len());
        dst[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        (n, self.pos == self.buf.len())
    }
}

struct Inner {
    slots: Box<[Option<Packet>]>,
    head: usize,
    len: usize,
}

impl Inner {
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    fn tail_idx(&self) -> usize {
        let cap = self.capacity();
        (self.head + self.len) % cap
    }

    fn push_back(&mut self, packet: Packet) -> bool {
        if self.is_full() {
            return false;
        }
        let idx = self.tail_idx();
        self.slots[idx] = Some(packet);
        self.len += 1;
        true
    }

    fn pop_front(&mut self) -> Option<Packet> {
        if self.len == 0 {
            return None;
        }
        let cap = self.capacity();
        let packet = self.slots[self.head].take();
        self.head = (self.head + 1) % cap;
        self.len -= 1;
        packet
    }
}

/// bounded, FIFO packet queue. Always guarded by a [`Mutex`] regardless of
/// back-end (the spec only requires locking on the async-callback
/// back-end; locking unconditionally is a deliberate simplification, see
/// `DESIGN.md`).
pub struct PacketQueue {
    inner: Mutex<Inner>,
}

impl PacketQueue {
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity).map(|_| None).collect::<Vec<_>>().into_boxed_slice();
        Self {
            inner: Mutex::new(Inner { slots, head: 0, len: 0 }),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.is_full()
    }

    /// push a packet; silently drops it if full. Back-pressure is already
    /// signalled upstream via `State::PacketQueueFilled`, so `push` itself
    /// never reports failure.
    pub fn push(&self, packet: Packet) {
        let mut inner = self.inner.lock().unwrap();
        let _ = inner.push_back(packet);
    }

    pub fn pop(&self) -> Option<Packet> {
        self.inner.lock().unwrap().pop_front()
    }

    /// drop every queued packet, e.g. during disconnect teardown.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        while inner.pop_front().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(bytes: &[u8]) -> Packet {
        Packet::new(bytes.to_vec().into_boxed_slice())
    }

    #[test]
    fn fifo_order_preserved() {
        let q = PacketQueue::new(4);
        q.push(packet(b"one"));
        q.push(packet(b"two"));
        q.push(packet(b"three"));

        let mut out = Vec::new();
        while let Some(mut p) = q.pop() {
            let mut buf = vec![0u8; p.remaining()];
            p.copy_into(&mut buf);
            out.push(buf);
        }
        assert_eq!(out, vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]);
    }

    #[test]
    fn push_pop_round_trip_is_exact() {
        let q = PacketQueue::new(2);
        q.push(packet(b"payload"));
        let mut p = q.pop().unwrap();
        let mut buf = vec![0u8; p.remaining()];
        let (n, done) = p.copy_into(&mut buf);
        assert_eq!(n, 7);
        assert!(done);
        assert_eq!(&buf, b"payload");
    }

    #[test]
    fn push_beyond_capacity_is_silently_dropped() {
        let q = PacketQueue::new(1);
        q.push(packet(b"a"));
        assert!(q.is_full());
        q.push(packet(b"b"));
        assert_eq!(q.len(), 1);
        let mut p = q.pop().unwrap();
        let mut buf = [0u8; 1];
        p.copy_into(&mut buf);
        assert_eq!(&buf, b"a");
    }

    #[test]
    fn partial_copy_law() {
        let mut p = packet(b"0123456789");
        let mut buf = [0u8; 4];
        let (n, done) = p.copy_into(&mut buf);
        assert_eq!(n, 4);
        assert!(!done);
        assert_eq!(&buf, b"0123");

        let mut buf2 = [0u8; 100];
        let (n2, done2) = p.copy_into(&mut buf2);
        assert_eq!(n2, 6);
        assert!(done2);
        assert_eq!(&buf2[..6], b"456789");
    }

    #[test]
    fn wraps_around_ring_buffer() {
        let q = PacketQueue::new(2);
        q.push(packet(b"a"));
        q.push(packet(b"b"));
        assert_eq!(q.pop().unwrap().remaining(), 1);
        q.push(packet(b"c"));
        assert_eq!(q.len(), 2);
        let mut collected = Vec::new();
        while let Some(mut p) = q.pop() {
            let mut buf = vec![0u8; p.remaining()];
            p.copy_into(&mut buf);
            collected.push(buf);
        }
        assert_eq!(collected, vec![b"b".to_vec(), b"c".to_vec()]);
    }
}
