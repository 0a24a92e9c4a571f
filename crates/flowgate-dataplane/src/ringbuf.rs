//! Lock-free bounded queues for inter-core hand-off.
//!
//! Two shapes, both power-of-two capacity and cache-line padded so the
//! producer and consumer indices never share a line:
//!
//! - [`SpscRing`]: exactly one pusher and one popper. No CAS at all;
//!   each side owns one index and publishes with a release store that
//!   the other side observes with an acquire load. That pairing is the
//!   happens-before edge that makes the slot contents visible, so
//!   weakening any of these orderings is a correctness bug, not a
//!   tuning knob.
//! - [`MpmcRing`]: any number of pushers and poppers, using per-slot
//!   sequence numbers (Vyukov). A slot's sequence tells each side
//!   whose turn it is; winning the CAS on the shared index claims the
//!   slot, and the release store of the new sequence hands it to the
//!   other side. Sequences only ever grow, which also rules out ABA.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

/// Single-producer single-consumer bounded queue.
///
/// One slot is kept unused to tell a full ring from an empty one, so a
/// ring built with `new(n)` holds at most `n - 1` items.
pub struct SpscRing<T> {
    /// Consumer index; only `pop` mutates it.
    head: CachePadded<AtomicUsize>,
    /// Producer index; only `push` mutates it.
    tail: CachePadded<AtomicUsize>,
    mask: usize,
    buf: Box<[UnsafeCell<MaybeUninit<T>>]>,
}

unsafe impl<T: Send> Send for SpscRing<T> {}
unsafe impl<T: Send> Sync for SpscRing<T> {}

impl<T> SpscRing<T> {
    /// Create a ring with `size` slots. `size` must be a power of two,
    /// at least 2; effective capacity is `size - 1`.
    pub fn new(size: usize) -> Self {
        assert!(size.is_power_of_two() && size >= 2, "size must be a power of two >= 2");
        Self {
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
            mask: size - 1,
            buf: (0..size).map(|_| UnsafeCell::new(MaybeUninit::uninit())).collect(),
        }
    }

    /// Enqueue; returns the item back when the ring is full.
    pub fn push(&self, item: T) -> Result<(), T> {
        // The producer owns tail, so a relaxed read of our own index is
        // enough; the acquire on head pairs with pop's release.
        let tail = self.tail.load(Ordering::Relaxed);
        let next = (tail + 1) & self.mask;
        if next == self.head.load(Ordering::Acquire) {
            return Err(item);
        }
        unsafe { (*self.buf[tail].get()).write(item) };
        // Publish the slot: everything written above becomes visible to
        // the consumer's acquire load of tail.
        self.tail.store(next, Ordering::Release);
        Ok(())
    }

    /// Dequeue the oldest item, if any.
    pub fn pop(&self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);
        if head == self.tail.load(Ordering::Acquire) {
            return None;
        }
        let item = unsafe { (*self.buf[head].get()).assume_init_read() };
        // Release hands the emptied slot back to the producer.
        self.head.store((head + 1) & self.mask, Ordering::Release);
        Some(item)
    }

    /// Number of queued items. Approximate while the other side runs.
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);
        tail.wrapping_sub(head) & self.mask
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when a push would fail.
    pub fn is_full(&self) -> bool {
        self.len() == self.mask
    }

    /// Maximum number of queued items (`size - 1`).
    pub fn capacity(&self) -> usize {
        self.mask
    }
}

impl<T: Clone> SpscRing<T> {
    /// Copy the oldest item without consuming it (consumer side only).
    pub fn peek(&self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);
        if head == self.tail.load(Ordering::Acquire) {
            return None;
        }
        Some(unsafe { (*self.buf[head].get()).assume_init_ref().clone() })
    }
}

impl<T> Drop for SpscRing<T> {
    fn drop(&mut self) {
        let mut head = *self.head.get_mut();
        let tail = *self.tail.get_mut();
        while head != tail {
            unsafe { (*self.buf[head].get()).assume_init_drop() };
            head = (head + 1) & self.mask;
        }
    }
}

struct Slot<T> {
    /// Generation marker. `pos` means free for the producer claiming
    /// `pos`; `pos + 1` means filled for the consumer claiming `pos`;
    /// it advances by `size` per lap.
    sequence: AtomicUsize,
    data: UnsafeCell<MaybeUninit<T>>,
}

/// Multi-producer multi-consumer bounded queue (per-slot sequences).
///
/// Unlike the SPSC ring, all `size` slots are usable.
pub struct MpmcRing<T> {
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
    mask: usize,
    buf: Box<[Slot<T>]>,
}

unsafe impl<T: Send> Send for MpmcRing<T> {}
unsafe impl<T: Send> Sync for MpmcRing<T> {}

impl<T> MpmcRing<T> {
    /// Create a ring with `size` slots; `size` must be a power of two,
    /// at least 2.
    pub fn new(size: usize) -> Self {
        assert!(size.is_power_of_two() && size >= 2, "size must be a power of two >= 2");
        Self {
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
            mask: size - 1,
            buf: (0..size)
                .map(|i| Slot {
                    sequence: AtomicUsize::new(i),
                    data: UnsafeCell::new(MaybeUninit::uninit()),
                })
                .collect(),
        }
    }

    /// Enqueue; returns the item back when the ring is full.
    pub fn push(&self, item: T) -> Result<(), T> {
        let mut pos = self.tail.load(Ordering::Relaxed);
        loop {
            let slot = &self.buf[pos & self.mask];
            let seq = slot.sequence.load(Ordering::Acquire);
            let diff = seq.wrapping_sub(pos) as isize;
            if diff == 0 {
                // Slot is free for this generation; claim the position.
                match self.tail.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        unsafe { (*slot.data.get()).write(item) };
                        slot.sequence.store(pos.wrapping_add(1), Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                // A full lap behind: the consumer has not freed this
                // slot yet.
                return Err(item);
            } else {
                // Another producer claimed pos; reload and retry.
                pos = self.tail.load(Ordering::Relaxed);
            }
        }
    }

    /// Dequeue the oldest item, if any.
    pub fn pop(&self) -> Option<T> {
        let mut pos = self.head.load(Ordering::Relaxed);
        loop {
            let slot = &self.buf[pos & self.mask];
            let seq = slot.sequence.load(Ordering::Acquire);
            let diff = seq.wrapping_sub(pos.wrapping_add(1)) as isize;
            if diff == 0 {
                match self.head.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        let item = unsafe { (*slot.data.get()).assume_init_read() };
                        // Free the slot for the producer one lap ahead.
                        slot.sequence
                            .store(pos.wrapping_add(self.mask + 1), Ordering::Release);
                        return Some(item);
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                return None;
            } else {
                pos = self.head.load(Ordering::Relaxed);
            }
        }
    }

    /// Number of queued items. Approximate while other threads run.
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);
        tail.wrapping_sub(head)
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slot count; all of it is usable capacity.
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }
}

impl<T> Drop for MpmcRing<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}
