use crate::invariants::{debug_assert_bounded_count, debug_assert_head_not_past_tail};
use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// MEMORY ORDERING & SYNCHRONIZATION STRATEGY
// =============================================================================
//
// A lane is the SPSC building block of a mailbox: the only producer is the
// source rank's handle for one context, the only consumer is the destination
// rank's handle for the same context.
//
// `head` and `tail` are unbounded u64 sequence numbers; the slot index is
// `sequence & mask`, so there is no ABA on wrap.
//
// **Producer (`try_push`):**
// 1. Load `tail` Relaxed (only the producer writes tail)
// 2. Check space against `cached_head`; refresh with an Acquire load of `head`
//    only when the cache says the lane is full
// 3. Write the slot
// 4. Store `tail + 1` Release (publishes the slot)
//
// **Consumer (`drain`):**
// 1. Load `head` Relaxed (only the consumer writes head)
// 2. Load `tail` Acquire (synchronizes with the producer's Release)
// 3. Move every slot in [head, tail) out
// 4. Store `tail` into `head` Release, once for the whole batch
//
// =============================================================================

/// Bounded single-producer single-consumer ring.
pub(crate) struct Lane<T> {
    /// Written by producer, read by consumer.
    tail: CachePadded<AtomicU64>,
    /// Producer's cached view of head.
    cached_head: CachePadded<UnsafeCell<u64>>,
    /// Written by consumer, read by producer.
    head: CachePadded<AtomicU64>,
    mask: usize,
    buffer: Box<[UnsafeCell<MaybeUninit<T>>]>,
}

// Safety: slots are handed from exactly one producer to exactly one consumer,
// with the tail/head Release-Acquire pairs ordering the slot accesses.
unsafe impl<T: Send> Send for Lane<T> {}
unsafe impl<T: Send> Sync for Lane<T> {}

impl<T> Lane<T> {
    /// Creates a lane with `1 << bits` slots.
    pub(crate) fn new(bits: u8) -> Self {
        let capacity = 1usize << bits;
        let buffer = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect();
        Self {
            tail: CachePadded::new(AtomicU64::new(0)),
            cached_head: CachePadded::new(UnsafeCell::new(0)),
            head: CachePadded::new(AtomicU64::new(0)),
            mask: capacity - 1,
            buffer,
        }
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.mask + 1
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        tail.wrapping_sub(head) as usize
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Producer side. Hands the item back if the lane is full.
    pub(crate) fn try_push(&self, item: T) -> Result<(), T> {
        let tail = self.tail.load(Ordering::Relaxed);

        // SAFETY: cached_head is only touched by the single producer.
        let cached_head = unsafe { *self.cached_head.get() };
        if tail.wrapping_sub(cached_head) as usize >= self.capacity() {
            let head = self.head.load(Ordering::Acquire);
            // SAFETY: as above; the Acquire load pairs with the consumer's Release.
            unsafe { *self.cached_head.get() = head };
            if tail.wrapping_sub(head) as usize >= self.capacity() {
                return Err(item);
            }
        }

        let idx = (tail as usize) & self.mask;
        // SAFETY: the slot at `tail` is outside [head, tail) so the consumer
        // does not read it, and only this producer writes it.
        unsafe { (*self.buffer[idx].get()).write(item) };
        self.tail.store(tail.wrapping_add(1), Ordering::Release);

        debug_assert_bounded_count!(
            tail.wrapping_add(1).wrapping_sub(self.head.load(Ordering::Relaxed)) as usize,
            self.capacity()
        );
        Ok(())
    }

    /// Consumer side. Moves every published item into `handler` with a single
    /// head update; returns how many were moved.
    pub(crate) fn drain<F>(&self, mut handler: F) -> usize
    where
        F: FnMut(T),
    {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        let avail = tail.wrapping_sub(head) as usize;
        if avail == 0 {
            return 0;
        }

        let mut pos = head;
        while pos != tail {
            let idx = (pos as usize) & self.mask;
            // SAFETY: slots in [head, tail) were initialized by the producer
            // and published by its Release store on tail; each is read once.
            let item = unsafe { (*self.buffer[idx].get()).assume_init_read() };
            handler(item);
            pos = pos.wrapping_add(1);
        }

        debug_assert_head_not_past_tail!(pos, tail);
        self.head.store(tail, Ordering::Release);
        avail
    }
}

impl<T> Drop for Lane<T> {
    fn drop(&mut self) {
        let head = *self.head.get_mut();
        let tail = *self.tail.get_mut();
        let mut pos = head;
        while pos != tail {
            let idx = (pos as usize) & self.mask;
            // SAFETY: [head, tail) is initialized and we have exclusive access.
            unsafe { self.buffer[idx].get_mut().assume_init_drop() };
            pos = pos.wrapping_add(1);
        }
    }
}
