//! Bounded single-producer single-consumer queue linking the driver's agents.
//!
//! The producer side is wait-free: an offer either claims the next slot or
//! fails fast when the queue is full, it never blocks or spins. Exactly one
//! agent may produce and exactly one may consume; the driver's wiring
//! enforces this, the type itself only documents it.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::util::bit::is_power_of_two;
use crate::util::{BufferError, IndexT, Result};

/// Pad a counter out to a cache line so the producer and consumer positions
/// do not false-share.
#[repr(align(64))]
struct CachePadded<T>(T);

/// Bounded SPSC queue with power-of-two capacity.
pub struct OneToOneQueue<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
    /// Next slot the consumer will read
    head: CachePadded<AtomicUsize>,
    /// Next slot the producer will write
    tail: CachePadded<AtomicUsize>,
}

// Slots are only touched by the owning side: the producer writes a slot
// strictly before publishing the tail, the consumer reads it strictly after
// observing that publish.
unsafe impl<T: Send> Send for OneToOneQueue<T> {}
unsafe impl<T: Send> Sync for OneToOneQueue<T> {}

impl<T> OneToOneQueue<T> {
    /// Create a queue able to hold `capacity` elements. The capacity must be
    /// a positive power of two.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        if !is_power_of_two(capacity as IndexT) {
            return Err(BufferError::IllegalArgument);
        }

        let mut slots = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            slots.push(UnsafeCell::new(MaybeUninit::uninit()));
        }

        Ok(OneToOneQueue {
            slots: slots.into_boxed_slice(),
            mask: capacity - 1,
            head: CachePadded(AtomicUsize::new(0)),
            tail: CachePadded(AtomicUsize::new(0)),
        })
    }

    /// Number of elements the queue can hold
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Number of elements currently queued. Racy by nature; exact only when
    /// both sides are quiescent.
    pub fn len(&self) -> usize {
        self.tail
            .0
            .load(Ordering::Acquire)
            .wrapping_sub(self.head.0.load(Ordering::Acquire))
    }

    /// `true` when no elements are queued
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Attempt to enqueue an element. Fails fast with the rejected element
    /// when the queue is full.
    pub fn offer(&self, element: T) -> ::std::result::Result<(), T> {
        let tail = self.tail.0.load(Ordering::Relaxed);
        let head = self.head.0.load(Ordering::Acquire);

        if tail.wrapping_sub(head) > self.mask {
            return Err(element);
        }

        unsafe {
            (*self.slots[tail & self.mask].get()).write(element);
        }
        self.tail.0.store(tail.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Dequeue every available element into `handler`, returning the number
    /// drained.
    pub fn drain<F>(&self, mut handler: F) -> usize
    where
        F: FnMut(T),
    {
        let head = self.head.0.load(Ordering::Relaxed);
        let tail = self.tail.0.load(Ordering::Acquire);
        let available = tail.wrapping_sub(head);

        for i in 0..available {
            let slot = head.wrapping_add(i);
            let element = unsafe { (*self.slots[slot & self.mask].get()).as_ptr().read() };
            // Publish the consumed slot before running the handler so a
            // handler that offers back into the queue sees the free space.
            self.head
                .0
                .store(slot.wrapping_add(1), Ordering::Release);
            handler(element);
        }

        available
    }
}

impl<T> Drop for OneToOneQueue<T> {
    fn drop(&mut self) {
        // Elements still queued are owned by the queue and must be dropped
        let head = self.head.0.load(Ordering::Relaxed);
        let tail = self.tail.0.load(Ordering::Relaxed);
        for slot in head..tail {
            unsafe {
                (*self.slots[slot & self.mask].get()).as_mut_ptr().drop_in_place();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_power_of_two_capacity() {
        assert!(OneToOneQueue::<i32>::with_capacity(12).is_err());
        assert!(OneToOneQueue::<i32>::with_capacity(0).is_err());
    }

    #[test]
    fn offer_fails_fast_when_full() {
        let queue = OneToOneQueue::with_capacity(4).unwrap();
        for i in 0..4 {
            assert!(queue.offer(i).is_ok());
        }
        assert_eq!(queue.offer(99), Err(99));
        assert_eq!(queue.len(), 4);
    }

    #[test]
    fn drains_in_fifo_order() {
        let queue = OneToOneQueue::with_capacity(8).unwrap();
        for i in 0..5 {
            queue.offer(i).unwrap();
        }

        let mut seen = Vec::new();
        assert_eq!(queue.drain(|e| seen.push(e)), 5);
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn wraps_across_the_ring_boundary() {
        let queue = OneToOneQueue::with_capacity(4).unwrap();
        for round in 0..10 {
            queue.offer(round).unwrap();
            queue.offer(round + 100).unwrap();
            let mut seen = Vec::new();
            queue.drain(|e| seen.push(e));
            assert_eq!(seen, vec![round, round + 100]);
        }
    }

    #[test]
    fn drops_queued_elements() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        struct Tracked(Arc<AtomicUsize>);
        impl Drop for Tracked {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        let queue = OneToOneQueue::with_capacity(4).unwrap();
        for _ in 0..3 {
            assert!(queue.offer(Tracked(drops.clone())).is_ok());
        }
        drop(queue);
        assert_eq!(drops.load(Ordering::SeqCst), 3);
    }
}
