// # Ring Buffer Module
//
// Bounded single-producer/single-consumer ring buffer used as the sole
// synchronization primitive between pipeline stages.
//
// ## Overview
//
// Every hop in the pipeline is one of these rings:
//
// ```text
// ┌───────────┐    ┌─────────────┐    ┌───────────┐    ┌──────────────┐
// │  Decoder  │───▶│ Frame ring  │───▶│ Converter │───▶│ Texture ring │──▶ …
// │ (producer)│    │             │    │           │    │              │
// └───────────┘    └─────────────┘    └───────────┘    └──────────────┘
// ```
//
// The producer blocks when the ring is full, the consumer blocks when it is
// empty. Slot contents are installed once by the producer (`init`) and reused
// for the lifetime of the ring, so the steady state never allocates. When the
// producer is finished it calls `finish()`; the consumer then drains whatever
// is left and observes `None`.
//
// ## Access protocol
//
// Each endpoint acquires a slot and releases it exactly once per item:
//
// - Producer: `get_to_write()` → write through the guard → drop the guard
//   (publishes the slot and wakes the consumer).
// - Consumer: `get_to_read()` → read through the guard → drop the guard
//   (recycles the slot and wakes the producer).
//
// The guard types make an unpaired acquire/release unrepresentable. The ring
// is strictly SPSC: one stage owns each endpoint.

use std::sync::{Condvar, Mutex, MutexGuard, OnceLock};

/// Bounded SPSC ring of reusable slots with an end-of-stream flag.
///
/// Capacity is clamped to at least 2 so the producer and consumer can always
/// make progress on different slots. Indices advance monotonically modulo the
/// capacity; a single mutex guards them, with one condition variable per
/// direction (item available / space available).
///
/// The ring itself is created empty. The *producer* stage installs the slot
/// contents with [`RingBuffer::init`] before its first write (frames get
/// their pixel buffers, textures get their GPU allocation), which keeps
/// type-specific setup with the stage that knows the dimensions and format.
pub struct RingBuffer<T> {
    capacity: usize,
    slots: OnceLock<Box<[Mutex<T>]>>,
    state: Mutex<State>,
    /// Signaled by the producer: an item was published (or the ring finished).
    readable: Condvar,
    /// Signaled by the consumer: a slot was recycled.
    writable: Condvar,
}

struct State {
    input: usize,
    output: usize,
    done: bool,
}

impl<T> RingBuffer<T> {
    /// Creates an empty ring with room for `capacity` items (minimum 2).
    ///
    /// The slots hold no values yet; the producer must call [`init`] before
    /// the first `get_to_write`.
    ///
    /// [`init`]: RingBuffer::init
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            capacity,
            slots: OnceLock::new(),
            state: Mutex::new(State {
                input: 0,
                output: 0,
                done: false,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
        }
    }

    /// Installs the reusable slot contents. Producer-side, called once.
    ///
    /// `fill` is invoked with each slot index and must produce a fully usable
    /// container (e.g. a frame with its pixel buffer allocated). Calling this
    /// twice is a producer bug and panics.
    pub fn init(&self, mut fill: impl FnMut(usize) -> T) {
        let slots: Box<[Mutex<T>]> = (0..self.capacity).map(|i| Mutex::new(fill(i))).collect();
        if self.slots.set(slots).is_err() {
            panic!("ring buffer initialized twice");
        }
    }

    /// Reserves the next producer slot, blocking while the ring is full.
    ///
    /// Dropping the returned guard publishes the slot and wakes the consumer.
    pub fn get_to_write(&self) -> WriteSlot<'_, T> {
        let index = {
            let mut state = self.state.lock().unwrap();
            while self.next(state.input) == state.output {
                state = self.writable.wait(state).unwrap();
            }
            state.input
        };
        WriteSlot {
            slot: Some(self.slot(index).lock().unwrap()),
            ring: self,
        }
    }

    /// Returns the next consumer slot.
    ///
    /// Blocks while the ring is empty and the producer has not finished.
    /// Returns `None` once the ring is both empty and finished; remaining
    /// items are always drained first. Dropping the returned guard recycles
    /// the slot and wakes the producer.
    pub fn get_to_read(&self) -> Option<ReadSlot<'_, T>> {
        let index = {
            let mut state = self.state.lock().unwrap();
            loop {
                if state.input != state.output {
                    break state.output;
                }
                if state.done {
                    return None;
                }
                state = self.readable.wait(state).unwrap();
            }
        };
        Some(ReadSlot {
            slot: Some(self.slot(index).lock().unwrap()),
            ring: self,
        })
    }

    /// Marks the end of the stream. Producer-side, called once after the last
    /// published slot. Consumers blocked on an empty ring wake up and observe
    /// `None` after draining.
    pub fn finish(&self) {
        let mut state = self.state.lock().unwrap();
        state.done = true;
        self.readable.notify_all();
    }

    /// Number of published items not yet consumed.
    pub fn len(&self) -> usize {
        let state = self.state.lock().unwrap();
        (state.input + self.capacity - state.output) % self.capacity
    }

    /// True when no published item is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ring capacity in slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn next(&self, index: usize) -> usize {
        if index + 1 < self.capacity { index + 1 } else { 0 }
    }

    fn slot(&self, index: usize) -> &Mutex<T> {
        let slots = self
            .slots
            .get()
            .expect("ring buffer used before the producer initialized it");
        &slots[index]
    }

    fn advance_input(&self) {
        let mut state = self.state.lock().unwrap();
        state.input = self.next(state.input);
        self.readable.notify_one();
    }

    fn advance_output(&self) {
        let mut state = self.state.lock().unwrap();
        state.output = self.next(state.output);
        self.writable.notify_one();
    }
}

/// Exclusive access to a producer slot; publishes on drop.
pub struct WriteSlot<'a, T> {
    slot: Option<MutexGuard<'a, T>>,
    ring: &'a RingBuffer<T>,
}

impl<T> std::ops::Deref for WriteSlot<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.slot.as_ref().unwrap()
    }
}

impl<T> std::ops::DerefMut for WriteSlot<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.slot.as_mut().unwrap()
    }
}

impl<T> Drop for WriteSlot<'_, T> {
    fn drop(&mut self) {
        // Release the slot lock before the index moves so the consumer can
        // take it the moment it is woken.
        drop(self.slot.take());
        self.ring.advance_input();
    }
}

/// Shared access to a consumer slot; recycles on drop.
pub struct ReadSlot<'a, T> {
    slot: Option<MutexGuard<'a, T>>,
    ring: &'a RingBuffer<T>,
}

impl<T> std::ops::Deref for ReadSlot<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.slot.as_ref().unwrap()
    }
}

impl<T> Drop for ReadSlot<'_, T> {
    fn drop(&mut self) {
        drop(self.slot.take());
        self.ring.advance_output();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn counting_ring(capacity: usize) -> RingBuffer<u64> {
        let ring = RingBuffer::new(capacity);
        ring.init(|_| 0);
        ring
    }

    #[test]
    fn test_fifo_order() {
        let ring = counting_ring(4);

        for value in 1..=3u64 {
            let mut slot = ring.get_to_write();
            *slot = value;
        }
        assert_eq!(ring.len(), 3);

        for expected in 1..=3u64 {
            let slot = ring.get_to_read().unwrap();
            assert_eq!(*slot, expected);
        }
        assert!(ring.is_empty());
    }

    #[test]
    fn test_capacity_clamped_to_two() {
        let ring: RingBuffer<u64> = RingBuffer::new(0);
        assert_eq!(ring.capacity(), 2);
    }

    #[test]
    fn test_drain_after_finish() {
        let ring = counting_ring(4);

        *ring.get_to_write() = 7;
        *ring.get_to_write() = 8;
        ring.finish();

        // Remaining items drain before the end-of-stream sentinel.
        assert_eq!(*ring.get_to_read().unwrap(), 7);
        assert_eq!(*ring.get_to_read().unwrap(), 8);
        assert!(ring.get_to_read().is_none());
        assert!(ring.get_to_read().is_none());
    }

    #[test]
    fn test_finish_wakes_blocked_consumer() {
        let ring = Arc::new(counting_ring(2));
        let consumer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || ring.get_to_read().is_none())
        };
        // Give the consumer a moment to block on the empty ring.
        thread::sleep(std::time::Duration::from_millis(20));
        ring.finish();
        assert!(consumer.join().unwrap());
    }

    #[test]
    fn test_producer_blocks_when_full() {
        let ring = Arc::new(counting_ring(2));
        // Capacity 2 leaves room for exactly one unconsumed item.
        *ring.get_to_write() = 1;

        let producer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                *ring.get_to_write() = 2;
            })
        };
        thread::sleep(std::time::Duration::from_millis(20));
        assert!(!producer.is_finished());

        assert_eq!(*ring.get_to_read().unwrap(), 1);
        producer.join().unwrap();
        assert_eq!(*ring.get_to_read().unwrap(), 2);
    }

    #[test]
    fn test_cross_thread_order_preserved() {
        let ring = Arc::new(counting_ring(3));
        const COUNT: u64 = 10_000;

        let producer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                for value in 0..COUNT {
                    *ring.get_to_write() = value;
                }
                ring.finish();
            })
        };

        let mut expected = 0;
        while let Some(slot) = ring.get_to_read() {
            assert_eq!(*slot, expected);
            expected += 1;
        }
        assert_eq!(expected, COUNT);
        producer.join().unwrap();
    }
}
