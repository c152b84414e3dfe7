//! Bounded transfer queues between the stream client and the write thread
//!
//! Each queue is an `rtrb` single-producer single-consumer ring buffer split
//! into a [`QueueWriter`] and a [`QueueReader`]. Writes and reads are
//! all-or-nothing: a write that does not fit, or a read asking for more than
//! is queued, fails without touching the buffer.
//!
//! Blocking variants park on the shared [`EventFlag`]:
//! - the producer waits on `NOT_FULL` and wakes `NOT_EMPTY`
//! - the consumer side never blocks inside a queue; the write thread waits on
//!   the flag before touching any queue

use std::time::{Duration, Instant};

use rtrb::{Consumer, Producer, RingBuffer};

use crate::error::QueueError;
use crate::event_flag::{EventFlag, NOT_EMPTY, NOT_FULL};
use crate::types::{MAX_FRAMES_COUNT, MAX_FRAME_SIZE};

/// Upper bound on the bytes a single queue may allocate
pub const MAX_QUEUE_BYTES: usize = MAX_FRAME_SIZE as usize * MAX_FRAMES_COUNT as usize;

/// Create a bounded queue with room for `capacity` items
///
/// Validates the requested size and probes the allocator before building the
/// ring buffer, so a refused allocation surfaces as an error rather than an
/// abort inside `rtrb`.
pub fn message_queue<T>(capacity: usize) -> Result<(QueueWriter<T>, QueueReader<T>), QueueError> {
    if capacity == 0 {
        return Err(QueueError::ZeroCapacity);
    }
    let bytes = capacity.saturating_mul(std::mem::size_of::<T>().max(1));
    if bytes > MAX_QUEUE_BYTES {
        return Err(QueueError::TooLarge {
            requested: bytes,
            limit: MAX_QUEUE_BYTES,
        });
    }
    let mut probe: Vec<T> = Vec::new();
    probe
        .try_reserve_exact(capacity)
        .map_err(|_| QueueError::Allocation(bytes))?;
    drop(probe);

    let (producer, consumer) = RingBuffer::new(capacity);
    Ok((QueueWriter { producer }, QueueReader { consumer }))
}

/// Producer half of a transfer queue
pub struct QueueWriter<T> {
    producer: Producer<T>,
}

impl<T> QueueWriter<T> {
    /// Push one item; fails without blocking if the queue is full
    pub fn write(&mut self, item: T) -> bool {
        self.producer.push(item).is_ok()
    }

    pub fn available_to_write(&self) -> usize {
        self.producer.slots()
    }

    pub fn capacity(&self) -> usize {
        self.producer.buffer().capacity()
    }
}

impl<T: Copy + Default> QueueWriter<T> {
    /// Copy all of `items` into the queue, or nothing if they do not fit
    pub fn write_slice(&mut self, items: &[T]) -> bool {
        if items.is_empty() {
            return true;
        }
        let Ok(mut chunk) = self.producer.write_chunk(items.len()) else {
            return false;
        };
        let (first, second) = chunk.as_mut_slices();
        let split = first.len();
        first.copy_from_slice(&items[..split]);
        second.copy_from_slice(&items[split..]);
        chunk.commit_all();
        true
    }

    /// Write all of `items`, waiting on `NOT_FULL` while there is no room
    ///
    /// Wakes `NOT_EMPTY` after a successful write. Returns false if `items`
    /// can never fit or the timeout expires first.
    pub fn write_slice_blocking(
        &mut self,
        items: &[T],
        flag: &EventFlag,
        timeout: Duration,
    ) -> bool {
        if items.len() > self.capacity() {
            return false;
        }
        let deadline = Instant::now() + timeout;
        let mut timed_out = false;
        loop {
            if self.write_slice(items) {
                flag.wake(NOT_EMPTY);
                return true;
            }
            if timed_out {
                return false;
            }
            let now = Instant::now();
            // One last attempt after the deadline in case space appeared
            // without a wake.
            timed_out =
                now >= deadline || flag.wait_timeout(NOT_FULL, deadline - now) == 0;
        }
    }
}

/// Consumer half of a transfer queue
pub struct QueueReader<T> {
    consumer: Consumer<T>,
}

impl<T> QueueReader<T> {
    /// Pop one item; `None` if the queue is empty
    pub fn read(&mut self) -> Option<T> {
        self.consumer.pop().ok()
    }

    /// Pop one item, waiting on `bits` of `flag` until one arrives
    pub fn read_blocking(&mut self, flag: &EventFlag, bits: u32, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(item) = self.read() {
                return Some(item);
            }
            let now = Instant::now();
            if now >= deadline || flag.wait_timeout(bits, deadline - now) == 0 {
                return self.read();
            }
        }
    }

    pub fn available_to_read(&self) -> usize {
        self.consumer.slots()
    }

    pub fn capacity(&self) -> usize {
        self.consumer.buffer().capacity()
    }
}

impl<T: Copy> QueueReader<T> {
    /// Fill `dst` from the queue, or read nothing if fewer items are queued
    pub fn read_slice(&mut self, dst: &mut [T]) -> bool {
        if dst.is_empty() {
            return true;
        }
        let Ok(chunk) = self.consumer.read_chunk(dst.len()) else {
            return false;
        };
        let (first, second) = chunk.as_slices();
        dst[..first.len()].copy_from_slice(first);
        dst[first.len()..].copy_from_slice(second);
        chunk.commit_all();
        true
    }
}
