// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![cfg_attr(not(test), no_std)]

/// A fixed-capacity byte FIFO, backed by borrowed memory.
///
/// When given an `n`-byte slice of backing memory, a `ByteQueue` can store up
/// to `n` bytes in FIFO order, one byte at a time. The capacity does not have
/// to be a power of two; a separate occupancy count disambiguates full from
/// empty.
///
/// # Design goals
///
/// 1. `no_std`, no allocation.
/// 2. Use borrowed memory, so that a queue can be backed by a named `static`
///    for debug visibility, rather than some random location on the stack.
/// 3. Be usable between a task and an interrupt handler: one side produces,
///    the other consumes. The queue itself does no locking -- the task-side
///    caller is expected to wrap its call in a brief interrupt-masked
///    section, and the handler side is already serialized at its own
///    priority.
/// 4. Code clarity -- there are many arithmetical tricks in circular queue
///    implementation, and this uses none of them.
///
/// Non-goals:
///
/// - Block transfers. Producers and consumers here move single bytes, which
///   is the natural unit on a byte-at-a-time serial port.
/// - Being the most efficient queue ever.
#[derive(Debug)]
pub struct ByteQueue<'s> {
    backing: &'s mut [u8],
    head: usize,
    tail: usize,
    used: usize,
}

/// Error returned when the queue has no room for another byte.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct QueueFull;

impl<'s> ByteQueue<'s> {
    /// Creates a queue structure with the given backing memory. The queue is
    /// initially empty.
    pub fn new(backing: &'s mut [u8]) -> Self {
        Self {
            backing,
            head: 0,
            tail: 0,
            used: 0,
        }
    }

    /// Total number of bytes the queue can hold.
    pub fn capacity(&self) -> usize {
        self.backing.len()
    }

    /// Number of bytes that have been pushed but not yet popped.
    pub fn len(&self) -> usize {
        self.used
    }

    /// Number of bytes that can still be pushed without popping.
    pub fn free(&self) -> usize {
        self.capacity() - self.used
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    pub fn is_full(&self) -> bool {
        self.used == self.capacity()
    }

    /// Appends `byte` at the tail, or reports `QueueFull` leaving the queue
    /// unchanged.
    pub fn try_push(&mut self, byte: u8) -> Result<(), QueueFull> {
        if self.is_full() {
            return Err(QueueFull);
        }
        self.backing[self.tail] = byte;
        self.tail = self.advance(self.tail);
        self.used += 1;
        Ok(())
    }

    /// Removes the oldest byte, or returns `None` if the queue is empty.
    pub fn try_pop(&mut self) -> Option<u8> {
        if self.is_empty() {
            return None;
        }
        let byte = self.backing[self.head];
        self.head = self.advance(self.head);
        self.used -= 1;
        Some(byte)
    }

    /// Discards all queued bytes.
    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.used = 0;
    }

    fn advance(&self, index: usize) -> usize {
        // Explicit wrap rather than modulo, so a non-power-of-two capacity
        // costs nothing.
        if index + 1 == self.backing.len() {
            0
        } else {
            index + 1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_state() {
        let mut backing = [0; 16];
        let q = ByteQueue::new(&mut backing);

        assert!(q.is_empty());
        assert!(!q.is_full());
        assert_eq!(q.len(), 0);
        assert_eq!(q.free(), 16);
        assert_eq!(q.capacity(), 16);
    }

    #[test]
    fn fifo_order() {
        let mut backing = [0; 16];
        let mut q = ByteQueue::new(&mut backing);

        let test_string = b"ABCDEFGHIJKLMNOP";
        assert_eq!(test_string.len(), 16); // Don't break this plz

        for (i, &byte) in test_string.iter().enumerate() {
            assert_eq!(q.len(), i);
            assert_eq!(q.free(), 16 - i);
            q.try_push(byte)
                .unwrap_or_else(|_| panic!("push {i} should succeed"));
        }
        assert!(q.is_full());
        assert_eq!(q.try_push(b'!'), Err(QueueFull));
        // The failed push must leave the contents alone.
        assert_eq!(q.len(), 16);

        for &expected in test_string {
            assert_eq!(q.try_pop(), Some(expected));
        }
        assert_eq!(q.try_pop(), None);
    }

    #[test]
    fn accounting_holds_across_interleaving() {
        // Odd capacity on purpose: wrap handling must not assume a power of
        // two.
        let mut backing = [0; 7];
        let mut q = ByteQueue::new(&mut backing);

        let mut next_in: u8 = 0;
        let mut next_out: u8 = 0;
        // Push two, pop one, long enough to wrap several times.
        for _ in 0..100 {
            for _ in 0..2 {
                if q.try_push(next_in).is_ok() {
                    next_in = next_in.wrapping_add(1);
                }
            }
            assert_eq!(q.len() + q.free(), q.capacity());
            if let Some(byte) = q.try_pop() {
                // Popped bytes must be a prefix of the pushed sequence.
                assert_eq!(byte, next_out);
                next_out = next_out.wrapping_add(1);
            }
        }
        // Drain and confirm the tail of the sequence survived intact.
        while let Some(byte) = q.try_pop() {
            assert_eq!(byte, next_out);
            next_out = next_out.wrapping_add(1);
        }
        assert_eq!(next_in, next_out);
    }

    #[test]
    fn pop_on_empty_after_wrap() {
        let mut backing = [0; 3];
        let mut q = ByteQueue::new(&mut backing);

        for round in 0..5 {
            q.try_push(round).unwrap();
            assert_eq!(q.try_pop(), Some(round));
            assert_eq!(q.try_pop(), None);
        }
    }

    #[test]
    fn clear_discards_contents() {
        let mut backing = [0; 4];
        let mut q = ByteQueue::new(&mut backing);

        q.try_push(1).unwrap();
        q.try_push(2).unwrap();
        q.clear();
        assert!(q.is_empty());
        assert_eq!(q.try_pop(), None);
        // Still fully usable afterwards.
        q.try_push(3).unwrap();
        assert_eq!(q.try_pop(), Some(3));
    }
}
