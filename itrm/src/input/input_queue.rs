// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

use std::collections::VecDeque;

/// Bounded buffer of raw terminal bytes waiting to be decoded.
///
/// Bytes are appended at the back by reads and consumed from the front by the decoder.
/// When it is full the session stops reading its input descriptor until the decoder
/// frees space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputQueue {
    buffer: VecDeque<u8>,
    capacity: usize,
}

impl InputQueue {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize { self.capacity }

    #[must_use]
    pub fn len(&self) -> usize { self.buffer.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.buffer.is_empty() }

    #[must_use]
    pub fn is_full(&self) -> bool { self.buffer.len() >= self.capacity }

    #[must_use]
    pub fn free_space(&self) -> usize { self.capacity - self.buffer.len() }

    /// Appends as much of `bytes` as fits and returns how many were taken.
    pub fn push(&mut self, bytes: &[u8]) -> usize {
        let taken = bytes.len().min(self.free_space());
        self.buffer.extend(&bytes[..taken]);
        taken
    }

    /// Drops `count` bytes from the front.
    pub fn consume(&mut self, count: usize) {
        debug_assert!(count <= self.buffer.len(), "input queue underflow");
        let count = count.min(self.buffer.len());
        self.buffer.drain(..count);
    }

    /// The queued bytes as one slice.
    pub fn as_slice(&mut self) -> &[u8] { self.buffer.make_contiguous() }

    pub fn clear(&mut self) { self.buffer.clear(); }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_push_respects_capacity() {
        let mut queue = InputQueue::new(4);
        assert_eq!(queue.push(b"abc"), 3);
        assert_eq!(queue.push(b"def"), 1);
        assert!(queue.is_full());
        assert_eq!(queue.as_slice(), b"abcd");
    }

    #[test]
    fn test_consume_then_refill_stays_contiguous() {
        let mut queue = InputQueue::new(4);
        queue.push(b"abcd");
        queue.consume(3);
        assert_eq!(queue.free_space(), 3);
        queue.push(b"xyz");
        assert_eq!(queue.as_slice(), b"dxyz");
    }
}
