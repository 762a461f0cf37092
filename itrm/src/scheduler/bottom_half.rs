// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Deferred work that runs after the current callback returns.
//!
//! Entries are deduplicated by [`BottomHalfKey`]: scheduling a key that is still
//! pending does nothing. The queue drains in FIFO order. Callers treat the pending set
//! as "side effects to settle", so nothing downstream relies on the order.

use std::collections::VecDeque;

/// Identity of a bottom half, used for deduplication. `name` plays the role of the
/// callback, `context` the role of its argument (usually an address or an id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BottomHalfKey {
    pub name: &'static str,
    pub context: usize,
}

impl BottomHalfKey {
    #[must_use]
    pub const fn new(name: &'static str, context: usize) -> Self { Self { name, context } }
}

/// FIFO of pending bottom halves, generic over the callback type.
#[derive(Debug)]
pub struct BottomHalfQueue<T> {
    pending: VecDeque<(BottomHalfKey, T)>,
}

impl<T> Default for BottomHalfQueue<T> {
    fn default() -> Self {
        Self {
            pending: VecDeque::new(),
        }
    }
}

impl<T> BottomHalfQueue<T> {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Enqueues `payload` under `key`. Returns false (and drops `payload`) if an entry
    /// with the same key is still pending.
    pub fn push(&mut self, key: BottomHalfKey, payload: T) -> bool {
        if self.pending.iter().any(|(it, _)| *it == key) {
            return false;
        }
        self.pending.push_back((key, payload));
        true
    }

    /// Removes the oldest entry. The key is free for re-use as soon as this returns,
    /// so the entry may schedule itself again while it runs.
    pub fn pop(&mut self) -> Option<(BottomHalfKey, T)> { self.pending.pop_front() }

    #[must_use]
    pub fn len(&self) -> usize { self.pending.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.pending.is_empty() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_duplicate_key_is_ignored_while_pending() {
        let mut queue = BottomHalfQueue::new();
        let key = BottomHalfKey::new("flush", 7);
        assert!(queue.push(key, 1));
        assert!(!queue.push(key, 2));
        assert!(queue.push(BottomHalfKey::new("flush", 8), 3));
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.pop(), Some((key, 1)));
        // Once popped, the same key can be scheduled again.
        assert!(queue.push(key, 4));
    }

    #[test]
    fn test_drains_fifo() {
        let mut queue = BottomHalfQueue::new();
        queue.push(BottomHalfKey::new("a", 0), 'a');
        queue.push(BottomHalfKey::new("b", 0), 'b');
        queue.push(BottomHalfKey::new("c", 0), 'c');

        let order: Vec<char> = std::iter::from_fn(|| queue.pop().map(|(_, it)| it)).collect();
        assert_eq!(order, vec!['a', 'b', 'c']);
        assert!(queue.is_empty());
    }
}
