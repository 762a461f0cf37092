// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Non-blocking delivery of bytes to one descriptor.
//!
//! [`OutputQueue::send()`] writes directly when nothing is queued and the descriptor is
//! writable, and buffers whatever did not go out. The owner then registers a write
//! handler that calls [`OutputQueue::flush_chunk()`] until [`FlushOutcome::Drained`],
//! at which point the write handler is removed again. The queue itself knows nothing
//! about the scheduler.

use crate::{can_write, safe_write};
use miette::Diagnostic;
use std::{io, os::fd::RawFd};

/// Why bytes could not be delivered. Either way the owning session is torn down.
#[derive(Debug, thiserror::Error, Diagnostic)]
pub enum OutputQueueError {
    #[error("Write to descriptor {fd} failed")]
    #[diagnostic(
        code(itrm::output::write),
        help("The peer closed the connection or the descriptor is no longer valid")
    )]
    Write {
        fd: RawFd,
        #[source]
        source: io::Error,
    },

    #[error("Output queue overflow: {pending} bytes pending, capacity is {capacity}")]
    #[diagnostic(
        code(itrm::output::overflow),
        help("The peer stopped reading. Raise ItrmConfig::out_queue_capacity if it is just slow")
    )]
    Overflow { pending: usize, capacity: usize },
}

/// What [`OutputQueue::send()`] did with the bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Everything was written, nothing is queued.
    Written,
    /// Some bytes are queued, a write handler is needed.
    Queued,
}

/// What [`OutputQueue::flush_chunk()`] left behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// The queue is empty, the write handler can go.
    Drained,
    /// Bytes remain.
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputQueue {
    buffer: Vec<u8>,
    capacity: usize,
    chunk_size: usize,
}

impl OutputQueue {
    #[must_use]
    pub fn new(capacity: usize, chunk_size: usize) -> Self {
        Self {
            buffer: vec![],
            capacity: capacity.max(1),
            chunk_size: chunk_size.max(1),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize { self.buffer.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.buffer.is_empty() }

    #[must_use]
    pub fn pending(&self) -> &[u8] { &self.buffer }

    /// Bytes that can still be queued before [`OutputQueueError::Overflow`].
    #[must_use]
    pub fn free_space(&self) -> usize { self.capacity.saturating_sub(self.buffer.len()) }

    /// Writes `bytes` to `fd`, or queues them.
    ///
    /// # Errors
    ///
    /// [`OutputQueueError::Write`] on a hard write error, [`OutputQueueError::Overflow`]
    /// if the remainder doesn't fit. Nothing is queued in either case.
    pub fn send(&mut self, fd: RawFd, bytes: &[u8]) -> Result<SendOutcome, OutputQueueError> {
        if bytes.is_empty() {
            return Ok(if self.is_empty() {
                SendOutcome::Written
            } else {
                SendOutcome::Queued
            });
        }

        let mut rest = bytes;
        if self.is_empty() && can_write(fd) {
            let written =
                safe_write(fd, rest).map_err(|source| OutputQueueError::Write { fd, source })?;
            rest = &rest[written..];
            if rest.is_empty() {
                return Ok(SendOutcome::Written);
            }
        }

        let pending = self.buffer.len() + rest.len();
        if pending > self.capacity {
            return Err(OutputQueueError::Overflow {
                pending,
                capacity: self.capacity,
            });
        }
        self.buffer.extend_from_slice(rest);
        tracing::trace!(message = "output queued", fd, queued = self.buffer.len());
        Ok(SendOutcome::Queued)
    }

    /// Writes at most one chunk from the front of the queue.
    ///
    /// # Errors
    ///
    /// [`OutputQueueError::Write`] on a hard write error.
    pub fn flush_chunk(&mut self, fd: RawFd) -> Result<FlushOutcome, OutputQueueError> {
        if !self.buffer.is_empty() {
            let chunk = self.buffer.len().min(self.chunk_size);
            let written = safe_write(fd, &self.buffer[..chunk])
                .map_err(|source| OutputQueueError::Write { fd, source })?;
            self.buffer.drain(..written);
        }
        Ok(if self.buffer.is_empty() {
            FlushOutcome::Drained
        } else {
            FlushOutcome::Pending
        })
    }

    pub fn clear(&mut self) { self.buffer.clear(); }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::{io::Read as _,
              os::{fd::AsRawFd as _, unix::net::UnixStream}};

    #[test]
    fn test_fast_path_writes_directly() {
        let (a, mut b) = UnixStream::pair().unwrap();
        let mut queue = OutputQueue::new(16, 4);
        assert_eq!(queue.send(a.as_raw_fd(), b"hello").unwrap(), SendOutcome::Written);
        let mut buf = [0_u8; 5];
        b.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn test_queued_bytes_flush_in_chunks_and_order() {
        let (a, mut b) = UnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        let mut queue = OutputQueue::new(64, 4);
        queue.buffer.extend_from_slice(b"abc");

        // Something is already queued, so this must not overtake it.
        assert_eq!(queue.send(a.as_raw_fd(), b"defgh").unwrap(), SendOutcome::Queued);
        assert_eq!(queue.pending(), b"abcdefgh");

        assert_eq!(queue.flush_chunk(a.as_raw_fd()).unwrap(), FlushOutcome::Pending);
        assert_eq!(queue.flush_chunk(a.as_raw_fd()).unwrap(), FlushOutcome::Drained);
        let mut buf = [0_u8; 8];
        b.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"abcdefgh");
    }

    #[test]
    fn test_overflow_is_an_error() {
        let (a, _b) = UnixStream::pair().unwrap();
        let mut queue = OutputQueue::new(4, 4);
        queue.buffer.extend_from_slice(b"xyz");
        assert!(matches!(
            queue.send(a.as_raw_fd(), b"12"),
            Err(OutputQueueError::Overflow {
                pending: 5,
                capacity: 4
            })
        ));
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.free_space(), 1);
    }

    #[test]
    fn test_write_to_closed_peer_is_an_error() {
        let (a, b) = UnixStream::pair().unwrap();
        drop(b);
        let mut queue = OutputQueue::new(4, 4);
        assert!(matches!(
            queue.send(a.as_raw_fd(), b"x"),
            Err(OutputQueueError::Write { .. })
        ));
    }
}
