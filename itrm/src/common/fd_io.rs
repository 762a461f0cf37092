// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words EINTR EAGAIN revents

//! Thin non-blocking I/O helpers over raw descriptor handles.
//!
//! Descriptor handles are plain integers that the OS layer owns. The select loop and the
//! terminal session never close them, they only borrow them for the duration of a single
//! syscall. All helpers retry on `EINTR`.
//!
//! | Helper         | `EAGAIN` behavior                        |
//! | :------------- | :--------------------------------------- |
//! | [`safe_read`]  | `Err(WouldBlock)`, caller treats as idle |
//! | [`safe_write`] | `Ok(0)`, caller buffers the remainder    |
//! | [`hard_write`] | waits for writability, then retries      |

use rustix::{event::{PollFd, PollFlags, Timespec, poll},
             fd::BorrowedFd,
             io::Errno};
use std::{io, os::fd::RawFd};

/// Zero timeout, turns [`poll`] into a readiness probe.
pub const ZERO_TIMEOUT: Timespec = Timespec {
    tv_sec: 0,
    tv_nsec: 0,
};

/// Borrows a raw descriptor for a single syscall.
///
/// # Safety (internal)
///
/// Callers only pass descriptors that are registered with the scheduler or owned by a
/// live terminal session, both of which outlive the syscall this borrow is used for.
pub(crate) fn borrow_fd(fd: RawFd) -> BorrowedFd<'static> {
    // SAFETY: see above. A closed descriptor yields EBADF from the kernel, never UB in
    // this process since no memory is associated with the integer.
    unsafe { BorrowedFd::borrow_raw(fd) }
}

/// Reads up to `buf.len()` bytes. Returns `Ok(0)` on EOF.
///
/// # Errors
///
/// Returns [`io::ErrorKind::WouldBlock`] when nothing is available on a non-blocking
/// descriptor, or the underlying OS error.
pub fn safe_read(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match rustix::io::read(borrow_fd(fd), &mut *buf) {
            Ok(n) => return Ok(n),
            Err(Errno::INTR) => {}
            Err(e) => return Err(e.into()),
        }
    }
}

/// Writes as much of `buf` as the descriptor accepts right now.
///
/// # Errors
///
/// Returns the OS error for anything other than `EINTR` or `EAGAIN`. A would-block
/// outcome is reported as `Ok(0)`.
pub fn safe_write(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    loop {
        match rustix::io::write(borrow_fd(fd), buf) {
            Ok(n) => return Ok(n),
            Err(Errno::INTR) => {}
            Err(Errno::AGAIN) => return Ok(0),
            Err(e) => return Err(e.into()),
        }
    }
}

/// Writes all of `buf`, waiting for writability when the descriptor is full.
///
/// Only used on the attach and detach paths, where the terminal's init and done
/// sequences must reach the tty before the session changes state.
///
/// # Errors
///
/// Returns the OS error, or [`io::ErrorKind::WriteZero`] if the descriptor stops
/// accepting bytes.
pub fn hard_write(fd: RawFd, mut buf: &[u8]) -> io::Result<()> {
    while !buf.is_empty() {
        let n = safe_write(fd, buf)?;
        if n == 0 {
            wait_for(fd, PollFlags::OUT, None)?;
            if !can_write(fd) {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "descriptor stopped accepting bytes",
                ));
            }
            continue;
        }
        buf = &buf[n..];
    }
    Ok(())
}

/// Returns true if a read on `fd` would not block (data, EOF, or a pending error).
#[must_use]
pub fn can_read(fd: RawFd) -> bool {
    matches!(wait_for(fd, PollFlags::IN, Some(&ZERO_TIMEOUT)), Ok(true))
}

/// Returns true if a write on `fd` would not block.
#[must_use]
pub fn can_write(fd: RawFd) -> bool {
    matches!(wait_for(fd, PollFlags::OUT, Some(&ZERO_TIMEOUT)), Ok(true))
}

fn wait_for(fd: RawFd, flags: PollFlags, timeout: Option<&Timespec>) -> io::Result<bool> {
    let borrowed = borrow_fd(fd);
    let mut fds = [PollFd::from_borrowed_fd(borrowed, flags)];
    loop {
        match poll(&mut fds, timeout) {
            Ok(0) => return Ok(false),
            Ok(_) => return Ok(!fds[0].revents().is_empty()),
            Err(Errno::INTR) => {}
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::{io::Write as _,
              os::{fd::AsRawFd, unix::net::UnixStream}};

    #[test]
    fn test_can_read_reflects_pending_bytes() {
        let (mut a, b) = UnixStream::pair().unwrap();
        assert!(!can_read(b.as_raw_fd()));
        a.write_all(b"x").unwrap();
        assert!(can_read(b.as_raw_fd()));
    }

    #[test]
    fn test_safe_read_would_block_on_empty_nonblocking_socket() {
        let (_a, b) = UnixStream::pair().unwrap();
        b.set_nonblocking(true).unwrap();
        let mut buf = [0_u8; 8];
        let err = safe_read(b.as_raw_fd(), &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn test_safe_read_reports_eof_as_zero() {
        let (a, b) = UnixStream::pair().unwrap();
        drop(a);
        let mut buf = [0_u8; 8];
        assert_eq!(safe_read(b.as_raw_fd(), &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_safe_write_then_read() {
        let (a, b) = UnixStream::pair().unwrap();
        assert!(can_write(a.as_raw_fd()));
        assert_eq!(safe_write(a.as_raw_fd(), b"hello").unwrap(), 5);
        hard_write(a.as_raw_fd(), b" world").unwrap();
        let mut buf = [0_u8; 16];
        let n = safe_read(b.as_raw_fd(), &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello world");
    }
}
