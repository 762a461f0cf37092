// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words ECONNREFUSED ENOENT

//! The Unix socket that joins slaves to their master.
//!
//! [`connect_or_listen()`] becomes a slave when a master answers at the path, and the
//! master otherwise. Both directions retry a few times: a master that is still starting
//! refuses connections, and a master that just died leaves its socket file behind.

use super::InterlinkError;
use crate::{HandlerKind, Scheduler, SchedulerError, io_callback};
use std::{io,
          os::{fd::{AsRawFd, RawFd},
               unix::net::{UnixListener, UnixStream}},
          path::{Path, PathBuf},
          rc::Rc,
          thread,
          time::Duration};

pub const MAX_BIND_TRIES: u32 = 3;
pub const CONNECT_RETRY_STEP: Duration = Duration::from_millis(50);
pub const BIND_RETRY_STEP: Duration = Duration::from_millis(100);

/// Which side of the interlink this process ended up on.
#[derive(Debug)]
pub enum InterlinkSocket {
    Slave(UnixStream),
    Master(InterlinkListener),
}

fn is_absent_master(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound
    )
}

/// Connects to the master at `path`. `Ok(None)` means nobody is listening.
///
/// # Errors
///
/// [`InterlinkError::Connect`] for failures other than a missing or refusing master.
pub fn connect(path: &Path) -> Result<Option<UnixStream>, InterlinkError> {
    for attempt in 1..=MAX_BIND_TRIES {
        match UnixStream::connect(path) {
            Ok(stream) => {
                tracing::debug!(message = "connected to master", path = ?path, attempt);
                return Ok(Some(stream));
            }
            Err(e) if is_absent_master(&e) => {
                if attempt < MAX_BIND_TRIES {
                    thread::sleep(CONNECT_RETRY_STEP * attempt);
                }
            }
            Err(source) => {
                return Err(InterlinkError::Connect {
                    path: path.to_path_buf(),
                    source,
                });
            }
        }
    }
    Ok(None)
}

/// Becomes a slave of an existing master, or the master.
///
/// # Errors
///
/// [`InterlinkError::Connect`] or [`InterlinkError::Bind`].
pub fn connect_or_listen(path: &Path) -> Result<InterlinkSocket, InterlinkError> {
    if let Some(stream) = connect(path)? {
        return Ok(InterlinkSocket::Slave(stream));
    }
    InterlinkListener::bind(path).map(InterlinkSocket::Master)
}

/// A bound master socket. The socket file is removed on drop.
#[derive(Debug)]
pub struct InterlinkListener {
    listener: UnixListener,
    path: PathBuf,
}

impl InterlinkListener {
    /// Binds at `path`. The last try removes a stale socket file first.
    ///
    /// # Errors
    ///
    /// [`InterlinkError::Bind`] with the last error seen.
    pub fn bind(path: &Path) -> Result<Self, InterlinkError> {
        let mut attempt = 1;
        loop {
            if attempt == MAX_BIND_TRIES {
                // Leftover from a master that died without cleaning up.
                let _unused = std::fs::remove_file(path);
            }
            match UnixListener::bind(path) {
                Ok(listener) => {
                    listener
                        .set_nonblocking(true)
                        .map_err(|source| InterlinkError::Bind {
                            path: path.to_path_buf(),
                            source,
                        })?;
                    tracing::debug!(message = "listening for slaves", path = ?path, attempt);
                    return Ok(Self {
                        listener,
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AddrInUse && attempt < MAX_BIND_TRIES => {
                    thread::sleep(BIND_RETRY_STEP * attempt);
                    attempt += 1;
                }
                Err(source) => {
                    return Err(InterlinkError::Bind {
                        path: path.to_path_buf(),
                        source,
                    });
                }
            }
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path { &self.path }

    #[must_use]
    pub fn fd(&self) -> RawFd { self.listener.as_raw_fd() }

    /// Accepts one pending connection. `Ok(None)` when none is waiting.
    ///
    /// # Errors
    ///
    /// [`InterlinkError::Accept`].
    pub fn accept(&self) -> Result<Option<UnixStream>, InterlinkError> {
        match self.listener.accept() {
            Ok((stream, _)) => {
                stream.set_nonblocking(true).map_err(InterlinkError::Accept)?;
                Ok(Some(stream))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(InterlinkError::Accept(e)),
        }
    }

    /// Hands every accepted connection to `on_accept` from inside the select loop.
    /// Accept failures are logged and the listener stays registered.
    ///
    /// # Errors
    ///
    /// [`SchedulerError`] if the listener can't be registered.
    pub fn register(
        this: &Rc<Self>,
        scheduler: &mut Scheduler,
        on_accept: impl Fn(&mut Scheduler, UnixStream) + 'static,
    ) -> Result<(), SchedulerError> {
        let fd = this.fd();
        let this = Rc::clone(this);
        scheduler.set_handler(
            fd,
            HandlerKind::Read,
            io_callback(move |scheduler| match this.accept() {
                Ok(Some(stream)) => on_accept(scheduler, stream),
                Ok(None) => {}
                Err(e) => tracing::warn!(message = "accept failed", error = ?e),
            }),
        )
    }
}

impl Drop for InterlinkListener {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::debug!(message = "socket file already gone", path = ?self.path, error = ?e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SchedulerConfig, try_create_temp_dir};
    use std::{cell::RefCell, io::Write as _};

    #[test]
    fn test_first_process_listens_second_connects() {
        let dir = try_create_temp_dir().unwrap();
        let path = dir.join("socket");

        let InterlinkSocket::Master(listener) = connect_or_listen(&path).unwrap() else {
            panic!("nobody was listening yet");
        };
        assert!(path.exists());

        let InterlinkSocket::Slave(mut slave) = connect_or_listen(&path).unwrap() else {
            panic!("the master is listening");
        };
        slave.write_all(b"x").unwrap();

        let listener = Rc::new(listener);
        let accepted = Rc::new(RefCell::new(0));
        let accepted_clone = Rc::clone(&accepted);
        let mut scheduler = Scheduler::new(SchedulerConfig::default()).unwrap();
        InterlinkListener::register(&listener, &mut scheduler, move |scheduler, _stream| {
            *accepted_clone.borrow_mut() += 1;
            scheduler.request_terminate();
        })
        .unwrap();
        scheduler.run(|_| {}).unwrap();
        assert_eq!(*accepted.borrow(), 1);

        scheduler.clear(listener.fd());
        drop(scheduler);
        drop(listener);
        assert!(!path.exists());
    }

    #[test]
    fn test_stale_socket_file_is_replaced() {
        let dir = try_create_temp_dir().unwrap();
        let path = dir.join("socket");
        std::fs::write(&path, b"").unwrap();

        let listener = InterlinkListener::bind(&path).unwrap();
        assert_eq!(listener.path(), path.as_path());
    }
}
