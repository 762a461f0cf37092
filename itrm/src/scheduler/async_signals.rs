// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words SIGWINCH SIGCHLD SIGINT SIGTERM

//! Self-pipe that carries asynchronous notifications into the select loop.
//!
//! A signal (or another thread) sets a per-signal flag and writes one byte to the pipe.
//! The read end sits in the wait set, so a notification that arrives while the loop is
//! blocked wakes it, and one that arrives just before the wait is seen by the check
//! right before it. Either way it is processed before the next wait call.
//!
//! OS signals are hooked with [`signal_hook`]: [`signal_hook::flag::register`] sets the
//! flag, [`signal_hook::low_level::pipe::register`] writes the wake-up byte. Both are
//! async-signal-safe.

use smallvec::SmallVec;
use std::{io::{self, Read as _, Write as _},
          os::{fd::{AsRawFd, RawFd},
               unix::net::UnixStream},
          sync::{Arc,
                 atomic::{AtomicBool, Ordering}}};
use strum::IntoEnumIterator as _;

/// Asynchronous events the loop knows how to wait for.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum_macros::EnumIter,
    strum_macros::Display,
)]
pub enum AsyncSignal {
    /// Terminal window size changed (`SIGWINCH`).
    Resize,
    /// A child process exited (`SIGCHLD`).
    ChildExited,
    /// Interrupt from the keyboard (`SIGINT`).
    Interrupt,
    /// Polite termination request (`SIGTERM`).
    Terminate,
}

impl AsyncSignal {
    const COUNT: usize = 4;

    fn index(self) -> usize {
        match self {
            AsyncSignal::Resize => 0,
            AsyncSignal::ChildExited => 1,
            AsyncSignal::Interrupt => 2,
            AsyncSignal::Terminate => 3,
        }
    }

    /// The OS signal number this maps to.
    #[must_use]
    pub fn os_signal(self) -> std::ffi::c_int {
        use signal_hook::consts::{SIGCHLD, SIGINT, SIGTERM, SIGWINCH};
        match self {
            AsyncSignal::Resize => SIGWINCH,
            AsyncSignal::ChildExited => SIGCHLD,
            AsyncSignal::Interrupt => SIGINT,
            AsyncSignal::Terminate => SIGTERM,
        }
    }
}

/// Cheap, cloneable, thread-safe handle for injecting an [`AsyncSignal`] into the
/// loop. [`AsyncNotifier::notify`] may be called from any thread.
#[derive(Debug, Clone)]
pub struct AsyncNotifier {
    flags: Arc<[Arc<AtomicBool>; AsyncSignal::COUNT]>,
    wake: Arc<UnixStream>,
}

impl AsyncNotifier {
    /// Marks `signal` pending and wakes the loop.
    pub fn notify(&self, signal: AsyncSignal) {
        self.flags[signal.index()].store(true, Ordering::SeqCst);
        // A full pipe already guarantees a wake-up, so WouldBlock is fine to ignore.
        let _unused = (&*self.wake).write(&[1]);
    }
}

/// Owns both ends of the self-pipe and the OS signal registrations.
#[derive(Debug)]
pub struct SignalPipe {
    read_end: UnixStream,
    notifier: AsyncNotifier,
    hooked: Vec<signal_hook::SigId>,
}

impl SignalPipe {
    /// # Errors
    ///
    /// Returns the OS error if the socket pair can't be created.
    pub fn new() -> io::Result<Self> {
        let (read_end, write_end) = UnixStream::pair()?;
        read_end.set_nonblocking(true)?;
        write_end.set_nonblocking(true)?;
        let flags: [Arc<AtomicBool>; AsyncSignal::COUNT] =
            std::array::from_fn(|_| Arc::new(AtomicBool::new(false)));
        Ok(Self {
            read_end,
            notifier: AsyncNotifier {
                flags: Arc::new(flags),
                wake: Arc::new(write_end),
            },
            hooked: vec![],
        })
    }

    #[must_use]
    pub fn fd(&self) -> RawFd { self.read_end.as_raw_fd() }

    #[must_use]
    pub fn notifier(&self) -> AsyncNotifier { self.notifier.clone() }

    /// Routes the OS signals behind `signals` into this pipe. Hooking replaces the
    /// default disposition of those signals for the whole process.
    ///
    /// # Errors
    ///
    /// Returns the OS error if a handler can't be installed.
    pub fn hook_os_signals(&mut self, signals: &[AsyncSignal]) -> io::Result<()> {
        for signal in signals {
            let flag = Arc::clone(&self.notifier.flags[signal.index()]);
            self.hooked
                .push(signal_hook::flag::register(signal.os_signal(), flag)?);
            let wake = self.notifier.wake.try_clone()?;
            self.hooked
                .push(signal_hook::low_level::pipe::register(signal.os_signal(), wake)?);
            tracing::debug!(message = "hooked OS signal", signal = %signal);
        }
        Ok(())
    }

    /// Empties the pipe so it stops reporting readable.
    pub fn drain_wakeups(&self) {
        let mut buf = [0_u8; 64];
        loop {
            match (&self.read_end).read(&mut buf) {
                Ok(0) => return,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(_) => return,
            }
        }
    }

    /// Clears and returns every pending signal, in [`AsyncSignal`] declaration order.
    pub fn take_pending(&self) -> SmallVec<[AsyncSignal; AsyncSignal::COUNT]> {
        AsyncSignal::iter()
            .filter(|it| self.notifier.flags[it.index()].swap(false, Ordering::SeqCst))
            .collect()
    }
}

impl Drop for SignalPipe {
    fn drop(&mut self) {
        for id in self.hooked.drain(..) {
            signal_hook::low_level::unregister(id);
        }
    }
}
