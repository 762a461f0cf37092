// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Sparse map from descriptor handle to its read, write and error callbacks.

use super::{Scheduler, SchedulerError};
use std::{collections::BTreeMap, fmt, os::fd::RawFd, rc::Rc};

/// A readiness callback. Shared ([`Rc`]) so dispatch can hold on to the callback it is
/// running while the callback itself replaces or clears its own registration.
pub type IoCallback = Rc<dyn Fn(&mut Scheduler)>;

/// Builds an [`IoCallback`] from a closure.
pub fn io_callback(f: impl Fn(&mut Scheduler) + 'static) -> Option<IoCallback> {
    Some(Rc::new(f))
}

/// Which of the three slots of a [`Registration`] a readiness flag maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum HandlerKind {
    Read,
    Write,
    Error,
}

/// The callbacks registered for one descriptor handle. Any context the callback needs
/// is captured by the closure.
#[derive(Clone, Default)]
pub struct Registration {
    pub read: Option<IoCallback>,
    pub write: Option<IoCallback>,
    pub error: Option<IoCallback>,
}

impl Registration {
    #[must_use]
    pub fn new(
        read: Option<IoCallback>,
        write: Option<IoCallback>,
        error: Option<IoCallback>,
    ) -> Self {
        Self { read, write, error }
    }

    /// A registration with all three slots empty is the same as no registration.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read.is_none() && self.write.is_none() && self.error.is_none()
    }

    #[must_use]
    pub fn get(&self, kind: HandlerKind) -> Option<&IoCallback> {
        match kind {
            HandlerKind::Read => self.read.as_ref(),
            HandlerKind::Write => self.write.as_ref(),
            HandlerKind::Error => self.error.as_ref(),
        }
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("read", &self.read.is_some())
            .field("write", &self.write.is_some())
            .field("error", &self.error.is_some())
            .finish()
    }
}

/// Registrations keyed by descriptor, iterated in ascending descriptor order.
///
/// Every mutation replaces a whole [`Registration`] value in one step, so a dispatch in
/// progress never sees a half-updated triple.
#[derive(Debug)]
pub struct HandlerTable {
    capacity: usize,
    entries: BTreeMap<RawFd, Registration>,
}

impl HandlerTable {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: BTreeMap::new(),
        }
    }

    /// Replaces the registration for `fd`. An empty registration removes the entry.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NegativeHandle`] or
    /// [`SchedulerError::HandleOutOfRange`] when `fd` can't be tracked.
    pub fn set(&mut self, fd: RawFd, registration: Registration) -> Result<(), SchedulerError> {
        self.check(fd)?;
        if registration.is_empty() {
            self.entries.remove(&fd);
        } else {
            self.entries.insert(fd, registration);
        }
        Ok(())
    }

    /// Changes one slot of the registration for `fd`, keeping the other two.
    ///
    /// # Errors
    ///
    /// Same as [`Self::set`].
    pub fn set_slot(
        &mut self,
        fd: RawFd,
        kind: HandlerKind,
        callback: Option<IoCallback>,
    ) -> Result<(), SchedulerError> {
        let mut registration = self.get(fd).cloned().unwrap_or_default();
        match kind {
            HandlerKind::Read => registration.read = callback,
            HandlerKind::Write => registration.write = callback,
            HandlerKind::Error => registration.error = callback,
        }
        self.set(fd, registration)
    }

    #[must_use]
    pub fn get(&self, fd: RawFd) -> Option<&Registration> { self.entries.get(&fd) }

    pub fn remove(&mut self, fd: RawFd) -> Option<Registration> { self.entries.remove(&fd) }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    #[must_use]
    pub fn len(&self) -> usize { self.entries.len() }

    /// Highest registered handle, if any.
    #[must_use]
    pub fn max_handle(&self) -> Option<RawFd> {
        self.entries.last_key_value().map(|(fd, _)| *fd)
    }

    /// Snapshot of `(fd, wants_read, wants_write)` in ascending descriptor order.
    #[must_use]
    pub fn wait_set(&self) -> Vec<(RawFd, bool, bool)> {
        self.entries
            .iter()
            .map(|(fd, it)| (*fd, it.read.is_some(), it.write.is_some()))
            .collect()
    }

    fn check(&self, fd: RawFd) -> Result<(), SchedulerError> {
        let Ok(index) = usize::try_from(fd) else {
            return Err(SchedulerError::NegativeHandle { fd });
        };
        if index >= self.capacity {
            return Err(SchedulerError::HandleOutOfRange {
                fd,
                capacity: self.capacity,
            });
        }
        Ok(())
    }
}
