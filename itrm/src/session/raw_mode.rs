// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words termios tcgetattr tcsetattr VERASE OPOST ISIG winsize

//! Terminal attributes of the control descriptor.

use crate::{Geometry, common::fd_io::borrow_fd};
use rustix::termios::{self, LocalModes, OptionalActions, OutputModes, SpecialCodeIndex,
                      Termios};
use std::{io, os::fd::RawFd};

/// Attributes saved before the first switch to raw mode, restored on block and detach.
#[derive(Debug, Clone)]
pub struct SavedTermios {
    fd: RawFd,
    original: Termios,
}

impl SavedTermios {
    /// Saves the current attributes of `fd` and switches it to raw mode.
    ///
    /// # Errors
    ///
    /// The OS error, for example when `fd` is not a terminal.
    pub fn enter_raw_mode(fd: RawFd) -> io::Result<Self> {
        let original = termios::tcgetattr(borrow_fd(fd))?;
        let it = Self { fd, original };
        it.reenter_raw_mode()?;
        Ok(it)
    }

    /// Switches to raw mode again after [`Self::restore()`]. Signals from the keyboard
    /// and output post-processing stay on.
    ///
    /// # Errors
    ///
    /// The OS error.
    pub fn reenter_raw_mode(&self) -> io::Result<()> {
        let mut raw = self.original.clone();
        raw.make_raw();
        raw.local_modes |= LocalModes::ISIG;
        raw.output_modes |= OutputModes::OPOST;
        termios::tcsetattr(borrow_fd(self.fd), OptionalActions::Now, &raw)?;
        Ok(())
    }

    /// Puts the saved attributes back.
    ///
    /// # Errors
    ///
    /// The OS error.
    pub fn restore(&self) -> io::Result<()> {
        termios::tcsetattr(borrow_fd(self.fd), OptionalActions::Now, &self.original)?;
        Ok(())
    }

    /// The erase character configured before raw mode, if any.
    #[must_use]
    pub fn erase_char(&self) -> Option<u8> {
        match self.original.special_codes[SpecialCodeIndex::VERASE] {
            0 => None,
            it => Some(it),
        }
    }
}

#[must_use]
pub fn is_terminal(fd: RawFd) -> bool { termios::isatty(borrow_fd(fd)) }

/// Window size of the terminal behind `fd`. `None` if it isn't one, or reports zero.
#[must_use]
pub fn window_size(fd: RawFd) -> Option<Geometry> {
    let size = termios::tcgetwinsize(borrow_fd(fd)).ok()?;
    if size.ws_col == 0 || size.ws_row == 0 {
        return None;
    }
    Some(Geometry {
        width: i32::from(size.ws_col),
        height: i32::from(size.ws_row),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::{fd::AsRawFd as _, unix::net::UnixStream};

    #[test]
    fn test_sockets_are_not_terminals() {
        let (a, _b) = UnixStream::pair().unwrap();
        assert!(!is_terminal(a.as_raw_fd()));
        assert!(window_size(a.as_raw_fd()).is_none());
        assert!(SavedTermios::enter_raw_mode(a.as_raw_fd()).is_err());
    }
}
