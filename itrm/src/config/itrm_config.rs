// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

use std::time::Duration;

/// Default size of the raw input queue of a terminal session.
pub const ITRM_IN_QUEUE_SIZE: usize = 16_384;
/// Default size of each output queue of a terminal session.
pub const ITRM_OUT_QUEUE_SIZE: usize = 65_536;
/// How long an incomplete escape sequence may wait for more bytes.
pub const ESC_TIMEOUT: Duration = Duration::from_millis(50);
/// Bytes written per write-readiness callback, small so other handles are not starved.
pub const OUT_QUEUE_CHUNK_SIZE: usize = 128;

/// Terminal geometry in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub width: i32,
    pub height: i32,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            width: 80,
            height: 25,
        }
    }
}

/// Per-session settings supplied by the front-end when a terminal is attached.
///
/// Everything here is read once, at attach time. Later changes to a config value have
/// no effect on sessions that are already running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItrmConfig {
    pub in_queue_capacity: usize,
    pub out_queue_capacity: usize,
    pub esc_timeout: Duration,
    pub write_chunk_size: usize,
    /// Byte the terminal sends for erase (usually `DEL` or `BS`). Decoded as Backspace.
    pub erase_char: Option<u8>,
    pub altscreen: bool,
    pub mouse: bool,
    /// The master assembles UTF-8 key sequences from individual byte events.
    pub utf8_io: bool,
    pub async_dns: bool,
    /// Used when there is no control tty to ask for the window size.
    pub initial_geometry: Geometry,
    /// When false, tearing down the session asks the scheduler to terminate.
    pub keep_session_alive: bool,
    /// Terminal type sent in the attach handshake. `None` reads `$TERM` at attach.
    pub term_name: Option<String>,
    /// Capability bitmask sent in the attach handshake, see [`SystemEnv`].
    ///
    /// [`SystemEnv`]: crate::SystemEnv
    pub system_env: i32,
}

impl Default for ItrmConfig {
    fn default() -> Self {
        Self {
            in_queue_capacity: ITRM_IN_QUEUE_SIZE,
            out_queue_capacity: ITRM_OUT_QUEUE_SIZE,
            esc_timeout: ESC_TIMEOUT,
            write_chunk_size: OUT_QUEUE_CHUNK_SIZE,
            erase_char: None,
            altscreen: true,
            mouse: true,
            utf8_io: true,
            async_dns: true,
            initial_geometry: Geometry::default(),
            keep_session_alive: false,
            term_name: None,
            system_env: 0,
        }
    }
}

impl ItrmConfig {
    #[must_use]
    pub fn with_in_queue_capacity(mut self, it: usize) -> Self {
        self.in_queue_capacity = it.max(1);
        self
    }

    #[must_use]
    pub fn with_out_queue_capacity(mut self, it: usize) -> Self {
        self.out_queue_capacity = it.max(1);
        self
    }

    #[must_use]
    pub fn with_esc_timeout(mut self, it: Duration) -> Self {
        self.esc_timeout = it;
        self
    }

    #[must_use]
    pub fn with_write_chunk_size(mut self, it: usize) -> Self {
        self.write_chunk_size = it.max(1);
        self
    }

    #[must_use]
    pub fn with_erase_char(mut self, it: Option<u8>) -> Self {
        self.erase_char = it;
        self
    }

    #[must_use]
    pub fn with_altscreen(mut self, it: bool) -> Self {
        self.altscreen = it;
        self
    }

    #[must_use]
    pub fn with_mouse(mut self, it: bool) -> Self {
        self.mouse = it;
        self
    }

    #[must_use]
    pub fn with_utf8_io(mut self, it: bool) -> Self {
        self.utf8_io = it;
        self
    }

    #[must_use]
    pub fn with_async_dns(mut self, it: bool) -> Self {
        self.async_dns = it;
        self
    }

    #[must_use]
    pub fn with_initial_geometry(mut self, it: Geometry) -> Self {
        self.initial_geometry = it;
        self
    }

    #[must_use]
    pub fn with_keep_session_alive(mut self, it: bool) -> Self {
        self.keep_session_alive = it;
        self
    }

    #[must_use]
    pub fn with_term_name(mut self, it: impl Into<String>) -> Self {
        self.term_name = Some(it.into());
        self
    }

    #[must_use]
    pub fn with_system_env(mut self, it: i32) -> Self {
        self.system_env = it;
        self
    }
}
