// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The tty side of a slave: raw mode, the attach handshake, and the callbacks that move
//! bytes between the terminal, the decoder and the master.

// Attach sources.
pub mod errors;
pub mod exec;
pub mod itrm_session;
pub mod raw_mode;
pub mod terminal_seq;

// Re-export.
pub use errors::*;
pub use exec::*;
pub use itrm_session::*;
pub use raw_mode::*;
pub use terminal_seq::*;
