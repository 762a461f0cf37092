// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Decoded terminal events and their byte-exact wire layouts.

// Attach sources.
pub mod interlink_event;
pub mod key_codes;
pub mod terminal_info;

// Re-export.
pub use interlink_event::*;
pub use key_codes::*;
pub use terminal_info::*;
