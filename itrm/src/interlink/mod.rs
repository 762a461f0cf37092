// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The interlink protocol: slaves forward decoded events to one master, the master
//! sends back screen bytes and control frames.

// Attach sources.
pub mod errors;
pub mod event_reader;
pub mod frame;
pub mod screen_stream;
pub mod socket;
pub mod utf8_assembler;

// Re-export.
pub use errors::*;
pub use event_reader::*;
pub use frame::*;
pub use screen_stream::*;
pub use socket::*;
pub use utf8_assembler::*;
