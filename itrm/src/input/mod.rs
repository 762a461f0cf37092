// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Raw terminal bytes in, keyboard and mouse events out.

// Attach sources.
pub mod decoder;
pub mod input_queue;
pub mod mouse;

// Re-export.
pub use decoder::*;
pub use input_queue::*;
pub use mouse::*;
