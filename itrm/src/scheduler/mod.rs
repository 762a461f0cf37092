// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Readiness-based event multiplexer.
//!
//! [`Scheduler`] composes three leaf structures:
//! - [`HandlerTable`]: per-descriptor read, write and error callbacks.
//! - [`TimerQueue`]: one-shot timers ordered by remaining interval.
//! - [`BottomHalfQueue`]: deduplicated deferred work, drained after every callback.
//!
//! Asynchronous signals reach the loop through a [`SignalPipe`].

// Attach sources.
pub mod async_signals;
pub mod bottom_half;
pub mod errors;
pub mod handler_table;
pub mod select_loop;
pub mod timer_queue;

// Re-export.
pub use async_signals::*;
pub use bottom_half::*;
pub use errors::*;
pub use handler_table::*;
pub use select_loop::*;
pub use timer_queue::*;
