// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words itrm interlink termios

//! # itrm
//!
//! Terminal plumbing for text-mode programs that share one session across several
//! terminals. Three layers, each usable on its own:
//!
//! 1. [`Scheduler`]: a single-threaded, readiness-based select loop. Per-descriptor
//!    read, write and error callbacks, one-shot timers, deduplicated bottom halves
//!    (deferred work drained after every callback), and asynchronous signals delivered
//!    through a self-pipe.
//! 2. [`InputDecoder`]: turns raw terminal bytes into [`KeyEvent`]s and
//!    [`MouseEvent`]s. Handles CSI and SS3 sequences with xterm modifiers, X10 and twin
//!    mouse reports, and the ambiguity of a lone `ESC` through a short timeout.
//! 3. The interlink protocol: a slave ([`Itrm`]) owns a terminal and forwards decoded
//!    events as fixed-size [`InterlinkEvent`] records to one master over a Unix socket.
//!    The master answers with screen bytes and in-band [`ControlFrame`]s (run a
//!    program, set the title, resize the window).
//!
//! ```text
//!  terminal ──► Itrm (slave) ──events──► master
//!  terminal ◄── Itrm (slave) ◄─screen─── master
//! ```
//!
//! Everything runs on the thread that owns the [`Scheduler`]. The only exceptions are
//! [`AsyncNotifier::notify()`], which may be called from any thread, and the helper
//! thread [`spawn_exec()`] runs external programs on.
//!
//! ## Logging
//!
//! All components log through [`tracing`]. Nothing is printed to the terminal a session
//! decodes. Install a subscriber with [`try_initialize_logging_global()`] (usually to a
//! file) to see what the loop and the sessions are doing.
//!
//! ## Errors
//!
//! Setup failures surface as [`miette::Diagnostic`] errors ([`SchedulerError`],
//! [`SessionError`], [`InterlinkError`]). I/O failures of a running session never
//! surface: the session tears itself down and reports a [`CloseReason`] to its close
//! hook.

// Enforce strict error handling in production library code only. Tests are allowed to
// use .unwrap() (workspace `Cargo.toml` config allows it).
#![cfg_attr(not(test), deny(clippy::unwrap_in_result))]
// Read buffers on the stack are intentional.
#![cfg_attr(test, allow(clippy::large_stack_arrays))]

// Attach modules (re-exported below to provide clean public API).
pub mod common;
pub mod config;
pub mod event;
pub mod input;
pub mod interlink;
pub mod log;
pub mod output;
pub mod scheduler;
pub mod session;

// Re-export stable public API using glob imports for ergonomic, flat API surface.
//
// Note on ambiguous_glob_reexports: the `errors` submodule exists in several modules.
// Items are imported by name (`use itrm::SessionError;`), the modules themselves via
// their full path (`itrm::session::errors`).
#[allow(ambiguous_glob_reexports)]
pub use common::*;
#[allow(ambiguous_glob_reexports)]
pub use config::*;
#[allow(ambiguous_glob_reexports)]
pub use event::*;
#[allow(ambiguous_glob_reexports)]
pub use input::*;
#[allow(ambiguous_glob_reexports)]
pub use interlink::*;
#[allow(ambiguous_glob_reexports)]
pub use log::*;
#[allow(ambiguous_glob_reexports)]
pub use output::*;
#[allow(ambiguous_glob_reexports)]
pub use scheduler::*;
#[allow(ambiguous_glob_reexports)]
pub use session::*;
