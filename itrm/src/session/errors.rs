// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

use crate::SchedulerError;
use miette::Diagnostic;

/// Errors from attaching, blocking or unblocking a terminal session. Once a session is
/// running, I/O failures tear it down instead of surfacing here.
#[derive(Debug, thiserror::Error, Diagnostic)]
pub enum SessionError {
    #[error("Failed to attach the terminal session")]
    #[diagnostic(
        code(itrm::session::attach),
        help("The terminal or the socket to the master closed during attach")
    )]
    Attach(#[source] std::io::Error),

    #[error("Failed to change the terminal attributes")]
    #[diagnostic(
        code(itrm::session::raw_mode),
        help("Is the control descriptor a terminal? Pass no control descriptor for pipes")
    )]
    RawMode(#[source] std::io::Error),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Scheduler(#[from] SchedulerError),
}
