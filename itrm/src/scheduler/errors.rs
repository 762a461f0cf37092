// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

use miette::Diagnostic;
use std::os::fd::RawFd;

/// Errors the [`Scheduler`] surfaces to its caller.
///
/// Component-level problems (a session hitting EOF, a malformed escape sequence) never
/// show up here. They are handled inside the callback that noticed them.
///
/// [`Scheduler`]: crate::Scheduler
#[derive(Debug, thiserror::Error, Diagnostic)]
pub enum SchedulerError {
    #[error("Handle {fd} is beyond the registration capacity of {capacity}")]
    #[diagnostic(
        code(itrm::scheduler::handle_out_of_range),
        help("Raise SchedulerConfig::handle_capacity, or close unused descriptors")
    )]
    HandleOutOfRange { fd: RawFd, capacity: usize },

    #[error("Handle {fd} is negative")]
    #[diagnostic(
        code(itrm::scheduler::negative_handle),
        help("Descriptor handles are non-negative integers handed out by the OS")
    )]
    NegativeHandle { fd: RawFd },

    #[error("The readiness wait failed {failures} times in a row")]
    #[diagnostic(
        code(itrm::scheduler::wait_failed),
        help("A registered descriptor is probably invalid, the loop can't make progress")
    )]
    WaitFailed {
        failures: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to set up signal delivery")]
    #[diagnostic(
        code(itrm::scheduler::signal_setup),
        help("This usually means the system ran out of file descriptors")
    )]
    SignalSetup(#[source] std::io::Error),
}
