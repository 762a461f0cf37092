// Copyright (c) 2023-2025 R3BL LLC. Licensed under Apache License, Version 2.0.

/// Control flow signal for loops and callbacks: keep going, or stop. Returned by
/// [`Scheduler::run_once()`] after each iteration of the select loop.
///
/// [`Scheduler::run_once()`]: crate::Scheduler::run_once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Continuation {
    /// Continue to the next iteration.
    #[default]
    Continue,

    /// Stop processing and exit the loop.
    Stop,
}

/// Who asked for a terminal session to be torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum CloseReason {
    /// A read on the tty or the peer socket returned EOF.
    #[strum(to_string = "end of file")]
    Eof,
    /// Hard read error on one of the session's descriptors.
    #[strum(to_string = "read error")]
    ReadError,
    /// Hard write error, or the output queue overflowed.
    #[strum(to_string = "write error")]
    WriteError,
    /// The scheduler reported an error condition on a descriptor.
    #[strum(to_string = "descriptor error")]
    DescriptorError,
    /// The owner detached the session explicitly.
    #[strum(to_string = "detached")]
    Detached,
}
