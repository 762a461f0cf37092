// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

/// Highest descriptor value (exclusive) the [`Scheduler`] accepts by default.
///
/// [`Scheduler`]: crate::Scheduler
pub const DEFAULT_HANDLE_CAPACITY: usize = 1_024;

/// Consecutive non-`EINTR` wait failures tolerated before the loop gives up.
pub const DEFAULT_MAX_WAIT_FAILURES: usize = 10;

/// Sizing and failure policy for the [`Scheduler`].
///
/// [`Scheduler`]: crate::Scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Registering a handle `>= handle_capacity` fails with
    /// [`SchedulerError::HandleOutOfRange`].
    ///
    /// [`SchedulerError::HandleOutOfRange`]: crate::SchedulerError::HandleOutOfRange
    pub handle_capacity: usize,
    /// More consecutive wait failures than this ends [`Scheduler::run()`] with
    /// [`SchedulerError::WaitFailed`].
    ///
    /// [`Scheduler::run()`]: crate::Scheduler::run
    /// [`SchedulerError::WaitFailed`]: crate::SchedulerError::WaitFailed
    pub max_wait_failures: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            handle_capacity: DEFAULT_HANDLE_CAPACITY,
            max_wait_failures: DEFAULT_MAX_WAIT_FAILURES,
        }
    }
}

impl SchedulerConfig {
    #[must_use]
    pub fn with_handle_capacity(mut self, handle_capacity: usize) -> Self {
        self.handle_capacity = handle_capacity;
        self
    }

    #[must_use]
    pub fn with_max_wait_failures(mut self, max_wait_failures: usize) -> Self {
        self.max_wait_failures = max_wait_failures;
        self
    }
}
