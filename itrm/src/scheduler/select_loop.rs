// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words EINTR revents

//! The select loop: one thread, level-triggered readiness, timers and bottom halves.
//!
//! # Loop iteration
//!
//! Each pass of [`Scheduler::run_once()`] does, in order:
//!
//! 1. Process pending [`AsyncSignal`]s.
//! 2. Advance timers by the wall-clock time since the last pass and fire the due ones.
//! 3. Call the redraw hook.
//! 4. Stop if termination was requested (after one last non-blocking dispatch pass), or
//!    if no handle is registered and no timer is armed.
//! 5. Wait for readiness, bounded by the next timer.
//! 6. Process signals and timers again, then dispatch every ready handle in ascending
//!    descriptor order: read, then write, then error.
//!
//! Bottom halves are drained after every single callback, so work deferred by the
//! handler for event N is done before event N+1 is dispatched.
//!
//! # EINTR handling
//!
//! An interrupted wait is retried silently. Any other wait failure is logged and
//! counted. More than [`SchedulerConfig::max_wait_failures`] in a row ends the loop with
//! [`SchedulerError::WaitFailed`].
//!
//! [`SchedulerConfig::max_wait_failures`]: crate::SchedulerConfig::max_wait_failures

use super::{AsyncNotifier, AsyncSignal, BottomHalfKey, BottomHalfQueue, HandlerKind,
            HandlerTable, IoCallback, Registration, SchedulerError, SignalPipe, TimerId,
            TimerQueue};
use crate::{Continuation, SchedulerConfig, common::fd_io::borrow_fd};
use rustix::{event::{PollFd, PollFlags, Timespec, poll},
             io::Errno};
use smallvec::SmallVec;
use std::{fmt, io, os::fd::RawFd, rc::Rc, time::{Duration, Instant}};

/// A timer callback. Runs at most once.
pub type TimerCallback = Box<dyn FnOnce(&mut Scheduler)>;
/// A deferred callback. Runs at most once, after the current callback returns.
pub type BottomHalfCallback = Box<dyn FnOnce(&mut Scheduler)>;
/// Called every time an [`AsyncSignal`] is delivered.
pub type SignalCallback = Rc<dyn Fn(&mut Scheduler)>;

/// Readiness flags reported for one handle by a wait.
type ReadyList = SmallVec<[(RawFd, PollFlags); 16]>;

/// The reactive core. Every other component only ever runs inside one of its callbacks.
///
/// There is no global instance: create one, pass `&mut Scheduler` to whatever needs to
/// register handles, arm timers or defer work, then call [`Scheduler::run()`].
pub struct Scheduler {
    config: SchedulerConfig,
    handlers: HandlerTable,
    timers: TimerQueue<TimerCallback>,
    bottom_halves: BottomHalfQueue<BottomHalfCallback>,
    signal_pipe: SignalPipe,
    signal_handlers: Vec<(AsyncSignal, usize, SignalCallback)>,
    redraw_hook: Option<Rc<dyn Fn(&mut Scheduler)>>,
    terminate: bool,
    last_time: Instant,
    wait_failures: usize,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("handlers", &self.handlers)
            .field("timers", &self.timers.len())
            .field("bottom_halves", &self.bottom_halves.len())
            .field("terminate", &self.terminate)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// # Errors
    ///
    /// Returns [`SchedulerError::SignalSetup`] if the self-pipe can't be created.
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        Ok(Self {
            config,
            handlers: HandlerTable::new(config.handle_capacity),
            timers: TimerQueue::new(),
            bottom_halves: BottomHalfQueue::new(),
            signal_pipe: SignalPipe::new().map_err(SchedulerError::SignalSetup)?,
            signal_handlers: vec![],
            redraw_hook: None,
            terminate: false,
            last_time: Instant::now(),
            wait_failures: 0,
        })
    }

    #[must_use]
    pub fn config(&self) -> SchedulerConfig { self.config }

    // ╭──────────────────────────────────────────────────────────╮
    // │ Handles                                                  │
    // ╰──────────────────────────────────────────────────────────╯

    /// Replaces the whole registration for `fd` in one step. Passing three `None`s
    /// removes `fd` from the wait set.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NegativeHandle`] or
    /// [`SchedulerError::HandleOutOfRange`]. Both mean the caller's configuration is
    /// wrong, not that I/O failed.
    pub fn register(
        &mut self,
        fd: RawFd,
        read: Option<IoCallback>,
        write: Option<IoCallback>,
        error: Option<IoCallback>,
    ) -> Result<(), SchedulerError> {
        self.handlers.set(fd, Registration::new(read, write, error))
    }

    /// Replaces one slot of the registration for `fd`, leaving the other two as they
    /// are.
    ///
    /// # Errors
    ///
    /// Same as [`Self::register`].
    pub fn set_handler(
        &mut self,
        fd: RawFd,
        kind: HandlerKind,
        callback: Option<IoCallback>,
    ) -> Result<(), SchedulerError> {
        self.handlers.set_slot(fd, kind, callback)
    }

    /// Removes every callback for `fd`.
    pub fn clear(&mut self, fd: RawFd) { self.handlers.remove(fd); }

    #[must_use]
    pub fn handlers(&self, fd: RawFd) -> Option<&Registration> { self.handlers.get(fd) }

    #[must_use]
    pub fn registered_count(&self) -> usize { self.handlers.len() }

    // ╭──────────────────────────────────────────────────────────╮
    // │ Timers                                                   │
    // ╰──────────────────────────────────────────────────────────╯

    /// Arms a one-shot timer. The id stops being valid right before `callback` runs, so
    /// the callback may re-arm under the same id slot.
    pub fn arm_timer(
        &mut self,
        interval: Duration,
        callback: impl FnOnce(&mut Scheduler) + 'static,
    ) -> TimerId {
        self.timers.insert(interval, Box::new(callback))
    }

    /// Returns true if a pending timer was removed. Cancelling a fired timer is a no-op.
    pub fn cancel_timer(&mut self, id: TimerId) -> bool { self.timers.cancel(id).is_some() }

    /// Cancels the timer in `slot` (if any) and empties the slot.
    pub fn kill_timer(&mut self, slot: &mut Option<TimerId>) {
        if let Some(id) = slot.take() {
            self.cancel_timer(id);
        }
    }

    #[must_use]
    pub fn timer_is_pending(&self, id: TimerId) -> bool { self.timers.contains(id) }

    #[must_use]
    pub fn pending_timers(&self) -> usize { self.timers.len() }

    /// Moves the timer clock forward by `elapsed` on top of wall-clock time, then fires
    /// whatever became due.
    pub fn advance_timers(&mut self, elapsed: Duration) {
        self.timers.advance(elapsed);
        self.fire_due_timers();
    }

    fn check_timers(&mut self) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_time);
        self.last_time = now;
        self.advance_timers(elapsed);
    }

    fn fire_due_timers(&mut self) {
        while let Some((id, callback)) = self.timers.pop_expired() {
            tracing::trace!(message = "timer fired", id = id.as_u64());
            callback(self);
            self.drain_bottom_halves();
        }
    }

    // ╭──────────────────────────────────────────────────────────╮
    // │ Bottom halves                                            │
    // ╰──────────────────────────────────────────────────────────╯

    /// Defers `callback` until the current callback returns. Returns false if `key` is
    /// already pending, in which case `callback` is dropped.
    pub fn defer(
        &mut self,
        key: BottomHalfKey,
        callback: impl FnOnce(&mut Scheduler) + 'static,
    ) -> bool {
        self.bottom_halves.push(key, Box::new(callback))
    }

    /// Runs pending bottom halves (FIFO) until none are left, including the ones they
    /// schedule themselves.
    pub fn drain_bottom_halves(&mut self) {
        while let Some((_, callback)) = self.bottom_halves.pop() {
            callback(self);
        }
    }

    #[must_use]
    pub fn pending_bottom_halves(&self) -> usize { self.bottom_halves.len() }

    // ╭──────────────────────────────────────────────────────────╮
    // │ Signals, redraw, termination                             │
    // ╰──────────────────────────────────────────────────────────╯

    /// Thread-safe handle for injecting [`AsyncSignal`]s.
    #[must_use]
    pub fn notifier(&self) -> AsyncNotifier { self.signal_pipe.notifier() }

    /// Delivers the OS signals behind `signals` to this loop.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::SignalSetup`] if a handler can't be installed.
    pub fn hook_os_signals(&mut self, signals: &[AsyncSignal]) -> Result<(), SchedulerError> {
        self.signal_pipe
            .hook_os_signals(signals)
            .map_err(SchedulerError::SignalSetup)
    }

    /// Adds (or replaces) the handler `owner` has for `signal`. Several owners may
    /// listen to the same signal. Without any handler, [`AsyncSignal::Interrupt`] and
    /// [`AsyncSignal::Terminate`] request termination.
    pub fn on_signal(
        &mut self,
        signal: AsyncSignal,
        owner: usize,
        callback: impl Fn(&mut Scheduler) + 'static,
    ) {
        self.clear_signal(signal, owner);
        self.signal_handlers.push((signal, owner, Rc::new(callback)));
    }

    pub fn clear_signal(&mut self, signal: AsyncSignal, owner: usize) {
        self.signal_handlers
            .retain(|(sig, it, _)| !(*sig == signal && *it == owner));
    }

    /// Returns true if at least one signal was pending.
    fn check_signals(&mut self) -> bool {
        self.signal_pipe.drain_wakeups();
        let pending = self.signal_pipe.take_pending();
        for signal in &pending {
            let callbacks: SmallVec<[SignalCallback; 2]> = self
                .signal_handlers
                .iter()
                .filter(|(sig, _, _)| sig == signal)
                .map(|(_, _, callback)| Rc::clone(callback))
                .collect();
            tracing::debug!(
                message = "signal delivered",
                signal = %signal,
                handlers = callbacks.len()
            );
            if callbacks.is_empty()
                && matches!(signal, AsyncSignal::Interrupt | AsyncSignal::Terminate)
            {
                self.request_terminate();
            }
            for callback in callbacks {
                callback(self);
                self.drain_bottom_halves();
            }
        }
        !pending.is_empty()
    }

    /// Installs the hook called once per loop iteration, before the wait.
    pub fn set_redraw_hook(&mut self, hook: impl Fn(&mut Scheduler) + 'static) {
        self.redraw_hook = Some(Rc::new(hook));
    }

    /// The loop stops at the start of its next iteration, after one final non-blocking
    /// pass over handles that are already ready.
    pub fn request_terminate(&mut self) {
        if !self.terminate {
            tracing::debug!(message = "termination requested");
        }
        self.terminate = true;
    }

    #[must_use]
    pub fn is_terminating(&self) -> bool { self.terminate }

    // ╭──────────────────────────────────────────────────────────╮
    // │ The loop                                                 │
    // ╰──────────────────────────────────────────────────────────╯

    /// Calls `init` once, then runs loop iterations until termination is requested, or
    /// nothing is left to wait for.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::WaitFailed`] when the readiness wait keeps failing.
    pub fn run(
        &mut self,
        init: impl FnOnce(&mut Scheduler),
    ) -> Result<(), SchedulerError> {
        self.last_time = Instant::now();
        init(self);
        self.drain_bottom_halves();

        while self.run_once(None)? == Continuation::Continue {}

        tracing::debug!(
            message = "select loop finished",
            handles = self.handlers.len(),
            timers = self.timers.len()
        );
        Ok(())
    }

    /// One loop iteration. `max_wait` caps the wait on top of the next timer, which is
    /// handy when embedding the loop or driving it from tests.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::WaitFailed`] when the readiness wait keeps failing.
    pub fn run_once(
        &mut self,
        max_wait: Option<Duration>,
    ) -> Result<Continuation, SchedulerError> {
        self.check_signals();
        self.check_timers();
        self.redraw();

        if self.terminate {
            self.final_dispatch_pass();
            return Ok(Continuation::Stop);
        }

        let next_timer = self.timers.next_timeout();
        if self.handlers.is_empty() && next_timer.is_none() {
            return Ok(Continuation::Stop);
        }

        // A signal that slipped in after the checks above must be handled before
        // blocking, the wait would otherwise sleep on top of it.
        if self.check_signals() {
            return Ok(Continuation::Continue);
        }

        let timeout = match (next_timer, max_wait) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        let ready = match self.wait(timeout) {
            Ok(ready) => {
                self.wait_failures = 0;
                ready
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                return Ok(Continuation::Continue);
            }
            Err(e) => {
                self.wait_failures += 1;
                tracing::warn!(
                    message = "readiness wait failed",
                    error = ?e,
                    failures = self.wait_failures
                );
                if self.wait_failures > self.config.max_wait_failures {
                    return Err(SchedulerError::WaitFailed {
                        failures: self.wait_failures,
                        source: e,
                    });
                }
                return Ok(Continuation::Continue);
            }
        };

        self.check_signals();
        self.check_timers();
        self.dispatch(&ready);

        Ok(Continuation::Continue)
    }

    fn redraw(&mut self) {
        if let Some(hook) = self.redraw_hook.clone() {
            hook(self);
            self.drain_bottom_halves();
        }
    }

    /// Dispatches whatever is ready right now so no registered I/O is dropped when the
    /// loop stops.
    fn final_dispatch_pass(&mut self) {
        if self.handlers.is_empty() {
            return;
        }
        match self.wait(Some(Duration::ZERO)) {
            Ok(ready) => self.dispatch(&ready),
            Err(e) => {
                tracing::debug!(message = "final dispatch pass skipped", error = ?e);
            }
        }
    }

    /// Blocks until a handle is ready or `timeout` passes (`None` waits forever).
    fn wait(&self, timeout: Option<Duration>) -> io::Result<ReadyList> {
        let wait_set = self.handlers.wait_set();

        let mut poll_fds: Vec<PollFd<'static>> = Vec::with_capacity(wait_set.len() + 1);
        poll_fds.push(PollFd::from_borrowed_fd(
            borrow_fd(self.signal_pipe.fd()),
            PollFlags::IN,
        ));
        for (fd, wants_read, wants_write) in &wait_set {
            let mut flags = PollFlags::empty();
            if *wants_read {
                flags |= PollFlags::IN;
            }
            if *wants_write {
                flags |= PollFlags::OUT;
            }
            poll_fds.push(PollFd::from_borrowed_fd(borrow_fd(*fd), flags));
        }

        let timespec = timeout.map(|it| Timespec {
            tv_sec: i64::try_from(it.as_secs()).unwrap_or(i64::MAX),
            tv_nsec: it.subsec_nanos().into(),
        });

        match poll(&mut poll_fds, timespec.as_ref()) {
            Ok(_) => {}
            Err(Errno::INTR) => return Err(io::ErrorKind::Interrupted.into()),
            Err(e) => return Err(e.into()),
        }

        // Skip the self-pipe, signals are picked up by check_signals().
        Ok(wait_set
            .iter()
            .zip(poll_fds.iter().skip(1))
            .filter(|(_, it)| !it.revents().is_empty())
            .map(|((fd, _, _), it)| (*fd, it.revents()))
            .collect())
    }

    /// Calls the callbacks for every ready handle. Callbacks are looked up at the
    /// moment they are due, so a callback that replaced or cleared a registration
    /// earlier in this pass is honored.
    fn dispatch(&mut self, ready: &ReadyList) {
        for (fd, revents) in ready {
            let fd = *fd;
            let revents = *revents;

            let mut read_ran = false;
            if revents.intersects(PollFlags::IN | PollFlags::PRI | PollFlags::HUP) {
                read_ran = self.invoke(fd, HandlerKind::Read);
            }

            if revents.contains(PollFlags::OUT) {
                self.invoke(fd, HandlerKind::Write);
            }

            let hangup_unhandled = revents.contains(PollFlags::HUP) && !read_ran;
            if revents.intersects(PollFlags::ERR | PollFlags::NVAL) || hangup_unhandled {
                let error_ran = self.invoke(fd, HandlerKind::Error);
                if !error_ran && revents.contains(PollFlags::NVAL) {
                    // Nobody owns this handle any more, and poll would keep reporting
                    // it. Drop it instead of spinning.
                    tracing::warn!(message = "dropping invalid handle", fd);
                    self.handlers.remove(fd);
                }
            }
        }
    }

    /// Returns true if a callback was registered (and therefore ran).
    fn invoke(&mut self, fd: RawFd, kind: HandlerKind) -> bool {
        let Some(callback) = self.handlers.get(fd).and_then(|it| it.get(kind)).cloned()
        else {
            return false;
        };
        tracing::trace!(message = "dispatch", fd, kind = %kind);
        callback(self);
        self.drain_bottom_halves();
        true
    }
}
