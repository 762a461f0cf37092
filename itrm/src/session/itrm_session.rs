// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words itrm kbd

//! One attached terminal session.
//!
//! An [`Itrm`] owns the tty side of a slave: the raw input queue and its decoder, the
//! two output queues (events to the master, screen bytes to the tty) and the parser for
//! what the master sends back. Everything runs from scheduler callbacks.
//!
//! ```text
//! std_in ──► InputQueue ──► InputDecoder ──► events_out ──► sock_out (master)
//!                              │ ESC timer
//! sock_in ──► ScreenStreamParser ──► screen_out ──► std_out (tty)
//!                    └──► exec / title / resize
//! ```
//!
//! Neither output queue is allowed to grow without bound. The tty is read only while
//! `events_out` is empty, and the master only while `screen_out` is empty. A slow peer
//! leaves bytes in the kernel instead of in the session.
//!
//! Lifecycle:
//!
//! | State           | Entered by                                   |
//! | :-------------- | :------------------------------------------- |
//! | `Uninitialized` | construction, before the handshake is queued |
//! | `Active`        | [`Itrm::attach()`], [`Itrm::unblock()`]      |
//! | `Blocked`       | [`Itrm::block()`], foreground exec           |
//! | `Closed`        | EOF, I/O error, [`Itrm::detach()`]           |
//!
//! Callbacks registered with the scheduler hold a strong handle to the session, so the
//! session lives exactly as long as it is registered. Teardown clears every handle and
//! drops those references. No `RefCell` borrow is ever held while calling into a
//! callback or the close hook.

use super::{ExecRequest, SavedTermios, SessionError, done_sequence, init_sequence,
            resize_sequence, spawn_exec, title_sequence, window_size};
use crate::{AsyncSignal, CloseReason, ControlFrame, DecodeBatch, DecodedInput,
            EVENT_RECORD_SIZE, ExecMode, FlushOutcome, Geometry, HandlerKind, InfoMagic, IoCallback, InputDecoder, InputQueue,
            InterlinkEvent, ItrmConfig, KeyEvent, OutputQueue, Scheduler, ScreenItem,
            ScreenStreamParser, SendOutcome, SpecialFunction, SpecialKey, TerminalInfo,
            TimerId, can_read, hard_write, io_callback, safe_read, sanitize_term_name};
use std::{cell::RefCell,
          fmt,
          io,
          os::fd::{AsRawFd as _, RawFd},
          rc::Rc};

/// Bytes read from the tty per readiness callback.
const KBD_READ_CHUNK: usize = 4096;
/// Bytes read from the master per readiness callback.
const SOCK_READ_CHUNK: usize = 4096;

/// The descriptors a session works with. The session borrows them, closing them is the
/// owner's job once the session is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItrmFds {
    /// Raw bytes from the terminal.
    pub std_in: RawFd,
    /// Screen output to the terminal.
    pub std_out: RawFd,
    /// Screen bytes and control frames from the master. `None` when this process is
    /// the master itself.
    pub sock_in: Option<RawFd>,
    /// Encoded events to the master.
    pub sock_out: RawFd,
    /// Descriptor for terminal attributes and window size. `None` for pipes.
    pub ctl_in: Option<RawFd>,
}

/// What the slave announces in its handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachRequest {
    pub magic: InfoMagic,
    pub session_info: i32,
    /// URI list for a normal session, the command for a remote one.
    pub payload: Vec<u8>,
}

impl AttachRequest {
    #[must_use]
    pub fn normal(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            magic: InfoMagic::Normal,
            session_info: 0,
            payload: payload.into(),
        }
    }

    #[must_use]
    pub fn remote(session_info: i32, command: impl Into<Vec<u8>>) -> Self {
        Self {
            magic: InfoMagic::Remote,
            session_info,
            payload: command.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum SessionState {
    Uninitialized,
    Active,
    Blocked,
    Closed,
}

/// Called once when the session is torn down, with the reason.
pub type CloseHook = Box<dyn FnOnce(&mut Scheduler, CloseReason)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Events,
    Screen,
}

struct ItrmState {
    id: usize,
    fds: ItrmFds,
    config: ItrmConfig,
    remote: bool,
    state: SessionState,
    input: InputQueue,
    decoder: InputDecoder,
    events_out: OutputQueue,
    screen_out: OutputQueue,
    stream: ScreenStreamParser,
    esc_timer: Option<TimerId>,
    saved_termios: Option<SavedTermios>,
    term_name: String,
    touched_title: bool,
    codepage: Option<String>,
    geometry: Geometry,
    close_hook: Option<CloseHook>,
}

impl ItrmState {
    fn fd(&self, channel: Channel) -> RawFd {
        match channel {
            Channel::Events => self.fds.sock_out,
            Channel::Screen => self.fds.std_out,
        }
    }

    fn queue(&mut self, channel: Channel) -> &mut OutputQueue {
        match channel {
            Channel::Events => &mut self.events_out,
            Channel::Screen => &mut self.screen_out,
        }
    }

    fn owns_tty(&self) -> bool { !self.remote }
}

type Shared = Rc<RefCell<ItrmState>>;

/// Handle to an attached session. Clones refer to the same session.
#[derive(Clone)]
pub struct Itrm {
    inner: Shared,
}

impl fmt::Debug for Itrm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let it = self.inner.borrow();
        f.debug_struct("Itrm")
            .field("id", &it.id)
            .field("state", &it.state)
            .field("fds", &it.fds)
            .field("pending_input", &it.input.len())
            .finish_non_exhaustive()
    }
}

// ╭──────────────────────────────────────────────────────────╮
// │ Public API                                               │
// ╰──────────────────────────────────────────────────────────╯

impl Itrm {
    /// Puts the terminal into raw mode, writes the init sequence, registers the session
    /// with `scheduler` and queues the handshake ([`TerminalInfo`] plus payload) towards
    /// the master.
    ///
    /// Remote sessions leave the terminal alone: no raw mode, no init sequence, no
    /// resize handling.
    ///
    /// # Errors
    ///
    /// [`SessionError::RawMode`] if the control descriptor can't be switched to raw
    /// mode, [`SessionError::Attach`] if the terminal or the master went away while
    /// attaching, and [`SessionError::Scheduler`] if a descriptor can't be registered.
    /// On error nothing stays registered and the terminal attributes are restored.
    pub fn attach(
        scheduler: &mut Scheduler,
        fds: ItrmFds,
        config: ItrmConfig,
        request: AttachRequest,
    ) -> Result<Self, SessionError> {
        let remote = request.magic == InfoMagic::Remote;
        let saved_termios = match (remote, fds.ctl_in) {
            (false, Some(ctl_in)) => {
                Some(SavedTermios::enter_raw_mode(ctl_in).map_err(SessionError::RawMode)?)
            }
            _ => None,
        };
        let erase_char = config
            .erase_char
            .or_else(|| saved_termios.as_ref().and_then(SavedTermios::erase_char));
        let geometry = fds
            .ctl_in
            .and_then(window_size)
            .unwrap_or(config.initial_geometry);
        let term_name = sanitize_term_name(
            &config
                .term_name
                .clone()
                .unwrap_or_else(|| std::env::var("TERM").unwrap_or_default()),
        );

        let inner = Rc::new(RefCell::new(ItrmState {
            id: 0,
            fds,
            remote,
            state: SessionState::Uninitialized,
            input: InputQueue::new(config.in_queue_capacity),
            decoder: InputDecoder::new(erase_char),
            events_out: OutputQueue::new(config.out_queue_capacity, config.write_chunk_size),
            screen_out: OutputQueue::new(config.out_queue_capacity, config.write_chunk_size),
            stream: ScreenStreamParser::new(),
            esc_timer: None,
            saved_termios,
            term_name,
            touched_title: false,
            codepage: None,
            geometry,
            close_hook: None,
            config,
        }));
        let id = Rc::as_ptr(&inner) as usize;
        inner.borrow_mut().id = id;

        if let Err(e) = start(&inner, scheduler, &request) {
            close(&inner, scheduler, CloseReason::Detached, false);
            return Err(e);
        }

        if inner.borrow().state == SessionState::Closed {
            return Err(SessionError::Attach(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "the master went away during the handshake",
            )));
        }

        tracing::debug!(
            message = "session attached",
            id,
            remote,
            width = geometry.width,
            height = geometry.height
        );
        Ok(Self { inner })
    }

    /// Identity used for signal registrations and in logs.
    #[must_use]
    pub fn id(&self) -> usize { self.inner.borrow().id }

    #[must_use]
    pub fn state(&self) -> SessionState { self.inner.borrow().state }

    #[must_use]
    pub fn fds(&self) -> ItrmFds { self.inner.borrow().fds }

    /// Last known terminal size.
    #[must_use]
    pub fn geometry(&self) -> Geometry { self.inner.borrow().geometry }

    /// The async DNS preference in effect when the session was attached.
    #[must_use]
    pub fn async_dns(&self) -> bool { self.inner.borrow().config.async_dns }

    /// Codepage of the last title the master sent, if it named one.
    #[must_use]
    pub fn codepage(&self) -> Option<String> { self.inner.borrow().codepage.clone() }

    #[must_use]
    pub fn pending_input(&self) -> usize { self.inner.borrow().input.len() }

    #[must_use]
    pub fn pending_events(&self) -> usize { self.inner.borrow().events_out.len() }

    #[must_use]
    pub fn pending_screen(&self) -> usize { self.inner.borrow().screen_out.len() }

    /// True while an incomplete escape sequence waits for its timeout.
    #[must_use]
    pub fn has_escape_timer(&self) -> bool { self.inner.borrow().esc_timer.is_some() }

    /// Replaces the hook called on teardown. Without a hook, teardown asks the
    /// scheduler to terminate unless [`ItrmConfig::keep_session_alive`] is set.
    pub fn set_close_hook(&self, hook: impl FnOnce(&mut Scheduler, CloseReason) + 'static) {
        self.inner.borrow_mut().close_hook = Some(Box::new(hook));
    }

    /// Hands the terminal back: stops reading it, writes the done sequence and restores
    /// the saved attributes. Screen output from the master is dropped while blocked.
    /// No-op unless the session is active.
    ///
    /// # Errors
    ///
    /// [`SessionError`] if the terminal can't be written or its attributes can't be
    /// restored. The session is blocked regardless.
    pub fn block(&self, scheduler: &mut Scheduler) -> Result<(), SessionError> {
        block(&self.inner, scheduler)
    }

    /// Undoes [`Self::block()`]: raw mode, the init sequence, reading the terminal and
    /// resize handling come back in that order. No-op unless the session is blocked.
    ///
    /// # Errors
    ///
    /// [`SessionError`] if the terminal can't be reconfigured or written.
    pub fn unblock(&self, scheduler: &mut Scheduler) -> Result<(), SessionError> {
        unblock(&self.inner, scheduler)
    }

    /// Queues `event` for the master.
    pub fn queue_event(&self, scheduler: &mut Scheduler, event: InterlinkEvent) {
        queue_event(&self.inner, scheduler, event);
    }

    /// Queues a synthetic Ctrl-C, used when the front-end catches `SIGINT` itself.
    pub fn queue_ctrl_c(&self, scheduler: &mut Scheduler) {
        queue_event(
            &self.inner,
            scheduler,
            InterlinkEvent::Keyboard(KeyEvent::plain(SpecialKey::CtrlC)),
        );
    }

    /// Reads the window size again and reports it to the master.
    pub fn resize(&self, scheduler: &mut Scheduler) { resize_terminal(&self.inner, scheduler); }

    /// Tears the session down and runs the close hook with [`CloseReason::Detached`].
    pub fn detach(&self, scheduler: &mut Scheduler) {
        teardown(&self.inner, scheduler, CloseReason::Detached);
    }
}

// ╭──────────────────────────────────────────────────────────╮
// │ Attach, block, unblock, teardown                         │
// ╰──────────────────────────────────────────────────────────╯

fn start(
    this: &Shared,
    scheduler: &mut Scheduler,
    request: &AttachRequest,
) -> Result<(), SessionError> {
    let (fds, owns_tty, altscreen, mouse, info) = {
        let s = this.borrow();
        let info = TerminalInfo {
            width: s.geometry.width,
            height: s.geometry.height,
            name: s.term_name.clone(),
            cwd: std::env::current_dir()
                .map(|it| it.display().to_string())
                .unwrap_or_default(),
            system_env: s.config.system_env,
            length: i32::try_from(request.payload.len()).map_err(|_| {
                SessionError::Attach(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "attach payload too large",
                ))
            })?,
            session_info: request.session_info,
            magic: request.magic,
        };
        (s.fds, s.owns_tty(), s.config.altscreen, s.config.mouse, info)
    };

    if owns_tty {
        hard_write(fds.std_out, &init_sequence(altscreen, mouse)).map_err(SessionError::Attach)?;
    }
    this.borrow_mut().state = SessionState::Active;

    set_stdin_reading(this, scheduler, true)?;
    if let Some(sock_in) = fds.sock_in {
        set_sock_reading(this, scheduler, sock_in, true)?;
        scheduler.set_handler(
            sock_in,
            HandlerKind::Error,
            session_callback(this, |this, scheduler| {
                teardown(this, scheduler, CloseReason::DescriptorError);
            }),
        )?;
    }
    if owns_tty {
        hook_resize(this, scheduler);
    }

    queue_bytes(this, scheduler, Channel::Events, &info.encode());
    if !request.payload.is_empty() {
        queue_bytes(this, scheduler, Channel::Events, &request.payload);
    }
    Ok(())
}

fn block(this: &Shared, scheduler: &mut Scheduler) -> Result<(), SessionError> {
    let (id, std_in, owns_tty, done) = {
        let mut s = this.borrow_mut();
        if s.state != SessionState::Active {
            return Ok(());
        }
        s.state = SessionState::Blocked;
        scheduler.kill_timer(&mut s.esc_timer);
        s.input.clear();
        (
            s.id,
            s.fds.std_in,
            s.owns_tty(),
            done_sequence(s.config.altscreen, s.config.mouse),
        )
    };

    scheduler.clear_signal(AsyncSignal::Resize, id);
    scheduler.set_handler(std_in, HandlerKind::Read, None)?;
    if owns_tty {
        write_tty_now(this, scheduler, &done).map_err(SessionError::Attach)?;
        if let Some(saved) = this.borrow().saved_termios.as_ref() {
            saved.restore().map_err(SessionError::RawMode)?;
        }
    }
    tracing::debug!(message = "session blocked", id);
    Ok(())
}

fn unblock(this: &Shared, scheduler: &mut Scheduler) -> Result<(), SessionError> {
    let (id, owns_tty, init) = {
        let s = this.borrow();
        if s.state != SessionState::Blocked {
            return Ok(());
        }
        if s.owns_tty()
            && let Some(saved) = s.saved_termios.as_ref()
        {
            saved.reenter_raw_mode().map_err(SessionError::RawMode)?;
        }
        (s.id, s.owns_tty(), init_sequence(s.config.altscreen, s.config.mouse))
    };

    this.borrow_mut().state = SessionState::Active;
    if owns_tty {
        write_tty_now(this, scheduler, &init).map_err(SessionError::Attach)?;
    }
    set_stdin_reading(this, scheduler, true)?;
    if owns_tty {
        hook_resize(this, scheduler);
    }
    tracing::debug!(message = "session unblocked", id);
    Ok(())
}

fn teardown(this: &Shared, scheduler: &mut Scheduler, reason: CloseReason) {
    close(this, scheduler, reason, true);
}

/// Releases everything the session registered. `notify` is false when attach fails,
/// the caller gets the error instead of the hook.
fn close(this: &Shared, scheduler: &mut Scheduler, reason: CloseReason, notify: bool) {
    let (id, hook, keep_alive) = {
        let mut s = this.borrow_mut();
        if s.state == SessionState::Closed {
            return;
        }
        let was_active = s.state == SessionState::Active;
        s.state = SessionState::Closed;
        scheduler.kill_timer(&mut s.esc_timer);

        if s.owns_tty() {
            let mut bytes = s.screen_out.pending().to_vec();
            if s.touched_title && !s.term_name.is_empty() {
                bytes.extend(title_sequence(s.term_name.as_bytes()));
            }
            if was_active {
                bytes.extend(done_sequence(s.config.altscreen, s.config.mouse));
            }
            if let Err(e) = hard_write(s.fds.std_out, &bytes) {
                tracing::debug!(message = "terminal gone before restore", id = s.id, error = ?e);
            }
            if let Some(saved) = s.saved_termios.as_ref()
                && let Err(e) = saved.restore()
            {
                tracing::debug!(message = "terminal attributes not restored", id = s.id, error = ?e);
            }
        }

        scheduler.clear_signal(AsyncSignal::Resize, s.id);
        let ItrmFds {
            std_in,
            std_out,
            sock_in,
            sock_out,
            ..
        } = s.fds;
        for fd in [Some(std_in), Some(std_out), sock_in, Some(sock_out)]
            .into_iter()
            .flatten()
        {
            scheduler.clear(fd);
        }

        s.input.clear();
        s.events_out.clear();
        s.screen_out.clear();
        (s.id, s.close_hook.take(), s.config.keep_session_alive)
    };

    tracing::debug!(message = "session closed", id, reason = %reason);
    if !notify {
        return;
    }
    match hook {
        Some(hook) => hook(scheduler, reason),
        None if !keep_alive => scheduler.request_terminate(),
        None => {}
    }
}

// ╭──────────────────────────────────────────────────────────╮
// │ Registration helpers                                     │
// ╰──────────────────────────────────────────────────────────╯

fn session_callback(
    this: &Shared,
    f: impl Fn(&Shared, &mut Scheduler) + 'static,
) -> Option<IoCallback> {
    let this = Rc::clone(this);
    io_callback(move |scheduler| f(&this, scheduler))
}

/// Installs or removes the tty read handler. The error handler stays for the session's
/// lifetime so a hangup is noticed even while input is paused.
fn set_stdin_reading(
    this: &Shared,
    scheduler: &mut Scheduler,
    enabled: bool,
) -> Result<(), SessionError> {
    let std_in = this.borrow().fds.std_in;
    let read = if enabled {
        session_callback(this, in_kbd)
    } else {
        None
    };
    scheduler.set_handler(std_in, HandlerKind::Read, read)?;
    scheduler.set_handler(
        std_in,
        HandlerKind::Error,
        session_callback(this, |this, scheduler| {
            teardown(this, scheduler, CloseReason::DescriptorError);
        }),
    )?;
    Ok(())
}

/// Pauses the tty while its input queue is full or events wait for the master.
fn refresh_stdin_reading(this: &Shared, scheduler: &mut Scheduler) {
    let enabled = {
        let s = this.borrow();
        if s.state != SessionState::Active {
            return;
        }
        !s.input.is_full() && s.events_out.is_empty()
    };
    if let Err(e) = set_stdin_reading(this, scheduler, enabled) {
        tracing::warn!(message = "keyboard handler not updated", error = ?e);
        teardown(this, scheduler, CloseReason::DescriptorError);
    }
}

fn set_sock_reading(
    this: &Shared,
    scheduler: &mut Scheduler,
    sock_in: RawFd,
    enabled: bool,
) -> Result<(), SessionError> {
    let read = if enabled {
        session_callback(this, in_sock)
    } else {
        None
    };
    scheduler.set_handler(sock_in, HandlerKind::Read, read)?;
    Ok(())
}

/// Pauses the master while screen bytes wait for the tty.
fn refresh_sock_reading(this: &Shared, scheduler: &mut Scheduler) {
    let (sock_in, enabled) = {
        let s = this.borrow();
        match (s.state, s.fds.sock_in) {
            (SessionState::Closed, _) | (_, None) => return,
            (_, Some(fd)) => (fd, s.screen_out.is_empty()),
        }
    };
    if let Err(e) = set_sock_reading(this, scheduler, sock_in, enabled) {
        tracing::warn!(message = "master read handler not updated", error = ?e);
        teardown(this, scheduler, CloseReason::DescriptorError);
    }
}

fn hook_resize(this: &Shared, scheduler: &mut Scheduler) {
    let id = this.borrow().id;
    let weak = Rc::downgrade(this);
    scheduler.on_signal(AsyncSignal::Resize, id, move |scheduler| {
        if let Some(this) = weak.upgrade() {
            resize_terminal(&this, scheduler);
        }
    });
}

// ╭──────────────────────────────────────────────────────────╮
// │ Output                                                   │
// ╰──────────────────────────────────────────────────────────╯

fn queue_event(this: &Shared, scheduler: &mut Scheduler, event: InterlinkEvent) {
    tracing::trace!(message = "event to master", id = this.borrow().id, event = ?event);
    queue_bytes(this, scheduler, Channel::Events, &event.encode());
}

/// Sends or queues `bytes`. A write error tears the session down. Overflow does too,
/// but the read handlers only take in what the queues have room for.
fn queue_bytes(this: &Shared, scheduler: &mut Scheduler, channel: Channel, bytes: &[u8]) {
    let (fd, result) = {
        let mut s = this.borrow_mut();
        if s.state == SessionState::Closed {
            return;
        }
        let fd = s.fd(channel);
        (fd, s.queue(channel).send(fd, bytes))
    };

    match result {
        Ok(SendOutcome::Written) => {}
        Ok(SendOutcome::Queued) => {
            let flush = session_callback(this, move |this, scheduler| {
                flush_channel(this, scheduler, channel);
            });
            if let Err(e) = scheduler.set_handler(fd, HandlerKind::Write, flush) {
                tracing::warn!(message = "write handler not registered", fd, error = ?e);
                teardown(this, scheduler, CloseReason::DescriptorError);
            }
        }
        Err(e) => {
            tracing::warn!(message = "session output failed", fd, error = ?e);
            teardown(this, scheduler, CloseReason::WriteError);
        }
    }
}

fn flush_channel(this: &Shared, scheduler: &mut Scheduler, channel: Channel) {
    let (fd, result) = {
        let mut s = this.borrow_mut();
        if s.state == SessionState::Closed {
            return;
        }
        let fd = s.fd(channel);
        (fd, s.queue(channel).flush_chunk(fd))
    };

    match result {
        Ok(FlushOutcome::Pending) => {}
        Ok(FlushOutcome::Drained) => {
            // Same fd for both channels is possible, e.g. a socketpair used as the tty.
            let other = match channel {
                Channel::Events => Channel::Screen,
                Channel::Screen => Channel::Events,
            };
            let other_busy = {
                let mut s = this.borrow_mut();
                s.fd(other) == fd && !s.queue(other).is_empty()
            };
            if other_busy {
                let flush = session_callback(this, move |this, scheduler| {
                    flush_channel(this, scheduler, other);
                });
                let _unused = scheduler.set_handler(fd, HandlerKind::Write, flush);
            } else if let Err(e) = scheduler.set_handler(fd, HandlerKind::Write, None) {
                tracing::debug!(message = "write handler not removed", fd, error = ?e);
            }
            match channel {
                Channel::Events => refresh_stdin_reading(this, scheduler),
                Channel::Screen => refresh_sock_reading(this, scheduler),
            }
        }
        Err(e) => {
            tracing::warn!(message = "session output failed", fd, error = ?e);
            teardown(this, scheduler, CloseReason::WriteError);
        }
    }
}

/// Writes whatever is queued for the tty, then `bytes`, blocking until done. Used where
/// the terminal must be in a known state before the next step.
fn write_tty_now(this: &Shared, scheduler: &mut Scheduler, bytes: &[u8]) -> io::Result<()> {
    let (fd, pending) = {
        let mut s = this.borrow_mut();
        let pending = s.screen_out.pending().to_vec();
        s.screen_out.clear();
        (s.fds.std_out, pending)
    };
    if !pending.is_empty() {
        let _unused = scheduler.set_handler(fd, HandlerKind::Write, None);
        refresh_sock_reading(this, scheduler);
        hard_write(fd, &pending)?;
    }
    hard_write(fd, bytes)
}

// ╭──────────────────────────────────────────────────────────╮
// │ Keyboard input                                           │
// ╰──────────────────────────────────────────────────────────╯

fn in_kbd(this: &Shared, scheduler: &mut Scheduler) {
    let (std_in, free, room) = {
        let s = this.borrow();
        if s.state != SessionState::Active {
            return;
        }
        // Every byte decodes to at most one record.
        let room = if s.events_out.is_empty() {
            (s.events_out.free_space() / EVENT_RECORD_SIZE).max(1)
        } else {
            s.events_out.free_space() / EVENT_RECORD_SIZE
        };
        (s.fds.std_in, s.input.free_space(), room)
    };

    if !can_read(std_in) {
        return;
    }

    if free == 0 || room == 0 {
        // Input stays in the kernel until both queues have room again. Decoding
        // re-evaluates the read handler.
        process_input_queue(this, scheduler);
        return;
    }

    let mut buf = [0_u8; KBD_READ_CHUNK];
    let want = free.min(room).min(KBD_READ_CHUNK);
    match safe_read(std_in, &mut buf[..want]) {
        Ok(0) => teardown(this, scheduler, CloseReason::Eof),
        Ok(n) => {
            tracing::trace!(message = "keyboard bytes", id = this.borrow().id, bytes = ?&buf[..n]);
            this.borrow_mut().input.push(&buf[..n]);
            process_input_queue(this, scheduler);
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
        Err(e) => {
            tracing::debug!(message = "keyboard read failed", error = ?e);
            teardown(this, scheduler, CloseReason::ReadError);
        }
    }
}

fn process_input_queue(this: &Shared, scheduler: &mut Scheduler) {
    let batch = {
        let mut s = this.borrow_mut();
        if s.state != SessionState::Active {
            return;
        }
        let ItrmState { decoder, input, .. } = &mut *s;
        decoder.process_queue(input)
    };
    after_decode(this, scheduler, batch);
}

fn kbd_timeout(this: &Shared, scheduler: &mut Scheduler) {
    let std_in = {
        let mut s = this.borrow_mut();
        s.esc_timer = None;
        if s.state != SessionState::Active || s.input.is_empty() {
            return;
        }
        s.fds.std_in
    };

    // More bytes arrived in the meantime, they may complete the sequence.
    if can_read(std_in) {
        in_kbd(this, scheduler);
        return;
    }

    let batch = {
        let mut s = this.borrow_mut();
        let ItrmState { decoder, input, .. } = &mut *s;
        decoder.process_timeout(input)
    };
    after_decode(this, scheduler, batch);
}

/// Forwards decoded input, then re-arms the ESC timer and the read handler as needed.
fn after_decode(this: &Shared, scheduler: &mut Scheduler, batch: DecodeBatch) {
    for output in batch.outputs {
        if this.borrow().state != SessionState::Active {
            return;
        }
        match output {
            DecodedInput::Key(key) => queue_event(this, scheduler, InterlinkEvent::Keyboard(key)),
            DecodedInput::Mouse(mouse) => {
                queue_event(this, scheduler, InterlinkEvent::Mouse(mouse));
            }
            DecodedInput::ResizeProbe => resize_terminal(this, scheduler),
        }
    }

    let esc_timeout = {
        let mut s = this.borrow_mut();
        if s.state != SessionState::Active {
            return;
        }
        scheduler.kill_timer(&mut s.esc_timer);
        s.config.esc_timeout
    };

    if batch.pending_escape {
        let weak = Rc::downgrade(this);
        let id = scheduler.arm_timer(esc_timeout, move |scheduler| {
            if let Some(this) = weak.upgrade() {
                kbd_timeout(&this, scheduler);
            }
        });
        this.borrow_mut().esc_timer = Some(id);
    }

    refresh_stdin_reading(this, scheduler);
}

// ╭──────────────────────────────────────────────────────────╮
// │ Window size                                              │
// ╰──────────────────────────────────────────────────────────╯

fn resize_terminal(this: &Shared, scheduler: &mut Scheduler) {
    let geometry = {
        let mut s = this.borrow_mut();
        if s.state == SessionState::Closed {
            return;
        }
        let geometry = window_size(s.fds.std_out)
            .or_else(|| s.fds.ctl_in.and_then(window_size))
            .unwrap_or(s.geometry);
        s.geometry = geometry;
        geometry
    };
    queue_event(
        this,
        scheduler,
        InterlinkEvent::Resize {
            width: geometry.width,
            height: geometry.height,
        },
    );
}

// ╭──────────────────────────────────────────────────────────╮
// │ Master to slave stream                                   │
// ╰──────────────────────────────────────────────────────────╯

fn in_sock(this: &Shared, scheduler: &mut Scheduler) {
    let (sock_in, room) = {
        let s = this.borrow();
        match (s.state, s.fds.sock_in) {
            (SessionState::Closed, _) | (_, None) => return,
            (_, Some(fd)) => (fd, s.screen_out.free_space().min(SOCK_READ_CHUNK)),
        }
    };
    if room == 0 {
        refresh_sock_reading(this, scheduler);
        return;
    }

    let mut buf = [0_u8; SOCK_READ_CHUNK];
    let n = match safe_read(sock_in, &mut buf[..room]) {
        Ok(0) => {
            teardown(this, scheduler, CloseReason::Eof);
            return;
        }
        Ok(n) => n,
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
        Err(e) => {
            tracing::debug!(message = "master read failed", error = ?e);
            teardown(this, scheduler, CloseReason::ReadError);
            return;
        }
    };

    let items = this.borrow_mut().stream.feed(&buf[..n]);
    for item in items {
        let state = this.borrow().state;
        match (state, item) {
            (SessionState::Closed, _) => return,
            (SessionState::Blocked, ScreenItem::Raw(_)) => {}
            (_, ScreenItem::Raw(bytes)) => queue_bytes(this, scheduler, Channel::Screen, &bytes),
            (_, ScreenItem::Frame(ControlFrame::Special(function))) => {
                run_special(this, scheduler, function);
            }
            (
                _,
                ScreenItem::Frame(ControlFrame::Exec {
                    mode,
                    command,
                    delete_after,
                }),
            ) => start_exec(this, scheduler, ExecRequest::new(mode, &command, &delete_after)),
        }
    }
    refresh_sock_reading(this, scheduler);
}

fn run_special(this: &Shared, scheduler: &mut Scheduler, function: SpecialFunction) {
    if !this.borrow().owns_tty() {
        return;
    }
    match function {
        SpecialFunction::Title(title) => {
            this.borrow_mut().touched_title = true;
            queue_bytes(this, scheduler, Channel::Screen, &title_sequence(&title));
        }
        SpecialFunction::Resize { width, height, .. } => {
            queue_bytes(this, scheduler, Channel::Screen, &resize_sequence(width, height));
            resize_terminal(this, scheduler);
        }
        SpecialFunction::TitleCodepage(name) => {
            this.borrow_mut().codepage = Some(name);
        }
    }
}

fn start_exec(this: &Shared, scheduler: &mut Scheduler, request: ExecRequest) {
    let foreground = request.mode == ExecMode::Foreground;
    if foreground && this.borrow().state == SessionState::Blocked {
        tracing::warn!(message = "foreground exec refused, terminal is busy", command = request.command);
        request.discard();
        return;
    }
    if foreground && let Err(e) = block(this, scheduler) {
        tracing::warn!(message = "terminal not released for exec", error = ?e);
    }

    let done = match spawn_exec(request) {
        Ok(done) => done,
        Err(e) => {
            tracing::warn!(message = "exec not started", error = ?e);
            if foreground {
                resume_after_exec(this, scheduler);
            }
            return;
        }
    };

    let fd = done.as_raw_fd();
    let weak = Rc::downgrade(this);
    let on_done = io_callback(move |scheduler| {
        // The stream closes when the registration holding this closure goes away.
        let _owned = &done;
        scheduler.clear(fd);
        if foreground && let Some(this) = weak.upgrade() {
            resume_after_exec(&this, scheduler);
        }
    });
    if let Err(e) = scheduler.register(fd, on_done.clone(), None, on_done) {
        tracing::warn!(message = "exec completion not registered", error = ?e);
        if foreground {
            resume_after_exec(this, scheduler);
        }
    }
}

fn resume_after_exec(this: &Shared, scheduler: &mut Scheduler) {
    if let Err(e) = unblock(this, scheduler) {
        tracing::warn!(message = "terminal not reclaimed after exec", error = ?e);
        teardown(this, scheduler, CloseReason::DescriptorError);
        return;
    }
    if this.borrow().state == SessionState::Active {
        resize_terminal(this, scheduler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SchedulerConfig, TERMINAL_INFO_SIZE};
    use pretty_assertions::assert_eq;
    use std::{io::{Read as _, Write as _},
              os::unix::net::UnixStream,
              time::Duration};

    struct Harness {
        scheduler: Scheduler,
        itrm: Itrm,
        tty: UnixStream,
        master: UnixStream,
        _session_tty: UnixStream,
        _session_sock: UnixStream,
    }

    fn harness(config: ItrmConfig) -> Harness {
        let mut scheduler = Scheduler::new(SchedulerConfig::default()).unwrap();
        let (tty, session_tty) = UnixStream::pair().unwrap();
        let (master, session_sock) = UnixStream::pair().unwrap();
        session_tty.set_nonblocking(true).unwrap();
        session_sock.set_nonblocking(true).unwrap();
        master.set_read_timeout(Some(Duration::from_millis(500))).unwrap();

        let fds = ItrmFds {
            std_in: session_tty.as_raw_fd(),
            std_out: session_tty.as_raw_fd(),
            sock_in: Some(session_sock.as_raw_fd()),
            sock_out: session_sock.as_raw_fd(),
            ctl_in: None,
        };
        let itrm = Itrm::attach(
            &mut scheduler,
            fds,
            config.with_term_name("xterm").with_keep_session_alive(true),
            AttachRequest::normal(b"about:blank".to_vec()),
        )
        .unwrap();
        Harness {
            scheduler,
            itrm,
            tty,
            master,
            _session_tty: session_tty,
            _session_sock: session_sock,
        }
    }

    fn read_exact(stream: &mut UnixStream, n: usize) -> Vec<u8> {
        let mut acc = vec![0_u8; n];
        stream.read_exact(&mut acc).unwrap();
        acc
    }

    #[test]
    fn test_attach_sends_handshake_then_payload() {
        let mut h = harness(ItrmConfig::default());
        let block: [u8; TERMINAL_INFO_SIZE] = read_exact(&mut h.master, TERMINAL_INFO_SIZE)
            .try_into()
            .unwrap();
        let info = TerminalInfo::decode(&block).unwrap();
        assert_eq!(info.name, "xterm");
        assert_eq!(info.length, 11);
        assert_eq!((info.width, info.height), (80, 25));
        assert_eq!(read_exact(&mut h.master, 11), b"about:blank");
        assert_eq!(h.itrm.state(), SessionState::Active);
    }

    #[test]
    fn test_key_is_forwarded_to_master() {
        let mut h = harness(ItrmConfig::default());
        read_exact(&mut h.master, TERMINAL_INFO_SIZE + 11);

        h.tty.write_all(b"a").unwrap();
        h.scheduler.run_once(Some(Duration::from_millis(100))).unwrap();

        let record: [u8; EVENT_RECORD_SIZE] =
            read_exact(&mut h.master, EVENT_RECORD_SIZE).try_into().unwrap();
        assert_eq!(
            InterlinkEvent::decode(&record),
            Ok(InterlinkEvent::Keyboard(KeyEvent::plain(b'a')))
        );
    }

    #[test]
    fn test_lone_escape_arms_timer() {
        let mut h = harness(ItrmConfig::default());
        h.tty.write_all(b"\x1b").unwrap();
        h.scheduler.run_once(Some(Duration::from_millis(100))).unwrap();
        assert!(h.itrm.has_escape_timer());
        assert_eq!(h.itrm.pending_input(), 1);

        h.scheduler.advance_timers(Duration::from_millis(60));
        assert!(!h.itrm.has_escape_timer());
        assert_eq!(h.itrm.pending_input(), 0);
    }

    #[test]
    fn test_wakeup_without_bytes_keeps_escape_timer() {
        let mut h = harness(ItrmConfig::default());
        h.tty.write_all(b"\x1b").unwrap();
        h.scheduler.run_once(Some(Duration::from_millis(100))).unwrap();
        assert!(h.itrm.has_escape_timer());

        // Readiness reported, but the tty has nothing more.
        in_kbd(&h.itrm.inner, &mut h.scheduler);
        assert!(h.itrm.has_escape_timer());
        assert_eq!(h.itrm.pending_input(), 1);

        h.scheduler.advance_timers(Duration::from_millis(60));
        assert_eq!(h.itrm.pending_input(), 0);
    }

    #[test]
    fn test_master_is_paused_while_screen_bytes_wait() {
        let mut h = harness(ItrmConfig::default());
        let sock_in = h.itrm.fds().sock_in.unwrap();
        let chunk = [b'x'; 4096];

        // Nobody reads the tty, so it fills up and screen bytes start to queue.
        for _ in 0..1024 {
            if h.itrm.pending_screen() > 0 {
                break;
            }
            h.master.write_all(&chunk).unwrap();
            h.scheduler.run_once(Some(Duration::from_millis(10))).unwrap();
        }
        assert!(h.itrm.pending_screen() > 0);
        assert!(h.itrm.pending_screen() <= chunk.len());
        assert!(h.scheduler.handlers(sock_in).unwrap().read.is_none());
        assert_eq!(h.itrm.state(), SessionState::Active);

        // Draining the tty lets the master through again.
        h.tty.set_nonblocking(true).unwrap();
        let mut buf = [0_u8; 65536];
        for _ in 0..1024 {
            if h.itrm.pending_screen() == 0 {
                break;
            }
            while h.tty.read(&mut buf).is_ok_and(|n| n > 0) {}
            h.scheduler.run_once(Some(Duration::from_millis(10))).unwrap();
        }
        assert_eq!(h.itrm.pending_screen(), 0);
        assert!(h.scheduler.handlers(sock_in).unwrap().read.is_some());
    }

    #[test]
    fn test_screen_bytes_reach_tty() {
        let mut h = harness(ItrmConfig::default().with_altscreen(false).with_mouse(false));
        let init = init_sequence(false, false);
        h.tty.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
        assert_eq!(read_exact(&mut h.tty, init.len()), init);

        h.master.write_all(b"hello").unwrap();
        h.scheduler.run_once(Some(Duration::from_millis(100))).unwrap();
        assert_eq!(read_exact(&mut h.tty, 5), b"hello");
    }

    #[test]
    fn test_block_drops_screen_bytes_and_unblock_restores_input() {
        let mut h = harness(ItrmConfig::default());
        h.itrm.block(&mut h.scheduler).unwrap();
        assert_eq!(h.itrm.state(), SessionState::Blocked);
        let std_in = h.itrm.fds().std_in;
        assert!(h.scheduler.handlers(std_in).unwrap().read.is_none());

        h.master.write_all(b"dropped").unwrap();
        h.scheduler.run_once(Some(Duration::from_millis(50))).unwrap();
        assert_eq!(h.itrm.pending_screen(), 0);

        h.itrm.unblock(&mut h.scheduler).unwrap();
        assert_eq!(h.itrm.state(), SessionState::Active);
        assert!(h.scheduler.handlers(std_in).unwrap().read.is_some());
    }

    #[test]
    fn test_master_eof_runs_close_hook() {
        let mut h = harness(ItrmConfig::default());
        let seen = Rc::new(RefCell::new(None));
        let seen_in_hook = Rc::clone(&seen);
        h.itrm.set_close_hook(move |_, reason| *seen_in_hook.borrow_mut() = Some(reason));

        drop(h.master);
        h.scheduler.run_once(Some(Duration::from_millis(100))).unwrap();

        assert_eq!(*seen.borrow(), Some(CloseReason::Eof));
        assert_eq!(h.itrm.state(), SessionState::Closed);
        assert_eq!(h.scheduler.registered_count(), 0);
    }

    #[test]
    fn test_title_frame_is_written_and_codepage_stored() {
        let mut h = harness(ItrmConfig::default());
        let mut frame = crate::encode_special(&SpecialFunction::TitleCodepage("utf-8".into()));
        frame.extend(crate::encode_special(&SpecialFunction::Title(b"Inbox".to_vec())));
        h.master.write_all(&frame).unwrap();
        h.scheduler.run_once(Some(Duration::from_millis(100))).unwrap();

        assert_eq!(h.itrm.codepage().as_deref(), Some("utf-8"));
        assert_eq!(h.itrm.pending_screen(), 0);
    }
}
