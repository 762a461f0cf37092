// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words itrm interlink

//! Prints every decoded key, mouse report and resize until `q` is pressed.
//!
//! The terminal is attached as a slave. Without `--socket` the master is an in-process
//! socket pair. With `--socket`, the first process listens at the path and echoes
//! events for every terminal that attaches to it later.
//!
//! ```text
//! cargo run --bin itrm-keys -- --log-file /tmp/itrm.log
//! ```

use clap::Parser;
use itrm::{AsyncSignal, AttachRequest, InterlinkEvent, InterlinkEventReader,
           InterlinkListener, InterlinkSocket, Itrm, ItrmConfig, ItrmFds, Key, ReaderItem,
           Scheduler, SchedulerConfig, SpecialFunction, TracingConfig, connect_or_listen,
           encode_special, hard_write, io_callback, is_terminal, safe_read,
           try_initialize_logging_global};
use miette::IntoDiagnostic;
use std::{cell::RefCell,
          io,
          os::{fd::{AsRawFd, RawFd},
               unix::net::UnixStream},
          path::PathBuf,
          rc::Rc,
          time::Duration};
use tracing_core::LevelFilter;

#[derive(Debug, Parser)]
#[command(
    name = "itrm-keys",
    version,
    about = "Prints decoded keyboard and mouse events until `q` is pressed"
)]
struct CliArg {
    /// Interlink socket. The first process listens, later ones attach to it.
    #[arg(long, short)]
    socket: Option<PathBuf>,

    /// Write debug logs to this file.
    #[arg(long, short)]
    log_file: Option<String>,

    /// Don't ask the terminal for mouse reports.
    #[arg(long)]
    no_mouse: bool,

    /// Stay on the main screen instead of the alternate one.
    #[arg(long)]
    no_altscreen: bool,

    /// How long a lone ESC waits for the rest of a sequence, in milliseconds.
    #[arg(long, default_value_t = 50)]
    esc_timeout_ms: u64,
}

fn main() -> miette::Result<()> {
    let cli_arg = CliArg::parse();

    if let Some(log_file) = &cli_arg.log_file {
        try_initialize_logging_global(TracingConfig::new_file(
            Some(log_file.clone()),
            LevelFilter::DEBUG,
        ))?;
        // % is Display, ? is Debug.
        tracing::debug!(message = "Start logging...", cli_arg = ?cli_arg);
    }

    let config = ItrmConfig::default()
        .with_mouse(!cli_arg.no_mouse)
        .with_altscreen(!cli_arg.no_altscreen)
        .with_esc_timeout(Duration::from_millis(cli_arg.esc_timeout_ms));

    let mut scheduler = Scheduler::new(SchedulerConfig::default())?;
    scheduler.hook_os_signals(&[
        AsyncSignal::Resize,
        AsyncSignal::Interrupt,
        AsyncSignal::Terminate,
    ])?;

    let utf8_io = config.utf8_io;
    let (slave_sock, _listener) = match &cli_arg.socket {
        None => (serve_in_process(&mut scheduler, utf8_io)?, None),
        Some(path) => match connect_or_listen(path)? {
            InterlinkSocket::Slave(stream) => (stream, None),
            InterlinkSocket::Master(listener) => {
                let listener = Rc::new(listener);
                InterlinkListener::register(&listener, &mut scheduler, move |scheduler, stream| {
                    if let Err(e) = serve_peer(scheduler, stream, utf8_io) {
                        tracing::warn!(message = "peer not served", error = ?e);
                    }
                })?;
                (serve_in_process(&mut scheduler, utf8_io)?, Some(listener))
            }
        },
    };
    slave_sock.set_nonblocking(true).into_diagnostic()?;

    let std_in = io::stdin().as_raw_fd();
    let fds = ItrmFds {
        std_in,
        std_out: io::stdout().as_raw_fd(),
        sock_in: Some(slave_sock.as_raw_fd()),
        sock_out: slave_sock.as_raw_fd(),
        ctl_in: is_terminal(std_in).then_some(std_in),
    };
    let itrm = Itrm::attach(&mut scheduler, fds, config, AttachRequest::normal(Vec::new()))?;

    // Raw mode turns Ctrl-C into a plain byte, a SIGINT only comes from outside.
    let id = itrm.id();
    {
        let itrm = itrm.clone();
        scheduler.on_signal(AsyncSignal::Interrupt, id, move |scheduler| {
            itrm.queue_ctrl_c(scheduler);
        });
    }
    itrm.set_close_hook(move |scheduler, reason| {
        tracing::debug!(message = "terminal detached", reason = %reason);
        scheduler.clear_signal(AsyncSignal::Interrupt, id);
        scheduler.request_terminate();
    });

    scheduler.run(|_| {})?;

    tracing::debug!(message = "Stop logging...");
    Ok(())
}

/// Master end of a socket pair, served by this process. Returns the slave end.
fn serve_in_process(scheduler: &mut Scheduler, utf8_io: bool) -> miette::Result<UnixStream> {
    let (master, slave) = UnixStream::pair().into_diagnostic()?;
    serve_peer(scheduler, master, utf8_io)?;
    Ok(slave)
}

struct Peer {
    _stream: UnixStream,
    reader: InterlinkEventReader,
}

/// Registers `stream` and answers every event it sends with a line of text.
fn serve_peer(scheduler: &mut Scheduler, stream: UnixStream, utf8_io: bool) -> miette::Result<()> {
    stream.set_nonblocking(true).into_diagnostic()?;
    let fd = stream.as_raw_fd();
    let peer = Rc::new(RefCell::new(Peer {
        _stream: stream,
        reader: InterlinkEventReader::new(utf8_io),
    }));
    scheduler.register(
        fd,
        io_callback(move |scheduler| on_peer_readable(&peer, fd, scheduler)),
        None,
        None,
    )?;
    Ok(())
}

fn on_peer_readable(peer: &Rc<RefCell<Peer>>, fd: RawFd, scheduler: &mut Scheduler) {
    let mut buf = [0_u8; 4096];
    let n = match safe_read(fd, &mut buf) {
        Ok(0) => {
            tracing::debug!(message = "peer hung up", fd);
            scheduler.clear(fd);
            return;
        }
        Ok(n) => n,
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
        Err(e) => {
            tracing::warn!(message = "peer read failed", fd, error = ?e);
            scheduler.clear(fd);
            return;
        }
    };

    let items = match peer.borrow_mut().reader.feed(&buf[..n]) {
        Ok(items) => items,
        Err(e) => {
            tracing::warn!(message = "peer sent garbage", fd, error = ?e);
            scheduler.clear(fd);
            return;
        }
    };

    for item in items {
        let line = match item {
            ReaderItem::Attached { info, .. } => {
                send(fd, &encode_special(&SpecialFunction::Title(b"itrm-keys".to_vec())));
                format!(
                    "attached: {} {}x{}, press q to quit",
                    info.name, info.width, info.height
                )
            }
            ReaderItem::Event(InterlinkEvent::Keyboard(key))
                if key.key == Key::Byte(b'q') && key.modifiers.is_empty() =>
            {
                send(fd, b"bye\r\n");
                // Dropping the connection ends the slave's session.
                scheduler.clear(fd);
                return;
            }
            ReaderItem::Event(InterlinkEvent::Keyboard(key)) => format!("key: {key}"),
            ReaderItem::Event(InterlinkEvent::Mouse(mouse)) => format!("mouse: {mouse}"),
            ReaderItem::Event(InterlinkEvent::Resize { width, height }) => {
                format!("resize: {width}x{height}")
            }
            ReaderItem::Event(other) => format!("event: {other:?}"),
            ReaderItem::Text { ch, modifiers } => format!("text: {ch} {modifiers:?}"),
        };
        send(fd, format!("{line}\r\n").as_bytes());
    }
}

fn send(fd: RawFd, bytes: &[u8]) {
    if let Err(e) = hard_write(fd, bytes) {
        tracing::warn!(message = "write to peer failed", fd, error = ?e);
    }
}
