// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! A master and a slave in one process, joined through a real socket path.

use itrm::*;
use pretty_assertions::assert_eq;
use std::{cell::RefCell,
          io::{self, Read as _, Write as _},
          os::{fd::AsRawFd as _, unix::net::UnixStream},
          rc::Rc,
          time::{Duration, Instant}};

fn pump_until(scheduler: &mut Scheduler, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() && Instant::now() < deadline {
        scheduler.run_once(Some(Duration::from_millis(10))).unwrap();
    }
    assert!(done(), "gave up waiting");
}

fn read_available(stream: &mut UnixStream) -> Vec<u8> {
    let mut acc = vec![];
    let mut buf = [0_u8; 4096];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => return acc,
            Ok(n) => acc.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return acc,
            Err(e) => panic!("read failed: {e}"),
        }
    }
}

struct Slave {
    itrm: Itrm,
    tty: UnixStream,
    _session_tty: UnixStream,
    _sock: UnixStream,
}

fn attach_slave(scheduler: &mut Scheduler, sock: UnixStream, request: AttachRequest) -> Slave {
    let (tty, session_tty) = UnixStream::pair().unwrap();
    for it in [&tty, &session_tty, &sock] {
        it.set_nonblocking(true).unwrap();
    }
    let fds = ItrmFds {
        std_in: session_tty.as_raw_fd(),
        std_out: session_tty.as_raw_fd(),
        sock_in: Some(sock.as_raw_fd()),
        sock_out: sock.as_raw_fd(),
        ctl_in: None,
    };
    let config = ItrmConfig::default()
        .with_term_name("xterm-256color")
        .with_keep_session_alive(true)
        .with_system_env(SystemEnv::XWIN);
    let itrm = Itrm::attach(scheduler, fds, config, request).unwrap();
    Slave {
        itrm,
        tty,
        _session_tty: session_tty,
        _sock: sock,
    }
}

/// Binds the master at a fresh path and connects one slave to it.
fn master_and_slave_stream() -> (
    Scheduler,
    Rc<InterlinkListener>,
    Rc<RefCell<Vec<UnixStream>>>,
    UnixStream,
    TempDir,
) {
    let mut scheduler = Scheduler::new(SchedulerConfig::default()).unwrap();
    let dir = try_create_temp_dir().unwrap();
    let path = dir.join("socket");

    let InterlinkSocket::Master(listener) = connect_or_listen(&path).unwrap() else {
        panic!("nobody listens at a fresh path");
    };
    let listener = Rc::new(listener);
    let accepted = Rc::new(RefCell::new(vec![]));
    {
        let accepted = Rc::clone(&accepted);
        InterlinkListener::register(&listener, &mut scheduler, move |_, stream| {
            accepted.borrow_mut().push(stream);
        })
        .unwrap();
    }

    let InterlinkSocket::Slave(sock) = connect_or_listen(&path).unwrap() else {
        panic!("the master is listening");
    };
    (scheduler, listener, accepted, sock, dir)
}

#[test]
fn test_slave_attaches_types_and_receives_screen_updates() {
    let (mut scheduler, _listener, accepted, sock, _dir) = master_and_slave_stream();
    let mut slave = attach_slave(&mut scheduler, sock, AttachRequest::normal(b"file:///x".to_vec()));
    pump_until(&mut scheduler, || !accepted.borrow().is_empty());
    let mut peer = accepted.borrow_mut().remove(0);

    // Handshake, then the keys typed on the slave's terminal.
    slave.tty.write_all(b"hi").unwrap();
    let mut reader = InterlinkEventReader::new(true);
    let mut items = vec![];
    pump_until(&mut scheduler, || {
        items.extend(reader.feed(&read_available(&mut peer)).unwrap());
        items.len() >= 3
    });

    let ReaderItem::Attached { info, payload } = &items[0] else {
        panic!("handshake comes first, got {:?}", items[0]);
    };
    assert_eq!(info.name, "xterm-256color");
    assert_eq!(info.magic, InfoMagic::Normal);
    assert_eq!(info.system_env, SystemEnv::XWIN);
    assert_eq!(payload, b"file:///x");
    assert_eq!(
        &items[1..],
        &[
            ReaderItem::Event(InterlinkEvent::Keyboard(KeyEvent::plain(b'h'))),
            ReaderItem::Event(InterlinkEvent::Keyboard(KeyEvent::plain(b'i'))),
        ]
    );

    // Screen bytes with a title frame in the middle.
    read_available(&mut slave.tty);
    let mut update = b"top ".to_vec();
    update.extend(encode_special(&SpecialFunction::Title(b"Inbox".to_vec())));
    update.extend(b"bottom");
    peer.write_all(&update).unwrap();

    let mut screen = vec![];
    let expected = [
        b"top ".as_slice(),
        title_sequence(b"Inbox").as_slice(),
        b"bottom".as_slice(),
    ]
    .concat();
    pump_until(&mut scheduler, || {
        screen.extend(read_available(&mut slave.tty));
        screen.len() >= expected.len()
    });
    assert_eq!(screen, expected);

    // The master going away closes the session.
    let reason = Rc::new(RefCell::new(None));
    {
        let reason = Rc::clone(&reason);
        slave
            .itrm
            .set_close_hook(move |_, it| *reason.borrow_mut() = Some(it));
    }
    drop(peer);
    pump_until(&mut scheduler, || reason.borrow().is_some());
    assert_eq!(*reason.borrow(), Some(CloseReason::Eof));
}

#[test]
fn test_remote_session_leaves_terminal_untouched() {
    let (mut scheduler, _listener, accepted, sock, _dir) = master_and_slave_stream();
    let mut slave = attach_slave(
        &mut scheduler,
        sock,
        AttachRequest::remote(7, b"openURL(about:blank)".to_vec()),
    );
    pump_until(&mut scheduler, || !accepted.borrow().is_empty());
    let mut peer = accepted.borrow_mut().remove(0);

    let mut reader = InterlinkEventReader::new(false);
    let mut items = vec![];
    pump_until(&mut scheduler, || {
        items.extend(reader.feed(&read_available(&mut peer)).unwrap());
        !items.is_empty()
    });

    let ReaderItem::Attached { info, payload } = &items[0] else {
        panic!("handshake comes first, got {:?}", items[0]);
    };
    assert_eq!(info.magic, InfoMagic::Remote);
    assert_eq!(info.session_info, 7);
    assert_eq!(payload, b"openURL(about:blank)");

    // No init sequence, and title frames are ignored.
    peer.write_all(&encode_special(&SpecialFunction::Title(b"x".to_vec())))
        .unwrap();
    for _ in 0..5 {
        scheduler.run_once(Some(Duration::from_millis(5))).unwrap();
    }
    assert!(read_available(&mut slave.tty).is_empty());
}

#[test]
fn test_title_setter_only_sends_changes() {
    let mut setter = TitleSetter::new();
    let first = setter.set_title(b"Inbox").unwrap();
    assert_eq!(first, encode_special(&SpecialFunction::Title(b"Inbox".to_vec())));
    assert_eq!(setter.set_title(b"Inbox"), None);
    assert!(setter.set_title(b"Outbox").is_some());
    assert_eq!(setter.current(), Some(b"Outbox".as_slice()));
}
