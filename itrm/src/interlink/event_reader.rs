// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Master side decoder of the slave to master stream: one handshake block, its
//! payload, then fixed-size event records until the connection closes.

use super::{InterlinkError, Utf8Assembler};
use crate::{EVENT_RECORD_SIZE, InterlinkEvent, Key, KeyEvent, Modifiers, TERMINAL_INFO_SIZE,
            TerminalInfo};
use smallvec::SmallVec;

/// What the master learns from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderItem {
    /// The handshake and its payload (URI list or remote command).
    Attached {
        info: TerminalInfo,
        payload: Vec<u8>,
    },
    Event(InterlinkEvent),
    /// A non-ASCII character reassembled from UTF-8 keyboard bytes.
    Text { ch: char, modifiers: Modifiers },
}

pub type ReaderItems = SmallVec<[ReaderItem; 8]>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterlinkEventReader {
    buffer: Vec<u8>,
    attached: bool,
    utf8: Option<Utf8Assembler>,
}

impl InterlinkEventReader {
    /// With `utf8_io`, keyboard bytes are UTF-8 and get reassembled into characters.
    #[must_use]
    pub fn new(utf8_io: bool) -> Self {
        Self {
            buffer: vec![],
            attached: false,
            utf8: utf8_io.then(Utf8Assembler::new),
        }
    }

    #[must_use]
    pub fn is_attached(&self) -> bool { self.attached }

    /// Bytes received but not decoded yet.
    #[must_use]
    pub fn buffered(&self) -> usize { self.buffer.len() }

    /// Appends `bytes` and decodes everything that is complete.
    ///
    /// # Errors
    ///
    /// A bad handshake or record. The connection can't be resynchronized after that.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<ReaderItems, InterlinkError> {
        self.buffer.extend_from_slice(bytes);
        let mut acc = ReaderItems::new();
        let mut offset = 0;

        if !self.attached {
            let Some(block) = self.buffer.get(..TERMINAL_INFO_SIZE) else {
                return Ok(acc);
            };
            let mut info_bytes = [0_u8; TERMINAL_INFO_SIZE];
            info_bytes.copy_from_slice(block);
            let info = TerminalInfo::decode(&info_bytes)?;

            let payload_len = usize::try_from(info.length).unwrap_or(0);
            let end = TERMINAL_INFO_SIZE + payload_len;
            if self.buffer.len() < end {
                return Ok(acc);
            }
            let payload = self.buffer[TERMINAL_INFO_SIZE..end].to_vec();
            tracing::debug!(
                message = "slave attached",
                term = %info.name,
                width = info.width,
                height = info.height,
                payload = payload.len()
            );
            acc.push(ReaderItem::Attached { info, payload });
            self.attached = true;
            offset = end;
        }

        while self.buffer.len() - offset >= EVENT_RECORD_SIZE {
            let mut record = [0_u8; EVENT_RECORD_SIZE];
            record.copy_from_slice(&self.buffer[offset..offset + EVENT_RECORD_SIZE]);
            offset += EVENT_RECORD_SIZE;
            let event = InterlinkEvent::decode(&record)?;
            self.push_event(event, &mut acc);
        }

        self.buffer.drain(..offset);
        Ok(acc)
    }

    /// Checks that the stream ended on a boundary.
    ///
    /// # Errors
    ///
    /// [`InterlinkError::TruncatedInfo`] when the handshake never completed,
    /// [`InterlinkError::BadHandshake`] for a dangling partial record.
    pub fn finish(&self) -> Result<(), InterlinkError> {
        if !self.attached {
            return Err(InterlinkError::TruncatedInfo {
                got: self.buffer.len(),
                expected: TERMINAL_INFO_SIZE,
            });
        }
        if !self.buffer.is_empty() {
            return Err(InterlinkError::BadHandshake {
                reason: "stream ended inside an event record",
            });
        }
        Ok(())
    }

    fn push_event(&mut self, event: InterlinkEvent, acc: &mut ReaderItems) {
        let Some(utf8) = self.utf8.as_mut() else {
            acc.push(ReaderItem::Event(event));
            return;
        };

        match event {
            InterlinkEvent::Keyboard(KeyEvent {
                key: Key::Byte(byte),
                modifiers,
            }) => {
                for (ch, modifiers) in utf8.push(byte, modifiers) {
                    acc.push(match u8::try_from(ch) {
                        Ok(ascii) if ascii.is_ascii() => {
                            ReaderItem::Event(KeyEvent::new(ascii, modifiers).into())
                        }
                        _ => ReaderItem::Text { ch, modifiers },
                    });
                }
            }
            InterlinkEvent::Keyboard(_) => {
                if let Some((ch, modifiers)) = utf8.interrupt() {
                    acc.push(ReaderItem::Text { ch, modifiers });
                }
                acc.push(ReaderItem::Event(event));
            }
            other => acc.push(ReaderItem::Event(other)),
        }
    }
}
