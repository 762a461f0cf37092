// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Resumable parser for the master to slave stream.
//!
//! Reads arrive in arbitrary pieces, so a control frame may be split anywhere, even
//! between its NUL and its tag byte. The parser keeps the partial frame and picks up
//! where the previous [`ScreenStreamParser::feed()`] stopped. Nothing here blocks.

use super::{ControlFrame, ExecMode, SpecialFunction};
use smallvec::SmallVec;

/// One piece of the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScreenItem {
    /// Bytes for the terminal, in order.
    Raw(Vec<u8>),
    Frame(ControlFrame),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum State {
    #[default]
    Raw,
    Tag,
    Path,
    Delete,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScreenStreamParser {
    state: State,
    tag: u8,
    path: Vec<u8>,
    delete: Vec<u8>,
}

impl ScreenStreamParser {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// True while a control frame is partially received.
    #[must_use]
    pub fn in_frame(&self) -> bool { self.state != State::Raw }

    pub fn feed(&mut self, mut bytes: &[u8]) -> SmallVec<[ScreenItem; 4]> {
        let mut acc = SmallVec::new();
        while !bytes.is_empty() {
            match self.state {
                State::Raw => {
                    let end = bytes.iter().position(|it| *it == 0).unwrap_or(bytes.len());
                    if end > 0 {
                        acc.push(ScreenItem::Raw(bytes[..end].to_vec()));
                    }
                    if end < bytes.len() {
                        self.state = State::Tag;
                        bytes = &bytes[end + 1..];
                    } else {
                        bytes = &[];
                    }
                }
                State::Tag => {
                    self.tag = bytes[0];
                    self.state = State::Path;
                    bytes = &bytes[1..];
                }
                State::Path | State::Delete => {
                    let end = bytes.iter().position(|it| *it == 0);
                    let field = if self.state == State::Path {
                        &mut self.path
                    } else {
                        &mut self.delete
                    };
                    match end {
                        None => {
                            field.extend_from_slice(bytes);
                            bytes = &[];
                        }
                        Some(end) => {
                            field.extend_from_slice(&bytes[..end]);
                            bytes = &bytes[end + 1..];
                            if self.state == State::Path {
                                self.state = State::Delete;
                            } else {
                                acc.extend(self.finish_frame());
                            }
                        }
                    }
                }
            }
        }
        acc
    }

    fn finish_frame(&mut self) -> Option<ScreenItem> {
        self.state = State::Raw;
        let path = std::mem::take(&mut self.path);
        let delete = std::mem::take(&mut self.delete);

        if path.is_empty() {
            let function = SpecialFunction::parse(&delete);
            if function.is_none() {
                tracing::warn!(
                    message = "dropping malformed special function frame",
                    len = delete.len()
                );
            }
            return function.map(|it| ScreenItem::Frame(ControlFrame::Special(it)));
        }

        let mode = ExecMode::from_repr(self.tag).unwrap_or_else(|| {
            tracing::warn!(message = "unknown exec tag, running in background", tag = self.tag);
            ExecMode::Background
        });
        Some(ScreenItem::Frame(ControlFrame::Exec {
            mode,
            command: path,
            delete_after: delete,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{encode_exec, encode_special};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_raw_bytes_pass_through() {
        let mut parser = ScreenStreamParser::new();
        let items = parser.feed(b"\x1b[Hhello");
        assert_eq!(items.as_slice(), &[ScreenItem::Raw(b"\x1b[Hhello".to_vec())]);
        assert!(!parser.in_frame());
    }

    #[test]
    fn test_frame_split_across_every_byte() {
        let mut stream = b"ab".to_vec();
        stream.extend(encode_exec(ExecMode::Foreground, b"less x", b"x"));
        stream.extend(b"cd");
        stream.extend(encode_special(&SpecialFunction::Title(b"T".to_vec())));

        let mut parser = ScreenStreamParser::new();
        let mut items = vec![];
        for byte in &stream {
            items.extend(parser.feed(std::slice::from_ref(byte)));
        }

        assert_eq!(
            items,
            vec![
                ScreenItem::Raw(b"a".to_vec()),
                ScreenItem::Raw(b"b".to_vec()),
                ScreenItem::Frame(ControlFrame::Exec {
                    mode: ExecMode::Foreground,
                    command: b"less x".to_vec(),
                    delete_after: b"x".to_vec(),
                }),
                ScreenItem::Raw(b"c".to_vec()),
                ScreenItem::Raw(b"d".to_vec()),
                ScreenItem::Frame(ControlFrame::Special(SpecialFunction::Title(b"T".to_vec()))),
            ]
        );
    }

    #[test]
    fn test_malformed_special_is_dropped_and_stream_continues() {
        let mut parser = ScreenStreamParser::new();
        let items = parser.feed(b"\0\0\0\x02oops\0ok");
        assert_eq!(items.as_slice(), &[ScreenItem::Raw(b"ok".to_vec())]);
    }
}
