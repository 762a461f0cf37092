// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words rxvt keypad

//! Incremental terminal input decoder.
//!
//! [`InputDecoder::decode()`] looks at the front of the input queue and either consumes
//! one logical unit (producing zero or one [`DecodedInput`]) or reports that more bytes
//! are needed. It never blocks and never consumes a partial sequence.
//!
//! # Escape handling
//!
//! | Prefix              | Meaning                                                  |
//! | :------------------ | :------------------------------------------------------- |
//! | `ESC`               | incomplete, resolved by more bytes or by the ESC timeout |
//! | `ESC [ [ A..L`      | Linux console `F1` to `F12`                              |
//! | `ESC [ params final` | ECMA-48 control sequence                               |
//! | `ESC O x`           | SS3 (cursor keys, `F1` to `F4`, application keypad)      |
//! | `ESC ESC [`, `ESC ESC O` | lone Escape, the second ESC starts a new sequence  |
//! | `ESC ESC x`         | Alt+Escape                                               |
//! | `ESC x`             | Alt+x                                                    |
//!
//! # Liveness
//!
//! An incomplete sequence while the queue is full can never be completed, since no
//! further bytes can be read. In that case the leading ESC is emitted as a plain Escape
//! so the rest of the queue is decoded as ordinary input.

use super::{InputQueue, MouseDecoder, MouseStep};
use crate::{KeyEvent, Modifiers, MouseEvent, SpecialKey};
use smallvec::SmallVec;

const ESC: u8 = 0x1B;
const CSI_INTRODUCER: u8 = b'[';
const SS3_INTRODUCER: u8 = b'O';

/// What one decoded unit of input means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodedInput {
    Key(KeyEvent),
    Mouse(MouseEvent),
    /// A cursor position report arrived, the window size should be queried again.
    ResizeProbe,
}

impl From<KeyEvent> for DecodedInput {
    fn from(it: KeyEvent) -> Self { DecodedInput::Key(it) }
}

/// Result of one call to [`InputDecoder::decode()`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStep {
    /// The front of the queue is a prefix of a longer sequence.
    NeedMore,
    /// `len` bytes (at least one) were recognized. `output` is `None` for well-formed
    /// sequences that mean nothing to us.
    Consumed {
        len: usize,
        output: Option<DecodedInput>,
    },
}

impl DecodeStep {
    fn key(len: usize, event: KeyEvent) -> Self {
        DecodeStep::Consumed {
            len,
            output: Some(event.into()),
        }
    }

    fn ignored(len: usize) -> Self { DecodeStep::Consumed { len, output: None } }
}

/// Everything [`InputDecoder::process_queue()`] produced in one go.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodeBatch {
    pub outputs: SmallVec<[DecodedInput; 8]>,
    /// The queue ends with an incomplete sequence, the caller should arm the ESC timer.
    pub pending_escape: bool,
}

/// Per-session decoder state: the erase character and the mouse protocol memory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputDecoder {
    erase_char: Option<u8>,
    mouse: MouseDecoder,
}

impl InputDecoder {
    #[must_use]
    pub fn new(erase_char: Option<u8>) -> Self {
        Self {
            erase_char,
            mouse: MouseDecoder::new(),
        }
    }

    #[must_use]
    pub fn erase_char(&self) -> Option<u8> { self.erase_char }

    pub fn set_erase_char(&mut self, it: Option<u8>) { self.erase_char = it; }

    /// Decodes one unit from the front of `data`. `queue_full` tells whether `data` is
    /// all that can ever arrive before something is consumed.
    pub fn decode(&mut self, data: &[u8], queue_full: bool) -> DecodeStep {
        let Some(&first) = data.first() else {
            return DecodeStep::NeedMore;
        };

        if first != ESC {
            return DecodeStep::key(1, self.key_event(first, Modifiers::NONE));
        }

        match self.decode_escape(data) {
            DecodeStep::NeedMore if queue_full => {
                tracing::debug!(
                    message = "forcing incomplete escape sequence on full queue",
                    len = data.len()
                );
                DecodeStep::key(1, KeyEvent::plain(SpecialKey::Escape))
            }
            step => step,
        }
    }

    /// Resolves the front of `data` after the ESC timeout expired with no new input.
    /// `ESC x` (where `x` starts no sequence) becomes Alt+x, anything else yields its
    /// first byte alone, so `ESC [` followed by silence is a plain Escape.
    #[must_use]
    pub fn resolve_timeout(&self, data: &[u8]) -> DecodeStep {
        match data {
            [] => DecodeStep::NeedMore,
            [ESC, second, ..] if !matches!(*second, CSI_INTRODUCER | SS3_INTRODUCER) => {
                DecodeStep::key(2, self.key_event(*second, Modifiers::ALT))
            }
            [first, ..] => DecodeStep::key(1, self.key_event(*first, Modifiers::NONE)),
        }
    }

    /// Decodes as much of `queue` as possible, removing what was consumed.
    pub fn process_queue(&mut self, queue: &mut InputQueue) -> DecodeBatch {
        let mut acc = DecodeBatch::default();
        self.drain_into(queue, &mut acc);
        acc
    }

    /// Applies [`Self::resolve_timeout()`] to the front of `queue`, then keeps decoding.
    pub fn process_timeout(&mut self, queue: &mut InputQueue) -> DecodeBatch {
        let mut acc = DecodeBatch::default();
        if let DecodeStep::Consumed { len, output } = self.resolve_timeout(queue.as_slice()) {
            queue.consume(len);
            acc.outputs.extend(output);
        }
        self.drain_into(queue, &mut acc);
        acc
    }

    fn drain_into(&mut self, queue: &mut InputQueue, acc: &mut DecodeBatch) {
        acc.pending_escape = false;
        while !queue.is_empty() {
            let queue_full = queue.is_full();
            match self.decode(queue.as_slice(), queue_full) {
                DecodeStep::NeedMore => {
                    acc.pending_escape = true;
                    return;
                }
                DecodeStep::Consumed { len, output } => {
                    debug_assert!(len > 0, "decoder made no progress");
                    queue.consume(len.max(1));
                    acc.outputs.extend(output);
                }
            }
        }
    }

    // ╭──────────────────────────────────────────────────────────╮
    // │ Escape sequences                                         │
    // ╰──────────────────────────────────────────────────────────╯

    fn decode_escape(&mut self, data: &[u8]) -> DecodeStep {
        let Some(&second) = data.get(1) else {
            return DecodeStep::NeedMore;
        };

        match second {
            CSI_INTRODUCER => self.decode_csi(data),
            SS3_INTRODUCER => self.decode_ss3(data),
            ESC => match data.get(2) {
                None => DecodeStep::NeedMore,
                Some(&(CSI_INTRODUCER | SS3_INTRODUCER)) => {
                    DecodeStep::key(1, KeyEvent::plain(SpecialKey::Escape))
                }
                Some(_) => DecodeStep::key(2, self.key_event(ESC, Modifiers::ALT)),
            },
            other => DecodeStep::key(2, self.key_event(other, Modifiers::ALT)),
        }
    }

    /// `ESC [` followed by parameter bytes (`0x30..=0x3F`), intermediate bytes
    /// (`0x20..=0x2F`) and one final byte (`0x40..=0x7E`). A byte outside those ranges
    /// where the final byte should be means this is not a control sequence at all: the
    /// ESC is taken as a plain Escape and the rest is decoded as ordinary input.
    fn decode_csi(&mut self, data: &[u8]) -> DecodeStep {
        let Some(&third) = data.get(2) else {
            return DecodeStep::NeedMore;
        };

        if third == b'[' {
            return match data.get(3) {
                None => DecodeStep::NeedMore,
                Some(&it @ b'A'..=b'L') => match SpecialKey::function(it - b'A' + 1) {
                    Some(key) => DecodeStep::key(4, KeyEvent::plain(key)),
                    None => DecodeStep::ignored(4),
                },
                Some(_) => DecodeStep::key(1, KeyEvent::plain(SpecialKey::Escape)),
            };
        }

        let mut pos = 2;
        while data.get(pos).is_some_and(|it| (0x30..=0x3F).contains(it)) {
            pos += 1;
        }
        let params_end = pos;
        while data.get(pos).is_some_and(|it| (0x20..=0x2F).contains(it)) {
            pos += 1;
        }
        let has_intermediates = pos > params_end;

        let Some(&final_byte) = data.get(pos) else {
            return DecodeStep::NeedMore;
        };
        if !(0x40..=0x7E).contains(&final_byte) {
            tracing::trace!(message = "not a control sequence", byte = final_byte);
            return DecodeStep::key(1, KeyEvent::plain(SpecialKey::Escape));
        }

        let el = pos + 1;
        let params = CsiParams::parse(&data[2..params_end]);
        let modifiers = params
            .second
            .map_or(Modifiers::NONE, Modifiers::from_xterm_param);
        let key = |key: SpecialKey| DecodeStep::key(el, KeyEvent::new(key, modifiers));
        let shifted = |key: SpecialKey| {
            DecodeStep::key(el, KeyEvent::new(key, modifiers | Modifiers::SHIFT))
        };

        match final_byte {
            b'A' => key(SpecialKey::Up),
            b'B' => key(SpecialKey::Down),
            b'C' => key(SpecialKey::Right),
            b'D' => key(SpecialKey::Left),
            b'F' | b'e' => key(SpecialKey::End),
            b'H' => key(SpecialKey::Home),
            b'I' => key(SpecialKey::PageUp),
            b'G' => key(SpecialKey::PageDown),
            b'N' => key(SpecialKey::F2),
            b'O' => key(SpecialKey::F3),
            b'P' => key(SpecialKey::F4),
            b'Q' => key(SpecialKey::F5),
            b'S' => key(SpecialKey::F7),
            b'T' => key(SpecialKey::F8),
            b'U' => key(SpecialKey::F9),
            b'V' => key(SpecialKey::F10),
            b'W' => key(SpecialKey::F11),
            b'X' => key(SpecialKey::F12),

            b'z' => match params.first {
                247 => key(SpecialKey::Insert),
                214 => key(SpecialKey::Home),
                220 => key(SpecialKey::End),
                216 => key(SpecialKey::PageUp),
                222 => key(SpecialKey::PageDown),
                249 => key(SpecialKey::Delete),
                _ => DecodeStep::ignored(el),
            },

            b'~' => match params.first {
                1 | 7 => key(SpecialKey::Home),
                2 => key(SpecialKey::Insert),
                3 => key(SpecialKey::Delete),
                4 | 8 => key(SpecialKey::End),
                5 => key(SpecialKey::PageUp),
                6 => key(SpecialKey::PageDown),
                11 => key(SpecialKey::F1),
                12 => key(SpecialKey::F2),
                13 => key(SpecialKey::F3),
                14 => key(SpecialKey::F4),
                15 => key(SpecialKey::F5),
                17 => key(SpecialKey::F6),
                18 => key(SpecialKey::F7),
                19 => key(SpecialKey::F8),
                20 => key(SpecialKey::F9),
                21 => key(SpecialKey::F10),
                23 => key(SpecialKey::F11),
                24 => key(SpecialKey::F12),
                25 => shifted(SpecialKey::F3),
                26 => shifted(SpecialKey::F4),
                28 => shifted(SpecialKey::F5),
                29 => shifted(SpecialKey::F6),
                31 => shifted(SpecialKey::F7),
                32 => shifted(SpecialKey::F8),
                33 => shifted(SpecialKey::F9),
                34 => shifted(SpecialKey::F10),
                _ => DecodeStep::ignored(el),
            },

            b'R' => DecodeStep::Consumed {
                len: el,
                output: Some(DecodedInput::ResizeProbe),
            },

            b'M' if params.digits_only && !has_intermediates => {
                match self.mouse.decode(data, el, params.first) {
                    MouseStep::NeedMore => DecodeStep::NeedMore,
                    MouseStep::Done { consumed, event } => DecodeStep::Consumed {
                        len: consumed,
                        output: event.map(DecodedInput::Mouse),
                    },
                }
            }

            _ => {
                tracing::trace!(
                    message = "ignoring unknown control sequence",
                    final_byte = %char::from(final_byte),
                    param = params.first
                );
                DecodeStep::ignored(el)
            }
        }
    }

    /// `ESC O x`. A byte that can't be an SS3 final leaves the `O` as Alt+O.
    fn decode_ss3(&self, data: &[u8]) -> DecodeStep {
        let Some(&third) = data.get(2) else {
            return DecodeStep::NeedMore;
        };
        if !(0x21..=0x7E).contains(&third) {
            return DecodeStep::key(2, self.key_event(SS3_INTRODUCER, Modifiers::ALT));
        }

        let special = |key: SpecialKey| DecodeStep::key(3, KeyEvent::plain(key));
        match third {
            b'A' => special(SpecialKey::Up),
            b'B' => special(SpecialKey::Down),
            b'C' => special(SpecialKey::Right),
            b'D' => special(SpecialKey::Left),
            b'H' => special(SpecialKey::Home),
            b'F' => special(SpecialKey::End),
            b'P' => special(SpecialKey::F1),
            b'Q' => special(SpecialKey::F2),
            b'R' => special(SpecialKey::F3),
            b'S' => special(SpecialKey::F4),
            b'M' => special(SpecialKey::Enter),
            // Application keypad: `*` `+` `,` `-` `.` `/` and the digits.
            b'j'..=b'y' => DecodeStep::key(3, KeyEvent::plain(third - 0x40)),
            b'X' => DecodeStep::key(3, KeyEvent::plain(b'=')),
            _ => DecodeStep::ignored(3),
        }
    }

    // ╭──────────────────────────────────────────────────────────╮
    // │ Single bytes                                             │
    // ╰──────────────────────────────────────────────────────────╯

    /// Maps one byte to a key, the erase character first.
    fn key_event(&self, byte: u8, modifiers: Modifiers) -> KeyEvent {
        if self.erase_char == Some(byte) {
            return KeyEvent::new(SpecialKey::Backspace, modifiers);
        }
        match byte {
            b'\t' => KeyEvent::new(SpecialKey::Tab, modifiers),
            0x08 | 0x7F => KeyEvent::new(SpecialKey::Backspace, modifiers),
            b'\n' | b'\r' => KeyEvent::new(SpecialKey::Enter, modifiers),
            ESC => KeyEvent::new(SpecialKey::Escape, modifiers),
            0x00..=0x1F => KeyEvent::new(byte + 0x40, modifiers | Modifiers::CTRL),
            _ => KeyEvent::new(byte, modifiers),
        }
    }
}

/// The first two numeric parameters of a CSI sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct CsiParams {
    /// 0 when absent, or when it holds a `:` sub-parameter or a private marker.
    first: u32,
    second: Option<u32>,
    /// Only digits, no separators or private markers.
    digits_only: bool,
}

impl CsiParams {
    fn parse(bytes: &[u8]) -> Self {
        let mut fields = bytes.split(|it| *it == b';');
        let number = |field: Option<&[u8]>| -> Option<u32> {
            let field = field?;
            if !field.iter().all(u8::is_ascii_digit) {
                return Some(0);
            }
            Some(field.iter().fold(0_u32, |acc, digit| {
                acc.saturating_mul(10).saturating_add(u32::from(digit - b'0'))
            }))
        };

        Self {
            first: number(fields.next()).unwrap_or(0),
            second: number(fields.next()),
            digits_only: bytes.iter().all(u8::is_ascii_digit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ButtonState, MouseAction, MouseButton};
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn key(key: impl Into<crate::Key>, modifiers: Modifiers) -> DecodeStep {
        DecodeStep::Consumed {
            len: 0,
            output: Some(DecodedInput::Key(KeyEvent::new(key, modifiers))),
        }
    }

    fn with_len(step: DecodeStep, len: usize) -> DecodeStep {
        match step {
            DecodeStep::Consumed { output, .. } => DecodeStep::Consumed { len, output },
            DecodeStep::NeedMore => DecodeStep::NeedMore,
        }
    }

    #[test_case(b"a", key(b'a', Modifiers::NONE), 1 ; "plain byte")]
    #[test_case(b"\r", key(SpecialKey::Enter, Modifiers::NONE), 1 ; "carriage return")]
    #[test_case(b"\x7f", key(SpecialKey::Backspace, Modifiers::NONE), 1 ; "delete is backspace")]
    #[test_case(b"\x01", key(b'A', Modifiers::CTRL), 1 ; "ctrl a")]
    #[test_case(b"\x1ba", key(b'a', Modifiers::ALT), 2 ; "alt a")]
    #[test_case(b"\x1b[A", key(SpecialKey::Up, Modifiers::NONE), 3 ; "csi up")]
    #[test_case(b"\x1b[1;5C", key(SpecialKey::Right, Modifiers::CTRL), 6 ; "ctrl right")]
    #[test_case(b"\x1b[1;3D", key(SpecialKey::Left, Modifiers::ALT), 6 ; "alt left")]
    #[test_case(b"\x1b[3~", key(SpecialKey::Delete, Modifiers::NONE), 4 ; "delete tilde")]
    #[test_case(b"\x1b[24~", key(SpecialKey::F12, Modifiers::NONE), 5 ; "f12 tilde")]
    #[test_case(b"\x1b[25~", key(SpecialKey::F3, Modifiers::SHIFT), 5 ; "shift f3 tilde")]
    #[test_case(b"\x1b[247z", key(SpecialKey::Insert, Modifiers::NONE), 6 ; "sun insert")]
    #[test_case(b"\x1b[[C", key(SpecialKey::F3, Modifiers::NONE), 4 ; "linux console f3")]
    #[test_case(b"\x1bOP", key(SpecialKey::F1, Modifiers::NONE), 3 ; "ss3 f1")]
    #[test_case(b"\x1bOp", key(b'0', Modifiers::NONE), 3 ; "keypad zero")]
    #[test_case(b"\x1bOX", key(b'=', Modifiers::NONE), 3 ; "keypad equals")]
    #[test_case(b"\x1bO\n", key(b'O', Modifiers::ALT), 2 ; "alt capital o")]
    #[test_case(b"\x1b\x1b[A", key(SpecialKey::Escape, Modifiers::NONE), 1 ; "esc before csi")]
    #[test_case(b"\x1b\x1bx", key(SpecialKey::Escape, Modifiers::ALT), 2 ; "alt escape")]
    #[test_case(b"\x1b[\x01", key(SpecialKey::Escape, Modifiers::NONE), 1 ; "non compliant final")]
    fn test_decode_table(input: &[u8], expected: DecodeStep, len: usize) {
        let mut decoder = InputDecoder::default();
        assert_eq!(decoder.decode(input, false), with_len(expected, len));
    }

    #[test_case(b"\x1b" ; "lone esc")]
    #[test_case(b"\x1b[" ; "csi introducer")]
    #[test_case(b"\x1b[1;5" ; "csi without final")]
    #[test_case(b"\x1bO" ; "ss3 introducer")]
    #[test_case(b"\x1b\x1b" ; "double esc")]
    #[test_case(b"\x1b[[" ; "linux console prefix")]
    #[test_case(b"\x1b[M\x20\x21" ; "short mouse report")]
    fn test_incomplete_needs_more(input: &[u8]) {
        let mut decoder = InputDecoder::default();
        assert_eq!(decoder.decode(input, false), DecodeStep::NeedMore);
    }

    #[test]
    fn test_unknown_sequence_is_swallowed() {
        let mut decoder = InputDecoder::default();
        assert_eq!(decoder.decode(b"\x1b[?25hx", false), DecodeStep::ignored(6));
        assert_eq!(decoder.decode(b"\x1b[99~", false), DecodeStep::ignored(5));
    }

    #[test]
    fn test_cursor_position_report_is_resize_probe() {
        let mut decoder = InputDecoder::default();
        assert_eq!(
            decoder.decode(b"\x1b[24;80R", false),
            DecodeStep::Consumed {
                len: 8,
                output: Some(DecodedInput::ResizeProbe)
            }
        );
    }

    #[test]
    fn test_erase_char_maps_to_backspace() {
        let mut decoder = InputDecoder::new(Some(0x08));
        assert_eq!(
            decoder.decode(b"\x08", false),
            with_len(key(SpecialKey::Backspace, Modifiers::NONE), 1)
        );
        decoder.set_erase_char(Some(b'#'));
        assert_eq!(
            decoder.decode(b"#", false),
            with_len(key(SpecialKey::Backspace, Modifiers::NONE), 1)
        );
    }

    #[test]
    fn test_full_queue_forces_escape() {
        let mut decoder = InputDecoder::default();
        assert_eq!(
            decoder.decode(b"\x1b[1;5", true),
            with_len(key(SpecialKey::Escape, Modifiers::NONE), 1)
        );
    }

    #[test]
    fn test_timeout_resolution() {
        let decoder = InputDecoder::default();
        assert_eq!(
            decoder.resolve_timeout(b"\x1b["),
            with_len(key(SpecialKey::Escape, Modifiers::NONE), 1)
        );
        assert_eq!(
            decoder.resolve_timeout(b"\x1b\x1b"),
            with_len(key(SpecialKey::Escape, Modifiers::ALT), 2)
        );
        assert_eq!(decoder.resolve_timeout(b""), DecodeStep::NeedMore);
    }

    #[test]
    fn test_mouse_report_through_csi() {
        let mut decoder = InputDecoder::default();
        let step = decoder.decode(b"\x1b[M\x20\x21\x22", false);
        assert_eq!(
            step,
            DecodeStep::Consumed {
                len: 6,
                output: Some(DecodedInput::Mouse(MouseEvent {
                    x: 0,
                    y: 1,
                    button: ButtonState::new(MouseButton::Left, MouseAction::Down),
                }))
            }
        );
    }

    #[test]
    fn test_process_queue_one_byte_at_a_time() {
        let mut decoder = InputDecoder::default();
        let mut queue = InputQueue::new(64);
        let mut outputs = vec![];
        for byte in b"x\x1b[A\x1b[6~\x1bOQ" {
            queue.push(&[*byte]);
            outputs.extend(decoder.process_queue(&mut queue).outputs);
        }
        assert!(queue.is_empty());
        assert_eq!(
            outputs,
            vec![
                DecodedInput::Key(KeyEvent::plain(b'x')),
                DecodedInput::Key(KeyEvent::plain(SpecialKey::Up)),
                DecodedInput::Key(KeyEvent::plain(SpecialKey::PageDown)),
                DecodedInput::Key(KeyEvent::plain(SpecialKey::F2)),
            ]
        );
    }

    #[test]
    fn test_process_timeout_then_continues() {
        let mut decoder = InputDecoder::default();
        let mut queue = InputQueue::new(64);
        queue.push(b"\x1b[");
        let batch = decoder.process_queue(&mut queue);
        assert!(batch.pending_escape);
        assert!(batch.outputs.is_empty());

        let batch = decoder.process_timeout(&mut queue);
        assert!(!batch.pending_escape);
        assert!(queue.is_empty());
        assert_eq!(
            batch.outputs.as_slice(),
            &[
                DecodedInput::Key(KeyEvent::plain(SpecialKey::Escape)),
                DecodedInput::Key(KeyEvent::plain(b'[')),
            ]
        );
    }
}
