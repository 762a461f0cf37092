// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Fixed-size event records, the slave to master half of the interlink protocol.
//!
//! A record is four native-endian `i32`s, `{kind, a, b, c}`, and nothing else. There is
//! no framing: both ends agree on [`EVENT_RECORD_SIZE`] and read the stream in units of
//! that size.
//!
//! | Kind         | `a`      | `b`       | `c`    |
//! | :----------- | :------- | :-------- | :----- |
//! | `0` Init     | width    | height    | 0      |
//! | `1` Keyboard | key code | modifiers | 0      |
//! | `2` Mouse    | x        | y         | button |
//! | `3` Redraw   | width    | height    | 0      |
//! | `4` Resize   | width    | height    | 0      |
//! | `5` Abort    | 0        | 0         | 0      |

use super::{ButtonState, Key, KeyEvent, Modifiers, MouseEvent};

/// Size in bytes of one encoded [`InterlinkEvent`].
pub const EVENT_RECORD_SIZE: usize = 16;

/// Discriminant of an event record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::FromRepr)]
#[repr(i32)]
pub enum EventKind {
    Init = 0,
    Keyboard = 1,
    Mouse = 2,
    Redraw = 3,
    Resize = 4,
    Abort = 5,
}

/// A decoded terminal event, as produced by the input decoder and carried to the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterlinkEvent {
    Init { width: i32, height: i32 },
    Keyboard(KeyEvent),
    Mouse(MouseEvent),
    Redraw { width: i32, height: i32 },
    Resize { width: i32, height: i32 },
    Abort,
}

impl From<KeyEvent> for InterlinkEvent {
    fn from(it: KeyEvent) -> Self { InterlinkEvent::Keyboard(it) }
}

impl From<MouseEvent> for InterlinkEvent {
    fn from(it: MouseEvent) -> Self { InterlinkEvent::Mouse(it) }
}

/// Why a record could not be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordError {
    UnknownKind(i32),
    UnknownKey(i32),
}

impl InterlinkEvent {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            InterlinkEvent::Init { .. } => EventKind::Init,
            InterlinkEvent::Keyboard(_) => EventKind::Keyboard,
            InterlinkEvent::Mouse(_) => EventKind::Mouse,
            InterlinkEvent::Redraw { .. } => EventKind::Redraw,
            InterlinkEvent::Resize { .. } => EventKind::Resize,
            InterlinkEvent::Abort => EventKind::Abort,
        }
    }

    /// Serializes into the raw record layout.
    #[must_use]
    pub fn encode(&self) -> [u8; EVENT_RECORD_SIZE] {
        let (a, b, c) = match *self {
            InterlinkEvent::Init { width, height }
            | InterlinkEvent::Redraw { width, height }
            | InterlinkEvent::Resize { width, height } => (width, height, 0),
            InterlinkEvent::Keyboard(KeyEvent { key, modifiers }) => {
                (key.code(), modifiers.bits(), 0)
            }
            InterlinkEvent::Mouse(MouseEvent { x, y, button }) => (x, y, button.bits()),
            InterlinkEvent::Abort => (0, 0, 0),
        };

        let mut acc = [0_u8; EVENT_RECORD_SIZE];
        for (chunk, value) in acc
            .chunks_exact_mut(4)
            .zip([self.kind() as i32, a, b, c])
        {
            chunk.copy_from_slice(&value.to_ne_bytes());
        }
        acc
    }

    /// Parses one raw record.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError`] for an unknown kind or key code.
    pub fn decode(record: &[u8; EVENT_RECORD_SIZE]) -> Result<Self, RecordError> {
        let field = |index: usize| {
            let mut bytes = [0_u8; 4];
            bytes.copy_from_slice(&record[index * 4..index * 4 + 4]);
            i32::from_ne_bytes(bytes)
        };
        let (kind, a, b, c) = (field(0), field(1), field(2), field(3));

        Ok(match EventKind::from_repr(kind).ok_or(RecordError::UnknownKind(kind))? {
            EventKind::Init => InterlinkEvent::Init {
                width: a,
                height: b,
            },
            EventKind::Keyboard => InterlinkEvent::Keyboard(KeyEvent {
                key: Key::from_code(a).ok_or(RecordError::UnknownKey(a))?,
                modifiers: Modifiers::from_bits_truncate(b),
            }),
            EventKind::Mouse => InterlinkEvent::Mouse(MouseEvent {
                x: a,
                y: b,
                button: ButtonState::from_bits(c),
            }),
            EventKind::Redraw => InterlinkEvent::Redraw {
                width: a,
                height: b,
            },
            EventKind::Resize => InterlinkEvent::Resize {
                width: a,
                height: b,
            },
            EventKind::Abort => InterlinkEvent::Abort,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MouseAction, MouseButton, SpecialKey};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_keyboard_record_layout() {
        let event = InterlinkEvent::Keyboard(KeyEvent::new(SpecialKey::Up, Modifiers::ALT));
        let bytes = event.encode();
        assert_eq!(&bytes[0..4], &1_i32.to_ne_bytes());
        assert_eq!(&bytes[4..8], &0x106_i32.to_ne_bytes());
        assert_eq!(&bytes[8..12], &4_i32.to_ne_bytes());
        assert_eq!(&bytes[12..16], &0_i32.to_ne_bytes());
        assert_eq!(InterlinkEvent::decode(&bytes), Ok(event));
    }

    #[test]
    fn test_mouse_record_layout() {
        let event = InterlinkEvent::Mouse(MouseEvent {
            x: 3,
            y: 7,
            button: ButtonState::new(MouseButton::Middle, MouseAction::Drag),
        });
        let bytes = event.encode();
        assert_eq!(&bytes[12..16], &65_i32.to_ne_bytes());
        assert_eq!(InterlinkEvent::decode(&bytes), Ok(event));
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let mut bytes = InterlinkEvent::Abort.encode();
        bytes[0..4].copy_from_slice(&9_i32.to_ne_bytes());
        assert_eq!(
            InterlinkEvent::decode(&bytes),
            Err(RecordError::UnknownKind(9))
        );
    }
}
