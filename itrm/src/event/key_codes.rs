// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Logical keys, modifier bitmasks and mouse button bitmasks.
//!
//! These are the values that travel in [`InterlinkEvent`] records, so every
//! discriminant here is part of the wire contract.
//!
//! | Range             | Meaning                           |
//! | :---------------- | :-------------------------------- |
//! | `0x00..=0xFF`     | A plain byte typed by the user    |
//! | `0x100..=0x10D`   | Editing and cursor keys           |
//! | `0x120..=0x12B`   | `F1` to `F12`                     |
//! | `0x200`           | Ctrl-C injected by the front-end  |
//!
//! [`InterlinkEvent`]: crate::InterlinkEvent

use std::{fmt::{self, Display, Formatter},
          ops::{BitOr, BitOrAssign}};

/// Keys that don't correspond to a single byte.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum_macros::FromRepr,
    strum_macros::Display,
)]
#[repr(i32)]
pub enum SpecialKey {
    Enter = 0x100,
    Backspace = 0x101,
    Tab = 0x102,
    Escape = 0x103,
    Left = 0x104,
    Right = 0x105,
    Up = 0x106,
    Down = 0x107,
    Insert = 0x108,
    Delete = 0x109,
    Home = 0x10A,
    End = 0x10B,
    PageUp = 0x10C,
    PageDown = 0x10D,
    F1 = 0x120,
    F2 = 0x121,
    F3 = 0x122,
    F4 = 0x123,
    F5 = 0x124,
    F6 = 0x125,
    F7 = 0x126,
    F8 = 0x127,
    F9 = 0x128,
    F10 = 0x129,
    F11 = 0x12A,
    F12 = 0x12B,
    #[strum(to_string = "Ctrl-C")]
    CtrlC = 0x200,
}

impl SpecialKey {
    /// `F1` for `n == 1` up to `F12` for `n == 12`.
    #[must_use]
    pub fn function(n: u8) -> Option<Self> {
        if (1..=12).contains(&n) {
            Self::from_repr(SpecialKey::F1 as i32 + i32::from(n) - 1)
        } else {
            None
        }
    }
}

/// A decoded key: either a literal byte or a [`SpecialKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Byte(u8),
    Special(SpecialKey),
}

impl Key {
    /// The wire value of this key.
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Key::Byte(byte) => i32::from(byte),
            Key::Special(special) => special as i32,
        }
    }

    /// Inverse of [`Self::code`].
    #[must_use]
    pub fn from_code(code: i32) -> Option<Self> {
        match u8::try_from(code) {
            Ok(byte) => Some(Key::Byte(byte)),
            Err(_) => SpecialKey::from_repr(code).map(Key::Special),
        }
    }
}

impl From<SpecialKey> for Key {
    fn from(it: SpecialKey) -> Self { Key::Special(it) }
}

impl Display for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Key::Byte(byte) if byte.is_ascii_graphic() => write!(f, "{}", char::from(*byte)),
            Key::Byte(b' ') => write!(f, "Space"),
            Key::Byte(byte) => write!(f, "0x{byte:02X}"),
            Key::Special(special) => write!(f, "{special}"),
        }
    }
}

/// Modifier bitmask. Values are part of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Modifiers(i32);

impl Modifiers {
    pub const NONE: Self = Self(0);
    pub const SHIFT: Self = Self(1);
    pub const CTRL: Self = Self(2);
    pub const ALT: Self = Self(4);

    #[must_use]
    pub const fn bits(self) -> i32 { self.0 }

    /// Keeps only the known bits.
    #[must_use]
    pub const fn from_bits_truncate(bits: i32) -> Self { Self(bits & 7) }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool { self.0 & other.0 == other.0 }

    #[must_use]
    pub const fn is_empty(self) -> bool { self.0 == 0 }

    /// Converts the xterm modifier parameter (the `m` in `ESC [ 1 ; m A`) which is
    /// `1 + bitmask(shift=1, alt=2, ctrl=4)`.
    #[must_use]
    pub fn from_xterm_param(param: u32) -> Self {
        let Some(mask) = param.checked_sub(1) else {
            return Self::NONE;
        };
        let mut it = Self::NONE;
        if mask & 1 != 0 {
            it |= Self::SHIFT;
        }
        if mask & 2 != 0 {
            it |= Self::ALT;
        }
        if mask & 4 != 0 {
            it |= Self::CTRL;
        }
        it
    }
}

impl BitOr for Modifiers {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output { Self(self.0 | rhs.0) }
}

impl BitOrAssign for Modifiers {
    fn bitor_assign(&mut self, rhs: Self) { self.0 |= rhs.0; }
}

/// A key press with its modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyEvent {
    pub key: Key,
    pub modifiers: Modifiers,
}

impl KeyEvent {
    #[must_use]
    pub fn new(key: impl Into<Key>, modifiers: Modifiers) -> Self {
        Self {
            key: key.into(),
            modifiers,
        }
    }

    #[must_use]
    pub fn plain(key: impl Into<Key>) -> Self { Self::new(key, Modifiers::NONE) }
}

impl From<u8> for Key {
    fn from(it: u8) -> Self { Key::Byte(it) }
}

impl Display for KeyEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.modifiers.contains(Modifiers::CTRL) {
            write!(f, "Ctrl+")?;
        }
        if self.modifiers.contains(Modifiers::ALT) {
            write!(f, "Alt+")?;
        }
        if self.modifiers.contains(Modifiers::SHIFT) {
            write!(f, "Shift+")?;
        }
        write!(f, "{}", self.key)
    }
}

// ╭──────────────────────────────────────────────────────────╮
// │ Mouse                                                    │
// ╰──────────────────────────────────────────────────────────╯

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::FromRepr, strum_macros::Display)]
#[repr(i32)]
pub enum MouseButton {
    Left = 0,
    Middle = 1,
    Right = 2,
    WheelUp = 3,
    WheelDown = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::FromRepr, strum_macros::Display)]
#[repr(i32)]
pub enum MouseAction {
    Down = 0,
    Up = 32,
    Drag = 64,
}

/// Button plus action, packed the way the wire record carries it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ButtonState(i32);

impl ButtonState {
    const BUTTON_MASK: i32 = 7;
    const ACTION_MASK: i32 = 96;

    #[must_use]
    pub fn new(button: MouseButton, action: MouseAction) -> Self {
        Self(button as i32 | action as i32)
    }

    #[must_use]
    pub const fn from_bits(bits: i32) -> Self { Self(bits) }

    #[must_use]
    pub const fn bits(self) -> i32 { self.0 }

    #[must_use]
    pub fn button(self) -> Option<MouseButton> {
        MouseButton::from_repr(self.0 & Self::BUTTON_MASK)
    }

    #[must_use]
    pub fn action(self) -> Option<MouseAction> {
        MouseAction::from_repr(self.0 & Self::ACTION_MASK)
    }
}

/// A mouse report. `x` and `y` are zero-based cell coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MouseEvent {
    pub x: i32,
    pub y: i32,
    pub button: ButtonState,
}

impl Display for MouseEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match (self.button.button(), self.button.action()) {
            (Some(button), Some(action)) => {
                write!(f, "{button} {action} at ({}, {})", self.x, self.y)
            }
            _ => write!(f, "button 0x{:X} at ({}, {})", self.button.bits(), self.x, self.y),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_key_codes_round_trip_through_wire_value() {
        for key in [
            Key::Byte(0),
            Key::Byte(b'a'),
            Key::Byte(0xFF),
            Key::Special(SpecialKey::Enter),
            Key::Special(SpecialKey::F12),
            Key::Special(SpecialKey::CtrlC),
        ] {
            assert_eq!(Key::from_code(key.code()), Some(key));
        }
        assert_eq!(Key::from_code(0x10E), None);
        assert_eq!(Key::from_code(-1), None);
    }

    #[test]
    fn test_function_keys() {
        assert_eq!(SpecialKey::function(1), Some(SpecialKey::F1));
        assert_eq!(SpecialKey::function(12), Some(SpecialKey::F12));
        assert_eq!(SpecialKey::function(0), None);
        assert_eq!(SpecialKey::function(13), None);
    }

    #[test]
    fn test_xterm_modifier_param() {
        assert_eq!(Modifiers::from_xterm_param(1), Modifiers::NONE);
        assert_eq!(Modifiers::from_xterm_param(2), Modifiers::SHIFT);
        assert_eq!(Modifiers::from_xterm_param(3), Modifiers::ALT);
        assert_eq!(Modifiers::from_xterm_param(5), Modifiers::CTRL);
        assert_eq!(
            Modifiers::from_xterm_param(8),
            Modifiers::SHIFT | Modifiers::ALT | Modifiers::CTRL
        );
        assert_eq!(Modifiers::from_xterm_param(0), Modifiers::NONE);
    }

    #[test]
    fn test_button_state_packing() {
        let state = ButtonState::new(MouseButton::Right, MouseAction::Up);
        assert_eq!(state.bits(), 34);
        assert_eq!(state.button(), Some(MouseButton::Right));
        assert_eq!(state.action(), Some(MouseAction::Up));
    }

    #[test]
    fn test_display() {
        let event = KeyEvent::new(SpecialKey::Up, Modifiers::CTRL | Modifiers::ALT);
        assert_eq!(event.to_string(), "Ctrl+Alt+Up");
        assert_eq!(KeyEvent::plain(b'q').to_string(), "q");
    }
}
