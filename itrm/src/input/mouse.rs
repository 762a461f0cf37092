// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Mouse report decoding for the two protocols reached through `ESC [ M`.
//!
//! - X10 / xterm / rxvt: `ESC [ M b x y`, one byte each, offset by `' ' + 1`.
//! - Twin: `ESC [ 5 M b xl xh yl yh`, 14-bit positions in two 7-bit halves. The button
//!   byte is absolute, so press and release are derived by XOR against the previous
//!   report: exactly one bit changes per event, no bit change means drag.
//!
//! The previously seen button lives in [`MouseDecoder`], one per session.

use crate::{ButtonState, MouseAction, MouseButton, MouseEvent};

const TW_BUTTON_LEFT: i32 = 1;
const TW_BUTTON_MIDDLE: i32 = 2;
const TW_BUTTON_RIGHT: i32 = 4;

/// Parameter of `ESC [ 5 M` that selects the Twin protocol.
pub const TWIN_MOUSE_PARAM: u32 = 5;

/// Outcome of decoding the bytes after the `M` final byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseStep {
    /// The report is not complete yet.
    NeedMore,
    /// `consumed` counts from the start of the escape sequence. `event` is `None` for a
    /// Twin protocol error, which still consumes the report.
    Done {
        consumed: usize,
        event: Option<MouseEvent>,
    },
}

/// Per-session mouse protocol state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseDecoder {
    /// Last button byte (minus `' '`) seen, `-1` when no button is held.
    xterm_button: i32,
}

impl Default for MouseDecoder {
    fn default() -> Self { Self { xterm_button: -1 } }
}

fn offset(byte: u8) -> i32 { i32::from(byte) - i32::from(b' ') - 1 }

/// Two 7-bit halves. Values with bit 13 set are out of range and read as 0.
fn twin_position(low: u8, high: u8) -> i32 {
    let position = offset(low) + (offset(high) << 7);
    if position & (1 << 13) != 0 { 0 } else { position }
}

impl MouseDecoder {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Decodes the report whose button byte sits at `data[el]`, `el` being the length of
    /// the `ESC [ ... M` prefix. `param` is the first numeric CSI parameter.
    pub fn decode(&mut self, data: &[u8], el: usize, param: u32) -> MouseStep {
        let available = data.len().saturating_sub(el);
        if available < 3 {
            return MouseStep::NeedMore;
        }

        if param == TWIN_MOUSE_PARAM {
            self.decode_twin(data, el)
        } else {
            self.decode_x10(data, el)
        }
    }

    fn decode_twin(&mut self, data: &[u8], el: usize) -> MouseStep {
        if data.len() - el < 5 {
            return MouseStep::NeedMore;
        }
        if self.xterm_button == -1 {
            self.xterm_button = 0;
        }

        let x = twin_position(data[el + 1], data[el + 2]);
        let y = twin_position(data[el + 3], data[el + 4]);
        let current = i32::from(data[el]) - i32::from(b' ');
        let previous = self.xterm_button;

        let up_or_down = |bit: i32| {
            if previous & bit != 0 { MouseAction::Up } else { MouseAction::Down }
        };
        let button = match current ^ previous {
            TW_BUTTON_LEFT => Some(ButtonState::new(MouseButton::Left, up_or_down(TW_BUTTON_LEFT))),
            TW_BUTTON_MIDDLE => Some(ButtonState::new(
                MouseButton::Middle,
                up_or_down(TW_BUTTON_MIDDLE),
            )),
            TW_BUTTON_RIGHT => Some(ButtonState::new(
                MouseButton::Right,
                up_or_down(TW_BUTTON_RIGHT),
            )),
            0 => Some(ButtonState::from_bits(MouseAction::Drag as i32)),
            changed => {
                tracing::debug!(message = "twin mouse protocol error", previous, current, changed);
                None
            }
        };

        self.xterm_button = current;
        MouseStep::Done {
            consumed: el + 5,
            event: button.map(|button| MouseEvent { x, y, button }),
        }
    }

    fn decode_x10(&mut self, data: &[u8], el: usize) -> MouseStep {
        let b = data[el];
        let x = offset(data[el + 1]);
        let y = offset(data[el + 2]);

        let mut button = ButtonState::from_bits(i32::from(b & 3) | MouseAction::Down as i32);
        // rxvt reports every release as button 3.
        if b & 3 == 3 && self.xterm_button != -1 {
            button = ButtonState::from_bits(self.xterm_button | MouseAction::Up as i32);
        }
        if b & 96 == 96 {
            let wheel = if b & 1 != 0 { MouseButton::WheelDown } else { MouseButton::WheelUp };
            button = ButtonState::new(wheel, MouseAction::Down);
        }

        self.xterm_button = -1;
        if button.action() == Some(MouseAction::Down) {
            self.xterm_button = button.bits() & 7;
        }

        MouseStep::Done {
            consumed: el + 3,
            event: Some(MouseEvent { x, y, button }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn event(step: MouseStep) -> MouseEvent {
        match step {
            MouseStep::Done {
                event: Some(event), ..
            } => event,
            other => panic!("expected an event, got {other:?}"),
        }
    }

    #[test]
    fn test_x10_press_and_rxvt_release() {
        let mut decoder = MouseDecoder::new();
        let press = event(decoder.decode(b"\x1b[M\x22\x25\x2a", 3, 0));
        assert_eq!(press.x, 4);
        assert_eq!(press.y, 9);
        assert_eq!(press.button, ButtonState::new(MouseButton::Right, MouseAction::Down));

        let release = event(decoder.decode(b"\x1b[M\x23\x25\x2a", 3, 0));
        assert_eq!(release.button, ButtonState::new(MouseButton::Right, MouseAction::Up));
    }

    #[test]
    fn test_x10_wheel() {
        let mut decoder = MouseDecoder::new();
        let up = event(decoder.decode(b"\x1b[M\x60\x21\x21", 3, 0));
        assert_eq!(up.button.button(), Some(MouseButton::WheelUp));
        let down = event(decoder.decode(b"\x1b[M\x61\x21\x21", 3, 0));
        assert_eq!(down.button.button(), Some(MouseButton::WheelDown));
    }

    #[test]
    fn test_incomplete_report_needs_more() {
        let mut decoder = MouseDecoder::new();
        assert_eq!(decoder.decode(b"\x1b[M\x20\x21", 3, 0), MouseStep::NeedMore);
        assert_eq!(
            decoder.decode(b"\x1b[5M\x21\x21\x20", 4, TWIN_MOUSE_PARAM),
            MouseStep::NeedMore
        );
    }

    #[test]
    fn test_twin_press_drag_release() {
        let mut decoder = MouseDecoder::new();
        let report = |b: u8| [0x1b, b'[', b'5', b'M', b, 0x23, 0x21, 0x24, 0x21];

        let press = event(decoder.decode(&report(0x21), 4, TWIN_MOUSE_PARAM));
        assert_eq!(press.button, ButtonState::new(MouseButton::Left, MouseAction::Down));
        assert_eq!((press.x, press.y), (2, 3));

        let drag = event(decoder.decode(&report(0x21), 4, TWIN_MOUSE_PARAM));
        assert_eq!(drag.button.action(), Some(MouseAction::Drag));

        let release = event(decoder.decode(&report(0x20), 4, TWIN_MOUSE_PARAM));
        assert_eq!(release.button, ButtonState::new(MouseButton::Left, MouseAction::Up));
    }

    #[test]
    fn test_twin_protocol_error_consumes_report() {
        let mut decoder = MouseDecoder::new();
        let step = decoder.decode(b"\x1b[5M\x23\x21\x21\x21\x21", 4, TWIN_MOUSE_PARAM);
        assert_eq!(
            step,
            MouseStep::Done {
                consumed: 9,
                event: None
            }
        );
    }

    #[test]
    fn test_twin_out_of_range_position_is_zero() {
        assert_eq!(twin_position(0x21, 0x21 + 64), 0);
        assert_eq!(twin_position(0x22, 0x22), 129);
    }
}
