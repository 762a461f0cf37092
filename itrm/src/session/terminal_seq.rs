// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words DECRC

//! Byte sequences written to the terminal on attach, detach, and on request of the
//! master.

/// Line drawing character set, save cursor.
pub const INIT_TERMINAL_SEQ: &[u8] = b"\x1b)0\x1b7";
pub const INIT_ALT_SCREEN_SEQ: &[u8] = b"\x1b[?47h";
/// MIT style reports on button press.
pub const INIT_TWIN_MOUSE_SEQ: &[u8] = b"\x1b[?9h";
/// Reports on press and release.
pub const INIT_XWIN_MOUSE_SEQ: &[u8] = b"\x1b[?1000h";

pub const DONE_CLS_SEQ: &[u8] = b"\x1b[2J";
pub const DONE_TWIN_MOUSE_SEQ: &[u8] = b"\x1b[?9l";
pub const DONE_XWIN_MOUSE_SEQ: &[u8] = b"\x1b[?1000l";
pub const DONE_ALT_SCREEN_SEQ: &[u8] = b"\x1b[?47l";
/// DECRC, then leave the cursor on a clean column.
pub const DONE_TERMINAL_SEQ: &[u8] = b"\x1b8\r \x08";

#[must_use]
pub fn init_sequence(altscreen: bool, mouse: bool) -> Vec<u8> {
    let mut acc = INIT_TERMINAL_SEQ.to_vec();
    if altscreen {
        acc.extend_from_slice(INIT_ALT_SCREEN_SEQ);
    }
    if mouse {
        acc.extend_from_slice(INIT_TWIN_MOUSE_SEQ);
        acc.extend_from_slice(INIT_XWIN_MOUSE_SEQ);
    }
    acc
}

/// Both mouse modes are switched off, some terminals keep reporting otherwise.
#[must_use]
pub fn done_sequence(altscreen: bool, mouse: bool) -> Vec<u8> {
    let mut acc = DONE_CLS_SEQ.to_vec();
    if mouse {
        acc.extend_from_slice(DONE_TWIN_MOUSE_SEQ);
        acc.extend_from_slice(DONE_XWIN_MOUSE_SEQ);
    }
    if altscreen {
        acc.extend_from_slice(DONE_ALT_SCREEN_SEQ);
    }
    acc.extend_from_slice(DONE_TERMINAL_SEQ);
    acc
}

/// `ESC ] 2 ; title BEL`, with control characters removed from `title`.
#[must_use]
pub fn title_sequence(title: &[u8]) -> Vec<u8> {
    let mut acc = b"\x1b]2;".to_vec();
    acc.extend(title.iter().copied().filter(|it| *it >= 0x20 && *it != 0x7F));
    acc.push(0x07);
    acc
}

/// xterm window manipulation: resize the text area to `width` x `height` cells.
#[must_use]
pub fn resize_sequence(width: i32, height: i32) -> Vec<u8> {
    format!("\x1b[8;{height};{width}t").into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_init_and_done() {
        assert_eq!(init_sequence(false, false), b"\x1b)0\x1b7".to_vec());
        assert_eq!(
            init_sequence(true, true),
            b"\x1b)0\x1b7\x1b[?47h\x1b[?9h\x1b[?1000h".to_vec()
        );
        assert_eq!(
            done_sequence(true, true),
            b"\x1b[2J\x1b[?9l\x1b[?1000l\x1b[?47l\x1b8\r \x08".to_vec()
        );
    }

    #[test]
    fn test_title_and_resize() {
        assert_eq!(title_sequence(b"a\x07b\x1b"), b"\x1b]2;ab\x07".to_vec());
        assert_eq!(resize_sequence(100, 40), b"\x1b[8;40;100t".to_vec());
    }
}
