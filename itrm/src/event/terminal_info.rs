// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The attach handshake a slave sends once, right after connecting to the master.
//!
//! Layout ([`TERMINAL_INFO_SIZE`] bytes, integers native-endian):
//!
//! | Offset | Size | Field                                          |
//! | -----: | ---: | :--------------------------------------------- |
//! |      0 |   16 | [`InterlinkEvent::Init`] record with geometry  |
//! |     16 |   32 | terminal type name, NUL padded                 |
//! |     48 |  256 | current working directory, NUL padded          |
//! |    304 |    4 | system environment bitmask ([`SystemEnv`])     |
//! |    308 |    4 | length of the payload that follows             |
//! |    312 |    4 | session info (meaning depends on the magic)    |
//! |    316 |    4 | magic ([`InfoMagic`])                          |
//!
//! The payload (a URI list, or a remote-control command) follows immediately.

use super::{EVENT_RECORD_SIZE, InterlinkEvent};
use crate::InterlinkError;

pub const MAX_TERM_LEN: usize = 32;
pub const MAX_CWD_LEN: usize = 256;
pub const TERMINAL_INFO_SIZE: usize = EVENT_RECORD_SIZE + MAX_TERM_LEN + MAX_CWD_LEN + 4 * 4;

const fn interlink_magic(major: i32, minor: i32) -> i32 { -((major << 8) + minor) }

pub const INTERLINK_NORMAL_MAGIC: i32 = interlink_magic(1, 0);
pub const INTERLINK_REMOTE_MAGIC: i32 = interlink_magic(1, 1);

/// Identity of the connecting slave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InfoMagic {
    /// A new interactive session.
    #[default]
    Normal,
    /// A one-shot remote-control command, the payload holds the command.
    Remote,
}

impl InfoMagic {
    #[must_use]
    pub fn value(self) -> i32 {
        match self {
            InfoMagic::Normal => INTERLINK_NORMAL_MAGIC,
            InfoMagic::Remote => INTERLINK_REMOTE_MAGIC,
        }
    }

    #[must_use]
    pub fn from_value(value: i32) -> Option<Self> {
        match value {
            INTERLINK_NORMAL_MAGIC => Some(InfoMagic::Normal),
            INTERLINK_REMOTE_MAGIC => Some(InfoMagic::Remote),
            _ => None,
        }
    }
}

/// Bits of [`TerminalInfo::system_env`].
#[derive(Debug, Clone, Copy)]
pub struct SystemEnv;

impl SystemEnv {
    /// The slave has a controlling tty.
    pub const CONSOLE: i32 = 1;
    /// `$DISPLAY` is set.
    pub const XWIN: i32 = 2;
    /// `$TWDISPLAY` is set.
    pub const TWIN: i32 = 4;
    /// `$STY` is set (running inside GNU screen).
    pub const SCREEN: i32 = 8;

    /// Reads the environment of the current process.
    #[must_use]
    pub fn detect(has_console: bool) -> i32 {
        let set = |name: &str| std::env::var_os(name).is_some_and(|it| !it.is_empty());
        let mut acc = 0;
        if has_console {
            acc |= Self::CONSOLE;
        }
        if set("DISPLAY") {
            acc |= Self::XWIN;
        }
        if set("TWDISPLAY") {
            acc |= Self::TWIN;
        }
        if set("STY") {
            acc |= Self::SCREEN;
        }
        acc
    }
}

/// Makes a `$TERM` value safe to use as a lookup key: characters outside
/// `[A-Za-z0-9_]` become `-`, and the result fits the name field with its NUL.
#[must_use]
pub fn sanitize_term_name(raw: &str) -> String {
    raw.bytes()
        .take(MAX_TERM_LEN - 1)
        .map(|it| {
            if it.is_ascii_alphanumeric() || it == b'_' {
                char::from(it)
            } else {
                '-'
            }
        })
        .collect()
}

/// The decoded handshake block, without its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalInfo {
    pub width: i32,
    pub height: i32,
    pub name: String,
    pub cwd: String,
    pub system_env: i32,
    pub length: i32,
    pub session_info: i32,
    pub magic: InfoMagic,
}

fn put_padded(dst: &mut [u8], src: &[u8]) {
    let n = src.len().min(dst.len() - 1);
    dst[..n].copy_from_slice(&src[..n]);
}

fn get_padded(src: &[u8]) -> String {
    let end = src.iter().position(|it| *it == 0).unwrap_or(src.len());
    String::from_utf8_lossy(&src[..end]).into_owned()
}

impl TerminalInfo {
    /// Serializes the block. `name` and `cwd` are truncated to fit their fields.
    #[must_use]
    pub fn encode(&self) -> [u8; TERMINAL_INFO_SIZE] {
        let mut acc = [0_u8; TERMINAL_INFO_SIZE];
        let init = InterlinkEvent::Init {
            width: self.width,
            height: self.height,
        };
        acc[..EVENT_RECORD_SIZE].copy_from_slice(&init.encode());

        let name_at = EVENT_RECORD_SIZE;
        let cwd_at = name_at + MAX_TERM_LEN;
        let ints_at = cwd_at + MAX_CWD_LEN;
        put_padded(&mut acc[name_at..cwd_at], self.name.as_bytes());
        put_padded(&mut acc[cwd_at..ints_at], self.cwd.as_bytes());

        for (index, value) in [
            self.system_env,
            self.length,
            self.session_info,
            self.magic.value(),
        ]
        .into_iter()
        .enumerate()
        {
            let at = ints_at + index * 4;
            acc[at..at + 4].copy_from_slice(&value.to_ne_bytes());
        }
        acc
    }

    /// Parses a complete block.
    ///
    /// # Errors
    ///
    /// Returns [`InterlinkError::BadMagic`] for an unknown magic, and
    /// [`InterlinkError::BadHandshake`] if the leading record is not an init event or
    /// the payload length is negative.
    pub fn decode(block: &[u8; TERMINAL_INFO_SIZE]) -> Result<Self, InterlinkError> {
        let name_at = EVENT_RECORD_SIZE;
        let cwd_at = name_at + MAX_TERM_LEN;
        let ints_at = cwd_at + MAX_CWD_LEN;
        let int = |index: usize| {
            let at = ints_at + index * 4;
            let mut bytes = [0_u8; 4];
            bytes.copy_from_slice(&block[at..at + 4]);
            i32::from_ne_bytes(bytes)
        };

        let magic_value = int(3);
        let magic = InfoMagic::from_value(magic_value)
            .ok_or(InterlinkError::BadMagic { magic: magic_value })?;

        let mut record = [0_u8; EVENT_RECORD_SIZE];
        record.copy_from_slice(&block[..EVENT_RECORD_SIZE]);
        let Ok(InterlinkEvent::Init { width, height }) = InterlinkEvent::decode(&record) else {
            return Err(InterlinkError::BadHandshake {
                reason: "first record is not an init event",
            });
        };

        let length = int(1);
        if length < 0 {
            return Err(InterlinkError::BadHandshake {
                reason: "negative payload length",
            });
        }

        Ok(Self {
            width,
            height,
            name: get_padded(&block[name_at..cwd_at]),
            cwd: get_padded(&block[cwd_at..ints_at]),
            system_env: int(0),
            length,
            session_info: int(2),
            magic,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_block_size_and_magics() {
        assert_eq!(TERMINAL_INFO_SIZE, 320);
        assert_eq!(INTERLINK_NORMAL_MAGIC, -256);
        assert_eq!(INTERLINK_REMOTE_MAGIC, -257);
    }

    #[test]
    fn test_encode_decode() {
        let info = TerminalInfo {
            width: 132,
            height: 43,
            name: "xterm-256color".into(),
            cwd: "/home/user".into(),
            system_env: SystemEnv::CONSOLE | SystemEnv::XWIN,
            length: 11,
            session_info: 3,
            magic: InfoMagic::Remote,
        };
        let block = info.encode();
        assert_eq!(&block[316..320], &INTERLINK_REMOTE_MAGIC.to_ne_bytes());
        assert_eq!(TerminalInfo::decode(&block).unwrap(), info);
    }

    #[test]
    fn test_bad_magic() {
        let mut block = TerminalInfo {
            width: 80,
            height: 25,
            name: String::new(),
            cwd: String::new(),
            system_env: 0,
            length: 0,
            session_info: 0,
            magic: InfoMagic::Normal,
        }
        .encode();
        block[316..320].copy_from_slice(&(-1_i32).to_ne_bytes());
        assert!(matches!(
            TerminalInfo::decode(&block),
            Err(InterlinkError::BadMagic { magic: -1 })
        ));
    }

    #[test]
    fn test_sanitize_term_name() {
        assert_eq!(sanitize_term_name("xterm-256color"), "xterm-256color");
        assert_eq!(sanitize_term_name("rxvt.unicode/x"), "rxvt-unicode-x");
        assert_eq!(sanitize_term_name(&"a".repeat(40)).len(), 31);
    }
}
