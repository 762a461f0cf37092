// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Control frames, the master to slave half of the interlink protocol.
//!
//! Screen bytes flow unframed. A NUL byte introduces a control frame:
//!
//! ```text
//! NUL tag path NUL delete NUL
//! ```
//!
//! `tag` is an [`ExecMode`]. A non-empty `path` asks the slave to run that command and
//! then remove the file named by `delete` (if any). An empty `path` makes it a special
//! function instead: the first byte of `delete` is a [`SpecialCode`] and the rest its
//! argument.

/// How the slave runs an external command.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    strum_macros::FromRepr,
    strum_macros::Display,
)]
#[repr(u8)]
pub enum ExecMode {
    /// Runs alongside the session.
    #[default]
    Background = 0,
    /// Takes over the terminal, the session is blocked until it exits.
    Foreground = 1,
    /// Runs detached in its own process group.
    NewWindow = 2,
}

/// Opcode of a special function frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::FromRepr, strum_macros::Display)]
#[repr(u8)]
pub enum SpecialCode {
    Title = 1,
    Resize = 2,
    TitleCodepage = 3,
}

/// A decoded control frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlFrame {
    Exec {
        mode: ExecMode,
        command: Vec<u8>,
        delete_after: Vec<u8>,
    },
    Special(SpecialFunction),
}

/// Argument of a special function frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecialFunction {
    /// New window title, raw bytes in the announced codepage.
    Title(Vec<u8>),
    Resize {
        width: i32,
        height: i32,
        old_width: i32,
        old_height: i32,
    },
    /// Charset name of the following titles.
    TitleCodepage(String),
}

impl SpecialFunction {
    /// Parses the `delete` field of a frame with an empty path. Returns `None` for an
    /// unknown opcode or a malformed argument.
    #[must_use]
    pub fn parse(raw: &[u8]) -> Option<Self> {
        let (&code, data) = raw.split_first()?;
        match SpecialCode::from_repr(code)? {
            SpecialCode::Title => Some(SpecialFunction::Title(data.to_vec())),
            SpecialCode::Resize => {
                let text = std::str::from_utf8(data).ok()?;
                let mut numbers = text.split(',').map(|it| it.trim().parse::<i32>().ok());
                let mut next = || numbers.next().flatten();
                Some(SpecialFunction::Resize {
                    width: next()?,
                    height: next()?,
                    old_width: next()?,
                    old_height: next()?,
                })
            }
            SpecialCode::TitleCodepage => Some(SpecialFunction::TitleCodepage(
                String::from_utf8_lossy(data).into_owned(),
            )),
        }
    }

    #[must_use]
    pub fn code(&self) -> SpecialCode {
        match self {
            SpecialFunction::Title(_) => SpecialCode::Title,
            SpecialFunction::Resize { .. } => SpecialCode::Resize,
            SpecialFunction::TitleCodepage(_) => SpecialCode::TitleCodepage,
        }
    }
}

fn push_field(acc: &mut Vec<u8>, field: &[u8]) {
    acc.extend(field.iter().copied().filter(|it| *it != 0));
    acc.push(0);
}

/// `NUL tag command NUL delete NUL`. Embedded NULs are dropped. An empty command
/// produces nothing, it would read as a special function.
#[must_use]
pub fn encode_exec(mode: ExecMode, command: &[u8], delete_after: &[u8]) -> Vec<u8> {
    if command.is_empty() {
        return vec![];
    }
    let mut acc = Vec::with_capacity(command.len() + delete_after.len() + 4);
    acc.push(0);
    acc.push(mode as u8);
    push_field(&mut acc, command);
    push_field(&mut acc, delete_after);
    acc
}

/// `NUL 0 NUL code data NUL`.
#[must_use]
pub fn encode_special(function: &SpecialFunction) -> Vec<u8> {
    let data = match function {
        SpecialFunction::Title(title) => title.clone(),
        SpecialFunction::Resize {
            width,
            height,
            old_width,
            old_height,
        } => format!("{width},{height},{old_width},{old_height}").into_bytes(),
        SpecialFunction::TitleCodepage(name) => name.clone().into_bytes(),
    };
    let mut delete = Vec::with_capacity(data.len() + 1);
    delete.push(function.code() as u8);
    delete.extend(data);

    let mut acc = vec![0, ExecMode::Background as u8, 0];
    push_field(&mut acc, &delete);
    acc
}

/// Master side title tracking: only changed titles produce a frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TitleSetter {
    last: Option<Vec<u8>>,
}

impl TitleSetter {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Returns the frame to send, or `None` when `title` is the current title.
    pub fn set_title(&mut self, title: &[u8]) -> Option<Vec<u8>> {
        if self.last.as_deref() == Some(title) {
            return None;
        }
        self.last = Some(title.to_vec());
        Some(encode_special(&SpecialFunction::Title(title.to_vec())))
    }

    #[must_use]
    pub fn current(&self) -> Option<&[u8]> { self.last.as_deref() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_exec_frame_layout() {
        assert_eq!(
            encode_exec(ExecMode::Foreground, b"vi /tmp/x", b"/tmp/x"),
            b"\0\x01vi /tmp/x\0/tmp/x\0".to_vec()
        );
        assert!(encode_exec(ExecMode::Background, b"", b"").is_empty());
    }

    #[test]
    fn test_special_frame_layout() {
        let resize = SpecialFunction::Resize {
            width: 100,
            height: 40,
            old_width: 80,
            old_height: 25,
        };
        assert_eq!(encode_special(&resize), b"\0\0\0\x02100,40,80,25\0".to_vec());
        assert_eq!(SpecialFunction::parse(b"\x02100,40,80,25"), Some(resize));
        assert_eq!(SpecialFunction::parse(b"\x02100,40"), None);
        assert_eq!(SpecialFunction::parse(b"\x09x"), None);
    }

    #[test]
    fn test_title_setter_suppresses_repeats() {
        let mut setter = TitleSetter::new();
        assert!(setter.set_title(b"Inbox").is_some());
        assert!(setter.set_title(b"Inbox").is_none());
        assert_eq!(setter.set_title(b"Other"), Some(b"\0\0\0\x01Other\0".to_vec()));
        assert_eq!(setter.current(), Some(&b"Other"[..]));
    }
}
