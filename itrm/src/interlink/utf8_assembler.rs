// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Reassembles UTF-8 characters that arrive one byte per keyboard record.
//!
//! Overlong forms, surrogates, values above U+10FFFF, stray continuation bytes and
//! sequences cut short by another key all become U+FFFD. A cut-short sequence does not
//! swallow the byte that cut it.

use crate::Modifiers;
use smallvec::SmallVec;

/// Output of one [`Utf8Assembler::push()`]: at most a replacement for an interrupted
/// sequence plus the character that interrupted it.
pub type AssembledChars = SmallVec<[(char, Modifiers); 2]>;

/// Smallest code point for each sequence length, indexed by `len - 2`.
const MIN_FOR_LEN: [u32; 5] = [0x80, 0x800, 0x1_0000, 0x20_0000, 0x400_0000];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Utf8Assembler {
    /// Continuation bytes still expected.
    remaining: u32,
    ucs: u32,
    min: u32,
    modifiers: Modifiers,
}

impl Utf8Assembler {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    #[must_use]
    pub fn is_pending(&self) -> bool { self.remaining > 0 }

    /// Abandons a partial sequence, returning its replacement character.
    pub fn interrupt(&mut self) -> Option<(char, Modifiers)> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining = 0;
        Some((char::REPLACEMENT_CHARACTER, self.modifiers))
    }

    pub fn push(&mut self, byte: u8, modifiers: Modifiers) -> AssembledChars {
        let mut acc = AssembledChars::new();

        if self.remaining > 0 {
            if (0x80..=0xBF).contains(&byte) {
                self.ucs = (self.ucs << 6) | u32::from(byte & 0x3F);
                self.remaining -= 1;
                if self.remaining == 0 {
                    let ch = if self.ucs < self.min {
                        char::REPLACEMENT_CHARACTER
                    } else {
                        char::from_u32(self.ucs).unwrap_or(char::REPLACEMENT_CHARACTER)
                    };
                    acc.push((ch, self.modifiers));
                }
                return acc;
            }
            acc.extend(self.interrupt());
        }

        if byte < 0x80 {
            acc.push((char::from(byte), modifiers));
            return acc;
        }

        let len = byte.leading_ones();
        if (2..=6).contains(&len) {
            self.remaining = len - 1;
            self.min = MIN_FOR_LEN[(len - 2) as usize];
            self.ucs = u32::from(byte) & ((1 << (7 - len)) - 1);
            self.modifiers = modifiers;
            return acc;
        }

        acc.push((char::REPLACEMENT_CHARACTER, modifiers));
        acc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn feed(bytes: &[u8]) -> Vec<char> {
        let mut assembler = Utf8Assembler::new();
        bytes
            .iter()
            .flat_map(|it| assembler.push(*it, Modifiers::NONE))
            .map(|(ch, _)| ch)
            .collect()
    }

    #[test]
    fn test_multibyte_characters() {
        assert_eq!(feed("aé€😀".as_bytes()), vec!['a', 'é', '€', '😀']);
    }

    #[test]
    fn test_invalid_forms_become_replacement() {
        let fffd = char::REPLACEMENT_CHARACTER;
        // Overlong '/'.
        assert_eq!(feed(&[0xC0, 0xAF]), vec![fffd]);
        // Surrogate U+D800.
        assert_eq!(feed(&[0xED, 0xA0, 0x80]), vec![fffd]);
        // Above U+10FFFF.
        assert_eq!(feed(&[0xF4, 0x90, 0x80, 0x80]), vec![fffd]);
        // Stray continuation and never-valid bytes.
        assert_eq!(feed(&[0x80, 0xFF]), vec![fffd, fffd]);
    }

    #[test]
    fn test_cut_short_sequence_keeps_next_byte() {
        assert_eq!(feed(&[0xE2, 0x82, b'x']), vec![char::REPLACEMENT_CHARACTER, 'x']);
    }

    #[test]
    fn test_modifiers_come_from_lead_byte() {
        let mut assembler = Utf8Assembler::new();
        assert!(assembler.push(0xC3, Modifiers::ALT).is_empty());
        assert!(assembler.is_pending());
        let out = assembler.push(0xA9, Modifiers::NONE);
        assert_eq!(out.as_slice(), &[('é', Modifiers::ALT)]);
    }
}
