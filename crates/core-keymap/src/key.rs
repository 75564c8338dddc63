//! Wide-character input encoding: folds functional keys into the same `char`
//! alphabet the trie is keyed on, tagged into the Unicode Private Use Area so
//! they can never collide with printable input (SPEC_FULL §3.1/§6).

use core_events::{KeyToken, ModMask, NamedKey};

const PUA_BASE: u32 = 0xE000;
const PUA_END: u32 = 0xF8FF;
/// Named keys occupy the low slots of the PUA band directly.
const NAMED_SLOTS: u32 = 0x100;
/// Above the named-key slots, chord combinations are tagged by modifier bits.
const CHORD_BASE: u32 = PUA_BASE + NAMED_SLOTS;

fn named_index(key: NamedKey) -> u32 {
    match key {
        NamedKey::Enter => 0,
        NamedKey::Esc => 1,
        NamedKey::Backspace => 2,
        NamedKey::Tab => 3,
        NamedKey::Up => 4,
        NamedKey::Down => 5,
        NamedKey::Left => 6,
        NamedKey::Right => 7,
        NamedKey::Home => 8,
        NamedKey::End => 9,
        NamedKey::PageUp => 10,
        NamedKey::PageDown => 11,
        NamedKey::Insert => 12,
        NamedKey::Delete => 13,
        NamedKey::F(n) => 32 + n as u32,
    }
}

fn index_to_named(idx: u32) -> Option<NamedKey> {
    Some(match idx {
        0 => NamedKey::Enter,
        1 => NamedKey::Esc,
        2 => NamedKey::Backspace,
        3 => NamedKey::Tab,
        4 => NamedKey::Up,
        5 => NamedKey::Down,
        6 => NamedKey::Left,
        7 => NamedKey::Right,
        8 => NamedKey::Home,
        9 => NamedKey::End,
        10 => NamedKey::PageUp,
        11 => NamedKey::PageDown,
        12 => NamedKey::Insert,
        13 => NamedKey::Delete,
        n if n >= 32 && n < NAMED_SLOTS => NamedKey::F((n - 32) as u8),
        _ => return None,
    })
}

/// A key observed by the trie: either an ordinary Unicode scalar typed by the
/// user, or a named/chorded key folded into the PUA tagging band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodedKey {
    Plain(char),
    Named(NamedKey),
    Chord { base: char, mods: ModMask },
}

/// Encode a `KeyToken` plus modifier mask into a single `char` for trie
/// consumption. Plain `Ctrl`+letter chords collapse onto the conventional
/// ASCII control-character codepoints (`Ctrl-d` -> `0x04`), matching how
/// terminals already report them and how vi-style sequences are written in
/// builtin tables; every other combination is tagged into the PUA band.
pub fn encode(token: &KeyToken, mods: ModMask) -> char {
    match token {
        KeyToken::Chord {
            base,
            mods: inner_mods,
        } => encode(base, mods | *inner_mods),
        KeyToken::Named(n) => {
            if mods.is_empty() {
                char::from_u32(PUA_BASE + named_index(*n)).unwrap_or('\u{FFFD}')
            } else {
                encode_chord_slot(PUA_BASE + named_index(*n), mods)
            }
        }
        KeyToken::Char(c) => {
            if mods.is_empty() {
                return *c;
            }
            if mods == ModMask::CTRL && c.is_ascii_alphabetic() {
                let upper = c.to_ascii_uppercase() as u8;
                return ((upper - b'A' + 1) as char);
            }
            encode_chord_slot(*c as u32, mods)
        }
    }
}

fn encode_chord_slot(base_code: u32, mods: ModMask) -> char {
    let slot = (base_code & 0xFF) | ((mods.bits() as u32) << 8);
    let code = CHORD_BASE + (slot % (PUA_END - CHORD_BASE));
    char::from_u32(code).unwrap_or('\u{FFFD}')
}

/// Best-effort inverse of [`encode`], used by the Suggestion Engine to render
/// human-readable labels and by tests. Chord slots are lossy (the low byte of
/// the original base code is recovered, not the exact char) and are reported
/// as `Chord` with that truncated base.
pub fn decode(c: char) -> DecodedKey {
    let v = c as u32;
    if v < PUA_BASE || v > PUA_END {
        return DecodedKey::Plain(c);
    }
    if v < CHORD_BASE {
        if let Some(named) = index_to_named(v - PUA_BASE) {
            return DecodedKey::Named(named);
        }
        return DecodedKey::Plain(c);
    }
    let slot = (v - CHORD_BASE) % (PUA_END - CHORD_BASE);
    let mods = ModMask::from_bits_truncate(((slot >> 8) & 0xFF) as u16);
    let base = char::from_u32(slot & 0xFF).unwrap_or('\u{FFFD}');
    DecodedKey::Chord { base, mods }
}

/// The encoded form of `NamedKey::Esc`, used by register cancellation and
/// leader-key checks. Not the raw `0x1b` control byte: `core-input` always
/// reports Esc as a named key (crossterm's `KeyCode::Esc`), so this has to
/// be the PUA-tagged encoding real input actually produces, i.e.
/// `encode(&KeyToken::Named(NamedKey::Esc), ModMask::empty())`. Spelled out
/// as a literal here (rather than computed) so it stays a `const`.
pub const ESC: char = '\u{E001}';
