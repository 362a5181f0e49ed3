//! Carbon virtual key codes and modifier masks
//!
//! The hotkey binding is persisted in the same numeric form the macOS event
//! APIs report, so these tables are shared by the preference store, the
//! keyboard policy and the global hotkey provider.

use thiserror::Error;

/// Carbon modifier bits (`cmdKey`, `shiftKey`, `optionKey`, `controlKey`)
pub mod modifiers {
    pub const CMD: u32 = 0x0100;
    pub const SHIFT: u32 = 0x0200;
    pub const OPTION: u32 = 0x0800;
    pub const CONTROL: u32 = 0x1000;
}

pub const KEY_A: u32 = 0x00;
pub const KEY_X: u32 = 0x07;
pub const KEY_C: u32 = 0x08;
pub const KEY_V: u32 = 0x09;
pub const KEY_Z: u32 = 0x06;
pub const KEY_Q: u32 = 0x0C;
pub const KEY_E: u32 = 0x0E;
pub const KEY_Y: u32 = 0x10;
pub const KEY_RETURN: u32 = 0x24;
pub const KEY_TAB: u32 = 0x30;
pub const KEY_SPACE: u32 = 0x31;
pub const KEY_DELETE: u32 = 0x33;
pub const KEY_ESCAPE: u32 = 0x35;

const LETTERS: [(u32, char); 26] = [
    (0x00, 'A'),
    (0x0B, 'B'),
    (0x08, 'C'),
    (0x02, 'D'),
    (0x0E, 'E'),
    (0x03, 'F'),
    (0x05, 'G'),
    (0x04, 'H'),
    (0x22, 'I'),
    (0x26, 'J'),
    (0x28, 'K'),
    (0x25, 'L'),
    (0x2E, 'M'),
    (0x2D, 'N'),
    (0x1F, 'O'),
    (0x23, 'P'),
    (0x0C, 'Q'),
    (0x0F, 'R'),
    (0x01, 'S'),
    (0x11, 'T'),
    (0x20, 'U'),
    (0x09, 'V'),
    (0x0D, 'W'),
    (0x07, 'X'),
    (0x10, 'Y'),
    (0x06, 'Z'),
];

const DIGITS: [(u32, char); 10] = [
    (0x1D, '0'),
    (0x12, '1'),
    (0x13, '2'),
    (0x14, '3'),
    (0x15, '4'),
    (0x17, '5'),
    (0x16, '6'),
    (0x1A, '7'),
    (0x1C, '8'),
    (0x19, '9'),
];

// F1..F20 are not contiguous in the Carbon table
const FUNCTION_KEYS: [u32; 20] = [
    0x7A, 0x78, 0x63, 0x76, 0x60, 0x61, 0x62, 0x64, 0x65, 0x6D, 0x67, 0x6F, 0x69, 0x6B, 0x71,
    0x6A, 0x40, 0x4F, 0x50, 0x5A,
];

pub fn key_code_to_letter(key_code: u32) -> Option<char> {
    LETTERS
        .iter()
        .find(|(code, _)| *code == key_code)
        .map(|(_, c)| *c)
}

pub fn letter_to_key_code(letter: char) -> Option<u32> {
    let upper = letter.to_ascii_uppercase();
    LETTERS
        .iter()
        .find(|(_, c)| *c == upper)
        .map(|(code, _)| *code)
}

pub fn key_code_to_digit(key_code: u32) -> Option<char> {
    DIGITS
        .iter()
        .find(|(code, _)| *code == key_code)
        .map(|(_, c)| *c)
}

/// 1-based function key number for a key code
pub fn function_key_number(key_code: u32) -> Option<u8> {
    FUNCTION_KEYS
        .iter()
        .position(|code| *code == key_code)
        .map(|i| i as u8 + 1)
}

fn key_glyph(key_code: u32) -> String {
    if let Some(c) = key_code_to_letter(key_code).or_else(|| key_code_to_digit(key_code)) {
        return c.to_string();
    }
    if let Some(n) = function_key_number(key_code) {
        return format!("F{}", n);
    }
    match key_code {
        KEY_ESCAPE => "⎋".to_string(),
        KEY_SPACE => "Space".to_string(),
        KEY_RETURN => "↩".to_string(),
        KEY_TAB => "⇥".to_string(),
        KEY_DELETE => "⌫".to_string(),
        _ => "Key".to_string(),
    }
}

/// Human-readable shortcut, e.g. `⌘E` or `⌃⇧F5`
pub fn display_string(key_code: u32, mods: u32) -> String {
    let mut out = String::new();
    if mods & modifiers::CONTROL != 0 {
        out.push('⌃');
    }
    if mods & modifiers::OPTION != 0 {
        out.push('⌥');
    }
    if mods & modifiers::SHIFT != 0 {
        out.push('⇧');
    }
    if mods & modifiers::CMD != 0 {
        out.push('⌘');
    }
    out.push_str(&key_glyph(key_code));
    out
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyParseError {
    #[error("empty shortcut")]
    Empty,
    #[error("unknown modifier `{0}`")]
    UnknownModifier(String),
    #[error("unknown key `{0}`")]
    UnknownKey(String),
    #[error("shortcut needs at least one modifier")]
    NoModifier,
}

fn parse_key(name: &str) -> Option<u32> {
    let upper = name.to_ascii_uppercase();
    match upper.as_str() {
        "ESC" | "ESCAPE" => return Some(KEY_ESCAPE),
        "SPACE" => return Some(KEY_SPACE),
        "RETURN" | "ENTER" => return Some(KEY_RETURN),
        "TAB" => return Some(KEY_TAB),
        "DELETE" | "BACKSPACE" => return Some(KEY_DELETE),
        _ => {}
    }
    if let Some(n) = upper.strip_prefix('F').and_then(|n| n.parse::<usize>().ok()) {
        return n.checked_sub(1).and_then(|i| FUNCTION_KEYS.get(i)).copied();
    }
    let mut chars = upper.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_digit() => {
            DIGITS.iter().find(|(_, d)| *d == c).map(|(code, _)| *code)
        }
        (Some(c), None) => letter_to_key_code(c),
        _ => None,
    }
}

/// Parse a shortcut such as `cmd+shift+e` into `(key_code, modifiers)`.
/// Function keys may stand alone; everything else needs a modifier.
pub fn parse_shortcut(text: &str) -> Result<(u32, u32), KeyParseError> {
    let parts: Vec<&str> = text
        .split('+')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    let (key, mods) = parts.split_last().ok_or(KeyParseError::Empty)?;

    let mut mask = 0;
    for m in mods {
        mask |= match m.to_ascii_lowercase().as_str() {
            "cmd" | "command" | "super" => modifiers::CMD,
            "shift" => modifiers::SHIFT,
            "opt" | "option" | "alt" => modifiers::OPTION,
            "ctrl" | "control" => modifiers::CONTROL,
            _ => return Err(KeyParseError::UnknownModifier(m.to_string())),
        };
    }

    let code = parse_key(key).ok_or_else(|| KeyParseError::UnknownKey(key.to_string()))?;
    if mask == 0 && function_key_number(code).is_none() {
        return Err(KeyParseError::NoModifier);
    }
    Ok((code, mask))
}
