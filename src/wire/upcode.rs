//! Upcodes encoding & decoding for the Yate Engine external module protocol.
//!
//! ## Format of strings and `%`-based encoding
//!
//! Any value that contains special characters (ASCII `<32`)
//! MUST have them converted to `%<upcode>` where `<upcode>` is the character
//! with a numeric value equal with `64 + original ASCII code`.
//!
//! The `%` character itself MUST be converted to a special `%%` representation.
//! Characters with codes `>=32` (except `%`) SHOULD not be escaped but may be so.
//!
//! A `%`-escaped code may be received instead of an unescaped character anywhere
//! except in the initial keyword or the delimiting colon (`:`) characters.
//!
//! Anywhere in the line except the initial keyword,
//! a `%` character not followed by a character with
//! a numeric value `>64` (`40H`, `0x40`, `'@'`)
//! or another `%` is an error.
//!
//! _see <https://docs.yate.ro/wiki/External_module_command_flow#Format_of_commands_and_notifications>_.

use std::borrow::Cow;

use thiserror::Error;

/// An error that may occur while decoding `%`-encoded strings.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The escape referenced a code point outside of the valid range.
    #[error("invalid upcode `{0}`, not in 64..=127 range")]
    InvalidUpcode(char),

    /// The string ended in the middle of a `%`-escape.
    #[error("truncated `%`-escape at end of string")]
    TruncatedEscape,
}

fn updecode(ch: char) -> Result<char, DecodeError> {
    if ch == '%' {
        Ok(ch)
    } else {
        match u8::try_from(ch) {
            Ok(code @ 64..=127) => Ok(char::from(code - 64)),
            _ => Err(DecodeError::InvalidUpcode(ch)),
        }
    }
}

/// Decode a `%`-encoded string in the context of value parsing.
pub fn decode(value: &str) -> Result<Cow<'_, str>, DecodeError> {
    if !value.contains('%') {
        return Ok(value.into());
    }

    let mut decoded = String::with_capacity(value.len());
    let mut decoding = false;
    for ch in value.chars() {
        if decoding {
            decoding = false;
            decoded.push(updecode(ch)?);
        } else if ch == '%' {
            decoding = true;
        } else {
            decoded.push(ch);
        }
    }

    if decoding {
        return Err(DecodeError::TruncatedEscape);
    }

    Ok(decoded.into())
}

fn upencode(ch: char) -> char {
    if ch == '%' {
        ch
    } else {
        char::from(ch as u8 + 64)
    }
}

fn encode_with(value: &str, pred: impl Fn(&char) -> bool) -> Cow<'_, str> {
    let encodable = value.chars().filter(&pred).count();

    if encodable == 0 {
        return value.into();
    }

    let mut encoded = String::with_capacity(value.len() + encodable);
    for ch in value.chars() {
        if pred(&ch) {
            encoded.push('%');
            encoded.push(upencode(ch))
        } else {
            encoded.push(ch);
        }
    }

    encoded.into()
}

/// Encode a `%`-encoded string in the context of value encoding.
pub fn encode(value: &str) -> Cow<'_, str> {
    encode_with(value, |ch| (*ch as u32) < 32 || matches!(ch, '%' | ':'))
}

/// Encode a `%`-encoded string in the context of a key-value pair,
/// where the `=` separator must be escaped as well.
pub fn encode_param(value: &str) -> Cow<'_, str> {
    encode_with(value, |ch| {
        (*ch as u32) < 32 || matches!(ch, '%' | ':' | '=')
    })
}
