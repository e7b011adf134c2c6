//! Java "modified UTF-8" as produced by `DataOutput.writeUTF`
//!
//! Differences from standard UTF-8: U+0000 is written as the two-byte
//! sequence `C0 80`, and characters outside the BMP are written as a UTF-16
//! surrogate pair with each half encoded in three bytes.

use crate::error::{WireError, WireResult};
use crate::protocol::MAX_UTF_LEN;

/// Encoded length of `s` without the u16 prefix.
pub fn encoded_len(s: &str) -> usize {
    s.encode_utf16()
        .map(|u| match u {
            0x0001..=0x007F => 1,
            0x0000 | 0x0080..=0x07FF => 2,
            _ => 3,
        })
        .sum()
}

/// Encode `s`; fails if the result would not fit a u16 length prefix.
pub fn encode(s: &str) -> WireResult<Vec<u8>> {
    let len = encoded_len(s);
    if len > MAX_UTF_LEN {
        return Err(WireError::StringTooLong { len });
    }
    let mut out = Vec::with_capacity(len);
    for u in s.encode_utf16() {
        match u {
            0x0001..=0x007F => out.push(u as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | ((u >> 6) & 0x1F) as u8);
                out.push(0x80 | (u & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | ((u >> 12) & 0x0F) as u8);
                out.push(0x80 | ((u >> 6) & 0x3F) as u8);
                out.push(0x80 | (u & 0x3F) as u8);
            }
        }
    }
    Ok(out)
}

fn malformed(reason: impl Into<String>) -> WireError {
    WireError::MalformedUtf {
        reason: reason.into(),
    }
}

fn continuation(bytes: &[u8], at: usize) -> WireResult<u16> {
    match bytes.get(at) {
        Some(&b) if b & 0xC0 == 0x80 => Ok((b & 0x3F) as u16),
        Some(&b) => Err(malformed(format!("bad continuation byte {:#04x} at {}", b, at))),
        None => Err(malformed("partial character at end of input")),
    }
}

/// Decode modified UTF-8 into a Rust string.
///
/// Unpaired surrogates are accepted by Java but cannot live in a `String`,
/// so they are reported as malformed.
pub fn decode(bytes: &[u8]) -> WireResult<String> {
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match b >> 4 {
            0x0..=0x7 => {
                units.push(b as u16);
                i += 1;
            }
            0xC | 0xD => {
                let c1 = continuation(bytes, i + 1)?;
                units.push((((b & 0x1F) as u16) << 6) | c1);
                i += 2;
            }
            0xE => {
                let c1 = continuation(bytes, i + 1)?;
                let c2 = continuation(bytes, i + 2)?;
                units.push((((b & 0x0F) as u16) << 12) | (c1 << 6) | c2);
                i += 3;
            }
            _ => return Err(malformed(format!("bad lead byte {:#04x} at {}", b, i))),
        }
    }
    String::from_utf16(&units).map_err(|_| malformed("unpaired surrogate"))
}
