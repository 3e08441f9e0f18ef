//! Checksummed sentence codec for the text-oriented instrument protocols.
//!
//! A sentence travels on the wire as
//!
//! ```text
//! $<payload>*<HH>\r\n
//! ```
//!
//! where `<payload>` is 1 to 79 printable ASCII bytes (0x20..=0x7E) and
//! `<HH>` is the XOR of all payload bytes rendered as two uppercase hex
//! digits. A checksum mismatch is a protocol violation, never data to
//! interpret.

use crate::error::{Error, Result};

/// Maximum payload length in bytes.
pub const MAX_PAYLOAD: usize = 79;

/// XOR checksum over the payload bytes.
#[must_use]
pub fn checksum(payload: &str) -> u8 {
    payload.bytes().fold(0, |acc, b| acc ^ b)
}

fn printable(b: u8) -> bool {
    (0x20..=0x7e).contains(&b)
}

/// Render `payload` as a framed sentence.
///
/// Fails for an empty payload, a payload longer than [`MAX_PAYLOAD`], or
/// any byte outside the printable range.
pub fn encode(payload: &str) -> Result<Vec<u8>> {
    if payload.is_empty() {
        return Err(Error::Encode("empty payload".into()));
    }
    if payload.len() > MAX_PAYLOAD {
        return Err(Error::Encode(format!(
            "payload too long ({} > {MAX_PAYLOAD} bytes)",
            payload.len()
        )));
    }
    if let Some(b) = payload.bytes().find(|&b| !printable(b)) {
        return Err(Error::Encode(format!("unprintable byte {b:#04x} in payload")));
    }
    Ok(format!("${payload}*{:02X}\r\n", checksum(payload)).into_bytes())
}

/// Extract and verify the payload of a framed sentence.
///
/// The hex digits of the embedded checksum may be either case; everything
/// else is matched byte for byte, including the trailing `\r\n`.
pub fn decode(line: &str) -> Result<String> {
    let err = || Error::Decode(format!("malformed sentence {line:?}"));

    if !line.is_ascii() {
        return Err(err());
    }
    let body = line
        .strip_prefix('$')
        .and_then(|s| s.strip_suffix("\r\n"))
        .ok_or_else(err)?;
    // body = <payload>*<HH>; the payload itself may contain '*'
    if body.len() < 4 {
        return Err(err());
    }
    let (payload, tail) = body.split_at(body.len() - 3);
    let hex = tail.strip_prefix('*').ok_or_else(err)?;
    if payload.is_empty()
        || payload.len() > MAX_PAYLOAD
        || payload.bytes().any(|b| !printable(b))
    {
        return Err(err());
    }
    let expected = u8::from_str_radix(hex, 16).map_err(|_| err())?;
    let actual = checksum(payload);
    if actual != expected {
        return Err(Error::Decode(format!(
            "checksum mismatch in {line:?}: expected {expected:02X}, computed {actual:02X}"
        )));
    }
    Ok(payload.to_string())
}
