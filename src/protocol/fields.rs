//! Bounds-checked field readers and writers for EmProto payloads
//!
//! Every reader returns `MalformedDatagram` instead of indexing past the end
//! of the buffer. Writers never fail: strings are truncated to the field
//! width and zero padded.

use crate::error::{EvseError, Result};

/// Read a single byte
pub fn u8_at(buf: &[u8], offset: usize) -> Result<u8> {
    buf.get(offset).copied().ok_or_else(|| {
        EvseError::malformed(format!(
            "Need 1 byte at offset {}, buffer has {}",
            offset,
            buf.len()
        ))
    })
}

/// Read a big-endian u16
pub fn u16_at(buf: &[u8], offset: usize) -> Result<u16> {
    let bytes = slice_at(buf, offset, 2)?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Read a big-endian u32
pub fn u32_at(buf: &[u8], offset: usize) -> Result<u32> {
    let bytes = slice_at(buf, offset, 4)?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Borrow `len` bytes starting at `offset`
pub fn slice_at(buf: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    offset
        .checked_add(len)
        .and_then(|end| buf.get(offset..end))
        .ok_or_else(|| {
            EvseError::malformed(format!(
                "Need {} bytes at offset {}, buffer has {}",
                len,
                offset,
                buf.len()
            ))
        })
}

/// Decode a fixed-width text field
///
/// The field ends at the first NUL; non-ASCII bytes are dropped and
/// trailing space padding is trimmed. Leading spaces are kept, extension
/// fields rely on them as separators.
pub fn string_at(buf: &[u8], offset: usize, len: usize) -> Result<String> {
    Ok(decode_string(slice_at(buf, offset, len)?))
}

pub fn decode_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    let text: String = bytes[..end]
        .iter()
        .filter(|b| b.is_ascii())
        .map(|&b| b as char)
        .collect();
    text.trim_end().to_string()
}

/// Write `value` into a fixed-width field, truncating and zero padding
pub fn put_string(buf: &mut [u8], offset: usize, len: usize, value: &str) {
    let Some(field) = buf.get_mut(offset..offset + len) else {
        return;
    };
    field.fill(0);
    let bytes = value.as_bytes();
    let n = bytes.len().min(len);
    field[..n].copy_from_slice(&bytes[..n]);
}

/// Temperatures are sent as `(°C * 100) + 20000`; 0xFFFF means no sensor
pub fn decode_temperature(raw: u16) -> Option<f64> {
    if raw == 0xFFFF {
        return None;
    }
    Some(((f64::from(raw) - 20000.0) * 0.01 * 100.0).round() / 100.0)
}

/// Frame checksum: byte sum modulo 0xFFFF
pub fn checksum(bytes: &[u8]) -> u16 {
    let sum: u64 = bytes.iter().map(|&b| u64::from(b)).sum();
    (sum % 0xFFFF) as u16
}

/// Lowercase hex rendering used for serials and dumps
pub fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// Parse an even-length hex string
pub fn from_hex(text: &str) -> Result<Vec<u8>> {
    if text.len() % 2 != 0 {
        return Err(EvseError::invalid_parameter(
            "hex",
            format!("Odd number of hex digits in {:?}", text),
        ));
    }
    (0..text.len())
        .step_by(2)
        .map(|i| {
            text.get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| {
                    EvseError::invalid_parameter("hex", format!("Invalid hex digits in {:?}", text))
                })
        })
        .collect()
}
