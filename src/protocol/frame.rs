//! Frame encoding and decoding

use super::fields::{checksum, decode_string, from_hex, put_string, slice_at, to_hex, u16_at, u8_at};
use super::payload::Payload;
use super::registry;
use super::{
    DecodeOptions, FRAME_OVERHEAD, PACKET_HEADER, PACKET_TAIL, PASSWORD_LEN, PAYLOAD_OFFSET,
    SERIAL_LEN,
};
use crate::error::{EvseError, Result};
use serde::{Deserialize, Serialize};

/// One decoded protocol message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datagram {
    pub command: u16,
    pub key_type: u8,
    /// 16 lowercase hex characters; `None` for an all-zero serial field
    pub serial: Option<String>,
    /// `None` for an all-zero password field
    pub password: Option<String>,
    pub payload: Payload,
    /// Full frame bytes as received or sent
    #[serde(skip)]
    pub raw: Vec<u8>,
}

impl Datagram {
    /// Outbound datagram for `serial`; `raw` is filled by `encode`
    pub fn new(serial: &str, payload: Payload) -> Self {
        Self {
            command: payload.code(),
            key_type: 0,
            serial: Some(serial.to_string()),
            password: None,
            payload,
            raw: Vec::new(),
        }
    }

    pub fn with_password(mut self, password: Option<&str>) -> Self {
        self.password = password.map(str::to_string);
        self
    }

    /// Decode a single frame using default options
    pub fn decode(buf: &[u8]) -> Result<Self> {
        Self::decode_with(buf, &DecodeOptions::default())
    }

    /// Decode a single frame; bytes after the declared length are ignored
    pub fn decode_with(buf: &[u8], options: &DecodeOptions) -> Result<Self> {
        if buf.len() < FRAME_OVERHEAD {
            return Err(EvseError::malformed(format!(
                "Frame needs at least {} bytes, got {}",
                FRAME_OVERHEAD,
                buf.len()
            )));
        }
        let header = u16_at(buf, 0)?;
        if header != PACKET_HEADER {
            return Err(EvseError::malformed(format!(
                "Bad magic header {:#06x}",
                header
            )));
        }
        let len = usize::from(u16_at(buf, 2)?);
        if len < FRAME_OVERHEAD || len > buf.len() {
            return Err(EvseError::malformed(format!(
                "Declared length {} outside {}..={}",
                len,
                FRAME_OVERHEAD,
                buf.len()
            )));
        }
        let frame = &buf[..len];

        let expected = u16_at(frame, len - 4)?;
        let computed = checksum(&frame[..len - 4]);
        if expected != computed {
            return Err(EvseError::malformed(format!(
                "Checksum mismatch: frame says {:#06x}, computed {:#06x}",
                expected, computed
            )));
        }

        let serial_bytes = slice_at(frame, 5, SERIAL_LEN)?;
        let serial = serial_bytes
            .iter()
            .any(|&b| b != 0)
            .then(|| to_hex(serial_bytes));

        let password_bytes = slice_at(frame, 13, PASSWORD_LEN)?;
        let password = password_bytes
            .iter()
            .any(|&b| b != 0)
            .then(|| decode_string(password_bytes));

        let command = u16_at(frame, 19)?;
        let body = slice_at(frame, PAYLOAD_OFFSET, len - FRAME_OVERHEAD)?;
        let payload = registry::unpack(command, body, options)?;

        Ok(Self {
            command,
            key_type: u8_at(frame, 4)?,
            serial,
            password,
            payload,
            raw: frame.to_vec(),
        })
    }

    /// Encode to wire bytes
    pub fn encode(&self) -> Vec<u8> {
        encode_frame(
            self.command,
            self.key_type,
            self.serial.as_deref(),
            self.password.as_deref(),
            &registry::pack(&self.payload),
        )
    }

    /// Name of the command for logs
    pub fn name(&self) -> &'static str {
        registry::lookup(self.command).map_or("Unknown", |d| d.name)
    }
}

/// Build a frame around an already packed payload
///
/// Invalid serial hex leaves the serial field zeroed; passwords are cut to
/// six bytes.
pub fn encode_frame(
    command: u16,
    key_type: u8,
    serial: Option<&str>,
    password: Option<&str>,
    payload: &[u8],
) -> Vec<u8> {
    let len = FRAME_OVERHEAD + payload.len();
    let mut buf = vec![0u8; len];
    buf[0..2].copy_from_slice(&PACKET_HEADER.to_be_bytes());
    buf[2..4].copy_from_slice(&u16::try_from(len).unwrap_or(u16::MAX).to_be_bytes());
    buf[4] = key_type;
    if let Some(bytes) = serial.and_then(|s| from_hex(s).ok()) {
        let n = bytes.len().min(SERIAL_LEN);
        buf[5..5 + n].copy_from_slice(&bytes[..n]);
    }
    if let Some(password) = password {
        put_string(&mut buf, 13, PASSWORD_LEN, password);
    }
    buf[19..21].copy_from_slice(&command.to_be_bytes());
    buf[PAYLOAD_OFFSET..PAYLOAD_OFFSET + payload.len()].copy_from_slice(payload);
    let sum = checksum(&buf[..len - 4]);
    buf[len - 4..len - 2].copy_from_slice(&sum.to_be_bytes());
    buf[len - 2..].copy_from_slice(&PACKET_TAIL.to_be_bytes());
    buf
}

/// Split a UDP packet into frames
///
/// Decoding stops at the first frame that fails; that error is the last
/// element and everything decoded before it is kept.
pub fn decode_packet(buf: &[u8], options: &DecodeOptions) -> Vec<Result<Datagram>> {
    let mut out = Vec::new();
    let mut offset = 0;
    while offset < buf.len() {
        let rest = &buf[offset..];
        match Datagram::decode_with(rest, options) {
            Ok(datagram) => {
                offset += datagram.raw.len();
                out.push(Ok(datagram));
            }
            Err(e) => {
                out.push(Err(e));
                break;
            }
        }
    }
    out
}

/// Normalise a user supplied serial to 16 lowercase hex characters
pub fn parse_serial(text: &str) -> Result<String> {
    let serial = text.trim().to_ascii_lowercase();
    if serial.len() != SERIAL_LEN * 2 || !serial.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(EvseError::invalid_parameter(
            "serial",
            format!("Expected {} hex digits, got {:?}", SERIAL_LEN * 2, text),
        ));
    }
    Ok(serial)
}
