//! Login family payload (0x0001 Login, 0x0002 LoginResponse)
//!
//! The layout is length-discriminated: optional trailing segments exist only
//! for specific payload lengths, and each length is a different hardware
//! revision. The branches below match exact lengths, never ranges.

use super::fields::{string_at, u8_at, u32_at};
use crate::error::{EvseError, Result};
use serde::{Deserialize, Serialize};

/// Shortest login payload: type, brand, model, hardware, power, current, hotline
pub const LOGIN_MIN_LEN: usize = 70;

/// Payload lengths that carry extended segments
pub const LOGIN_LEN_EXT_HOTLINE_70: usize = 118;
pub const LOGIN_LEN_EXT_HOTLINE_71: usize = 119;
pub const LOGIN_LEN_EXT_BRAND_MODEL: usize = 151;

/// Offset of the `p51` byte
pub const P51_OFFSET: usize = 70;

/// Protocol variants that carry `p51`
pub const P51_TYPES: [u8; 3] = [25, 9, 10];

/// How the `p51` presence check groups its conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum P51Guard {
    /// `len >= 71 && type in {25, 9, 10}`
    #[default]
    Strict,
    /// `(len >= 71 && type == 25) || type == 9 || type == 10`, as shipped in
    /// the first client. A 70-byte payload of type 9/10 has no byte at the
    /// offset and fails to decode rather than reading past the end.
    Legacy,
}

impl P51Guard {
    fn applies(self, len: usize, device_type: u8) -> bool {
        match self {
            P51Guard::Strict => len > P51_OFFSET && P51_TYPES.contains(&device_type),
            P51Guard::Legacy => {
                (len > P51_OFFSET && device_type == 25) || device_type == 9 || device_type == 10
            }
        }
    }
}

/// Static device description broadcast by the charger
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginInfo {
    /// Protocol variant discriminator
    pub device_type: u8,
    pub brand: String,
    pub model: String,
    pub hardware_version: String,
    /// Rated power in W
    pub max_power: u32,
    /// Rated current in A
    pub max_electricity: u8,
    pub hot_line: String,
    pub p51: u8,
}

impl LoginInfo {
    /// Decode a login payload; the caller has already checked `LOGIN_MIN_LEN`
    pub fn decode(buf: &[u8], guard: P51Guard) -> Result<Self> {
        if buf.len() < LOGIN_MIN_LEN {
            return Err(EvseError::malformed(format!(
                "Login payload needs {} bytes, got {}",
                LOGIN_MIN_LEN,
                buf.len()
            )));
        }

        let device_type = u8_at(buf, 0)?;
        let mut brand = string_at(buf, 1, 16)?;
        let mut model = string_at(buf, 17, 16)?;
        let hardware_version = string_at(buf, 33, 16)?;
        let max_power = u32_at(buf, 49)?;
        let max_electricity = u8_at(buf, 53)?;
        let mut hot_line = string_at(buf, 54, 16)?;

        match buf.len() {
            LOGIN_LEN_EXT_HOTLINE_70 => hot_line.push_str(&string_at(buf, 70, 48)?),
            LOGIN_LEN_EXT_HOTLINE_71 | LOGIN_LEN_EXT_BRAND_MODEL => {
                hot_line.push_str(&string_at(buf, 71, 48)?)
            }
            _ => {}
        }
        if buf.len() == LOGIN_LEN_EXT_BRAND_MODEL {
            brand.push_str(&string_at(buf, 119, 16)?);
            model.push_str(&string_at(buf, 135, 16)?);
        }

        let p51 = if guard.applies(buf.len(), device_type) {
            u8_at(buf, P51_OFFSET)?
        } else {
            0
        };

        Ok(Self {
            device_type,
            brand,
            model,
            hardware_version,
            max_power,
            max_electricity,
            hot_line,
            p51,
        })
    }
}
