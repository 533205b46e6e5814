//! Charge start/stop commands (0x8007 / 0x8008) and their confirmations

use super::fields::{put_string, string_at, u8_at, u16_at, u32_at};
use crate::error::{EvseError, Result};
use serde::{Deserialize, Serialize};

pub const CHARGE_START_LEN: usize = 47;

/// Supported output current range of the observed hardware family
pub const MIN_AMPS: u8 = 6;
pub const MAX_AMPS: u8 = 32;

/// Caller-facing parameters of a charge start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeStartParams {
    pub max_amps: u8,
    /// Requested single-phase charging. No known wire field carries it.
    pub single_phase: bool,
}

impl ChargeStartParams {
    pub fn new(max_amps: u8) -> Self {
        Self {
            max_amps,
            single_phase: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_amps("max_amps", self.max_amps)
    }
}

pub fn validate_amps(field: &str, amps: u8) -> Result<()> {
    if !(MIN_AMPS..=MAX_AMPS).contains(&amps) {
        return Err(EvseError::invalid_parameter(
            field,
            format!("{} A is outside {}..={} A", amps, MIN_AMPS, MAX_AMPS),
        ));
    }
    Ok(())
}

/// 0x8007 payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeStartRequest {
    pub line_id: u8,
    pub user_id: String,
    pub charge_id: String,
    /// Epoch seconds, 0 for an immediate start
    pub reservation_date: u32,
    pub start_type: u8,
    pub charge_type: u8,
    /// 0xFFFF = unlimited
    pub max_duration_minutes: u16,
    /// Hundredths of kWh, 0xFFFF = unlimited
    pub max_energy: u16,
    pub param3: u16,
    pub max_amps: u8,
}

impl ChargeStartRequest {
    pub fn new(user_id: &str, charge_id: &str, max_amps: u8) -> Self {
        Self {
            line_id: 1,
            user_id: user_id.to_string(),
            charge_id: charge_id.to_string(),
            reservation_date: 0,
            start_type: 1,
            charge_type: 1,
            max_duration_minutes: u16::MAX,
            max_energy: u16::MAX,
            param3: u16::MAX,
            max_amps,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; CHARGE_START_LEN];
        buf[0] = self.line_id;
        put_string(&mut buf, 1, 16, &self.user_id);
        put_string(&mut buf, 17, 16, &self.charge_id);
        buf[33] = u8::from(self.reservation_date != 0);
        buf[34..38].copy_from_slice(&self.reservation_date.to_be_bytes());
        buf[38] = self.start_type;
        buf[39] = self.charge_type;
        buf[40..42].copy_from_slice(&self.max_duration_minutes.to_be_bytes());
        buf[42..44].copy_from_slice(&self.max_energy.to_be_bytes());
        buf[44..46].copy_from_slice(&self.param3.to_be_bytes());
        buf[46] = self.max_amps;
        buf
    }

    /// Parse a captured request, used by replay and dumps
    pub fn decode(buf: &[u8]) -> Result<Self> {
        Ok(Self {
            line_id: u8_at(buf, 0)?,
            user_id: string_at(buf, 1, 16)?,
            charge_id: string_at(buf, 17, 16)?,
            reservation_date: u32_at(buf, 34)?,
            start_type: u8_at(buf, 38)?,
            charge_type: u8_at(buf, 39)?,
            max_duration_minutes: u16_at(buf, 40)?,
            max_energy: u16_at(buf, 42)?,
            param3: u16_at(buf, 44)?,
            max_amps: u8_at(buf, 46)?,
        })
    }
}

/// Generate a 16 character charge id
pub fn new_charge_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(16);
    id
}

/// Confirmation of a start or stop (0x0007 / 0x0008)
///
/// Firmware sends varying bodies; the line id is kept when present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeAck {
    pub line_id: Option<u8>,
    pub body: Vec<u8>,
}

impl ChargeAck {
    pub fn decode(buf: &[u8]) -> Result<Self> {
        Ok(Self {
            line_id: u8_at(buf, 0).ok(),
            body: buf.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amps_range_is_inclusive() {
        for amps in [6, 16, 32] {
            assert!(ChargeStartParams::new(amps).validate().is_ok());
        }
        for amps in [0, 5, 33, 255] {
            let err = ChargeStartParams::new(amps).validate().unwrap_err();
            assert!(matches!(err, EvseError::InvalidParameter { .. }));
        }
    }

    #[test]
    fn test_charge_start_layout() {
        let req = ChargeStartRequest::new("emmgr", "0123456789abcdef", 16);
        let buf = req.encode();
        assert_eq!(buf.len(), CHARGE_START_LEN);
        assert_eq!(buf[0], 1);
        assert_eq!(string_at(&buf, 1, 16).unwrap(), "emmgr");
        assert_eq!(string_at(&buf, 17, 16).unwrap(), "0123456789abcdef");
        assert_eq!(buf[33], 0);
        assert_eq!(u32_at(&buf, 34).unwrap(), 0);
        assert_eq!(buf[38], 1);
        assert_eq!(buf[39], 1);
        assert_eq!(u16_at(&buf, 40).unwrap(), 0xFFFF);
        assert_eq!(u16_at(&buf, 42).unwrap(), 0xFFFF);
        assert_eq!(u16_at(&buf, 44).unwrap(), 0xFFFF);
        assert_eq!(buf[46], 16);
    }

    #[test]
    fn test_request_parses_back() {
        let req = ChargeStartRequest::new("emmgr", "abc", 32);
        assert_eq!(ChargeStartRequest::decode(&req.encode()).unwrap(), req);
        assert!(ChargeStartRequest::decode(&req.encode()[..46]).is_err());
    }

    #[test]
    fn test_oversized_ids_are_truncated() {
        let req = ChargeStartRequest::new("a-very-long-user-identifier", "x", 6);
        let buf = req.encode();
        assert_eq!(string_at(&buf, 1, 16).unwrap(), "a-very-long-user");
        assert_eq!(buf.len(), CHARGE_START_LEN);
    }

    #[test]
    fn test_charge_id_shape() {
        let id = new_charge_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
