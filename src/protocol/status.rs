//! Live status payloads pushed by the charger
//!
//! - 0x0004 SingleACStatus: electrical readings, temperatures, fault bits
//! - 0x0005 SingleACChargingStatus: the running charge session
//! - 0x0009 CurrentChargeRecord: summary of the current/last charge

use super::fields::{decode_temperature, string_at, u8_at, u16_at, u32_at};
use crate::error::Result;
use serde::{Deserialize, Serialize};

pub const AC_STATUS_MIN_LEN: usize = 25;
pub const AC_STATUS_THREE_PHASE_LEN: usize = 33;
pub const CHARGING_STATUS_MIN_LEN: usize = 74;
pub const CHARGE_RECORD_MIN_LEN: usize = 97;

/// u16 parameters use 0xFFFF for "not limited"
const UNSET_U16: u16 = 0xFFFF;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AcStatus {
    pub line_id: u8,
    /// V
    pub l1_voltage: f64,
    /// A
    pub l1_current: f64,
    /// W
    pub current_power: u32,
    /// kWh meter reading
    pub total_kwh: f64,
    pub inner_temp: Option<f64>,
    pub outer_temp: Option<f64>,
    pub emergency_btn_state: u8,
    pub gun_state: u8,
    pub output_state: u8,
    pub current_state: u8,
    /// Indices of the set bits in the 32-bit error field
    pub errors: Vec<u8>,
    pub l2_voltage: f64,
    pub l2_current: f64,
    pub l3_voltage: f64,
    pub l3_current: f64,
}

impl AcStatus {
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let error_bits = u32_at(buf, 21)?;
        let mut status = Self {
            line_id: u8_at(buf, 0)?,
            l1_voltage: f64::from(u16_at(buf, 1)?) * 0.1,
            l1_current: f64::from(u16_at(buf, 3)?) * 0.01,
            current_power: u32_at(buf, 5)?,
            total_kwh: f64::from(u32_at(buf, 9)?) * 0.01,
            inner_temp: decode_temperature(u16_at(buf, 13)?),
            outer_temp: decode_temperature(u16_at(buf, 15)?),
            emergency_btn_state: u8_at(buf, 17)?,
            gun_state: u8_at(buf, 18)?,
            output_state: u8_at(buf, 19)?,
            current_state: u8_at(buf, 20)?,
            errors: (0..32u8).filter(|i| error_bits & (1 << i) != 0).collect(),
            ..Default::default()
        };

        if buf.len() >= AC_STATUS_THREE_PHASE_LEN {
            status.l2_voltage = f64::from(u16_at(buf, 25)?) * 0.1;
            status.l2_current = f64::from(u16_at(buf, 27)?) * 0.01;
            status.l3_voltage = f64::from(u16_at(buf, 29)?) * 0.1;
            status.l3_current = f64::from(u16_at(buf, 31)?) * 0.01;
        }
        Ok(status)
    }

    pub fn has_fault(&self) -> bool {
        !self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChargingStatus {
    pub port: u8,
    /// 13 = finished, 14 = charging, 18/19 = extended states
    pub current_state: u8,
    pub charge_id: String,
    pub start_type: u8,
    pub charge_type: u8,
    pub max_duration_minutes: Option<u16>,
    pub max_energy_kwh: Option<f64>,
    pub charge_param3: Option<f64>,
    pub reservation_date: u32,
    pub user_id: String,
    pub max_electricity: u8,
    pub start_date: u32,
    pub duration_seconds: u32,
    pub start_kwh_counter: f64,
    pub current_kwh_counter: f64,
    pub charge_kwh: f64,
    pub charge_price: f64,
    pub fee_type: u8,
    pub charge_fee: f64,
}

impl ChargingStatus {
    pub fn decode(buf: &[u8]) -> Result<Self> {
        // Newer firmware reports states 18/19 in a trailing byte
        let current_state = match buf.get(CHARGING_STATUS_MIN_LEN) {
            Some(&s) if buf.len() > CHARGING_STATUS_MIN_LEN && (s == 18 || s == 19) => s,
            _ => u8_at(buf, 1)?,
        };

        let optional = |raw: u16| (raw != UNSET_U16).then_some(raw);

        Ok(Self {
            port: u8_at(buf, 0)?,
            current_state,
            charge_id: string_at(buf, 2, 16)?,
            start_type: u8_at(buf, 18)?,
            charge_type: u8_at(buf, 19)?,
            max_duration_minutes: optional(u16_at(buf, 20)?),
            max_energy_kwh: optional(u16_at(buf, 22)?).map(|v| f64::from(v) * 0.01),
            charge_param3: optional(u16_at(buf, 24)?).map(|v| f64::from(v) * 0.01),
            reservation_date: u32_at(buf, 26)?,
            user_id: string_at(buf, 30, 16)?,
            max_electricity: u8_at(buf, 46)?,
            start_date: u32_at(buf, 47)?,
            duration_seconds: u32_at(buf, 51)?,
            start_kwh_counter: f64::from(u32_at(buf, 55)?) * 0.01,
            current_kwh_counter: f64::from(u32_at(buf, 59)?) * 0.01,
            charge_kwh: f64::from(u32_at(buf, 63)?) * 0.01,
            charge_price: f64::from(u32_at(buf, 67)?) * 0.01,
            fee_type: u8_at(buf, 71)?,
            charge_fee: f64::from(u16_at(buf, 72)?) * 0.01,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChargeRecord {
    pub line_id: u8,
    pub start_user_id: String,
    pub end_user_id: String,
    pub charge_id: String,
    pub has_reservation: u8,
    pub start_type: u8,
    pub charge_type: u8,
    pub charge_param1: u16,
    pub charge_param2: f64,
    pub charge_param3: f64,
    pub stop_reason: u8,
    pub has_stop_charge: u8,
    pub reservation_date: u32,
    pub start_date: u32,
    pub stop_date: u32,
    pub charged_time: u32,
    pub charge_start_power: f64,
    pub charge_stop_power: f64,
    pub charge_power: f64,
    pub charge_price: f64,
    pub fee_type: u8,
    pub charge_fee: f64,
    pub log_kw_length: u16,
}

impl ChargeRecord {
    pub fn decode(buf: &[u8]) -> Result<Self> {
        Ok(Self {
            line_id: u8_at(buf, 0)?,
            start_user_id: string_at(buf, 1, 16)?,
            end_user_id: string_at(buf, 17, 16)?,
            charge_id: string_at(buf, 33, 16)?,
            has_reservation: u8_at(buf, 49)?,
            start_type: u8_at(buf, 50)?,
            charge_type: u8_at(buf, 51)?,
            charge_param1: u16_at(buf, 52)?,
            charge_param2: f64::from(u16_at(buf, 54)?) * 0.001,
            charge_param3: f64::from(u16_at(buf, 56)?) * 0.01,
            stop_reason: u8_at(buf, 58)?,
            has_stop_charge: u8_at(buf, 59)?,
            reservation_date: u32_at(buf, 60)?,
            start_date: u32_at(buf, 64)?,
            stop_date: u32_at(buf, 68)?,
            charged_time: u32_at(buf, 72)?,
            charge_start_power: f64::from(u32_at(buf, 76)?) * 0.01,
            charge_stop_power: f64::from(u32_at(buf, 80)?) * 0.01,
            charge_power: f64::from(u32_at(buf, 84)?) * 0.01,
            charge_price: f64::from(u32_at(buf, 88)?) * 0.01,
            fee_type: u8_at(buf, 92)?,
            charge_fee: f64::from(u16_at(buf, 93)?) * 0.01,
            log_kw_length: u16_at(buf, 95)?,
        })
    }
}
