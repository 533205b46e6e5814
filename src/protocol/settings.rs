//! Device settings: system clock, output current and firmware version

use super::fields::{string_at, u8_at, u32_at};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const SYSTEM_TIME_MIN_LEN: usize = 4;
pub const OUTPUT_CURRENT_MIN_LEN: usize = 2;
pub const VERSION_MIN_LEN: usize = 37;
pub const VERSION_WIDE_LEN: usize = 53;

/// Get/set selector shared by the settings commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettingAction {
    Get,
    Set,
}

impl SettingAction {
    pub fn as_byte(self) -> u8 {
        match self {
            SettingAction::Get => 0,
            SettingAction::Set => 1,
        }
    }

    pub fn from_byte(b: u8) -> Self {
        if b == 1 {
            SettingAction::Set
        } else {
            SettingAction::Get
        }
    }
}

/// 0x8101 request / 0x0101 response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemTime {
    pub action: SettingAction,
    /// Epoch seconds
    pub timestamp: u32,
}

impl SystemTime {
    pub fn get() -> Self {
        Self {
            action: SettingAction::Get,
            timestamp: 0,
        }
    }

    pub fn set(at: DateTime<Utc>) -> Self {
        Self {
            action: SettingAction::Set,
            timestamp: u32::try_from(at.timestamp()).unwrap_or(0),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(5);
        buf.push(self.action.as_byte());
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf
    }

    /// Older firmware answers with the bare timestamp
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() >= 5 {
            Ok(Self {
                action: SettingAction::from_byte(u8_at(buf, 0)?),
                timestamp: u32_at(buf, 1)?,
            })
        } else {
            Ok(Self {
                action: SettingAction::Get,
                timestamp: u32_at(buf, 0)?,
            })
        }
    }

    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(i64::from(self.timestamp), 0)
    }
}

/// 0x8107 request / 0x0107 response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputCurrent {
    pub action: SettingAction,
    pub amps: u8,
}

impl OutputCurrent {
    pub fn get() -> Self {
        Self {
            action: SettingAction::Get,
            amps: 0,
        }
    }

    pub fn set(amps: u8) -> Self {
        Self {
            action: SettingAction::Set,
            amps,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        vec![self.action.as_byte(), self.amps]
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        Ok(Self {
            action: SettingAction::from_byte(u8_at(buf, 0)?),
            amps: u8_at(buf, 1)?,
        })
    }
}

/// 0x0106 response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub hardware_version: String,
    pub software_version: String,
    pub feature: u32,
    pub support_new: u8,
}

impl VersionInfo {
    /// Two layouts exist: a 16-byte software field (37 bytes total) and a
    /// 32-byte one (53 bytes). The wide layout wins when the payload fits it.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let hardware_version = string_at(buf, 0, 16)?;
        if buf.len() >= VERSION_WIDE_LEN {
            Ok(Self {
                hardware_version,
                software_version: string_at(buf, 16, 32)?,
                feature: u32_at(buf, 48)?,
                support_new: u8_at(buf, 52)?,
            })
        } else {
            Ok(Self {
                hardware_version,
                software_version: string_at(buf, 16, 16)?,
                feature: u32_at(buf, 32)?,
                support_new: u8_at(buf, 36)?,
            })
        }
    }
}
