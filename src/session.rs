//! Device sessions
//!
//! One [`DeviceSession`] per charger serial. Sessions are owned by the
//! communicator loop; everything outside it sees clones carried by events
//! or returned from accessors.

use crate::persistence::EvseRecord;
use crate::protocol::{
    AcStatus, ChargeRecord, ChargingStatus, LoginInfo, OutputCurrent, Payload, VersionInfo,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::time::Instant;

/// Live electrical state reported by SingleACStatus
pub type DeviceState = AcStatus;

/// Login progress of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    /// Seen on the network, not authenticated
    Discovered,
    /// Login request sent, waiting for the device
    LoggingIn,
    /// Authenticated; privileged commands allowed
    LoggedIn,
    /// Silent past the liveness timeout
    Absent,
}

/// Summary state for display, derived from status and live readings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetaState {
    Offline,
    NotLoggedIn,
    Idle,
    Error,
    Charging,
    PluggedIn,
}

impl std::fmt::Display for MetaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MetaState::Offline => "OFFLINE",
            MetaState::NotLoggedIn => "NOT_LOGGED_IN",
            MetaState::Idle => "IDLE",
            MetaState::Error => "ERROR",
            MetaState::Charging => "CHARGING",
            MetaState::PluggedIn => "PLUGGED_IN",
        };
        f.write_str(s)
    }
}

/// Static description of the charger
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_type: u8,
    pub brand: String,
    pub model: String,
    pub hardware_version: String,
    pub software_version: Option<String>,
    /// W
    pub max_power: u32,
    /// A
    pub max_electricity: u8,
    pub hot_line: String,
    pub p51: u8,
}

impl DeviceInfo {
    fn merge_login(&mut self, login: &LoginInfo) {
        self.device_type = login.device_type;
        self.brand.clone_from(&login.brand);
        self.model.clone_from(&login.model);
        self.hardware_version.clone_from(&login.hardware_version);
        self.max_power = login.max_power;
        self.max_electricity = login.max_electricity;
        self.hot_line.clone_from(&login.hot_line);
        self.p51 = login.p51;
    }

    fn merge_version(&mut self, version: &VersionInfo) {
        if !version.hardware_version.is_empty() {
            self.hardware_version.clone_from(&version.hardware_version);
        }
        self.software_version = Some(version.software_version.clone());
    }
}

/// User-settable parameters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Name from the saved device list
    pub name: Option<String>,
    /// Output current limit last reported by the device
    pub max_current: Option<u8>,
}

/// The running or most recent charge
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CurrentCharge {
    pub status: Option<ChargingStatus>,
    pub record: Option<ChargeRecord>,
}

impl CurrentCharge {
    pub fn charge_id(&self) -> Option<&str> {
        self.status
            .as_ref()
            .map(|s| s.charge_id.as_str())
            .or_else(|| self.record.as_ref().map(|r| r.charge_id.as_str()))
    }

    pub fn charged_kwh(&self) -> Option<f64> {
        self.status.as_ref().map(|s| s.charge_kwh)
    }
}

/// Everything known about one charger
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSession {
    pub serial: String,
    /// Last endpoint a datagram came from
    pub address: SocketAddr,
    pub info: Option<DeviceInfo>,
    pub config: DeviceConfig,
    pub state: Option<DeviceState>,
    pub current_charge: Option<CurrentCharge>,
    pub status: SessionStatus,
    /// Password of the last successful login or from the saved list
    #[serde(skip_serializing)]
    pub password: Option<String>,
    #[serde(skip_serializing)]
    pub last_seen: Instant,
    pub last_seen_at: DateTime<Utc>,
    /// Last login or acknowledged keepalive
    #[serde(skip_serializing)]
    pub last_keepalive: Option<Instant>,
}

impl DeviceSession {
    pub fn new(serial: &str, address: SocketAddr, now: Instant) -> Self {
        Self {
            serial: serial.to_string(),
            address,
            info: None,
            config: DeviceConfig::default(),
            state: None,
            current_charge: None,
            status: SessionStatus::Discovered,
            password: None,
            last_seen: now,
            last_seen_at: Utc::now(),
            last_keepalive: None,
        }
    }

    pub fn is_logged_in(&self) -> bool {
        self.status == SessionStatus::LoggedIn
    }

    /// Name for display: the saved name, else the serial
    pub fn display_name(&self) -> &str {
        self.config.name.as_deref().unwrap_or(&self.serial)
    }

    pub fn meta_state(&self) -> MetaState {
        match self.status {
            SessionStatus::Absent => return MetaState::Offline,
            SessionStatus::LoggedIn => {}
            _ => return MetaState::NotLoggedIn,
        }
        let Some(state) = &self.state else {
            return MetaState::Idle;
        };
        if state.has_fault() {
            MetaState::Error
        } else if state.output_state == 1 {
            MetaState::Charging
        } else if matches!(state.gun_state, 2..=4) {
            MetaState::PluggedIn
        } else {
            MetaState::Idle
        }
    }

    /// Record that a datagram arrived from `address`
    pub fn touch(&mut self, address: SocketAddr, now: Instant) -> bool {
        self.last_seen = now;
        self.last_seen_at = Utc::now();
        if self.address != address {
            self.address = address;
            return true;
        }
        false
    }

    /// Whether a logged-in session has gone `after` without a keepalive
    pub fn keepalive_stale(&self, now: Instant, after: std::time::Duration) -> bool {
        self.is_logged_in()
            && self
                .last_keepalive
                .is_none_or(|at| now.saturating_duration_since(at) > after)
    }

    /// Whether the session has been silent for longer than `timeout`
    pub fn is_expired(&self, now: Instant, timeout: std::time::Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > timeout
    }

    pub(crate) fn set_status(&mut self, status: SessionStatus) -> bool {
        if self.status == status {
            return false;
        }
        self.status = status;
        true
    }

    /// Apply saved name and password
    pub fn apply_record(&mut self, record: &EvseRecord) {
        if record.name.is_some() {
            self.config.name.clone_from(&record.name);
        }
        if self.password.is_none() {
            self.password.clone_from(&record.password);
        }
    }

    /// Merge the semantic content of an inbound payload
    ///
    /// Returns whether anything observable changed. Status datagrams
    /// replace the previous state wholesale.
    pub fn apply(&mut self, payload: &Payload) -> bool {
        match payload {
            Payload::Login(login) | Payload::LoginResponse(login) => {
                let mut info = self.info.clone().unwrap_or_default();
                info.merge_login(login);
                replace(&mut self.info, info)
            }
            Payload::VersionResponse(version) => {
                let mut info = self.info.clone().unwrap_or_default();
                info.merge_version(version);
                replace(&mut self.info, info)
            }
            Payload::AcStatus(status) => replace(&mut self.state, status.clone()),
            Payload::ChargingStatus(status) => {
                let mut charge = self.current_charge.clone().unwrap_or_default();
                charge.status = Some(status.clone());
                replace(&mut self.current_charge, charge)
            }
            Payload::ChargeRecord(record) => {
                let mut charge = self.current_charge.clone().unwrap_or_default();
                charge.record = Some(record.clone());
                replace(&mut self.current_charge, charge)
            }
            Payload::OutputCurrentResponse(OutputCurrent { amps, .. }) => {
                if self.config.max_current == Some(*amps) {
                    return false;
                }
                self.config.max_current = Some(*amps);
                true
            }
            _ => false,
        }
    }
}

impl std::fmt::Display for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.serial)?;
        if let Some(name) = &self.config.name {
            write!(f, " \"{}\"", name)?;
        }
        if let Some(info) = &self.info {
            write!(f, " {} {}", info.brand, info.model)?;
        }
        write!(f, " @ {} [{}]", self.address, self.meta_state())
    }
}

fn replace<T: PartialEq>(slot: &mut Option<T>, value: T) -> bool {
    if slot.as_ref() == Some(&value) {
        return false;
    }
    *slot = Some(value);
    true
}
