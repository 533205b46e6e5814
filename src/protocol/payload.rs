//! Typed datagram payloads, one variant per known command

use super::charge::{ChargeAck, ChargeStartRequest};
use super::codes;
use super::login::LoginInfo;
use super::settings::{OutputCurrent, SystemTime, VersionInfo};
use super::status::{AcStatus, ChargeRecord, ChargingStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum Payload {
    Login(LoginInfo),
    LoginResponse(LoginInfo),
    LoginConfirm,
    RequestLogin,
    Heading,
    HeadingResponse,
    AcStatus(AcStatus),
    AcStatusResponse,
    ChargingStatus(ChargingStatus),
    ChargingStatusResponse,
    ChargeStart(ChargeStartRequest),
    ChargeStartResponse(ChargeAck),
    ChargeStop,
    ChargeStopResponse(ChargeAck),
    ChargeRecord(ChargeRecord),
    RequestChargeStatusRecord,
    SystemTime(SystemTime),
    SystemTimeResponse(SystemTime),
    GetVersion,
    VersionResponse(VersionInfo),
    OutputCurrent(OutputCurrent),
    OutputCurrentResponse(OutputCurrent),
    PasswordError,
    /// Known command whose body is carried through undecoded
    Opaque { code: u16, raw: Vec<u8> },
    /// Command code absent from the registry
    Unknown { code: u16, raw: Vec<u8> },
}

impl Payload {
    /// Command code this payload travels under
    pub fn code(&self) -> u16 {
        match self {
            Payload::Login(_) => codes::LOGIN,
            Payload::LoginResponse(_) => codes::LOGIN_RESPONSE,
            Payload::LoginConfirm => codes::LOGIN_CONFIRM,
            Payload::RequestLogin => codes::REQUEST_LOGIN,
            Payload::Heading => codes::HEADING,
            Payload::HeadingResponse => codes::HEADING_RESPONSE,
            Payload::AcStatus(_) => codes::AC_STATUS,
            Payload::AcStatusResponse => codes::AC_STATUS_RESPONSE,
            Payload::ChargingStatus(_) => codes::CHARGING_STATUS,
            Payload::ChargingStatusResponse => codes::CHARGING_STATUS_RESPONSE,
            Payload::ChargeStart(_) => codes::CHARGE_START,
            Payload::ChargeStartResponse(_) => codes::CHARGE_START_RESPONSE,
            Payload::ChargeStop => codes::CHARGE_STOP,
            Payload::ChargeStopResponse(_) => codes::CHARGE_STOP_RESPONSE,
            Payload::ChargeRecord(_) => codes::CURRENT_CHARGE_RECORD,
            Payload::RequestChargeStatusRecord => codes::REQUEST_CHARGE_STATUS_RECORD,
            Payload::SystemTime(_) => codes::SYSTEM_TIME,
            Payload::SystemTimeResponse(_) => codes::SYSTEM_TIME_RESPONSE,
            Payload::GetVersion => codes::GET_VERSION,
            Payload::VersionResponse(_) => codes::VERSION_RESPONSE,
            Payload::OutputCurrent(_) => codes::OUTPUT_CURRENT,
            Payload::OutputCurrentResponse(_) => codes::OUTPUT_CURRENT_RESPONSE,
            Payload::PasswordError => codes::PASSWORD_ERROR,
            Payload::Opaque { code, .. } | Payload::Unknown { code, .. } => *code,
        }
    }

    /// Short name for logs and dumps
    pub fn name(&self) -> &'static str {
        match self {
            Payload::Unknown { .. } => "Unknown",
            other => super::registry::lookup(other.code())
                .map(|d| d.name)
                .unwrap_or("Unknown"),
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Payload::Unknown { .. })
    }
}
