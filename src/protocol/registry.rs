//! Command registry
//!
//! A static table keyed by command code. Each entry carries the payload
//! unpacker/packer pair plus what the communicator needs to correlate a
//! request with its confirmation.

use super::DecodeOptions;
use super::charge::{ChargeAck, ChargeStartRequest};
use super::codes::*;
use super::login::{LOGIN_MIN_LEN, LoginInfo};
use super::payload::Payload;
use super::settings::{
    OUTPUT_CURRENT_MIN_LEN, OutputCurrent, SYSTEM_TIME_MIN_LEN, SystemTime, VERSION_MIN_LEN,
    VersionInfo,
};
use super::status::{
    AC_STATUS_MIN_LEN, AcStatus, CHARGE_RECORD_MIN_LEN, CHARGING_STATUS_MIN_LEN, ChargeRecord,
    ChargingStatus,
};
use crate::error::{EvseError, Result};

/// Bit set on app→device command codes
pub const APP_COMMAND_BIT: u16 = 0x8000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    DeviceToApp,
    AppToDevice,
}

pub type UnpackFn = fn(&[u8], &DecodeOptions) -> Result<Payload>;
pub type PackFn = fn(&Payload) -> Vec<u8>;

pub struct CommandDescriptor {
    pub code: u16,
    pub name: &'static str,
    pub direction: Direction,
    /// Shortest payload accepted by `unpack`
    pub min_len: usize,
    /// Inbound codes that confirm this command
    pub responses: &'static [u16],
    /// Refused locally unless the session is logged in
    pub requires_auth: bool,
    pub unpack: UnpackFn,
    pub pack: PackFn,
}

impl CommandDescriptor {
    pub fn expects_response(&self) -> bool {
        !self.responses.is_empty()
    }
}

impl std::fmt::Debug for CommandDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDescriptor")
            .field("code", &format_args!("{:#06x}", self.code))
            .field("name", &self.name)
            .field("direction", &self.direction)
            .field("min_len", &self.min_len)
            .field("responses", &self.responses)
            .field("requires_auth", &self.requires_auth)
            .finish()
    }
}

const fn inbound(
    code: u16,
    name: &'static str,
    min_len: usize,
    unpack: UnpackFn,
) -> CommandDescriptor {
    CommandDescriptor {
        code,
        name,
        direction: Direction::DeviceToApp,
        min_len,
        responses: &[],
        requires_auth: false,
        unpack,
        pack: pack_raw,
    }
}

const fn outbound(
    code: u16,
    name: &'static str,
    responses: &'static [u16],
    requires_auth: bool,
    unpack: UnpackFn,
    pack: PackFn,
) -> CommandDescriptor {
    CommandDescriptor {
        code,
        name,
        direction: Direction::AppToDevice,
        min_len: 0,
        responses,
        requires_auth,
        unpack,
        pack,
    }
}

static REGISTRY: &[CommandDescriptor] = &[
    inbound(LOGIN, "Login", LOGIN_MIN_LEN, unpack_login),
    inbound(
        LOGIN_RESPONSE,
        "LoginResponse",
        LOGIN_MIN_LEN,
        unpack_login_response,
    ),
    inbound(HEADING, "Heading", 0, unpack_heading),
    inbound(AC_STATUS, "SingleACStatus", AC_STATUS_MIN_LEN, unpack_ac_status),
    inbound(
        CHARGING_STATUS,
        "SingleACChargingStatus",
        CHARGING_STATUS_MIN_LEN,
        unpack_charging_status,
    ),
    inbound(
        CHARGE_START_RESPONSE,
        "ChargeStartResponse",
        0,
        unpack_charge_start_ack,
    ),
    inbound(
        CHARGE_STOP_RESPONSE,
        "ChargeStopResponse",
        0,
        unpack_charge_stop_ack,
    ),
    inbound(
        CURRENT_CHARGE_RECORD,
        "CurrentChargeRecord",
        CHARGE_RECORD_MIN_LEN,
        unpack_charge_record,
    ),
    inbound(
        UPLOAD_LOCAL_CHARGE_RECORD,
        "UploadLocalChargeRecord",
        0,
        unpack_opaque_upload,
    ),
    inbound(
        REQUEST_STATUS_RECORD,
        "RequestStatusRecord",
        0,
        unpack_opaque_status_record,
    ),
    inbound(
        SYSTEM_TIME_RESPONSE,
        "SetAndGetSystemTimeResponse",
        SYSTEM_TIME_MIN_LEN,
        unpack_system_time_response,
    ),
    inbound(VERSION_RESPONSE, "GetVersionResponse", VERSION_MIN_LEN, unpack_version),
    inbound(
        OUTPUT_CURRENT_RESPONSE,
        "SetAndGetOutputElectricityResponse",
        OUTPUT_CURRENT_MIN_LEN,
        unpack_output_current_response,
    ),
    inbound(PASSWORD_ERROR, "PasswordErrorResponse", 0, unpack_password_error),
    outbound(
        LOGIN_CONFIRM,
        "LoginConfirm",
        &[],
        false,
        unpack_login_confirm,
        pack_flag_zero,
    ),
    outbound(
        REQUEST_LOGIN,
        "RequestLogin",
        &[LOGIN_RESPONSE, PASSWORD_ERROR],
        false,
        unpack_request_login,
        pack_flag_zero,
    ),
    outbound(
        HEADING_RESPONSE,
        "HeadingResponse",
        &[],
        false,
        unpack_heading_response,
        pack_empty,
    ),
    outbound(
        AC_STATUS_RESPONSE,
        "SingleACStatusResponse",
        &[],
        false,
        unpack_ac_status_response,
        pack_flag_one,
    ),
    outbound(
        CHARGING_STATUS_RESPONSE,
        "SingleACChargingStatusResponse",
        &[],
        false,
        unpack_charging_status_response,
        pack_flag_zero,
    ),
    outbound(
        CHARGE_START,
        "ChargeStart",
        &[CHARGE_START_RESPONSE],
        true,
        unpack_charge_start,
        pack_charge_start,
    ),
    outbound(
        CHARGE_STOP,
        "ChargeStop",
        &[CHARGE_STOP_RESPONSE],
        true,
        unpack_charge_stop,
        pack_empty,
    ),
    outbound(
        REQUEST_CHARGE_STATUS_RECORD,
        "RequestChargeStatusRecord",
        &[CURRENT_CHARGE_RECORD],
        false,
        unpack_request_charge_record,
        pack_empty,
    ),
    outbound(
        SYSTEM_TIME,
        "SetAndGetSystemTime",
        &[SYSTEM_TIME_RESPONSE],
        false,
        unpack_system_time,
        pack_system_time,
    ),
    outbound(
        GET_VERSION,
        "GetVersion",
        &[VERSION_RESPONSE],
        false,
        unpack_get_version,
        pack_empty,
    ),
    outbound(
        OUTPUT_CURRENT,
        "SetAndGetOutputElectricity",
        &[OUTPUT_CURRENT_RESPONSE],
        false,
        unpack_output_current,
        pack_output_current,
    ),
];

/// Find the descriptor for a command code
pub fn lookup(code: u16) -> Option<&'static CommandDescriptor> {
    REGISTRY.iter().find(|d| d.code == code)
}

/// All registered commands
pub fn descriptors() -> &'static [CommandDescriptor] {
    REGISTRY
}

/// App→device code paired with a device→app notification code
pub fn command_code(notification: u16) -> u16 {
    notification | APP_COMMAND_BIT
}

/// Device→app code paired with an app→device command code
pub fn notification_code(command: u16) -> u16 {
    command & !APP_COMMAND_BIT
}

/// Decode a payload for `code`; unknown codes are carried raw
pub fn unpack(code: u16, payload: &[u8], options: &DecodeOptions) -> Result<Payload> {
    let Some(descriptor) = lookup(code) else {
        return Ok(Payload::Unknown {
            code,
            raw: payload.to_vec(),
        });
    };
    if payload.len() < descriptor.min_len {
        return Err(EvseError::malformed(format!(
            "{} payload needs {} bytes, got {}",
            descriptor.name,
            descriptor.min_len,
            payload.len()
        )));
    }
    (descriptor.unpack)(payload, options)
}

/// Encode the payload body
pub fn pack(payload: &Payload) -> Vec<u8> {
    match payload {
        Payload::Opaque { raw, .. } | Payload::Unknown { raw, .. } => raw.clone(),
        other => lookup(other.code()).map_or_else(Vec::new, |d| (d.pack)(other)),
    }
}

fn unpack_login(buf: &[u8], options: &DecodeOptions) -> Result<Payload> {
    Ok(Payload::Login(LoginInfo::decode(buf, options.p51_guard)?))
}

fn unpack_login_response(buf: &[u8], options: &DecodeOptions) -> Result<Payload> {
    Ok(Payload::LoginResponse(LoginInfo::decode(buf, options.p51_guard)?))
}

fn unpack_ac_status(buf: &[u8], _: &DecodeOptions) -> Result<Payload> {
    Ok(Payload::AcStatus(AcStatus::decode(buf)?))
}

fn unpack_charging_status(buf: &[u8], _: &DecodeOptions) -> Result<Payload> {
    Ok(Payload::ChargingStatus(ChargingStatus::decode(buf)?))
}

fn unpack_charge_record(buf: &[u8], _: &DecodeOptions) -> Result<Payload> {
    Ok(Payload::ChargeRecord(ChargeRecord::decode(buf)?))
}

fn unpack_charge_start_ack(buf: &[u8], _: &DecodeOptions) -> Result<Payload> {
    Ok(Payload::ChargeStartResponse(ChargeAck::decode(buf)?))
}

fn unpack_charge_stop_ack(buf: &[u8], _: &DecodeOptions) -> Result<Payload> {
    Ok(Payload::ChargeStopResponse(ChargeAck::decode(buf)?))
}

fn unpack_opaque_upload(buf: &[u8], _: &DecodeOptions) -> Result<Payload> {
    Ok(Payload::Opaque {
        code: UPLOAD_LOCAL_CHARGE_RECORD,
        raw: buf.to_vec(),
    })
}

fn unpack_opaque_status_record(buf: &[u8], _: &DecodeOptions) -> Result<Payload> {
    Ok(Payload::Opaque {
        code: REQUEST_STATUS_RECORD,
        raw: buf.to_vec(),
    })
}

fn unpack_system_time(buf: &[u8], _: &DecodeOptions) -> Result<Payload> {
    Ok(Payload::SystemTime(SystemTime::decode(buf)?))
}

fn unpack_system_time_response(buf: &[u8], _: &DecodeOptions) -> Result<Payload> {
    Ok(Payload::SystemTimeResponse(SystemTime::decode(buf)?))
}

fn unpack_version(buf: &[u8], _: &DecodeOptions) -> Result<Payload> {
    Ok(Payload::VersionResponse(VersionInfo::decode(buf)?))
}

fn unpack_output_current(buf: &[u8], _: &DecodeOptions) -> Result<Payload> {
    Ok(Payload::OutputCurrent(OutputCurrent::decode(buf)?))
}

fn unpack_output_current_response(buf: &[u8], _: &DecodeOptions) -> Result<Payload> {
    Ok(Payload::OutputCurrentResponse(OutputCurrent::decode(buf)?))
}

fn unpack_charge_start(buf: &[u8], _: &DecodeOptions) -> Result<Payload> {
    Ok(Payload::ChargeStart(ChargeStartRequest::decode(buf)?))
}

fn unpack_heading(_: &[u8], _: &DecodeOptions) -> Result<Payload> {
    Ok(Payload::Heading)
}

fn unpack_heading_response(_: &[u8], _: &DecodeOptions) -> Result<Payload> {
    Ok(Payload::HeadingResponse)
}

fn unpack_password_error(_: &[u8], _: &DecodeOptions) -> Result<Payload> {
    Ok(Payload::PasswordError)
}

fn unpack_login_confirm(_: &[u8], _: &DecodeOptions) -> Result<Payload> {
    Ok(Payload::LoginConfirm)
}

fn unpack_request_login(_: &[u8], _: &DecodeOptions) -> Result<Payload> {
    Ok(Payload::RequestLogin)
}

fn unpack_ac_status_response(_: &[u8], _: &DecodeOptions) -> Result<Payload> {
    Ok(Payload::AcStatusResponse)
}

fn unpack_charging_status_response(_: &[u8], _: &DecodeOptions) -> Result<Payload> {
    Ok(Payload::ChargingStatusResponse)
}

fn unpack_charge_stop(_: &[u8], _: &DecodeOptions) -> Result<Payload> {
    Ok(Payload::ChargeStop)
}

fn unpack_request_charge_record(_: &[u8], _: &DecodeOptions) -> Result<Payload> {
    Ok(Payload::RequestChargeStatusRecord)
}

fn unpack_get_version(_: &[u8], _: &DecodeOptions) -> Result<Payload> {
    Ok(Payload::GetVersion)
}

fn pack_raw(payload: &Payload) -> Vec<u8> {
    match payload {
        Payload::Opaque { raw, .. } | Payload::Unknown { raw, .. } => raw.clone(),
        _ => Vec::new(),
    }
}

fn pack_empty(_: &Payload) -> Vec<u8> {
    Vec::new()
}

fn pack_flag_zero(_: &Payload) -> Vec<u8> {
    vec![0x00]
}

fn pack_flag_one(_: &Payload) -> Vec<u8> {
    vec![0x01]
}

fn pack_charge_start(payload: &Payload) -> Vec<u8> {
    match payload {
        Payload::ChargeStart(req) => req.encode(),
        _ => Vec::new(),
    }
}

fn pack_system_time(payload: &Payload) -> Vec<u8> {
    match payload {
        Payload::SystemTime(t) => t.encode(),
        _ => Vec::new(),
    }
}

fn pack_output_current(payload: &Payload) -> Vec<u8> {
    match payload {
        Payload::OutputCurrent(c) => c.encode(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_unique() {
        for (i, a) in REGISTRY.iter().enumerate() {
            for b in &REGISTRY[i + 1..] {
                assert_ne!(a.code, b.code, "{} and {}", a.name, b.name);
            }
        }
    }

    #[test]
    fn test_direction_follows_high_bit() {
        for d in REGISTRY {
            let high = d.code & APP_COMMAND_BIT != 0;
            assert_eq!(high, d.direction == Direction::AppToDevice, "{}", d.name);
        }
    }

    #[test]
    fn test_responses_pair_by_code() {
        for d in REGISTRY.iter().filter(|d| d.expects_response()) {
            for &r in d.responses {
                let resp = lookup(r).unwrap();
                assert_eq!(resp.direction, Direction::DeviceToApp);
            }
        }
        assert_eq!(command_code(LOGIN), LOGIN_CONFIRM);
        assert_eq!(command_code(LOGIN_RESPONSE), REQUEST_LOGIN);
        assert_eq!(notification_code(CHARGE_START), CHARGE_START_RESPONSE);
        assert_eq!(lookup(REQUEST_LOGIN).unwrap().responses[0], LOGIN_RESPONSE);
    }

    #[test]
    fn test_privileged_commands() {
        let privileged: Vec<_> = REGISTRY
            .iter()
            .filter(|d| d.requires_auth)
            .map(|d| d.code)
            .collect();
        assert_eq!(privileged, vec![CHARGE_START, CHARGE_STOP]);
    }

    #[test]
    fn test_unknown_code_is_carried_raw() {
        let payload = unpack(0x7777, &[1, 2, 3], &DecodeOptions::default()).unwrap();
        assert_eq!(
            payload,
            Payload::Unknown {
                code: 0x7777,
                raw: vec![1, 2, 3]
            }
        );
        assert_eq!(pack(&payload), vec![1, 2, 3]);
    }

    #[test]
    fn test_min_length_enforced() {
        let err = unpack(AC_STATUS, &[0u8; 24], &DecodeOptions::default()).unwrap_err();
        assert!(matches!(err, EvseError::MalformedDatagram { .. }));
    }

    #[test]
    fn test_flag_payloads() {
        assert_eq!(pack(&Payload::LoginConfirm), vec![0x00]);
        assert_eq!(pack(&Payload::RequestLogin), vec![0x00]);
        assert_eq!(pack(&Payload::AcStatusResponse), vec![0x01]);
        assert_eq!(pack(&Payload::ChargingStatusResponse), vec![0x00]);
        assert!(pack(&Payload::ChargeStop).is_empty());
        assert!(pack(&Payload::HeadingResponse).is_empty());
    }
}
