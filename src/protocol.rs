//! EmProto wire protocol
//!
//! Frames are big endian:
//!
//! ```text
//! 0      2      4    5        13         19        21        len-4     len-2
//! | 0601 | len  | kt | serial | password | command | payload | checksum | 0f02 |
//! ```
//!
//! `len` counts the whole frame (25 bytes of framing plus the payload). The
//! checksum is the byte sum of everything before it, modulo 0xFFFF. One UDP
//! packet may carry several frames back to back.

pub mod charge;
pub mod fields;
pub mod frame;
pub mod login;
pub mod payload;
pub mod registry;
pub mod settings;
pub mod status;

pub use charge::{ChargeAck, ChargeStartParams, ChargeStartRequest};
pub use frame::{Datagram, decode_packet, encode_frame, parse_serial};
pub use login::{LoginInfo, P51Guard};
pub use payload::Payload;
pub use registry::{CommandDescriptor, Direction, lookup};
pub use settings::{OutputCurrent, SettingAction, SystemTime, VersionInfo};
pub use status::{AcStatus, ChargeRecord, ChargingStatus};

pub const PACKET_HEADER: u16 = 0x0601;
pub const PACKET_TAIL: u16 = 0x0f02;

/// Framing bytes around every payload
pub const FRAME_OVERHEAD: usize = 25;
pub const PAYLOAD_OFFSET: usize = 21;
pub const SERIAL_LEN: usize = 8;
pub const PASSWORD_LEN: usize = 6;

/// Default UDP port of the charger family
pub const DEFAULT_PORT: u16 = 28376;

/// Command codes. Device→app notifications have the high bit clear,
/// app→device commands have it set.
pub mod codes {
    pub const LOGIN: u16 = 0x0001;
    pub const LOGIN_RESPONSE: u16 = 0x0002;
    pub const HEADING: u16 = 0x0003;
    pub const AC_STATUS: u16 = 0x0004;
    pub const CHARGING_STATUS: u16 = 0x0005;
    pub const CHARGE_START_RESPONSE: u16 = 0x0007;
    pub const CHARGE_STOP_RESPONSE: u16 = 0x0008;
    pub const CURRENT_CHARGE_RECORD: u16 = 0x0009;
    pub const UPLOAD_LOCAL_CHARGE_RECORD: u16 = 0x000a;
    pub const REQUEST_STATUS_RECORD: u16 = 0x000d;
    pub const SYSTEM_TIME_RESPONSE: u16 = 0x0101;
    pub const VERSION_RESPONSE: u16 = 0x0106;
    pub const OUTPUT_CURRENT_RESPONSE: u16 = 0x0107;
    pub const PASSWORD_ERROR: u16 = 0x0155;

    pub const LOGIN_CONFIRM: u16 = 0x8001;
    pub const REQUEST_LOGIN: u16 = 0x8002;
    pub const HEADING_RESPONSE: u16 = 0x8003;
    pub const AC_STATUS_RESPONSE: u16 = 0x8004;
    pub const CHARGING_STATUS_RESPONSE: u16 = 0x8005;
    pub const CHARGE_START: u16 = 0x8007;
    pub const CHARGE_STOP: u16 = 0x8008;
    pub const REQUEST_CHARGE_STATUS_RECORD: u16 = 0x8009;
    pub const SYSTEM_TIME: u16 = 0x8101;
    pub const GET_VERSION: u16 = 0x8106;
    pub const OUTPUT_CURRENT: u16 = 0x8107;
}

/// Decoder knobs that vary between deployments
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeOptions {
    pub p51_guard: P51Guard,
}

impl DecodeOptions {
    pub fn from_config(config: &crate::config::ProtocolConfig) -> Self {
        Self {
            p51_guard: config.p51_guard,
        }
    }
}
