//! Fixed-format sense data decoding.

use serde::{Deserialize, Serialize};

/// Response code of fixed-format sense data describing the current command.
const RESPONSE_CURRENT_FIXED: u8 = 0x70;
/// Bytes needed to reach the ASC/ASCQ fields.
const MIN_DECODABLE_LEN: usize = 14;

/// Sense key, the coarse category of a sense report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SenseKey {
    NoSense,
    RecoveredError,
    NotReady,
    MediumError,
    HardwareError,
    IllegalRequest,
    UnitAttention,
    DataProtect,
    BlankCheck,
    VendorSpecific,
    CopyAborted,
    AbortedCommand,
    VolumeOverflow,
    Miscompare,
    Reserved(u8),
}

impl SenseKey {
    pub fn from_nibble(value: u8) -> Self {
        match value & 0x0F {
            0x0 => Self::NoSense,
            0x1 => Self::RecoveredError,
            0x2 => Self::NotReady,
            0x3 => Self::MediumError,
            0x4 => Self::HardwareError,
            0x5 => Self::IllegalRequest,
            0x6 => Self::UnitAttention,
            0x7 => Self::DataProtect,
            0x8 => Self::BlankCheck,
            0x9 => Self::VendorSpecific,
            0xA => Self::CopyAborted,
            0xB => Self::AbortedCommand,
            0xD => Self::VolumeOverflow,
            0xE => Self::Miscompare,
            other => Self::Reserved(other),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::NoSense => "no sense",
            Self::RecoveredError => "recovered error",
            Self::NotReady => "not ready",
            Self::MediumError => "medium error",
            Self::HardwareError => "hardware error",
            Self::IllegalRequest => "illegal request",
            Self::UnitAttention => "unit attention",
            Self::DataProtect => "data protect",
            Self::BlankCheck => "blank check",
            Self::VendorSpecific => "vendor specific",
            Self::CopyAborted => "copy aborted",
            Self::AbortedCommand => "aborted command",
            Self::VolumeOverflow => "volume overflow",
            Self::Miscompare => "miscompare",
            Self::Reserved(_) => "reserved",
        }
    }
}

/// The decoded parts of a "current error" sense report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenseCode {
    pub key: SenseKey,
    /// Additional sense code.
    pub asc: u8,
    /// Additional sense code qualifier.
    pub ascq: u8,
}

impl std::fmt::Display for SenseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (ASC 0x{:02X}, ASCQ 0x{:02X})", self.key.name(), self.asc, self.ascq)
    }
}

/// Decodes fixed-format sense data. Only the "current error" shape is understood; deferred
/// errors, descriptor format and short replies all yield `None`.
pub fn decode_sense(data: &[u8]) -> Option<SenseCode> {
    if data.len() < MIN_DECODABLE_LEN {
        return None;
    }
    if data[0] & 0x7F != RESPONSE_CURRENT_FIXED {
        return None;
    }
    Some(SenseCode {
        key: SenseKey::from_nibble(data[2]),
        asc: data[12],
        ascq: data[13],
    })
}
