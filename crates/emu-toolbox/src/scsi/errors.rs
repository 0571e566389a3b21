//! Staged transport failures and their composite numeric code.

use serde::{Deserialize, Serialize};

/// Transaction stage a failure came from. The discriminant is the stage number used in the
/// composite code (bits 16–19).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    Arbitration = 1,
    Selection = 2,
    Command = 3,
    Data = 4,
    Completion = 5,
    /// The command ran but the target did not report GOOD status.
    Status = 6,
}

impl Stage {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Arbitration),
            2 => Some(Self::Selection),
            3 => Some(Self::Command),
            4 => Some(Self::Data),
            5 => Some(Self::Completion),
            6 => Some(Self::Status),
            _ => None,
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Self::Arbitration => "bus arbitration",
            Self::Selection => "device selection",
            Self::Command => "command phase",
            Self::Data => "data phase",
            Self::Completion => "completion",
            Self::Status => "device status",
        }
    }
}

/// Message and status bytes of a non-GOOD completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    pub message: u8,
    pub status: u8,
}

impl DeviceStatus {
    /// Packs into the 16-bit stage detail: message in the high byte, status in the low byte.
    pub fn detail(&self) -> u16 {
        (u16::from(self.message) << 8) | u16::from(self.status)
    }

    pub fn is_check_condition(&self) -> bool {
        self.status & 0x3E == 0x02
    }

    pub fn is_busy(&self) -> bool {
        self.status & 0x3E == 0x08
    }
}

/// A failed transaction: which stage broke and the stage's detail code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportError {
    pub stage: Stage,
    pub detail: u16,
}

impl TransportError {
    pub fn new(stage: Stage, detail: u16) -> Self {
        Self { stage, detail }
    }

    /// A completed command whose status byte was not GOOD.
    pub fn status(message: u8, status: u8) -> Self {
        Self::new(Stage::Status, DeviceStatus { message, status }.detail())
    }

    /// The 32-bit composite code: stage in bits 16–19, detail in the low 16 bits.
    pub fn code(&self) -> u32 {
        (u32::from(self.stage.code()) << 16) | u32::from(self.detail)
    }

    /// Inverse of [`code`](Self::code). Returns `None` for an unknown stage number or when any
    /// bit above the stage field is set.
    pub fn from_code(code: u32) -> Option<Self> {
        if code >> 20 != 0 {
            return None;
        }
        let stage = Stage::from_code((code >> 16) as u8)?;
        Some(Self::new(stage, (code & 0xFFFF) as u16))
    }

    /// The message/status pair when this is a status-stage failure.
    pub fn device_status(&self) -> Option<DeviceStatus> {
        (self.stage == Stage::Status).then(|| DeviceStatus {
            message: (self.detail >> 8) as u8,
            status: (self.detail & 0xFF) as u8,
        })
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.device_status() {
            Some(status) => write!(
                f,
                "Device returned status 0x{:02X} (message 0x{:02X}) (code {})",
                status.status,
                status.message,
                self.code()
            ),
            None => write!(f, "SCSI {} failed (code {})", self.stage.describe(), self.code()),
        }
    }
}

impl std::error::Error for TransportError {}
