//! Crate-wide error type.

use std::path::Path;

use crate::listing::ListingKind;
use crate::scsi::{DeviceId, DeviceStatus, SenseCode, TransportError};
use crate::transfer::Direction;
use crate::validation::ValidationError;

/// Every way a toolbox operation can fail.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum ToolboxError {
    /// A transaction broke before the target reported a status.
    Transport {
        device_id: DeviceId,
        error: TransportError,
        sense: Option<SenseCode>,
    },
    /// The command ran but the target signalled a non-GOOD status.
    DeviceStatus {
        device_id: DeviceId,
        status: DeviceStatus,
        /// The composite code, stage 6.
        code: u32,
        sense: Option<SenseCode>,
    },
    /// Local create/open/read/write/flush failure.
    Filesystem {
        path: String,
        message: String,
        os_code: Option<i32>,
    },
    /// A name or size was rejected before any device I/O.
    Validation { error: ValidationError },
    /// The user dismissed a prompt or chooser.
    UserDeclined,
    /// A transfer is already running.
    Busy { active: Direction },
    /// The selection was made against a listing that has since been replaced.
    StaleSelection,
    /// The operation needs a listing and there isn't one.
    NoListing,
    /// The current listing is of the wrong kind for this operation.
    WrongListingKind { expected: ListingKind, actual: ListingKind },
    /// A selected position is outside the current listing.
    InvalidEntry { position: usize },
    /// The target answered with something that breaks the protocol.
    Protocol { device_id: DeviceId, message: String },
}

impl ToolboxError {
    /// Builds the right variant for a failed transaction.
    pub fn from_transport(device_id: DeviceId, error: TransportError, sense: Option<SenseCode>) -> Self {
        match error.device_status() {
            Some(status) => Self::DeviceStatus {
                device_id,
                status,
                code: error.code(),
                sense,
            },
            None => Self::Transport {
                device_id,
                error,
                sense,
            },
        }
    }

    /// Maps an I/O error on `path`.
    pub fn filesystem(path: &Path, err: &std::io::Error) -> Self {
        Self::Filesystem {
            path: path.display().to_string(),
            message: err.to_string(),
            os_code: err.raw_os_error(),
        }
    }

    pub fn protocol(device_id: DeviceId, message: impl Into<String>) -> Self {
        Self::Protocol {
            device_id,
            message: message.into(),
        }
    }

    /// The raw numeric failure code, when there is one.
    pub fn code(&self) -> Option<i64> {
        match self {
            Self::Transport { error, .. } => Some(i64::from(error.code())),
            Self::DeviceStatus { code, .. } => Some(i64::from(*code)),
            Self::Filesystem { os_code, .. } => os_code.map(i64::from),
            _ => None,
        }
    }

    /// Sense data collected after the failure, if the target offered any.
    pub fn sense(&self) -> Option<&SenseCode> {
        match self {
            Self::Transport { sense, .. } | Self::DeviceStatus { sense, .. } => sense.as_ref(),
            _ => None,
        }
    }

    /// Returns true if the error came from the device or the bus rather than the host.
    pub fn is_device_error(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::DeviceStatus { .. } | Self::Protocol { .. }
        )
    }

    /// Returns a user-friendly message for this error. Device and filesystem messages always
    /// carry the raw code.
    pub fn user_message(&self) -> String {
        match self {
            Self::Transport { error, sense, .. } => {
                let mut msg = format!("SCSI error {}. Check the device and cabling.", error.code());
                if let Some(sense) = sense {
                    msg.push_str(&format!(" Device says: {}.", sense));
                }
                msg
            }
            Self::DeviceStatus { status, code, sense, .. } => {
                let mut msg = format!("Device reported status 0x{:02X} (error {}).", status.status, code);
                if let Some(sense) = sense {
                    msg.push_str(&format!(" Device says: {}.", sense));
                }
                msg
            }
            Self::Filesystem { path, message, os_code } => match os_code {
                Some(code) => format!("Couldn't access {} (error {}): {}", path, code, message),
                None => format!("Couldn't access {}: {}", path, message),
            },
            Self::Validation { error } => format!("{}.", error),
            Self::UserDeclined => "Cancelled.".to_string(),
            Self::Busy { active } => format!("Wait for the current {} to finish.", active),
            Self::StaleSelection | Self::NoListing => "The file list is out of date. Refresh it and try again.".to_string(),
            Self::WrongListingKind { expected, .. } => format!("Open the {} list first.", expected),
            Self::InvalidEntry { .. } => "That item is no longer in the list. Refresh it and try again.".to_string(),
            Self::Protocol { message, .. } => format!("The device answered unexpectedly: {}.", message),
        }
    }
}

impl std::fmt::Display for ToolboxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport { device_id, error, .. } => write!(f, "Device {device_id}: {error}"),
            Self::DeviceStatus {
                device_id, status, code, ..
            } => write!(
                f,
                "Device {device_id} returned status 0x{:02X} (message 0x{:02X}) (code {code})",
                status.status, status.message
            ),
            Self::Filesystem { path, message, .. } => write!(f, "Filesystem error on {path}: {message}"),
            Self::Validation { error } => write!(f, "Validation failed: {error}"),
            Self::UserDeclined => write!(f, "Declined by user"),
            Self::Busy { active } => write!(f, "Busy: {active} in progress"),
            Self::StaleSelection => write!(f, "Selection refers to a replaced listing"),
            Self::NoListing => write!(f, "No listing loaded"),
            Self::WrongListingKind { expected, actual } => {
                write!(f, "Expected a {expected} listing, have a {actual} listing")
            }
            Self::InvalidEntry { position } => write!(f, "No entry at position {position}"),
            Self::Protocol { device_id, message } => write!(f, "Protocol error for device {device_id}: {message}"),
        }
    }
}

impl std::error::Error for ToolboxError {}

impl From<ValidationError> for ToolboxError {
    fn from(error: ValidationError) -> Self {
        Self::Validation { error }
    }
}
