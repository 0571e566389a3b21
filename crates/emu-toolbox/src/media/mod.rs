//! Switching the emulator's mounted image, then getting the host to notice.
//!
//! The device-side switch is authoritative. Unmounting and ejecting the host's view of the old
//! image is best effort: whatever goes wrong there is reported in the [`MountOutcome`] and never
//! turns a successful switch into an error.

#[cfg(target_os = "linux")]
mod linux;

#[cfg(target_os = "linux")]
pub use linux::{LinuxHostMedia, parse_mounts};

use log::{debug, info, warn};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::ToolboxConfig;
use crate::error::ToolboxError;
use crate::listing::DirectoryEntry;
use crate::scsi::{DataPhase, DeviceId, Executor, commands};

/// A host block device backed by a bus target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalDrive {
    /// Device node, like `/dev/sr0`.
    pub device_path: PathBuf,
    /// Where its volumes are mounted, if anywhere.
    pub mount_points: Vec<PathBuf>,
}

/// Failure of a host-side media step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum MediaError {
    /// Couldn't work out which host drive belongs to the target.
    Lookup { message: String },
    Unmount {
        mount_point: String,
        message: String,
        os_code: Option<i32>,
    },
    Eject {
        device_path: String,
        message: String,
        os_code: Option<i32>,
    },
    /// Couldn't tell whether the drive still has media.
    Probe { device_path: String, message: String },
}

impl MediaError {
    pub(crate) fn unmount(mount_point: &Path, err: &std::io::Error) -> Self {
        Self::Unmount {
            mount_point: mount_point.display().to_string(),
            message: err.to_string(),
            os_code: err.raw_os_error(),
        }
    }

    pub(crate) fn eject(device_path: &Path, err: &std::io::Error) -> Self {
        Self::Eject {
            device_path: device_path.display().to_string(),
            message: err.to_string(),
            os_code: err.raw_os_error(),
        }
    }
}

impl std::fmt::Display for MediaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lookup { message } => write!(f, "Couldn't find the host drive: {message}"),
            Self::Unmount {
                mount_point, message, ..
            } => write!(f, "Couldn't unmount {mount_point}: {message}"),
            Self::Eject {
                device_path, message, ..
            } => write!(f, "Couldn't eject {device_path}: {message}"),
            Self::Probe { device_path, message } => {
                write!(f, "Couldn't check media in {device_path}: {message}")
            }
        }
    }
}

impl std::error::Error for MediaError {}

/// The host's side of an image switch.
pub trait HostMedia {
    /// The host drive backed by `device_id`, or `None` if the host doesn't expose one.
    fn find_drive(&mut self, device_id: DeviceId) -> Result<Option<LocalDrive>, MediaError>;

    fn unmount(&mut self, mount_point: &Path) -> Result<(), MediaError>;

    /// Asks the driver to drop the drive's media.
    fn eject(&mut self, drive: &LocalDrive) -> Result<(), MediaError>;

    fn media_present(&mut self, drive: &LocalDrive) -> Result<bool, MediaError>;

    /// Waits between media checks.
    fn pause(&mut self, interval: Duration) {
        std::thread::sleep(interval);
    }
}

/// Host that never has a matching drive.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHostMedia;

impl HostMedia for NoHostMedia {
    fn find_drive(&mut self, _device_id: DeviceId) -> Result<Option<LocalDrive>, MediaError> {
        Ok(None)
    }

    fn unmount(&mut self, _mount_point: &Path) -> Result<(), MediaError> {
        Ok(())
    }

    fn eject(&mut self, _drive: &LocalDrive) -> Result<(), MediaError> {
        Ok(())
    }

    fn media_present(&mut self, _drive: &LocalDrive) -> Result<bool, MediaError> {
        Ok(false)
    }
}

/// What happened on the host after the switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum LocalEject {
    /// The host has no drive for this target.
    NoLocalDrive,
    /// Media went away after `polls` checks.
    Ejected { device_path: String, polls: u32 },
    /// Media was still reported after every check.
    StillPresent { device_path: String, polls: u32 },
    Failed { error: MediaError },
}

/// Result of a successful image switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MountOutcome {
    pub device_id: DeviceId,
    pub image: String,
    pub device_index: u8,
    pub local: LocalEject,
}

/// Tells the device to switch to `entry`, then unmounts and ejects the host's view of the old
/// image.
pub fn mount_image(
    exec: &mut Executor,
    host: &mut dyn HostMedia,
    config: &ToolboxConfig,
    device_id: DeviceId,
    entry: &DirectoryEntry,
) -> Result<MountOutcome, ToolboxError> {
    exec.run(device_id, &commands::select_image(entry.device_index), DataPhase::None)?;
    info!(
        "mount: device {} switched to {} (index {})",
        device_id, entry.name, entry.device_index
    );

    let local = eject_local(host, device_id, config.eject_poll_attempts, config.eject_poll_interval());
    match &local {
        LocalEject::Failed { error } => warn!("mount: device {} local eject failed: {}", device_id, error),
        LocalEject::StillPresent { device_path, polls } => {
            warn!("mount: {} still has media after {} checks", device_path, polls)
        }
        other => debug!("mount: device {} local eject: {:?}", device_id, other),
    }

    Ok(MountOutcome {
        device_id,
        image: entry.name.clone(),
        device_index: entry.device_index,
        local,
    })
}

fn eject_local(host: &mut dyn HostMedia, device_id: DeviceId, attempts: u32, interval: Duration) -> LocalEject {
    let drive = match host.find_drive(device_id) {
        Ok(Some(drive)) => drive,
        Ok(None) => return LocalEject::NoLocalDrive,
        Err(error) => return LocalEject::Failed { error },
    };

    for mount_point in &drive.mount_points {
        if let Err(error) = host.unmount(mount_point) {
            return LocalEject::Failed { error };
        }
        debug!("mount: unmounted {}", mount_point.display());
    }

    if let Err(error) = host.eject(&drive) {
        return LocalEject::Failed { error };
    }

    let device_path = drive.device_path.display().to_string();
    for poll in 1..=attempts {
        match host.media_present(&drive) {
            Ok(false) => return LocalEject::Ejected { device_path, polls: poll },
            Ok(true) => host.pause(interval),
            Err(error) => return LocalEject::Failed { error },
        }
    }
    LocalEject::StillPresent {
        device_path,
        polls: attempts,
    }
}
