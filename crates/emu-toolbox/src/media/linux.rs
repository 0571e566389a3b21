//! Linux host media: sysfs for the target-to-drive mapping, `/proc/self/mounts` for volumes,
//! `umount2` and the CD-ROM eject ioctl for the rest.

use log::debug;
use std::ffi::CString;
use std::fs::{self, OpenOptions};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use super::{HostMedia, LocalDrive, MediaError};
use crate::scsi::DeviceId;

/// `CDROMEJECT` from `<linux/cdrom.h>`.
const CDROMEJECT: u64 = 0x5309;

/// Host media through the kernel's SCSI and block layers.
#[derive(Debug, Clone)]
pub struct LinuxHostMedia {
    /// Only consider targets on this host adapter, when set.
    adapter: Option<u32>,
    scsi_devices: PathBuf,
    sys_block: PathBuf,
    mounts: PathBuf,
    dev: PathBuf,
}

impl Default for LinuxHostMedia {
    fn default() -> Self {
        Self::new(None)
    }
}

impl LinuxHostMedia {
    pub fn new(adapter: Option<u32>) -> Self {
        Self {
            adapter,
            scsi_devices: PathBuf::from("/sys/bus/scsi/devices"),
            sys_block: PathBuf::from("/sys/block"),
            mounts: PathBuf::from("/proc/self/mounts"),
            dev: PathBuf::from("/dev"),
        }
    }

    /// Same lookups against a fake sysfs/procfs tree.
    pub fn with_roots(adapter: Option<u32>, sys: &Path, mounts: &Path, dev: &Path) -> Self {
        Self {
            adapter,
            scsi_devices: sys.join("bus/scsi/devices"),
            sys_block: sys.join("block"),
            mounts: mounts.to_path_buf(),
            dev: dev.to_path_buf(),
        }
    }

    /// Kernel name of the block device at `device_id`, like `sr0`.
    fn block_name(&self, device_id: DeviceId) -> Result<Option<String>, MediaError> {
        let entries = fs::read_dir(&self.scsi_devices).map_err(|e| MediaError::Lookup {
            message: format!("{}: {}", self.scsi_devices.display(), e),
        })?;

        let mut found = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some((adapter, target)) = parse_hctl(&name) else {
                continue;
            };
            if target != u32::from(device_id.get()) || self.adapter.is_some_and(|a| a != adapter) {
                continue;
            }
            let Ok(block) = fs::read_dir(entry.path().join("block")) else {
                continue;
            };
            found.extend(block.flatten().map(|b| b.file_name().to_string_lossy().into_owned()));
        }

        match found.len() {
            0 => Ok(None),
            1 => Ok(found.pop()),
            _ => Err(MediaError::Lookup {
                message: format!(
                    "target {} matches several drives ({}), set the host adapter",
                    device_id,
                    found.join(", ")
                ),
            }),
        }
    }

    fn block_name_of(drive: &LocalDrive) -> String {
        drive
            .device_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Splits a sysfs `host:channel:target:lun` name into adapter and target.
fn parse_hctl(name: &str) -> Option<(u32, u32)> {
    let mut parts = name.split(':');
    let adapter = parts.next()?.parse().ok()?;
    let _channel: u32 = parts.next()?.parse().ok()?;
    let target = parts.next()?.parse().ok()?;
    let _lun: u64 = parts.next()?.parse().ok()?;
    parts.next().is_none().then_some((adapter, target))
}

/// Mount points in a `/proc/self/mounts` listing whose source is `device_path` or one of its
/// partitions.
pub fn parse_mounts(contents: &str, device_path: &Path) -> Vec<PathBuf> {
    let device = device_path.to_string_lossy();
    contents
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let source = fields.next()?;
            let target = fields.next()?;
            let is_ours = source == device || source.strip_prefix(device.as_ref()).is_some_and(is_partition_suffix);
            is_ours.then(|| PathBuf::from(unescape_mount_field(target)))
        })
        .collect()
}

/// `1`, `12`, `p1`: what follows a disk's node name in its partitions' names.
fn is_partition_suffix(rest: &str) -> bool {
    let digits = rest.strip_prefix('p').unwrap_or(rest);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

/// Undoes the kernel's octal escaping of spaces, tabs, newlines and backslashes.
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && i + 3 < bytes.len()
            && bytes[i + 1..i + 4].iter().all(|b| (b'0'..=b'7').contains(b))
        {
            let value = (bytes[i + 1] - b'0') * 64 + (bytes[i + 2] - b'0') * 8 + (bytes[i + 3] - b'0');
            out.push(value);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

impl HostMedia for LinuxHostMedia {
    fn find_drive(&mut self, device_id: DeviceId) -> Result<Option<LocalDrive>, MediaError> {
        let Some(name) = self.block_name(device_id)? else {
            debug!("mount: no host block device for target {}", device_id);
            return Ok(None);
        };
        let device_path = self.dev.join(&name);
        let mounts = fs::read_to_string(&self.mounts).map_err(|e| MediaError::Lookup {
            message: format!("{}: {}", self.mounts.display(), e),
        })?;
        Ok(Some(LocalDrive {
            mount_points: parse_mounts(&mounts, &device_path),
            device_path,
        }))
    }

    fn unmount(&mut self, mount_point: &Path) -> Result<(), MediaError> {
        let path = CString::new(mount_point.as_os_str().as_bytes()).map_err(|_| MediaError::Unmount {
            mount_point: mount_point.display().to_string(),
            message: "path contains a NUL byte".to_string(),
            os_code: None,
        })?;
        let result = unsafe { libc::umount2(path.as_ptr(), 0) };
        if result == -1 {
            return Err(MediaError::unmount(mount_point, &std::io::Error::last_os_error()));
        }
        Ok(())
    }

    fn eject(&mut self, drive: &LocalDrive) -> Result<(), MediaError> {
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&drive.device_path)
            .map_err(|e| MediaError::eject(&drive.device_path, &e))?;
        let result = unsafe { libc::ioctl(file.as_raw_fd(), CDROMEJECT as _, 0) };
        if result == -1 {
            return Err(MediaError::eject(&drive.device_path, &std::io::Error::last_os_error()));
        }
        Ok(())
    }

    fn media_present(&mut self, drive: &LocalDrive) -> Result<bool, MediaError> {
        let size_path = self.sys_block.join(Self::block_name_of(drive)).join("size");
        let contents = fs::read_to_string(&size_path).map_err(|e| MediaError::Probe {
            device_path: drive.device_path.display().to_string(),
            message: format!("{}: {}", size_path.display(), e),
        })?;
        let sectors: u64 = contents.trim().parse().map_err(|_| MediaError::Probe {
            device_path: drive.device_path.display().to_string(),
            message: format!("unexpected size {:?}", contents.trim()),
        })?;
        Ok(sectors > 0)
    }
}
