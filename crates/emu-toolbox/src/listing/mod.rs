//! Device listings: fetching, parsing and ordering.

mod parsing;
mod sorting;

pub use parsing::parse_listing;
pub use sorting::{compare_names, sort_entries};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::ToolboxError;
use crate::scsi::commands::{self, RECORD_LEN};
use crate::scsi::{DataPhase, DeviceId, Executor};

/// Which of the device's two directories a listing shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ListingKind {
    /// The shared transfer directory.
    Files,
    /// Mountable disk images.
    Images,
}

impl std::fmt::Display for ListingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Files => write!(f, "file"),
            Self::Images => write!(f, "image"),
        }
    }
}

/// One file on the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    /// Index the device uses for this file in read and select commands. Unrelated to the
    /// entry's position in a sorted listing.
    pub device_index: u8,
    pub is_file: bool,
    pub name: String,
    pub size_bytes: u32,
}

/// Fetches, parses and sorts one listing.
///
/// Runs COUNT then LIST. A zero count returns an empty listing without the second transaction.
pub fn list(exec: &mut Executor, device_id: DeviceId, kind: ListingKind) -> Result<Vec<DirectoryEntry>, ToolboxError> {
    let mut count = [0u8; 1];
    let moved = exec.run(device_id, &commands::count_entries(kind), DataPhase::read(&mut count))?;
    if moved == 0 {
        return Err(ToolboxError::protocol(device_id, "count request returned no data"));
    }

    let count = usize::from(count[0]);
    debug!("list: device {} reports {} {} entries", device_id, count, kind);
    if count == 0 {
        if kind == ListingKind::Images {
            info!("list: device {} has no images, probably not an emulator", device_id);
        }
        return Ok(Vec::new());
    }

    let mut raw = vec![0u8; count * RECORD_LEN];
    let moved = exec.run(device_id, &commands::list_entries(kind), DataPhase::read(&mut raw))?;
    let mut entries = parse_listing(&raw[..moved.min(raw.len())]);
    sort_entries(&mut entries);

    if entries.is_empty() && kind == ListingKind::Images {
        info!("list: device {} has no usable images, probably not an emulator", device_id);
    }
    debug!("list: device {} {} listing has {} entries", device_id, kind, entries.len());
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::scsi::commands::opcode;
    use crate::virtual_device::VirtualDevice;

    fn id() -> DeviceId {
        DeviceId::new(2).unwrap()
    }

    fn executor(device: &VirtualDevice) -> Executor {
        Executor::new(Box::new(device.clone()), Duration::from_millis(100))
    }

    #[test]
    fn test_zero_count_skips_list_request() {
        let device = VirtualDevice::new(id());
        let mut exec = executor(&device);

        assert!(list(&mut exec, id(), ListingKind::Files).unwrap().is_empty());
        assert!(list(&mut exec, id(), ListingKind::Images).unwrap().is_empty());

        assert_eq!(device.count_of(opcode::COUNT_FILES), 1);
        assert_eq!(device.count_of(opcode::COUNT_IMAGES), 1);
        assert_eq!(device.count_of(opcode::LIST_FILES), 0);
        assert_eq!(device.count_of(opcode::LIST_IMAGES), 0);
    }

    #[test]
    fn test_short_list_reply_keeps_whole_records_only() {
        // COUNT says three, LIST delivers one record and half of the next
        let device = VirtualDevice::new(id())
            .with_file(0, "zeta", b"z")
            .with_file(1, "alpha", b"a")
            .with_file(2, "mid", b"m")
            .with_list_reply_limit(RECORD_LEN + RECORD_LEN / 2);
        let mut exec = executor(&device);

        let entries = list(&mut exec, id(), ListingKind::Files).unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "zeta");
        assert_eq!(entries[0].device_index, 0);
        assert_eq!(device.count_of(opcode::LIST_FILES), 1);
    }

    #[test]
    fn test_list_sorts_by_name() {
        let device = VirtualDevice::new(id())
            .with_file(0, "zeta", b"z")
            .with_file(1, "Alpha", b"a")
            .with_directory(2, "Dir");
        let mut exec = executor(&device);

        let names: Vec<String> = list(&mut exec, id(), ListingKind::Files)
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["Alpha", "zeta"]);
    }
}
