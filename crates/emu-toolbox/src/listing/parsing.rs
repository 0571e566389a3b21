//! Fixed-record listing decoding.

use log::warn;
use std::collections::HashSet;

use super::DirectoryEntry;
use crate::scsi::commands::{NAME_FIELD_LEN, RECORD_LEN};

const NAME_OFFSET: usize = 2;
const SIZE_OFFSET: usize = 36;

/// Decodes a raw listing into file entries, in device order.
///
/// Directory records and records with an empty name are dropped, as are repeats of an
/// already-seen device index (the first one wins). A trailing partial record is ignored.
pub fn parse_listing(raw: &[u8]) -> Vec<DirectoryEntry> {
    let trailing = raw.len() % RECORD_LEN;
    if trailing != 0 {
        warn!("list: ignoring {} trailing bytes after {} records", trailing, raw.len() / RECORD_LEN);
    }

    let mut seen = HashSet::new();
    raw.chunks_exact(RECORD_LEN)
        .filter_map(parse_record)
        .filter(|entry| seen.insert(entry.device_index))
        .collect()
}

fn parse_record(record: &[u8]) -> Option<DirectoryEntry> {
    let is_file = record[1] != 0;
    if !is_file {
        return None;
    }

    let field = &record[NAME_OFFSET..NAME_OFFSET + NAME_FIELD_LEN];
    // No terminator means the name runs to the end of the field
    let name_len = field.iter().position(|b| *b == 0).unwrap_or(NAME_FIELD_LEN);
    if name_len == 0 {
        return None;
    }
    let name = String::from_utf8_lossy(&field[..name_len]).into_owned();

    let mut size = [0u8; 4];
    size.copy_from_slice(&record[SIZE_OFFSET..SIZE_OFFSET + 4]);

    Some(DirectoryEntry {
        device_index: record[0],
        is_file,
        name,
        size_bytes: u32::from_be_bytes(size),
    })
}
