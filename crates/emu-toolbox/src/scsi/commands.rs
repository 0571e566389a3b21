//! Command descriptor block encoders for the toolbox command set.
//!
//! Vendor commands (0xD0–0xDA) are 10-byte CDBs; the two standard commands we use (REQUEST SENSE
//! and MODE SENSE(6)) are group-0 and therefore 6 bytes.

use crate::listing::ListingKind;

/// Download offsets are counted in these units.
pub const READ_BLOCK_SIZE: usize = 4096;
/// Upload offsets and batch sizes are counted in these units.
pub const WRITE_BLOCK_SIZE: usize = 512;
/// Size of one listing record.
pub const RECORD_LEN: usize = 40;
/// Size of the fixed, null-terminated name field in listings and BEGIN UPLOAD.
pub const NAME_FIELD_LEN: usize = 33;
/// REQUEST SENSE allocation length (fixed-format sense data).
pub const SENSE_LEN: usize = 18;
/// CAPABILITIES reply length.
pub const CAPABILITIES_LEN: usize = 8;
/// Vendor identification mode page code.
pub const VENDOR_PAGE: u8 = 0x31;
/// Vendor page length including its two-byte page header.
pub const VENDOR_PAGE_LEN: usize = 42;
/// MODE SENSE(6) parameter header length.
pub const MODE_HEADER_LEN: usize = 4;

pub mod opcode {
    pub const REQUEST_SENSE: u8 = 0x03;
    pub const MODE_SENSE_6: u8 = 0x1A;
    pub const LIST_FILES: u8 = 0xD0;
    pub const READ_FILE: u8 = 0xD1;
    pub const COUNT_FILES: u8 = 0xD2;
    pub const BEGIN_UPLOAD: u8 = 0xD3;
    pub const SEND_FILE: u8 = 0xD4;
    pub const END_UPLOAD: u8 = 0xD5;
    pub const LIST_IMAGES: u8 = 0xD7;
    pub const SELECT_IMAGE: u8 = 0xD8;
    pub const CAPABILITIES: u8 = 0xD9;
    pub const COUNT_IMAGES: u8 = 0xDA;
}

/// CAPABILITIES sub-command asking for the feature byte.
pub const SUBCOMMAND_GET_CAPABILITIES: u8 = 0x01;

/// A command descriptor block, 6 or 10 bytes long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cdb {
    bytes: [u8; 10],
    len: usize,
}

impl Cdb {
    fn group0(op: u8) -> Self {
        let mut bytes = [0u8; 10];
        bytes[0] = op;
        Self { bytes, len: 6 }
    }

    fn vendor(op: u8) -> Self {
        let mut bytes = [0u8; 10];
        bytes[0] = op;
        Self { bytes, len: 10 }
    }

    fn with(mut self, index: usize, value: u8) -> Self {
        self.bytes[index] = value;
        self
    }

    /// Writes `value` big-endian into `width` bytes starting at `index`.
    fn with_be(mut self, index: usize, width: usize, value: u32) -> Self {
        let be = value.to_be_bytes();
        self.bytes[index..index + width].copy_from_slice(&be[4 - width..]);
        self
    }

    pub fn opcode(&self) -> u8 {
        self.bytes[0]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

pub fn count_entries(kind: ListingKind) -> Cdb {
    match kind {
        ListingKind::Files => Cdb::vendor(opcode::COUNT_FILES),
        ListingKind::Images => Cdb::vendor(opcode::COUNT_IMAGES),
    }
}

pub fn list_entries(kind: ListingKind) -> Cdb {
    match kind {
        ListingKind::Files => Cdb::vendor(opcode::LIST_FILES),
        ListingKind::Images => Cdb::vendor(opcode::LIST_IMAGES),
    }
}

/// Single-chunk read at `block_offset` (4 KiB units).
pub fn read_file(index: u8, block_offset: u32) -> Cdb {
    Cdb::vendor(opcode::READ_FILE).with(1, index).with_be(2, 4, block_offset)
}

/// Multi-block read: byte 6 carries the number of 4 KiB blocks wanted.
pub fn read_file_batched(index: u8, block_offset: u32, blocks: u8) -> Cdb {
    read_file(index, block_offset).with(6, blocks)
}

pub fn begin_upload() -> Cdb {
    Cdb::vendor(opcode::BEGIN_UPLOAD)
}

/// Single-block send: bytes 1–2 carry the exact length, 3–5 the 512-byte block offset.
pub fn send_block(len: u16, block_offset: u32) -> Cdb {
    Cdb::vendor(opcode::SEND_FILE)
        .with_be(1, 2, u32::from(len))
        .with_be(3, 3, block_offset)
}

/// Multi-block send: byte 6 carries the block count, 3–5 the 512-byte block offset.
pub fn send_blocks(blocks: u8, block_offset: u32) -> Cdb {
    Cdb::vendor(opcode::SEND_FILE).with_be(3, 3, block_offset).with(6, blocks)
}

pub fn end_upload() -> Cdb {
    Cdb::vendor(opcode::END_UPLOAD)
}

pub fn select_image(index: u8) -> Cdb {
    Cdb::vendor(opcode::SELECT_IMAGE).with(1, index)
}

pub fn get_capabilities() -> Cdb {
    Cdb::vendor(opcode::CAPABILITIES).with(1, SUBCOMMAND_GET_CAPABILITIES)
}

/// MODE SENSE(6) for the vendor page, current values, no block descriptors.
pub fn mode_sense_vendor_page() -> Cdb {
    Cdb::group0(opcode::MODE_SENSE_6)
        .with(1, 0x08)
        .with(2, VENDOR_PAGE)
        .with(4, (MODE_HEADER_LEN + VENDOR_PAGE_LEN) as u8)
}

pub fn request_sense() -> Cdb {
    Cdb::group0(opcode::REQUEST_SENSE).with(4, SENSE_LEN as u8)
}

/// Encodes `name` into the fixed name field. Callers validate the length first; anything past
/// 32 bytes is cut so the terminator always fits.
pub fn encode_name_field(name: &str) -> [u8; NAME_FIELD_LEN] {
    let mut field = [0u8; NAME_FIELD_LEN];
    let bytes = name.as_bytes();
    let len = bytes.len().min(NAME_FIELD_LEN - 1);
    field[..len].copy_from_slice(&bytes[..len]);
    field
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vendor_commands_are_ten_bytes() {
        assert_eq!(count_entries(ListingKind::Files).as_bytes(), &[0xD2, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(list_entries(ListingKind::Images).opcode(), 0xD7);
        assert_eq!(count_entries(ListingKind::Images).opcode(), 0xDA);
        assert_eq!(end_upload().as_bytes().len(), 10);
    }

    #[test]
    fn test_group0_commands_are_six_bytes() {
        assert_eq!(request_sense().as_bytes(), &[0x03, 0, 0, 0, 18, 0]);
        let mode = mode_sense_vendor_page();
        assert_eq!(mode.as_bytes().len(), 6);
        assert_eq!(mode.as_bytes()[2], 0x31);
        assert_eq!(mode.as_bytes()[4], 46);
    }

    #[test]
    fn test_read_file_offset_is_big_endian() {
        let cdb = read_file(9, 0x0102_0304);
        assert_eq!(cdb.as_bytes()[..7], [0xD1, 9, 0x01, 0x02, 0x03, 0x04, 0]);

        let cdb = read_file_batched(9, 2, 8);
        assert_eq!(cdb.as_bytes()[..7], [0xD1, 9, 0, 0, 0, 2, 8]);
    }

    #[test]
    fn test_send_block_layouts() {
        let legacy = send_block(512, 0x01_0203);
        assert_eq!(legacy.as_bytes()[..7], [0xD4, 0x02, 0x00, 0x01, 0x02, 0x03, 0]);

        let batched = send_blocks(16, 5);
        assert_eq!(batched.as_bytes()[..7], [0xD4, 0, 0, 0, 0, 5, 16]);
    }

    #[test]
    fn test_select_image_and_capabilities() {
        assert_eq!(select_image(4).as_bytes()[..2], [0xD8, 4]);
        assert_eq!(get_capabilities().as_bytes()[..2], [0xD9, 1]);
    }

    #[test]
    fn test_name_field_always_terminated() {
        let field = encode_name_field("GAME.DSK");
        assert_eq!(&field[..8], b"GAME.DSK");
        assert!(field[8..].iter().all(|b| *b == 0));

        let long = "A".repeat(40);
        let field = encode_name_field(&long);
        assert_eq!(field[32], 0);
        assert!(field[..32].iter().all(|b| *b == b'A'));
    }
}
