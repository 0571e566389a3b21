//! Legacy and batched encodings of the read and send commands, chosen once per job from the
//! device's capabilities.

use crate::device::CapabilityFlags;
use crate::scsi::Cdb;
use crate::scsi::commands::{self, READ_BLOCK_SIZE, WRITE_BLOCK_SIZE};

/// How a download asks for file data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// One 4 KiB chunk per command.
    Legacy,
    /// Up to `blocks` 4 KiB blocks per command.
    Batched { blocks: u8 },
}

/// One planned read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    pub cdb: Cdb,
    /// Bytes the data phase should move.
    pub phase_len: usize,
    /// Whole 4 KiB blocks the offset advances by.
    pub blocks: u32,
}

impl ReadMode {
    pub fn for_capabilities(flags: CapabilityFlags, batch_blocks: u8) -> Self {
        if flags.contains(CapabilityFlags::LARGE_RECEIVE) && batch_blocks > 1 {
            Self::Batched { blocks: batch_blocks }
        } else {
            Self::Legacy
        }
    }

    /// Largest number of file bytes a single read returns.
    pub fn chunk_size(&self) -> usize {
        match self {
            Self::Legacy => READ_BLOCK_SIZE,
            Self::Batched { blocks } => usize::from(*blocks) * READ_BLOCK_SIZE,
        }
    }

    /// Plans a read of `want` bytes (at most one chunk) at `block_offset`.
    pub fn request(&self, index: u8, block_offset: u32, want: usize) -> ReadRequest {
        match self {
            Self::Legacy => ReadRequest {
                cdb: commands::read_file(index, block_offset),
                phase_len: want,
                blocks: 1,
            },
            Self::Batched { .. } => {
                let blocks = want.div_ceil(READ_BLOCK_SIZE).max(1);
                ReadRequest {
                    cdb: commands::read_file_batched(index, block_offset, blocks as u8),
                    phase_len: blocks * READ_BLOCK_SIZE,
                    blocks: blocks as u32,
                }
            }
        }
    }
}

/// How an upload sends file data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// One 512-byte block per command, exact length in the CDB.
    Legacy,
    /// Up to `max_blocks` 512-byte blocks per command.
    Batched { max_blocks: u8 },
}

/// One planned send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteRequest {
    pub cdb: Cdb,
    /// File bytes to send.
    pub len: usize,
    /// Blocks the send covers, counting a partial tail as one.
    pub blocks: u32,
    pub batched: bool,
}

impl WriteMode {
    pub fn for_capabilities(flags: CapabilityFlags, batch_blocks: u8) -> Self {
        if flags.contains(CapabilityFlags::LARGE_SEND) && batch_blocks > 1 {
            Self::Batched { max_blocks: batch_blocks }
        } else {
            Self::Legacy
        }
    }

    /// Plans the next send for `remaining` file bytes at `block_offset`.
    ///
    /// Batching only kicks in when more than one block remains; the last block always goes out
    /// the legacy way.
    pub fn request(&self, block_offset: u32, remaining: u64) -> WriteRequest {
        let blocks_remaining = remaining.div_ceil(WRITE_BLOCK_SIZE as u64);
        match self {
            Self::Batched { max_blocks } if blocks_remaining > 1 => {
                let blocks = blocks_remaining.min(u64::from(*max_blocks));
                let len = remaining.min(blocks * WRITE_BLOCK_SIZE as u64) as usize;
                WriteRequest {
                    cdb: commands::send_blocks(blocks as u8, block_offset),
                    len,
                    blocks: blocks as u32,
                    batched: true,
                }
            }
            _ => {
                let len = remaining.min(WRITE_BLOCK_SIZE as u64) as usize;
                WriteRequest {
                    cdb: commands::send_block(len as u16, block_offset),
                    len,
                    blocks: 1,
                    batched: false,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_mode_follows_capability() {
        assert_eq!(ReadMode::for_capabilities(CapabilityFlags::empty(), 8), ReadMode::Legacy);
        assert_eq!(ReadMode::for_capabilities(CapabilityFlags::LARGE_SEND, 8), ReadMode::Legacy);
        assert_eq!(
            ReadMode::for_capabilities(CapabilityFlags::LARGE_RECEIVE, 8),
            ReadMode::Batched { blocks: 8 }
        );
        assert_eq!(ReadMode::for_capabilities(CapabilityFlags::LARGE_RECEIVE, 1), ReadMode::Legacy);
    }

    #[test]
    fn test_legacy_read_asks_for_exact_bytes() {
        let req = ReadMode::Legacy.request(3, 7, 100);
        assert_eq!(req.phase_len, 100);
        assert_eq!(req.blocks, 1);
        assert_eq!(req.cdb.as_bytes()[..7], [0xD1, 3, 0, 0, 0, 7, 0]);
    }

    #[test]
    fn test_batched_read_rounds_up_to_blocks() {
        let req = ReadMode::Batched { blocks: 8 }.request(1, 16, 5000);
        assert_eq!(req.blocks, 2);
        assert_eq!(req.phase_len, 8192);
        assert_eq!(req.cdb.as_bytes()[6], 2);
        assert_eq!(ReadMode::Batched { blocks: 8 }.chunk_size(), 32768);
    }

    #[test]
    fn test_write_batches_only_with_more_than_one_block() {
        let mode = WriteMode::Batched { max_blocks: 32 };

        let req = mode.request(0, 512 * 100);
        assert!(req.batched);
        assert_eq!(req.blocks, 32);
        assert_eq!(req.len, 512 * 32);

        let req = mode.request(0, 700);
        assert!(req.batched);
        assert_eq!(req.blocks, 2);
        assert_eq!(req.len, 700);

        let req = mode.request(4, 512);
        assert!(!req.batched);
        assert_eq!(req.cdb.as_bytes()[..6], [0xD4, 0x02, 0x00, 0, 0, 4]);
    }

    #[test]
    fn test_legacy_write_sends_tail_length() {
        let req = WriteMode::Legacy.request(9, 100);
        assert_eq!(req.len, 100);
        assert_eq!(req.cdb.as_bytes()[..6], [0xD4, 0, 100, 0, 0, 9]);
    }
}
