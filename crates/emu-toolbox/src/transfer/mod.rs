//! Chunked transfers between the host and the device.
//!
//! Jobs are plain owned values. Each `tick` moves at most one chunk and returns, so a host event
//! loop stays responsive; cancelling between ticks is always safe.

mod download;
mod finder_info;
mod upload;
mod wire;

#[cfg(test)]
mod download_test;

pub use download::DownloadJob;
pub use finder_info::{encode_finder_info, write_finder_info};
pub use upload::UploadJob;
pub use wire::{ReadMode, WriteMode};

use serde::{Deserialize, Serialize};

use crate::error::ToolboxError;

/// Which way a transfer moves data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    Download,
    Upload,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Download => write!(f, "download"),
            Self::Upload => write!(f, "upload"),
        }
    }
}

/// Point-in-time view of a running job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgress {
    pub operation_id: String,
    pub direction: Direction,
    pub current_file: Option<String>,
    /// Files not yet finished, including the current one.
    pub files_remaining: usize,
    pub chunks_done: u64,
    pub chunks_total: u64,
    /// Percentage complete (0-100)
    pub percent: u8,
}

/// What a finished job did.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSummary {
    pub operation_id: String,
    pub direction: Direction,
    pub files: usize,
    pub bytes: u64,
    /// Problems that didn't stop the job, such as a failed remote close.
    pub issues: Vec<ToolboxError>,
}

/// Result of one tick.
#[derive(Debug, Clone)]
pub enum TickOutcome {
    /// More work remains; tick again.
    Continue,
    Finished(TransferSummary),
}

/// Progress units for one item: one per chunk, and at least one even for an empty file.
pub fn chunk_count(size: u64, chunk_size: u64) -> u64 {
    if chunk_size == 0 {
        return 1;
    }
    size.div_ceil(chunk_size).max(1)
}

pub(crate) fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    (done.min(total) * 100 / total) as u8
}

pub(crate) fn new_operation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
