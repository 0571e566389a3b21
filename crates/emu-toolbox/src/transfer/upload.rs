//! Single-file upload state machine.

use log::{debug, info, warn};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use super::wire::WriteMode;
use super::{Direction, TickOutcome, TransferProgress, TransferSummary, chunk_count, new_operation_id, percent};
use crate::collaborators::{ProgressSink, Prompter};
use crate::error::ToolboxError;
use crate::listing::DirectoryEntry;
use crate::scsi::commands::{self, WRITE_BLOCK_SIZE, encode_name_field};
use crate::scsi::{DataPhase, DeviceId, Executor};
use crate::validation::{validate_source_size, validate_upload_name};

/// An upload of one local file to the device's transfer directory.
///
/// Once [`start`](Self::start) succeeds the device holds an open upload until
/// [`end`](Self::end) sends END UPLOAD. Dropping the job can't reach the bus, so the owner must
/// call `end`; [`Toolbox`](crate::Toolbox) does so on finish, failure, cancel and drop.
pub struct UploadJob {
    operation_id: String,
    device_id: DeviceId,
    name: String,
    source_path: PathBuf,
    source: Option<File>,
    len: u64,
    /// Bytes the device has accepted; also where the next read starts.
    position: u64,
    block_offset: u32,
    write_mode: WriteMode,
    buffer: Vec<u8>,
    ended: bool,
}

impl UploadJob {
    /// Validates, checks for a name collision, opens the source and sends BEGIN UPLOAD.
    ///
    /// `listing` is the cached transfer-directory listing; a collision with it needs the user's
    /// permission to overwrite. Nothing is sent to the device unless every check passes.
    pub fn start(
        exec: &mut Executor,
        device_id: DeviceId,
        source_path: &Path,
        listing: &[DirectoryEntry],
        write_mode: WriteMode,
        prompter: &mut dyn Prompter,
        progress: &mut dyn ProgressSink,
    ) -> Result<Self, ToolboxError> {
        let name = source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        validate_upload_name(&name)?;

        let metadata = std::fs::metadata(source_path).map_err(|e| ToolboxError::filesystem(source_path, &e))?;
        let len = metadata.len();
        validate_source_size(len)?;

        if listing.iter().any(|e| e.name.eq_ignore_ascii_case(&name)) && !prompter.confirm_upload_overwrite(&name) {
            debug!("upload: user declined to overwrite {}", name);
            return Err(ToolboxError::UserDeclined);
        }

        let source = File::open(source_path).map_err(|e| ToolboxError::filesystem(source_path, &e))?;

        let field = encode_name_field(&name);
        exec.run(device_id, &commands::begin_upload(), DataPhase::write(&field))?;

        let operation_id = new_operation_id();
        info!(
            "upload: {} starting {} ({} bytes) to device {} ({:?})",
            operation_id, name, len, device_id, write_mode
        );

        let max_len = match write_mode {
            WriteMode::Legacy => WRITE_BLOCK_SIZE,
            WriteMode::Batched { max_blocks } => usize::from(max_blocks) * WRITE_BLOCK_SIZE,
        };

        progress.set_current_name(&name);
        progress.set_total(chunk_count(len, WRITE_BLOCK_SIZE as u64));
        progress.set_percent(0);

        Ok(Self {
            operation_id,
            device_id,
            name,
            source_path: source_path.to_path_buf(),
            source: Some(source),
            len,
            position: 0,
            block_offset: 0,
            write_mode,
            buffer: vec![0u8; max_len],
            ended: false,
        })
    }

    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Local read position: the bytes the device has accepted so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn progress(&self) -> TransferProgress {
        let chunks_total = chunk_count(self.len, WRITE_BLOCK_SIZE as u64);
        let chunks_done = if self.position >= self.len {
            chunks_total
        } else {
            u64::from(self.block_offset)
        };
        TransferProgress {
            operation_id: self.operation_id.clone(),
            direction: Direction::Upload,
            current_file: (!self.ended).then(|| self.name.clone()),
            files_remaining: usize::from(!self.ended),
            chunks_done,
            chunks_total,
            percent: percent(self.position, self.len),
        }
    }

    /// Sends the next block or batch. Returns `Finished` once every byte has been accepted; the
    /// caller still has to [`end`](Self::end) the job.
    pub fn tick(&mut self, exec: &mut Executor, progress: &mut dyn ProgressSink) -> Result<TickOutcome, ToolboxError> {
        if self.ended || self.position >= self.len {
            return Ok(TickOutcome::Finished(self.summary(Vec::new())));
        }

        let Some(source) = self.source.as_mut() else {
            return Ok(TickOutcome::Finished(self.summary(Vec::new())));
        };

        let request = self.write_mode.request(self.block_offset, self.len - self.position);
        let buf = &mut self.buffer[..request.len];
        source
            .seek(SeekFrom::Start(self.position))
            .map_err(|e| ToolboxError::filesystem(&self.source_path, &e))?;
        source
            .read_exact(buf)
            .map_err(|e| ToolboxError::filesystem(&self.source_path, &e))?;

        let phase = if request.batched {
            DataPhase::write_blocks(buf, WRITE_BLOCK_SIZE)
        } else {
            DataPhase::write(buf)
        };
        let moved = exec.run(self.device_id, &request.cdb, phase)?;

        let (accepted_bytes, accepted_blocks) = accepted(moved, request.len, request.blocks);
        if accepted_blocks == 0 {
            return Err(ToolboxError::protocol(
                self.device_id,
                format!("device accepted none of {} blocks", request.blocks),
            ));
        }
        if accepted_bytes < request.len {
            debug!(
                "upload: {} device took {} of {} blocks, rewinding {} bytes",
                self.operation_id,
                accepted_blocks,
                request.blocks,
                request.len - accepted_bytes
            );
        }

        self.position += accepted_bytes as u64;
        self.block_offset += accepted_blocks;
        progress.set_percent(percent(self.position, self.len));

        if self.position >= self.len {
            info!("upload: {} sent {} bytes of {}", self.operation_id, self.len, self.name);
            return Ok(TickOutcome::Finished(self.summary(Vec::new())));
        }
        Ok(TickOutcome::Continue)
    }

    /// Closes the remote and local sides. Safe to call in any state and more than once.
    ///
    /// Failures here don't undo anything, so they are returned as issues rather than errors.
    /// The remote END is sent even when the upload was interrupted.
    pub fn end(&mut self, exec: &mut Executor) -> Vec<ToolboxError> {
        if self.ended {
            return Vec::new();
        }
        self.ended = true;

        let mut issues = Vec::new();
        if let Err(e) = exec.run(self.device_id, &commands::end_upload(), DataPhase::None) {
            warn!("upload: {} couldn't close {} on the device: {}", self.operation_id, self.name, e);
            issues.push(e);
        }
        self.source = None;
        self.buffer = Vec::new();
        debug!("upload: {} ended at {} of {} bytes", self.operation_id, self.position, self.len);
        issues
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Summary of the job so far, carrying `issues` from [`end`](Self::end).
    pub fn summary(&self, issues: Vec<ToolboxError>) -> TransferSummary {
        TransferSummary {
            operation_id: self.operation_id.clone(),
            direction: Direction::Upload,
            files: usize::from(self.position >= self.len),
            bytes: self.position,
            issues,
        }
    }
}

impl Drop for UploadJob {
    fn drop(&mut self) {
        if !self.ended {
            warn!(
                "upload: {} dropped without END UPLOAD, device {} keeps {} open",
                self.operation_id, self.device_id, self.name
            );
        }
    }
}

/// Whole bytes and blocks the device took from a send of `len` bytes covering `blocks` blocks.
///
/// A full transfer counts every block including a partial tail. A short one only counts whole
/// blocks, so the tail of a partly accepted block is resent.
fn accepted(moved: usize, len: usize, blocks: u32) -> (usize, u32) {
    if moved >= len {
        return (len, blocks);
    }
    let whole = moved / WRITE_BLOCK_SIZE;
    (whole * WRITE_BLOCK_SIZE, whole as u32)
}
