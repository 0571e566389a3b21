//! Multi-file download state machine.

use log::{debug, info, warn};
use std::collections::{HashSet, VecDeque};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::finder_info::write_finder_info;
use super::wire::ReadMode;
use super::{Direction, TickOutcome, TransferProgress, TransferSummary, chunk_count, new_operation_id, percent};
use crate::collaborators::{DuplicateChoice, FileKind, ProgressSink, Prompter, TypeSniffer};
use crate::error::ToolboxError;
use crate::listing::DirectoryEntry;
use crate::scsi::commands::READ_BLOCK_SIZE;
use crate::scsi::{DataPhase, DeviceId, Executor};
use crate::validation::validate_local_name;

/// The file currently being written.
struct OpenFile {
    entry: DirectoryEntry,
    path: PathBuf,
    file: File,
    remaining: u64,
    block_offset: u32,
    kind: Option<FileKind>,
}

/// A download of one or more files into a local directory.
pub struct DownloadJob {
    operation_id: String,
    device_id: DeviceId,
    destination: PathBuf,
    queue: VecDeque<DirectoryEntry>,
    overwrite: bool,
    read_mode: ReadMode,
    buffer: Vec<u8>,
    current: Option<OpenFile>,
    chunks_done: u64,
    chunks_total: u64,
    files_done: usize,
    bytes_done: u64,
    finished: bool,
}

impl DownloadJob {
    /// Prepares a download of `entries` into `destination`.
    ///
    /// Names are checked before anything else. Then the destination is scanned once for
    /// collisions (ASCII case-insensitive); if there are any the user is asked a single question
    /// covering all of them. No device I/O happens here.
    pub fn start(
        device_id: DeviceId,
        entries: Vec<DirectoryEntry>,
        destination: &Path,
        read_mode: ReadMode,
        prompter: &mut dyn Prompter,
        progress: &mut dyn ProgressSink,
    ) -> Result<Self, ToolboxError> {
        for entry in &entries {
            validate_local_name(&entry.name)?;
        }

        let existing = existing_names(destination)?;
        let collisions: Vec<String> = entries
            .iter()
            .filter(|e| existing.contains(&e.name.to_ascii_lowercase()))
            .map(|e| e.name.clone())
            .collect();

        let mut queue: VecDeque<DirectoryEntry> = entries.into();
        let mut overwrite = false;
        if !collisions.is_empty() {
            match prompter.confirm_duplicates(&collisions) {
                DuplicateChoice::OverwriteAll => overwrite = true,
                DuplicateChoice::SkipAll => {
                    queue.retain(|e| !existing.contains(&e.name.to_ascii_lowercase()));
                }
                DuplicateChoice::Cancel => return Err(ToolboxError::UserDeclined),
            }
            debug!(
                "download: {} collisions in {}, choice overwrite={}",
                collisions.len(),
                destination.display(),
                overwrite
            );
        }

        let chunk_size = read_mode.chunk_size() as u64;
        let chunks_total = queue
            .iter()
            .map(|e| chunk_count(u64::from(e.size_bytes), chunk_size))
            .sum();

        let operation_id = new_operation_id();
        info!(
            "download: {} starting {} files ({} chunks) from device {} to {} ({:?})",
            operation_id,
            queue.len(),
            chunks_total,
            device_id,
            destination.display(),
            read_mode
        );

        progress.set_total(chunks_total);
        progress.set_percent(0);

        Ok(Self {
            operation_id,
            device_id,
            destination: destination.to_path_buf(),
            queue,
            overwrite,
            read_mode,
            buffer: vec![0u8; read_mode.chunk_size()],
            current: None,
            chunks_done: 0,
            chunks_total,
            files_done: 0,
            bytes_done: 0,
            finished: false,
        })
    }

    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Files still queued, not counting the one being written.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn progress(&self) -> TransferProgress {
        TransferProgress {
            operation_id: self.operation_id.clone(),
            direction: Direction::Download,
            current_file: self.current.as_ref().map(|f| f.entry.name.clone()),
            files_remaining: self.queue.len() + usize::from(self.current.is_some()),
            chunks_done: self.chunks_done,
            chunks_total: self.chunks_total,
            percent: percent(self.chunks_done, self.chunks_total),
        }
    }

    /// Does one unit of work: opens the next file, reads one chunk, or finishes the job.
    ///
    /// Any error aborts the whole job and deletes the file being written.
    pub fn tick(
        &mut self,
        exec: &mut Executor,
        progress: &mut dyn ProgressSink,
        sniffer: &mut dyn TypeSniffer,
    ) -> Result<TickOutcome, ToolboxError> {
        if self.finished {
            return Ok(TickOutcome::Finished(self.summary()));
        }

        let result = if self.current.is_some() {
            self.read_chunk(exec, progress, sniffer).map(|_| TickOutcome::Continue)
        } else if let Some(entry) = self.queue.pop_front() {
            self.open_next(entry, progress).map(|_| TickOutcome::Continue)
        } else {
            self.finished = true;
            self.buffer = Vec::new();
            info!(
                "download: {} completed {} files, {} bytes",
                self.operation_id, self.files_done, self.bytes_done
            );
            Ok(TickOutcome::Finished(self.summary()))
        };

        if let Err(e) = &result {
            warn!("download: {} aborted: {}", self.operation_id, e);
            self.cancel();
        }
        result
    }

    fn open_next(&mut self, entry: DirectoryEntry, progress: &mut dyn ProgressSink) -> Result<(), ToolboxError> {
        let path = self.destination.join(&entry.name);
        let file = create_file(&path, self.overwrite)?;
        debug!("download: {} opened {} ({} bytes)", self.operation_id, path.display(), entry.size_bytes);

        progress.set_current_name(&entry.name);
        self.current = Some(OpenFile {
            remaining: u64::from(entry.size_bytes),
            entry,
            path,
            file,
            block_offset: 0,
            kind: None,
        });
        Ok(())
    }

    fn read_chunk(
        &mut self,
        exec: &mut Executor,
        progress: &mut dyn ProgressSink,
        sniffer: &mut dyn TypeSniffer,
    ) -> Result<(), ToolboxError> {
        let Some(open) = self.current.as_mut() else {
            return Ok(());
        };

        if open.remaining > 0 {
            let want = open.remaining.min(self.read_mode.chunk_size() as u64) as usize;
            let request = self.read_mode.request(open.entry.device_index, open.block_offset, want);
            let buf = &mut self.buffer[..request.phase_len];
            let moved = exec.run(self.device_id, &request.cdb, DataPhase::read_blocks(buf, READ_BLOCK_SIZE))?;
            if moved < want {
                return Err(ToolboxError::protocol(
                    self.device_id,
                    format!("read of {} returned {} of {} bytes", open.entry.name, moved, want),
                ));
            }

            open.file
                .write_all(&self.buffer[..want])
                .map_err(|e| ToolboxError::filesystem(&open.path, &e))?;

            if open.block_offset == 0 {
                open.kind = sniffer.infer(&self.buffer[..want], &open.entry.name);
            }
            open.block_offset += request.blocks;
            open.remaining -= want as u64;
            self.bytes_done += want as u64;
        }

        self.chunks_done += 1;
        progress.set_percent(percent(self.chunks_done, self.chunks_total));

        if open.remaining == 0 {
            self.close_current()?;
        }
        Ok(())
    }

    /// Fixes the length, flushes, and applies any inferred kind to the finished file.
    fn close_current(&mut self) -> Result<(), ToolboxError> {
        let Some(open) = self.current.as_ref() else {
            return Ok(());
        };
        let size = u64::from(open.entry.size_bytes);
        open.file.set_len(size).map_err(|e| ToolboxError::filesystem(&open.path, &e))?;
        open.file.sync_all().map_err(|e| ToolboxError::filesystem(&open.path, &e))?;

        if let Some(open) = self.current.take() {
            drop(open.file);
            if let Some(kind) = open.kind
                && let Err(e) = write_finder_info(&open.path, &kind)
            {
                warn!("download: couldn't set file type on {}: {}", open.path.display(), e);
            }
            debug!("download: {} finished {}", self.operation_id, open.path.display());
        }
        self.files_done += 1;
        Ok(())
    }

    /// Stops the job. Safe to call in any state and more than once. A file in the middle of
    /// being written is closed and deleted.
    pub fn cancel(&mut self) {
        if let Some(open) = self.current.take() {
            drop(open.file);
            match fs::remove_file(&open.path) {
                Ok(()) => debug!("download: {} removed partial {}", self.operation_id, open.path.display()),
                Err(e) => warn!(
                    "download: {} couldn't remove partial {}: {}",
                    self.operation_id,
                    open.path.display(),
                    e
                ),
            }
        }
        if !self.finished {
            info!("download: {} stopped after {} files", self.operation_id, self.files_done);
        }
        self.queue.clear();
        self.buffer = Vec::new();
        self.finished = true;
    }

    fn summary(&self) -> TransferSummary {
        TransferSummary {
            operation_id: self.operation_id.clone(),
            direction: Direction::Download,
            files: self.files_done,
            bytes: self.bytes_done,
            issues: Vec::new(),
        }
    }
}

impl Drop for DownloadJob {
    fn drop(&mut self) {
        if self.current.is_some() {
            self.cancel();
        }
    }
}

/// Lowercased names of everything in `dir`.
fn existing_names(dir: &Path) -> Result<HashSet<String>, ToolboxError> {
    let entries = fs::read_dir(dir).map_err(|e| ToolboxError::filesystem(dir, &e))?;
    let mut names = HashSet::new();
    for entry in entries {
        let entry = entry.map_err(|e| ToolboxError::filesystem(dir, &e))?;
        names.insert(entry.file_name().to_string_lossy().to_ascii_lowercase());
    }
    Ok(names)
}

fn create_file(path: &Path, overwrite: bool) -> Result<File, ToolboxError> {
    let mut options = OpenOptions::new();
    options.write(true);
    if overwrite {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }
    options.open(path).map_err(|e| ToolboxError::filesystem(path, &e))
}
