//! Host-side collaborators the engines call out to: prompts, progress, file choosers, the
//! listing view and type inference.
//!
//! Everything here is synchronous and is only called between ticks or during `start`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::listing::DirectoryEntry;
use crate::scsi::DeviceId;

/// Answer to the "some of these already exist" question asked once per download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DuplicateChoice {
    /// Replace existing files when their turn comes.
    OverwriteAll,
    /// Drop every colliding item from the job.
    SkipAll,
    /// Abandon the download.
    Cancel,
}

/// Yes/no questions put to the user.
pub trait Prompter {
    /// Called once per download with every colliding name.
    fn confirm_duplicates(&mut self, names: &[String]) -> DuplicateChoice;

    /// Called when an upload's name already appears in the device listing.
    fn confirm_upload_overwrite(&mut self, name: &str) -> bool;

    /// Called at most once per device when it doesn't identify as a supported emulator.
    fn confirm_unrecognized_device(&mut self, device_id: DeviceId) -> bool;
}

/// Receives transfer progress.
pub trait ProgressSink {
    fn set_total(&mut self, total: u64);
    fn set_percent(&mut self, percent: u8);
    fn set_current_name(&mut self, name: &str);
}

/// Picks local paths.
pub trait FileChooser {
    /// Destination directory for a download.
    fn pick_destination(&mut self) -> Option<PathBuf>;
    /// Source file for an upload.
    fn pick_source(&mut self) -> Option<PathBuf>;
}

/// Shows a fresh listing.
pub trait ListingDisplay {
    fn show(&mut self, entries: &[DirectoryEntry]);
}

/// Classic Mac type and creator codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileKind {
    pub type_code: [u8; 4],
    pub creator: [u8; 4],
}

/// Guesses a file's kind from its first chunk and name.
pub trait TypeSniffer {
    fn infer(&mut self, first_chunk: &[u8], name: &str) -> Option<FileKind>;
}

/// Sniffer that never infers anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTypeSniffer;

impl TypeSniffer for NoTypeSniffer {
    fn infer(&mut self, _first_chunk: &[u8], _name: &str) -> Option<FileKind> {
        None
    }
}

/// Progress sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn set_total(&mut self, _total: u64) {}
    fn set_percent(&mut self, _percent: u8) {}
    fn set_current_name(&mut self, _name: &str) {}
}

/// Chooser that always hands back fixed paths, for headless use.
#[derive(Debug, Default, Clone)]
pub struct FixedChooser {
    pub destination: Option<PathBuf>,
    pub source: Option<PathBuf>,
}

impl FixedChooser {
    pub fn new(destination: Option<&Path>, source: Option<&Path>) -> Self {
        Self {
            destination: destination.map(Path::to_path_buf),
            source: source.map(Path::to_path_buf),
        }
    }
}

impl FileChooser for FixedChooser {
    fn pick_destination(&mut self) -> Option<PathBuf> {
        self.destination.clone()
    }

    fn pick_source(&mut self) -> Option<PathBuf> {
        self.source.clone()
    }
}
