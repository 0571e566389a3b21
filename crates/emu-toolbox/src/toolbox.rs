//! The controller: owns the bus, the per-device sessions, the current listing and the single
//! active transfer.
//!
//! Hosts call the operation methods from their UI handlers and [`Toolbox::tick`] from their idle
//! loop. While a transfer is active every other device operation is refused with
//! [`ToolboxError::Busy`] and the transfer is left alone.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::collaborators::{FileChooser, ListingDisplay, ProgressSink, Prompter, TypeSniffer};
use crate::config::ToolboxConfig;
use crate::device::{CapabilityFlags, DeviceSession, SessionTable};
use crate::error::ToolboxError;
use crate::listing::{self, DirectoryEntry, ListingKind};
use crate::media::{self, HostMedia, MountOutcome};
use crate::scsi::{DeviceId, Executor, ScsiBus};
use crate::transfer::{
    Direction, DownloadJob, ReadMode, TickOutcome, TransferProgress, TransferSummary, UploadJob, WriteMode,
};

/// Everything the controller calls out to.
pub struct Collaborators {
    pub prompter: Box<dyn Prompter>,
    pub progress: Box<dyn ProgressSink>,
    pub chooser: Box<dyn FileChooser>,
    pub display: Box<dyn ListingDisplay>,
    pub sniffer: Box<dyn TypeSniffer>,
    pub host_media: Box<dyn HostMedia>,
}

/// Positions picked from one specific listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    /// Generation of the listing the positions refer to.
    pub generation: u64,
    pub positions: Vec<usize>,
}

struct Listing {
    generation: u64,
    device_id: DeviceId,
    kind: ListingKind,
    entries: Vec<DirectoryEntry>,
}

enum ActiveJob {
    Download(DownloadJob),
    Upload(UploadJob),
}

impl ActiveJob {
    fn direction(&self) -> Direction {
        match self {
            Self::Download(_) => Direction::Download,
            Self::Upload(_) => Direction::Upload,
        }
    }
}

pub struct Toolbox {
    executor: Executor,
    config: ToolboxConfig,
    sessions: SessionTable,
    listing: Option<Listing>,
    generation: u64,
    job: Option<ActiveJob>,
    collaborators: Collaborators,
}

impl Toolbox {
    pub fn new(bus: Box<dyn ScsiBus>, config: ToolboxConfig, collaborators: Collaborators) -> Self {
        let executor = Executor::new(bus, config.completion_timeout());
        Self {
            executor,
            config,
            sessions: SessionTable::new(),
            listing: None,
            generation: 0,
            job: None,
            collaborators,
        }
    }

    pub fn config(&self) -> &ToolboxConfig {
        &self.config
    }

    pub fn session(&self, device_id: DeviceId) -> Option<&DeviceSession> {
        self.sessions.get(device_id)
    }

    /// Cached capability lookup; false for ids outside 0–6 and devices never negotiated.
    pub fn has_capability(&self, raw_id: u8, flag: CapabilityFlags) -> bool {
        self.sessions.has_capability(raw_id, flag)
    }

    pub fn is_busy(&self) -> bool {
        self.job.is_some()
    }

    /// Entries of the current listing, empty if there is none.
    pub fn entries(&self) -> &[DirectoryEntry] {
        self.listing.as_ref().map(|l| l.entries.as_slice()).unwrap_or_default()
    }

    /// Kind and device of the current listing.
    pub fn listing_of(&self) -> Option<(DeviceId, ListingKind)> {
        self.listing.as_ref().map(|l| (l.device_id, l.kind))
    }

    /// Ties `positions` to the current listing.
    pub fn selection(&self, positions: &[usize]) -> Result<Selection, ToolboxError> {
        let listing = self.listing.as_ref().ok_or(ToolboxError::NoListing)?;
        Ok(Selection {
            generation: listing.generation,
            positions: positions.to_vec(),
        })
    }

    fn ensure_idle(&self) -> Result<(), ToolboxError> {
        match &self.job {
            Some(job) => {
                debug!("toolbox: refusing request, {} in progress", job.direction());
                Err(ToolboxError::Busy {
                    active: job.direction(),
                })
            }
            None => Ok(()),
        }
    }

    fn ensure_compatible(&mut self, device_id: DeviceId) -> Result<(), ToolboxError> {
        let compatible = self.sessions.check_compatible(
            &mut self.executor,
            self.collaborators.prompter.as_mut(),
            device_id,
            &self.config.device_signatures,
        );
        if compatible { Ok(()) } else { Err(ToolboxError::UserDeclined) }
    }

    /// Negotiates with the device if needed, fetches a listing and shows it.
    ///
    /// A new listing invalidates every earlier [`Selection`], even if its contents didn't change.
    pub fn list(&mut self, device_id: DeviceId, kind: ListingKind) -> Result<&[DirectoryEntry], ToolboxError> {
        self.ensure_idle()?;
        self.ensure_compatible(device_id)?;
        self.refresh(device_id, kind)?;
        Ok(self.entries())
    }

    fn refresh(&mut self, device_id: DeviceId, kind: ListingKind) -> Result<(), ToolboxError> {
        let entries = listing::list(&mut self.executor, device_id, kind)?;
        self.generation += 1;
        self.collaborators.display.show(&entries);
        info!(
            "toolbox: listed {} {} entries on device {} (generation {})",
            entries.len(),
            kind,
            device_id,
            self.generation
        );
        self.listing = Some(Listing {
            generation: self.generation,
            device_id,
            kind,
            entries,
        });
        Ok(())
    }

    /// Checks a selection against the current listing and returns the entries it names.
    fn resolve(&self, selection: &Selection, expected: ListingKind) -> Result<(DeviceId, Vec<DirectoryEntry>), ToolboxError> {
        let listing = self.listing.as_ref().ok_or(ToolboxError::NoListing)?;
        if selection.generation != listing.generation {
            return Err(ToolboxError::StaleSelection);
        }
        if listing.kind != expected {
            return Err(ToolboxError::WrongListingKind {
                expected,
                actual: listing.kind,
            });
        }
        let entries = selection
            .positions
            .iter()
            .map(|&position| {
                listing
                    .entries
                    .get(position)
                    .cloned()
                    .ok_or(ToolboxError::InvalidEntry { position })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok((listing.device_id, entries))
    }

    /// Starts downloading the selected files into a directory the user picks.
    pub fn download(&mut self, selection: &Selection) -> Result<TransferProgress, ToolboxError> {
        self.ensure_idle()?;
        let (device_id, entries) = self.resolve(selection, ListingKind::Files)?;
        let destination = self
            .collaborators
            .chooser
            .pick_destination()
            .ok_or(ToolboxError::UserDeclined)?;

        let read_mode = ReadMode::for_capabilities(self.sessions.capabilities(device_id), self.config.download_batch());
        let job = DownloadJob::start(
            device_id,
            entries,
            &destination,
            read_mode,
            self.collaborators.prompter.as_mut(),
            self.collaborators.progress.as_mut(),
        )?;
        let progress = job.progress();
        self.job = Some(ActiveJob::Download(job));
        Ok(progress)
    }

    /// Starts uploading a file the user picks to the device's transfer directory.
    ///
    /// The collision check uses the cached file listing for this device, if there is one. It can
    /// be stale: a file created on the device since the last listing goes unnoticed.
    pub fn upload(&mut self, device_id: DeviceId) -> Result<TransferProgress, ToolboxError> {
        self.ensure_idle()?;
        self.ensure_compatible(device_id)?;
        let source = self
            .collaborators
            .chooser
            .pick_source()
            .ok_or(ToolboxError::UserDeclined)?;

        let cached: &[DirectoryEntry] = match &self.listing {
            Some(l) if l.device_id == device_id && l.kind == ListingKind::Files => &l.entries,
            _ => {
                debug!("toolbox: no cached file listing for device {}, skipping collision check", device_id);
                &[]
            }
        };
        let write_mode = WriteMode::for_capabilities(self.sessions.capabilities(device_id), self.config.upload_batch());
        let job = UploadJob::start(
            &mut self.executor,
            device_id,
            &source,
            cached,
            write_mode,
            self.collaborators.prompter.as_mut(),
            self.collaborators.progress.as_mut(),
        )?;
        let progress = job.progress();
        self.job = Some(ActiveJob::Upload(job));
        Ok(progress)
    }

    /// Switches the device to the selected image and ejects the host's view of the old one.
    pub fn mount(&mut self, selection: &Selection) -> Result<MountOutcome, ToolboxError> {
        self.ensure_idle()?;
        let (device_id, entries) = self.resolve(selection, ListingKind::Images)?;
        let Some(entry) = entries.first() else {
            return Err(ToolboxError::InvalidEntry { position: 0 });
        };
        media::mount_image(
            &mut self.executor,
            self.collaborators.host_media.as_mut(),
            &self.config,
            device_id,
            entry,
        )
    }

    pub fn progress(&self) -> Option<TransferProgress> {
        match self.job.as_ref()? {
            ActiveJob::Download(job) => Some(job.progress()),
            ActiveJob::Upload(job) => Some(job.progress()),
        }
    }

    /// Advances the active transfer by one chunk. `None` when nothing is running.
    ///
    /// The job is released when it finishes or fails. A finished upload is closed on the device
    /// and the file listing re-read, with any trouble doing so reported in the summary's issues.
    pub fn tick(&mut self) -> Result<Option<TickOutcome>, ToolboxError> {
        let Some(job) = self.job.as_mut() else {
            return Ok(None);
        };

        let result = match job {
            ActiveJob::Download(download) => download.tick(
                &mut self.executor,
                self.collaborators.progress.as_mut(),
                self.collaborators.sniffer.as_mut(),
            ),
            ActiveJob::Upload(upload) => upload.tick(&mut self.executor, self.collaborators.progress.as_mut()),
        };

        match result {
            Ok(TickOutcome::Continue) => Ok(Some(TickOutcome::Continue)),
            Ok(TickOutcome::Finished(summary)) => {
                let summary = self.finish(summary);
                Ok(Some(TickOutcome::Finished(summary)))
            }
            Err(e) => {
                if let Some(ActiveJob::Upload(mut upload)) = self.job.take() {
                    for issue in upload.end(&mut self.executor) {
                        warn!("toolbox: {} while closing failed upload", issue);
                    }
                }
                Err(e)
            }
        }
    }

    fn finish(&mut self, mut summary: TransferSummary) -> TransferSummary {
        let Some(job) = self.job.take() else {
            return summary;
        };
        if let ActiveJob::Upload(mut upload) = job {
            summary.issues.extend(upload.end(&mut self.executor));
            let device_id = upload.device_id();
            if let Err(e) = self.refresh(device_id, ListingKind::Files) {
                warn!("toolbox: couldn't re-list device {} after upload: {}", device_id, e);
                summary.issues.push(e);
            }
        }
        info!(
            "toolbox: {} {} finished, {} files, {} bytes, {} issues",
            summary.direction,
            summary.operation_id,
            summary.files,
            summary.bytes,
            summary.issues.len()
        );
        summary
    }

    /// Stops the active transfer, if any. Returns whether there was one.
    ///
    /// A half-written download is deleted; an interrupted upload is closed on the device but
    /// whatever it already received stays there.
    pub fn cancel(&mut self) -> bool {
        match self.job.take() {
            Some(ActiveJob::Download(mut download)) => {
                download.cancel();
                true
            }
            Some(ActiveJob::Upload(mut upload)) => {
                for issue in upload.end(&mut self.executor) {
                    warn!("toolbox: {} while cancelling upload", issue);
                }
                true
            }
            None => false,
        }
    }
}

impl Drop for Toolbox {
    fn drop(&mut self) {
        if self.job.is_some() {
            debug!("toolbox: dropped with an active job, cancelling it");
            self.cancel();
        }
    }
}
