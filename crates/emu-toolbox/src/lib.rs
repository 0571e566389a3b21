//! Host-side client for SCSI storage emulators that speak the vendor "toolbox" command set.
//!
//! # Architecture
//!
//! - `scsi`: stage-by-stage bus abstraction, the transaction executor, CDB encoders and sense decoding
//! - `device`: per-device compatibility and capability negotiation
//! - `listing`: parsing and sorting of the fixed 40-byte listing records
//! - `transfer`: the chunked download and upload state machines
//! - `media`: image switching plus best-effort local eject
//! - `toolbox`: the controller that owns the bus, the listing cache and the single active job
//!
//! Everything is single-threaded and cooperative: the host calls [`Toolbox::tick`] once per idle
//! slice and every call moves at most one chunk of data.

// Warn on redundant path prefixes (e.g., std::path::Path when Path is imported)
#![warn(unused_qualifications)]
// Use log::* macros instead of println!/eprintln! for proper log level control
#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod collaborators;
pub mod config;
pub mod device;
pub mod error;
pub mod listing;
pub mod media;
pub mod scsi;
#[cfg(test)]
mod test_support;
pub mod toolbox;
pub mod transfer;
pub mod validation;
#[cfg(any(test, feature = "virtual-device"))]
pub mod virtual_device;

pub use collaborators::{DuplicateChoice, FileChooser, ListingDisplay, ProgressSink, Prompter};
pub use config::ToolboxConfig;
pub use device::{CapabilityFlags, DeviceSession};
pub use error::ToolboxError;
pub use listing::{DirectoryEntry, ListingKind};
pub use media::{HostMedia, MountOutcome};
pub use scsi::{DeviceId, ScsiBus, SenseCode, Stage, TransportError};
pub use toolbox::{Collaborators, Selection, Toolbox};
pub use transfer::{TickOutcome, TransferProgress};
pub use validation::ValidationError;
