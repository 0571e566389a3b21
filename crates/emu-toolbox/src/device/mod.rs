//! Per-device session state: compatibility and negotiated capabilities.
//!
//! A session is created the first time a device is negotiated and then kept for the life of the
//! process. Nothing invalidates it; swapping the emulator on the same id needs a restart.

mod negotiation;

pub use negotiation::{parse_capabilities, parse_vendor_page};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::collaborators::Prompter;
use crate::scsi::{DeviceId, Executor};

bitflags! {
    /// Optional protocol features reported by the CAPABILITIES command.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct CapabilityFlags: u8 {
        /// SEND FILE accepts a multi-block batch.
        const LARGE_SEND = 0b0000_0001;
        /// READ FILE returns a multi-block batch.
        const LARGE_RECEIVE = 0b0000_0010;
    }
}

/// What we know about one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSession {
    /// The device identified itself, or the user chose to proceed anyway.
    pub compatibility_confirmed: bool,
    pub capability_flags: CapabilityFlags,
    /// API version byte from the vendor page, when the page was recognised.
    pub api_version: Option<u8>,
}

/// Sessions for every bus address.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: [Option<DeviceSession>; DeviceId::MAX as usize + 1],
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, device_id: DeviceId) -> Option<&DeviceSession> {
        self.sessions[usize::from(device_id.get())].as_ref()
    }

    /// Negotiated features of a device; empty until it has been checked.
    pub fn capabilities(&self, device_id: DeviceId) -> CapabilityFlags {
        self.get(device_id).map(|s| s.capability_flags).unwrap_or_default()
    }

    /// Cached lookup. False for any id outside 0–6 and for devices never negotiated.
    pub fn has_capability(&self, raw_id: u8, flag: CapabilityFlags) -> bool {
        DeviceId::new(raw_id).is_some_and(|id| self.capabilities(id).contains(flag))
    }

    /// Returns whether `device_id` may be used, negotiating on first call.
    ///
    /// The first call reads the vendor page, asks the user if the device isn't recognised, and
    /// on a usable device queries its capabilities. The outcome, including a "no" from the user,
    /// is remembered.
    pub fn check_compatible(
        &mut self,
        exec: &mut Executor,
        prompter: &mut dyn Prompter,
        device_id: DeviceId,
        signatures: &[String],
    ) -> bool {
        if let Some(session) = self.get(device_id) {
            return session.compatibility_confirmed;
        }
        let session = negotiation::negotiate(exec, prompter, device_id, signatures);
        self.sessions[usize::from(device_id.get())] = Some(session);
        session.compatibility_confirmed
    }
}
