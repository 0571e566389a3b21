//! First-contact negotiation: vendor page identification and the capability query.

use log::{debug, info, warn};

use super::{CapabilityFlags, DeviceSession};
use crate::collaborators::Prompter;
use crate::scsi::commands::{self, CAPABILITIES_LEN, MODE_HEADER_LEN, VENDOR_PAGE, VENDOR_PAGE_LEN};
use crate::scsi::{DataPhase, DeviceId, Executor};

/// Page length byte of the vendor page (page size minus its two-byte header).
const VENDOR_PAGE_LENGTH_FIELD: u8 = (VENDOR_PAGE_LEN - 2) as u8;

pub(super) fn negotiate(
    exec: &mut Executor,
    prompter: &mut dyn Prompter,
    device_id: DeviceId,
    signatures: &[String],
) -> DeviceSession {
    let api_version = read_vendor_page(exec, device_id, signatures);
    let compatibility_confirmed = match api_version {
        Some(version) => {
            info!("negotiate: device {} identified, API version {}", device_id, version);
            true
        }
        None => {
            let proceed = prompter.confirm_unrecognized_device(device_id);
            info!(
                "negotiate: device {} not recognised, user {} to proceed",
                device_id,
                if proceed { "chose" } else { "declined" }
            );
            proceed
        }
    };

    let capability_flags = if compatibility_confirmed {
        query_capabilities(exec, device_id)
    } else {
        CapabilityFlags::empty()
    };

    DeviceSession {
        compatibility_confirmed,
        capability_flags,
        api_version,
    }
}

fn read_vendor_page(exec: &mut Executor, device_id: DeviceId, signatures: &[String]) -> Option<u8> {
    let mut reply = [0u8; MODE_HEADER_LEN + VENDOR_PAGE_LEN];
    match exec.execute(device_id, &commands::mode_sense_vendor_page(), DataPhase::read(&mut reply)) {
        Ok(moved) => parse_vendor_page(&reply[..moved.min(reply.len())], signatures),
        Err(e) => {
            debug!("negotiate: device {} has no vendor page: {}", device_id, e);
            // Clear any pending check condition so the next command isn't rejected with it
            let _ = exec.request_sense(device_id);
            None
        }
    }
}

/// Checks a MODE SENSE(6) reply for the vendor identification page and returns its API version.
///
/// The page must have code 0x31, length 40 and an identification string starting with one of
/// `signatures`. Anything else, including a truncated reply, is `None`.
pub fn parse_vendor_page(reply: &[u8], signatures: &[String]) -> Option<u8> {
    if reply.len() < MODE_HEADER_LEN {
        return None;
    }
    let descriptors = usize::from(reply[3]);
    let page = reply.get(MODE_HEADER_LEN + descriptors..)?;
    if page.len() < VENDOR_PAGE_LEN {
        return None;
    }
    if page[0] & 0x3F != VENDOR_PAGE || page[1] != VENDOR_PAGE_LENGTH_FIELD {
        return None;
    }
    let ident = &page[2..VENDOR_PAGE_LEN - 1];
    if !signatures.iter().any(|sig| !sig.is_empty() && ident.starts_with(sig.as_bytes())) {
        return None;
    }
    Some(page[VENDOR_PAGE_LEN - 1])
}

fn query_capabilities(exec: &mut Executor, device_id: DeviceId) -> CapabilityFlags {
    let mut reply = [0u8; CAPABILITIES_LEN];
    match exec.execute(device_id, &commands::get_capabilities(), DataPhase::read(&mut reply)) {
        Ok(moved) => {
            let flags = parse_capabilities(&reply[..moved.min(reply.len())]);
            info!("negotiate: device {} capabilities {:?}", device_id, flags);
            flags
        }
        Err(e) => {
            debug!("negotiate: device {} doesn't answer the capability query: {}", device_id, e);
            let _ = exec.request_sense(device_id);
            CapabilityFlags::empty()
        }
    }
}

/// Reads the capability byte from a CAPABILITIES reply.
///
/// Bytes 1–7 must all be zero. Firmware that predates the query may answer the same opcode with
/// something else entirely, so any other shape means no extended capabilities.
pub fn parse_capabilities(reply: &[u8]) -> CapabilityFlags {
    if reply.len() != CAPABILITIES_LEN {
        warn!("negotiate: capability reply is {} bytes, ignoring it", reply.len());
        return CapabilityFlags::empty();
    }
    if reply[1..].iter().any(|b| *b != 0) {
        warn!("negotiate: capability reply has non-zero reserved bytes, ignoring it");
        return CapabilityFlags::empty();
    }
    CapabilityFlags::from_bits_truncate(reply[0])
}
