//! In-memory emulator that answers the toolbox command set on one bus address.
//!
//! It implements [`ScsiBus`] directly, so an [`Executor`](crate::scsi::Executor) built on it
//! runs the real transaction sequencing. State lives behind an `Arc<Mutex<_>>` shared by clones:
//! hand one clone to the executor and keep another to seed files, inject faults and inspect
//! what the host did.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::scsi::commands::{
    CAPABILITIES_LEN, MODE_HEADER_LEN, NAME_FIELD_LEN, READ_BLOCK_SIZE, RECORD_LEN, SENSE_LEN, VENDOR_PAGE,
    VENDOR_PAGE_LEN, WRITE_BLOCK_SIZE, opcode,
};
use crate::scsi::{Completion, DataProgram, DeviceId, ScsiBus, Stage};

/// Status byte for CHECK CONDITION.
const CHECK_CONDITION: u8 = 0x02;
/// Detail reported when nothing answers at the selected address.
const NO_TARGET: u16 = 0x0002;

/// A failure to inject into the next matching command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The given stage reports `detail`. Only command, data and completion can be targeted.
    Stage { stage: Stage, detail: u16 },
    /// The command completes with CHECK CONDITION and this sense.
    CheckCondition { key: u8, asc: u8, ascq: u8 },
}

#[derive(Debug, Clone)]
struct VirtualFile {
    index: u8,
    is_file: bool,
    name: String,
    data: Vec<u8>,
}

#[derive(Debug, Clone)]
struct Injection {
    opcode: u8,
    skip: usize,
    fault: Fault,
}

#[derive(Debug, Clone, Copy)]
struct Sense {
    key: u8,
    asc: u8,
    ascq: u8,
}

#[derive(Debug, Default)]
struct VirtualState {
    files: Vec<VirtualFile>,
    images: Vec<VirtualFile>,
    signature: Option<String>,
    api_version: u8,
    capabilities: Option<[u8; CAPABILITIES_LEN]>,
    /// Most 512-byte blocks a batched send will take.
    accept_limit: Option<u8>,
    /// Most bytes a LIST reply carries, whatever COUNT said.
    list_reply_limit: Option<usize>,
    mounted_image: Option<u8>,
    upload: Option<(String, Vec<u8>)>,
    injections: Vec<Injection>,
    commands: Vec<Vec<u8>>,

    // Per-transaction state
    selected: bool,
    cdb: Vec<u8>,
    armed: Option<Fault>,
    check: Option<Sense>,
    pending_sense: Option<Sense>,
}

/// An emulated toolbox device.
#[derive(Clone)]
pub struct VirtualDevice {
    id: DeviceId,
    state: Arc<Mutex<VirtualState>>,
}

impl VirtualDevice {
    /// Poison is ignored: the state is plain bytes and counters, and a panicking test leaves
    /// nothing behind that matters to another.
    fn state(&self) -> MutexGuard<'_, VirtualState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// A device with no vendor page and no capabilities, like an unrecognised target.
    pub fn new(id: DeviceId) -> Self {
        Self {
            id,
            state: Arc::new(Mutex::new(VirtualState::default())),
        }
    }

    /// A device that identifies itself with `signature` and `api_version`.
    pub fn identified(id: DeviceId, signature: &str, api_version: u8) -> Self {
        let device = Self::new(id);
        {
            let mut state = device.state();
            state.signature = Some(signature.to_string());
            state.api_version = api_version;
        }
        device
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn with_file(self, index: u8, name: &str, data: &[u8]) -> Self {
        self.state().files.push(VirtualFile {
            index,
            is_file: true,
            name: name.to_string(),
            data: data.to_vec(),
        });
        self
    }

    pub fn with_directory(self, index: u8, name: &str) -> Self {
        self.state().files.push(VirtualFile {
            index,
            is_file: false,
            name: name.to_string(),
            data: Vec::new(),
        });
        self
    }

    pub fn with_image(self, index: u8, name: &str, size: usize) -> Self {
        self.state().images.push(VirtualFile {
            index,
            is_file: true,
            name: name.to_string(),
            data: vec![0u8; size],
        });
        self
    }

    /// Sets the raw 8-byte CAPABILITIES reply. Without one the command is rejected.
    pub fn with_capabilities(self, reply: [u8; CAPABILITIES_LEN]) -> Self {
        self.state().capabilities = Some(reply);
        self
    }

    /// Caps how many blocks a batched send accepts.
    pub fn with_accept_limit(self, blocks: u8) -> Self {
        self.state().accept_limit = Some(blocks);
        self
    }

    /// Cuts every LIST reply off after `bytes`, as a device whose directory shrank between
    /// COUNT and LIST would.
    pub fn with_list_reply_limit(self, bytes: usize) -> Self {
        self.state().list_reply_limit = Some(bytes);
        self
    }

    /// Fails the next command with `opcode`.
    pub fn inject(&self, opcode: u8, fault: Fault) {
        self.inject_after(opcode, 0, fault);
    }

    /// Lets `skip` commands with `opcode` through, then fails the next one.
    pub fn inject_after(&self, opcode: u8, skip: usize, fault: Fault) {
        self.state()
            .injections
            .push(Injection { opcode, skip, fault });
    }

    /// Removes a file from the device without the host knowing.
    pub fn remove_file(&self, name: &str) {
        self.state().files.retain(|f| f.name != name);
    }

    /// Contents of a file in the transfer directory.
    pub fn file(&self, name: &str) -> Option<Vec<u8>> {
        let state = self.state();
        state.files.iter().find(|f| f.name == name).map(|f| f.data.clone())
    }

    pub fn upload_in_progress(&self) -> bool {
        self.state().upload.is_some()
    }

    pub fn mounted_image(&self) -> Option<u8> {
        self.state().mounted_image
    }

    /// Every CDB received, in order.
    pub fn commands(&self) -> Vec<Vec<u8>> {
        self.state().commands.clone()
    }

    pub fn count_of(&self, op: u8) -> usize {
        self.state()
            .commands
            .iter()
            .filter(|c| c.first() == Some(&op))
            .count()
    }
}

impl VirtualState {
    fn fail(&mut self, key: u8, asc: u8, ascq: u8) {
        self.check = Some(Sense { key, asc, ascq });
    }

    fn stage_fault(&self, wanted: Stage) -> Option<u16> {
        match self.armed {
            Some(Fault::Stage { stage, detail }) if stage == wanted => Some(detail),
            _ => None,
        }
    }

    fn arm(&mut self, op: u8) {
        let Some(pos) = self.injections.iter().position(|i| i.opcode == op) else {
            return;
        };
        if self.injections[pos].skip > 0 {
            self.injections[pos].skip -= 1;
            return;
        }
        let injection = self.injections.remove(pos);
        if let Fault::CheckCondition { key, asc, ascq } = injection.fault {
            self.fail(key, asc, ascq);
        }
        self.armed = Some(injection.fault);
    }

    fn directory(&self, op: u8) -> &[VirtualFile] {
        if matches!(op, opcode::COUNT_IMAGES | opcode::LIST_IMAGES) {
            &self.images
        } else {
            &self.files
        }
    }

    fn reply(&mut self) -> Vec<u8> {
        let op = self.cdb[0];
        match op {
            opcode::REQUEST_SENSE => {
                let sense = self.pending_sense.take().unwrap_or(Sense { key: 0, asc: 0, ascq: 0 });
                let mut data = vec![0u8; SENSE_LEN];
                data[0] = 0x70;
                data[2] = sense.key;
                data[7] = (SENSE_LEN - 8) as u8;
                data[12] = sense.asc;
                data[13] = sense.ascq;
                data
            }
            opcode::MODE_SENSE_6 => match self.signature.clone() {
                Some(signature) if self.cdb[2] & 0x3F == VENDOR_PAGE => {
                    let mut data = vec![0u8; MODE_HEADER_LEN + VENDOR_PAGE_LEN];
                    data[0] = (data.len() - 1) as u8;
                    let page = &mut data[MODE_HEADER_LEN..];
                    page[0] = VENDOR_PAGE;
                    page[1] = (VENDOR_PAGE_LEN - 2) as u8;
                    let ident = signature.as_bytes();
                    let len = ident.len().min(VENDOR_PAGE_LEN - 3);
                    page[2..2 + len].copy_from_slice(&ident[..len]);
                    page[VENDOR_PAGE_LEN - 1] = self.api_version;
                    data
                }
                _ => {
                    self.fail(0x05, 0x24, 0x00);
                    Vec::new()
                }
            },
            opcode::COUNT_FILES | opcode::COUNT_IMAGES => {
                vec![self.directory(op).len().min(255) as u8]
            }
            opcode::LIST_FILES | opcode::LIST_IMAGES => {
                let mut data = Vec::new();
                for file in self.directory(op) {
                    let mut record = [0u8; RECORD_LEN];
                    record[0] = file.index;
                    record[1] = u8::from(file.is_file);
                    let name = file.name.as_bytes();
                    let len = name.len().min(NAME_FIELD_LEN);
                    record[2..2 + len].copy_from_slice(&name[..len]);
                    record[36..40].copy_from_slice(&(file.data.len() as u32).to_be_bytes());
                    data.extend_from_slice(&record);
                }
                if let Some(limit) = self.list_reply_limit {
                    data.truncate(limit);
                }
                data
            }
            opcode::READ_FILE => {
                let index = self.cdb[1];
                let offset = u32::from_be_bytes([self.cdb[2], self.cdb[3], self.cdb[4], self.cdb[5]]) as usize;
                let blocks = usize::from(self.cdb[6]).max(1);
                let Some(pos) = self.files.iter().position(|f| f.index == index && f.is_file) else {
                    self.fail(0x05, 0x24, 0x00);
                    return Vec::new();
                };
                let file = &self.files[pos];
                let start = (offset * READ_BLOCK_SIZE).min(file.data.len());
                let end = (start + blocks * READ_BLOCK_SIZE).min(file.data.len());
                let mut data = file.data[start..end].to_vec();
                data.resize(blocks * READ_BLOCK_SIZE, 0);
                data
            }
            opcode::CAPABILITIES => match self.capabilities {
                Some(reply) if self.cdb[1] == 1 => reply.to_vec(),
                _ => {
                    self.fail(0x05, 0x20, 0x00);
                    Vec::new()
                }
            },
            _ => {
                self.fail(0x05, 0x20, 0x00);
                Vec::new()
            }
        }
    }

    fn accept(&mut self, buf: &[u8]) -> usize {
        let op = self.cdb[0];
        match op {
            opcode::BEGIN_UPLOAD => {
                let field = &buf[..buf.len().min(NAME_FIELD_LEN)];
                let len = field.iter().position(|b| *b == 0).unwrap_or(field.len());
                let name = String::from_utf8_lossy(&field[..len]).into_owned();
                self.upload = Some((name, Vec::new()));
                buf.len()
            }
            opcode::SEND_FILE => {
                let block = u32::from_be_bytes([0, self.cdb[3], self.cdb[4], self.cdb[5]]) as usize;
                let batched = self.cdb[6];
                let accepted = if batched > 0 {
                    let blocks = self.accept_limit.map_or(batched, |limit| batched.min(limit));
                    buf.len().min(usize::from(blocks) * WRITE_BLOCK_SIZE)
                } else {
                    let len = usize::from(u16::from_be_bytes([self.cdb[1], self.cdb[2]]));
                    buf.len().min(len)
                };
                if self.upload.is_none() {
                    self.fail(0x05, 0x2C, 0x00);
                    return 0;
                }
                let Some((_, data)) = self.upload.as_mut() else {
                    return 0;
                };
                let start = block * WRITE_BLOCK_SIZE;
                if data.len() < start + accepted {
                    data.resize(start + accepted, 0);
                }
                data[start..start + accepted].copy_from_slice(&buf[..accepted]);
                accepted
            }
            _ => {
                self.fail(0x05, 0x20, 0x00);
                0
            }
        }
    }

    /// Commands with no data phase take effect at completion.
    fn finish_command(&mut self) {
        if self.check.is_some() {
            return;
        }
        match self.cdb.first().copied() {
            Some(opcode::END_UPLOAD) => {
                let Some((name, data)) = self.upload.take() else {
                    return;
                };
                if let Some(existing) = self.files.iter_mut().find(|f| f.name.eq_ignore_ascii_case(&name)) {
                    existing.data = data;
                } else {
                    let index = self.files.iter().map(|f| f.index).max().map_or(0, |i| i.saturating_add(1));
                    self.files.push(VirtualFile {
                        index,
                        is_file: true,
                        name,
                        data,
                    });
                }
            }
            Some(opcode::SELECT_IMAGE) => {
                let index = self.cdb[1];
                if self.images.iter().any(|i| i.index == index) {
                    self.mounted_image = Some(index);
                } else {
                    self.fail(0x05, 0x24, 0x00);
                }
            }
            _ => {}
        }
    }
}

impl ScsiBus for VirtualDevice {
    fn arbitrate(&mut self) -> Result<(), u16> {
        let mut state = self.state();
        state.selected = false;
        state.cdb.clear();
        state.armed = None;
        state.check = None;
        Ok(())
    }

    fn select(&mut self, target: DeviceId) -> Result<(), u16> {
        if target != self.id {
            return Err(NO_TARGET);
        }
        self.state().selected = true;
        Ok(())
    }

    fn command(&mut self, cdb: &[u8]) -> Result<(), u16> {
        let mut state = self.state();
        state.commands.push(cdb.to_vec());
        state.cdb = cdb.to_vec();
        state.arm(cdb[0]);
        match state.stage_fault(Stage::Command) {
            Some(detail) => Err(detail),
            None => Ok(()),
        }
    }

    fn data_in(&mut self, buf: &mut [u8], program: DataProgram) -> Result<usize, u16> {
        let mut state = self.state();
        if let Some(detail) = state.stage_fault(Stage::Data) {
            return Err(detail);
        }
        if state.check.is_some() {
            return Ok(0);
        }
        let reply = state.reply();
        let moved = reply.len().min(program.len()).min(buf.len());
        buf[..moved].copy_from_slice(&reply[..moved]);
        Ok(moved)
    }

    fn data_out(&mut self, buf: &[u8], program: DataProgram) -> Result<usize, u16> {
        let mut state = self.state();
        if let Some(detail) = state.stage_fault(Stage::Data) {
            return Err(detail);
        }
        if state.check.is_some() {
            return Ok(0);
        }
        let len = program.len().min(buf.len());
        Ok(state.accept(&buf[..len]))
    }

    fn complete(&mut self, _timeout: Duration) -> Result<Completion, u16> {
        let mut state = self.state();
        if let Some(detail) = state.stage_fault(Stage::Completion) {
            return Err(detail);
        }
        if state.selected {
            state.finish_command();
        }
        state.selected = false;
        match state.check.take() {
            Some(sense) => {
                state.pending_sense = Some(sense);
                Ok(Completion {
                    status: CHECK_CONDITION,
                    message: 0,
                })
            }
            None => Ok(Completion::GOOD),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ListingKind;
    use crate::scsi::{DataPhase, Executor, commands};

    fn id() -> DeviceId {
        DeviceId::new(1).unwrap()
    }

    fn exec(device: &VirtualDevice) -> Executor {
        Executor::new(Box::new(device.clone()), Duration::from_millis(100))
    }

    #[test]
    fn test_other_ids_do_not_answer() {
        let device = VirtualDevice::new(id());
        let mut exec = exec(&device);
        let err = exec
            .execute(DeviceId::new(2).unwrap(), &commands::end_upload(), DataPhase::None)
            .unwrap_err();
        assert_eq!(err.stage, Stage::Selection);
    }

    #[test]
    fn test_count_and_list() {
        let device = VirtualDevice::new(id()).with_file(0, "A", b"abc").with_directory(1, "D");
        let mut exec = exec(&device);

        let mut count = [0u8; 1];
        exec.execute(id(), &commands::count_entries(ListingKind::Files), DataPhase::read(&mut count))
            .unwrap();
        assert_eq!(count[0], 2);

        let mut raw = [0u8; 80];
        let moved = exec
            .execute(id(), &commands::list_entries(ListingKind::Files), DataPhase::read(&mut raw))
            .unwrap();
        assert_eq!(moved, 80);
        assert_eq!(raw[1], 1);
        assert_eq!(&raw[2..3], b"A");
        assert_eq!(raw[39], 3);
        assert_eq!(raw[41], 0);
    }

    #[test]
    fn test_unknown_command_sets_sense() {
        let device = VirtualDevice::new(id());
        let mut exec = exec(&device);
        let mut reply = [0u8; 8];
        let err = exec
            .execute(id(), &commands::get_capabilities(), DataPhase::read(&mut reply))
            .unwrap_err();
        assert_eq!(err.stage, Stage::Status);

        let sense = exec.request_sense(id()).unwrap();
        assert_eq!(sense.asc, 0x20);
        // Sense is consumed by the first request
        assert_eq!(exec.request_sense(id()).unwrap().asc, 0);
    }

    #[test]
    fn test_injection_skips_then_fires() {
        let device = VirtualDevice::new(id());
        device.inject_after(
            opcode::END_UPLOAD,
            1,
            Fault::Stage {
                stage: Stage::Completion,
                detail: 9,
            },
        );
        let mut exec = exec(&device);
        assert!(exec.execute(id(), &commands::end_upload(), DataPhase::None).is_ok());
        let err = exec.execute(id(), &commands::end_upload(), DataPhase::None).unwrap_err();
        assert_eq!(err.code(), 0x0005_0009);
        assert!(exec.execute(id(), &commands::end_upload(), DataPhase::None).is_ok());
        assert_eq!(device.count_of(opcode::END_UPLOAD), 3);
    }
}
