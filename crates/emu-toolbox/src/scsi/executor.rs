//! Runs one bounded request/response exchange with a target.

use log::{debug, warn};
use std::time::Duration;

use super::commands::{self, SENSE_LEN};
use super::errors::{Stage, TransportError};
use super::sense::{SenseCode, decode_sense};
use super::{Cdb, DataPhase, DeviceId, ScsiBus};
use crate::error::ToolboxError;

/// Owns the bus and sequences every transaction on it.
pub struct Executor {
    bus: Box<dyn ScsiBus>,
    completion_timeout: Duration,
}

impl Executor {
    pub fn new(bus: Box<dyn ScsiBus>, completion_timeout: Duration) -> Self {
        Self { bus, completion_timeout }
    }

    pub fn completion_timeout(&self) -> Duration {
        self.completion_timeout
    }

    /// Runs one transaction: arbitrate, select, command, optional data phase, complete.
    ///
    /// Returns the number of data-phase bytes actually moved. Once the bus is held, completion is
    /// always attempted, and when an earlier stage already failed that earlier failure is what
    /// gets returned even if the clean-up completion fails too.
    pub fn execute(&mut self, target: DeviceId, cdb: &Cdb, phase: DataPhase<'_>) -> Result<usize, TransportError> {
        debug!("scsi: target {} opcode 0x{:02X}", target, cdb.opcode());

        self.bus
            .arbitrate()
            .map_err(|detail| TransportError::new(Stage::Arbitration, detail))?;

        let moved = match self.exchange(target, cdb, phase) {
            Ok(moved) => moved,
            Err(original) => {
                if let Err(detail) = self.bus.complete(self.completion_timeout) {
                    debug!(
                        "scsi: clean-up completion after {:?} failure also failed (detail {})",
                        original.stage, detail
                    );
                }
                warn!("scsi: opcode 0x{:02X} on target {} failed: {}", cdb.opcode(), target, original);
                return Err(original);
            }
        };

        let completion = self.bus.complete(self.completion_timeout).map_err(|detail| {
            let err = TransportError::new(Stage::Completion, detail);
            warn!("scsi: opcode 0x{:02X} on target {} failed: {}", cdb.opcode(), target, err);
            err
        })?;
        if !completion.is_good() {
            let err = TransportError::status(completion.message, completion.status);
            warn!("scsi: opcode 0x{:02X} on target {} failed: {}", cdb.opcode(), target, err);
            return Err(err);
        }

        Ok(moved)
    }

    fn exchange(&mut self, target: DeviceId, cdb: &Cdb, phase: DataPhase<'_>) -> Result<usize, TransportError> {
        self.bus
            .select(target)
            .map_err(|detail| TransportError::new(Stage::Selection, detail))?;
        self.bus
            .command(cdb.as_bytes())
            .map_err(|detail| TransportError::new(Stage::Command, detail))?;

        let moved = match phase {
            DataPhase::None => 0,
            DataPhase::In { buf, program } => {
                if program.is_empty() {
                    Ok(0)
                } else {
                    self.bus.data_in(buf, program)
                }
            }
            .map_err(|detail| TransportError::new(Stage::Data, detail))?,
            DataPhase::Out { buf, program } => {
                if program.is_empty() {
                    Ok(0)
                } else {
                    self.bus.data_out(buf, program)
                }
            }
            .map_err(|detail| TransportError::new(Stage::Data, detail))?,
        };
        Ok(moved)
    }

    /// Asks the target why the last command failed.
    ///
    /// Best effort: a failing REQUEST SENSE, or a reply that is not a "current error" report,
    /// both yield `None`.
    pub fn request_sense(&mut self, target: DeviceId) -> Option<SenseCode> {
        let mut data = [0u8; SENSE_LEN];
        match self.execute(target, &commands::request_sense(), DataPhase::read(&mut data)) {
            Ok(moved) => decode_sense(&data[..moved.min(SENSE_LEN)]),
            Err(e) => {
                debug!("scsi: request sense on target {} failed: {}", target, e);
                None
            }
        }
    }

    /// Converts a failed transaction into a crate error, attaching sense data when the target
    /// has any.
    pub fn fail(&mut self, target: DeviceId, error: TransportError) -> ToolboxError {
        let sense = self.request_sense(target);
        if let Some(sense) = &sense {
            warn!("scsi: target {} sense: {}", target, sense);
        }
        ToolboxError::from_transport(target, error, sense)
    }

    /// [`execute`](Self::execute) plus [`fail`](Self::fail) on error.
    pub fn run(&mut self, target: DeviceId, cdb: &Cdb, phase: DataPhase<'_>) -> Result<usize, ToolboxError> {
        self.execute(target, cdb, phase).map_err(|e| self.fail(target, e))
    }
}
