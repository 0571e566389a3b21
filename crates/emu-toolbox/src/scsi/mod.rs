//! Bus abstraction and transaction layer for the toolbox command set.
//!
//! The bus is modelled stage by stage, the way the classic SCSI managers expose it: arbitrate,
//! select, send the command block, optionally move data, then complete. Each stage reports its own
//! 16-bit detail code on failure and the [`Executor`] turns that into a staged [`TransportError`].

pub mod commands;
mod errors;
mod executor;
mod sense;


pub use commands::Cdb;
pub use errors::{DeviceStatus, Stage, TransportError};
pub use executor::Executor;
pub use sense::{SenseCode, SenseKey, decode_sense};

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bus address of a target. Only 0–6 are valid; 7 is the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct DeviceId(u8);

impl DeviceId {
    /// Highest addressable target id.
    pub const MAX: u8 = 6;

    pub fn new(id: u8) -> Option<Self> {
        (id <= Self::MAX).then_some(Self(id))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// Every valid target id, in bus order.
    pub fn all() -> impl Iterator<Item = DeviceId> {
        (0..=Self::MAX).map(DeviceId)
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Returned when a raw id is outside 0–6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidDeviceId(pub u8);

impl std::fmt::Display for InvalidDeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Device id {} is outside 0-{}", self.0, DeviceId::MAX)
    }
}

impl std::error::Error for InvalidDeviceId {}

impl TryFrom<u8> for DeviceId {
    type Error = InvalidDeviceId;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        DeviceId::new(value).ok_or(InvalidDeviceId(value))
    }
}

impl From<DeviceId> for u8 {
    fn from(id: DeviceId) -> Self {
        id.0
    }
}

/// Shape of a data phase: `repeat` transfers of `unit` bytes followed by one `remainder`-byte tail.
///
/// Large batched transfers move in uniform units so the bus can use its fast blind mode for all
/// but the last piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataProgram {
    pub unit: usize,
    pub repeat: usize,
    pub remainder: usize,
}

impl DataProgram {
    /// One flat region of `len` bytes.
    pub fn flat(len: usize) -> Self {
        Self {
            unit: len,
            repeat: usize::from(len > 0),
            remainder: 0,
        }
    }

    /// `len` bytes split into `unit`-sized pieces plus a tail.
    pub fn blocks(len: usize, unit: usize) -> Self {
        if unit == 0 {
            return Self::flat(len);
        }
        Self {
            unit,
            repeat: len / unit,
            remainder: len % unit,
        }
    }

    /// Total number of bytes the program moves.
    pub fn len(&self) -> usize {
        self.unit * self.repeat + self.remainder
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Direction and buffer of the optional data phase of one transaction.
pub enum DataPhase<'a> {
    None,
    In { buf: &'a mut [u8], program: DataProgram },
    Out { buf: &'a [u8], program: DataProgram },
}

impl<'a> DataPhase<'a> {
    pub fn read(buf: &'a mut [u8]) -> Self {
        let program = DataProgram::flat(buf.len());
        Self::In { buf, program }
    }

    pub fn read_blocks(buf: &'a mut [u8], unit: usize) -> Self {
        let program = DataProgram::blocks(buf.len(), unit);
        Self::In { buf, program }
    }

    pub fn write(buf: &'a [u8]) -> Self {
        Self::Out {
            buf,
            program: DataProgram::flat(buf.len()),
        }
    }

    pub fn write_blocks(buf: &'a [u8], unit: usize) -> Self {
        Self::Out {
            buf,
            program: DataProgram::blocks(buf.len(), unit),
        }
    }
}

/// Status and message bytes returned by the completion stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub status: u8,
    pub message: u8,
}

impl Completion {
    pub const GOOD: Completion = Completion { status: 0, message: 0 };

    pub fn is_good(&self) -> bool {
        self.status == 0
    }
}

/// One initiator's view of the bus.
///
/// Failures carry a bus-specific 16-bit detail code (an OS error number on most hosts). The
/// executor owns the sequencing; implementations only perform the single stage asked of them.
pub trait ScsiBus {
    /// Wins bus arbitration. Nothing needs releasing when this fails.
    fn arbitrate(&mut self) -> Result<(), u16>;

    /// Selects the target.
    fn select(&mut self, target: DeviceId) -> Result<(), u16>;

    /// Sends the command descriptor block.
    fn command(&mut self, cdb: &[u8]) -> Result<(), u16>;

    /// Runs a data-in phase into `buf`. Returns the bytes actually moved, which may be fewer than
    /// the program asks for if the target changes phase early.
    fn data_in(&mut self, buf: &mut [u8], program: DataProgram) -> Result<usize, u16>;

    /// Runs a data-out phase from `buf`. Returns the bytes the target actually accepted.
    fn data_out(&mut self, buf: &[u8], program: DataProgram) -> Result<usize, u16>;

    /// Waits up to `timeout` for the status and message bytes and releases the bus.
    fn complete(&mut self, timeout: Duration) -> Result<Completion, u16>;
}
