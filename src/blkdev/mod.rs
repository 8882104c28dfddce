//! Block-addressed device access.
//!
//! The scan engine only ever talks to a [`BlockDevice`]; the concrete
//! transport (plain OS reads and writes on a file or device node) lives in
//! [`file`].

use std::io;
use std::path::{Path, PathBuf};

mod file;

pub use file::{FileDevice, OpenFlags};

/// Logical block number on a device.
pub type BlockAddress = u64;

/// How reads and writes reach the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum AccessMode {
    /// Regular OS read/write syscalls.
    #[default]
    Os,
    /// ATA passthrough commands.
    Ata,
}

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// The device refused the request outright. Retrying will not help.
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("i/o error: {0}")]
    Io(#[source] io::Error),
    #[error("{0} is not supported by this transport")]
    Unsupported(&'static str),
}

impl DeviceError {
    /// Fatal errors stop a whole pass instead of marking blocks bad.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DeviceError::Rejected(_) | DeviceError::Unsupported(_))
    }
}

impl From<io::Error> for DeviceError {
    fn from(e: io::Error) -> Self {
        if e.raw_os_error() == Some(libc::EINVAL) || e.kind() == io::ErrorKind::InvalidInput {
            DeviceError::Rejected(e.to_string())
        } else {
            DeviceError::Io(e)
        }
    }
}

/// Stable metadata describing the device behind an open handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub path: PathBuf,
    pub serial: Option<String>,
    pub logical_block_count: u64,
    pub logical_block_size: u64,
}

impl DeviceIdentity {
    /// Short name used in file names: the serial when known, otherwise the
    /// last path component.
    pub fn label(&self) -> String {
        let raw = match &self.serial {
            Some(serial) if !serial.trim().is_empty() => serial.trim().to_string(),
            _ => self
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "device".to_string()),
        };
        raw.chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect()
    }
}

pub trait BlockDevice {
    fn path(&self) -> &Path;

    fn logical_block_count(&self) -> u64;

    fn logical_block_size(&self) -> u64;

    fn physical_block_size(&self) -> u64;

    /// Number of logical blocks that make up one physical block.
    fn recommended_stepping(&self) -> u64 {
        let logical = self.logical_block_size().max(1);
        (self.physical_block_size() / logical).max(1)
    }

    fn set_access_mode(&mut self, mode: AccessMode) -> Result<(), DeviceError>;

    /// Read `count` blocks starting at `block` into `buf`.
    /// `buf.len()` must equal `count * logical_block_size()`.
    fn read(&mut self, block: BlockAddress, count: u64, buf: &mut [u8])
        -> Result<usize, DeviceError>;

    /// Write `count` blocks starting at `block` from `buf`.
    fn write(&mut self, block: BlockAddress, count: u64, buf: &[u8]) -> Result<usize, DeviceError>;

    fn identity(&self) -> DeviceIdentity;

    /// Flush and release the handle. Calling it again is a no-op.
    fn close(&mut self) -> Result<(), DeviceError>;

    /// Reject requests the hardware would refuse with EINVAL.
    fn check_request(&self, block: BlockAddress, count: u64, len: usize) -> Result<(), DeviceError> {
        let block_count = self.logical_block_count();
        let end = block
            .checked_add(count)
            .ok_or_else(|| DeviceError::Rejected(format!("block {block} + {count} overflows")))?;
        if count == 0 || end > block_count {
            return Err(DeviceError::Rejected(format!(
                "blocks {block}..{end} outside device of {block_count} blocks"
            )));
        }
        let expected = count.saturating_mul(self.logical_block_size());
        if len as u64 != expected {
            return Err(DeviceError::Rejected(format!(
                "buffer of {len} bytes for {count} blocks (expected {expected})"
            )));
        }
        Ok(())
    }
}
