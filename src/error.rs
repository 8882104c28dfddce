use std::path::PathBuf;

use crate::badblocks::StoreError;
use crate::blkdev::{BlockAddress, DeviceError};

/// Everything an instruction can fail with, mapped to an exit status by
/// [`AppError::exit_code`].
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("invalid argument: {0}")]
    ArgumentInvalid(String),
    #[error("argument required: {0}")]
    ArgumentRequired(&'static str),
    #[error("unable to open {}: {source}", path.display())]
    OpeningDevice {
        path: PathBuf,
        #[source]
        source: DeviceError,
    },
    #[error("captcha `{given}` does not match {}", path.display())]
    CaptchaMismatch { path: PathBuf, given: String },
    #[error("runtime error during {pass} on {} at block {block}: {source}", path.display())]
    Runtime {
        pass: &'static str,
        path: PathBuf,
        block: BlockAddress,
        #[source]
        source: DeviceError,
    },
    #[error("unable to write bad block file {}: {source}", path.display())]
    WritingBadBlocks {
        path: PathBuf,
        #[source]
        source: StoreError,
    },
    #[error("error closing {}: {source}", path.display())]
    ClosingDevice {
        path: PathBuf,
        #[source]
        source: DeviceError,
    },
    #[error("{instruction} is not supported: {reason}")]
    Unsupported {
        instruction: &'static str,
        reason: &'static str,
    },
}

impl AppError {
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::ArgumentInvalid(_) | AppError::ArgumentRequired(_) => 2,
            AppError::OpeningDevice { .. } => 3,
            AppError::CaptchaMismatch { .. } => 4,
            AppError::Runtime { .. } => 5,
            AppError::WritingBadBlocks { .. } => 6,
            AppError::ClosingDevice { .. } => 7,
            AppError::Unsupported { .. } => 8,
        }
    }
}
