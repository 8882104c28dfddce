//! Non-destructive burn-in, scan and fix passes over block devices.
//!
//! A pass walks a block range in groups, records groups that fail as bad
//! blocks and persists the list so later runs pick up where this one left
//! off. Destructive passes are gated behind a device-derived captcha.

pub mod badblocks;
pub mod blkdev;
pub mod burnin;
pub mod captcha;
pub mod commands;
pub mod drive_descriptor;
pub mod engine;
pub mod error;
pub mod logging;
pub mod options;
pub mod path_utils;
pub mod patterns;
pub mod progress;
pub mod region;
pub mod serial;
pub mod signals;

#[cfg(test)]
mod sim;

pub use badblocks::{BadBlockStore, TextFileStore};
pub use blkdev::{AccessMode, BlockAddress, BlockDevice, DeviceError, FileDevice};
pub use burnin::RunSummary;
pub use engine::{BurnInEngine, Pass, PassOutcome, StopReason};
pub use error::AppError;
pub use options::{Cli, Instruction, Options};
pub use region::Region;
