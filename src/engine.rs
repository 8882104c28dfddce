//! The per-group scan/fix/burn loop.
//!
//! A pass walks a [`Region`] one stepping-sized group at a time. Each group
//! either succeeds, fails (its blocks are marked bad and the pass goes on),
//! or fails fatally (the device refused the request and the pass stops).

use std::fmt;
use std::time::{Duration, Instant};

use aligned_vec::{AVec, RuntimeAlign};

use crate::blkdev::{BlockAddress, BlockDevice, DeviceError};
use crate::patterns::PatternSet;
use crate::progress::{Progress, ProgressReporter};
use crate::region::{trim_stepping, Region};
use crate::signals::RunControl;

pub const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Alignment needed for O_DIRECT transfers.
pub const DIRECT_IO_ALIGNMENT: usize = 4096;

/// Bytes kept from each side of a verify mismatch for the log.
const MISMATCH_PREVIEW: usize = 16;

pub type IoBuffer = AVec<u8, RuntimeAlign>;

fn new_aligned_zeroed(len: usize, alignment: usize) -> IoBuffer {
    let mut v = AVec::with_capacity(alignment, len);
    for _ in 0..len {
        v.push(0);
    }
    v
}

pub fn create_buffer(len: usize, direct_io: bool) -> IoBuffer {
    if direct_io {
        new_aligned_zeroed(len, DIRECT_IO_ALIGNMENT)
    } else {
        new_aligned_zeroed(len, 1)
    }
}

/// The pre-burn copy of a group and a scratch buffer for read-back.
pub struct WorkBuffers {
    data: IoBuffer,
    scratch: IoBuffer,
    direct_io: bool,
}

impl WorkBuffers {
    pub fn new(len: usize, direct_io: bool) -> Self {
        WorkBuffers {
            data: create_buffer(len, direct_io),
            scratch: create_buffer(len, direct_io),
            direct_io,
        }
    }

    pub fn direct_io(&self) -> bool {
        self.direct_io
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn split_mut(&mut self, len: usize) -> (&mut [u8], &mut [u8]) {
        (&mut self.data[..len], &mut self.scratch[..len])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    /// Read every group.
    Scan,
    /// Read every group and write it back, zeros where unreadable.
    Fix,
    /// Read, write and verify each pattern, then restore.
    Burn,
}

impl Pass {
    pub fn name(self) -> &'static str {
        match self {
            Pass::Scan => "scan",
            Pass::Fix => "fix",
            Pass::Burn => "burnin",
        }
    }

    pub fn writes(self) -> bool {
        !matches!(self, Pass::Scan)
    }
}

#[derive(Debug)]
pub enum GroupFailure {
    /// Read or write still failing after all retries.
    Transport(DeviceError),
    /// The device accepted the data but returned something else.
    VerifyMismatch {
        offset: usize,
        expected: Vec<u8>,
        actual: Vec<u8>,
    },
}

impl GroupFailure {
    pub fn is_fatal(&self) -> bool {
        matches!(self, GroupFailure::Transport(e) if e.is_fatal())
    }

    pub fn category(&self) -> &'static str {
        match self {
            GroupFailure::Transport(_) => "I/O Error",
            GroupFailure::VerifyMismatch { .. } => "Verify Mismatch",
        }
    }
}

impl fmt::Display for GroupFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupFailure::Transport(e) => write!(f, "{e}"),
            GroupFailure::VerifyMismatch { offset, .. } => {
                write!(f, "read-back differs from written pattern at byte {offset}")
            }
        }
    }
}

#[derive(Debug)]
pub enum StopReason {
    Completed,
    Cancelled,
    BudgetExhausted,
    Fatal { block: BlockAddress, error: DeviceError },
}

impl StopReason {
    pub fn label(&self) -> &'static str {
        match self {
            StopReason::Completed => "completed",
            StopReason::Cancelled => "cancelled",
            StopReason::BudgetExhausted => "max errors exceeded",
            StopReason::Fatal { .. } => "fatal device error",
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FailureCounts {
    pub transport: u64,
    pub mismatches: u64,
}

#[derive(Debug)]
pub struct PassOutcome {
    pub stop: StopReason,
    /// First block not yet processed.
    pub cursor: BlockAddress,
    pub groups: u64,
    pub new_bad_blocks: u64,
    pub failures: FailureCounts,
    pub elapsed: Duration,
}

/// Run `op` up to `retries + 1` times, returning the last failure.
/// Fatal errors are returned immediately.
pub fn retry<T>(
    retries: u64,
    mut op: impl FnMut() -> Result<T, DeviceError>,
) -> Result<T, DeviceError> {
    let mut attempt = 0;
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) if e.is_fatal() || attempt >= retries => return Err(e),
            Err(_) => attempt += 1,
        }
    }
}

fn scan_group(
    dev: &mut dyn BlockDevice,
    block: BlockAddress,
    count: u64,
    buf: &mut [u8],
    retries: u64,
) -> Result<(), GroupFailure> {
    retry(retries, || dev.read(block, count, buf))
        .map(drop)
        .map_err(GroupFailure::Transport)
}

fn fix_group(
    dev: &mut dyn BlockDevice,
    block: BlockAddress,
    count: u64,
    buf: &mut [u8],
    retries: u64,
) -> Result<(), GroupFailure> {
    if let Err(e) = retry(retries, || dev.read(block, count, buf)) {
        if e.is_fatal() {
            return Err(GroupFailure::Transport(e));
        }
        buf.fill(0);
    }
    retry(retries, || dev.write(block, count, buf))
        .map(drop)
        .map_err(GroupFailure::Transport)
}

fn write_read_compare(
    dev: &mut dyn BlockDevice,
    block: BlockAddress,
    count: u64,
    pattern: &[u8],
    scratch: &mut [u8],
    retries: u64,
) -> Result<(), GroupFailure> {
    retry(retries, || dev.write(block, count, pattern)).map_err(GroupFailure::Transport)?;
    retry(retries, || dev.read(block, count, scratch)).map_err(GroupFailure::Transport)?;

    if let Some(offset) = pattern.iter().zip(scratch.iter()).position(|(w, r)| w != r) {
        let end = (offset + MISMATCH_PREVIEW).min(pattern.len());
        return Err(GroupFailure::VerifyMismatch {
            offset,
            expected: pattern[offset..end].to_vec(),
            actual: scratch[offset..end].to_vec(),
        });
    }
    Ok(())
}

/// Save the group, cycle every pattern through it, then put the saved
/// content back. A group is bad if any pattern or the restore failed.
fn burn_group(
    dev: &mut dyn BlockDevice,
    block: BlockAddress,
    count: u64,
    saved: &mut [u8],
    scratch: &mut [u8],
    patterns: &PatternSet,
    retries: u64,
) -> Result<(), GroupFailure> {
    if let Err(e) = retry(retries, || dev.read(block, count, saved)) {
        if e.is_fatal() {
            return Err(GroupFailure::Transport(e));
        }
        // Unreadable content is lost anyway; burn over zeros.
        saved.fill(0);
    }

    let verified = patterns
        .iter(saved.len())
        .try_for_each(|p| write_read_compare(dev, block, count, p, scratch, retries));

    let restored = retry(retries, || dev.write(block, count, saved))
        .map(drop)
        .map_err(GroupFailure::Transport);

    match (verified, restored) {
        (_, Err(f)) if f.is_fatal() => Err(f),
        (Err(f), _) => Err(f),
        (Ok(()), restored) => restored,
    }
}

enum GroupOp {
    Scan,
    Fix,
    Burn(PatternSet),
}

pub struct BurnInEngine<'a> {
    dev: &'a mut dyn BlockDevice,
    control: &'a mut dyn RunControl,
    reporter: &'a mut dyn ProgressReporter,
    retries: u64,
    max_errors: u64,
}

impl<'a> BurnInEngine<'a> {
    pub fn new(
        dev: &'a mut dyn BlockDevice,
        control: &'a mut dyn RunControl,
        reporter: &'a mut dyn ProgressReporter,
        retries: u64,
        max_errors: u64,
    ) -> Self {
        BurnInEngine { dev, control, reporter, retries, max_errors }
    }

    fn report(&mut self, started: Instant, region: Region, current: BlockAddress, bad_blocks: &[BlockAddress]) {
        self.reporter.report(&Progress {
            started,
            now: Instant::now(),
            region,
            current,
            bad_blocks,
        });
    }

    /// Walk `region`, appending failed blocks to `bad_blocks`.
    ///
    /// Stops early on cancellation, on a fatal device error, or once
    /// `bad_blocks` (including entries it arrived with) holds more than
    /// `max_errors` addresses.
    pub fn run(
        &mut self,
        pass: Pass,
        region: Region,
        buffers: &mut WorkBuffers,
        bad_blocks: &mut Vec<BlockAddress>,
    ) -> PassOutcome {
        let started = Instant::now();
        let block_size = self.dev.logical_block_size();
        let op = match pass {
            Pass::Scan => GroupOp::Scan,
            Pass::Fix => GroupOp::Fix,
            Pass::Burn => GroupOp::Burn(PatternSet::new(buffers.len(), buffers.direct_io())),
        };
        let initial = bad_blocks.len();
        let mut groups = 0;
        let mut failures = FailureCounts::default();
        let mut stop = StopReason::Completed;

        self.report(started, region, region.start, bad_blocks);

        let mut block = region.start;
        while block < region.end {
            if self.control.signaled_to_exit() {
                stop = StopReason::Cancelled;
                break;
            }

            if self.control.tick_pending() {
                self.control.arm_repeating(TICK_PERIOD);
                self.report(started, region, block, bad_blocks);
            }

            let stepping = trim_stepping(self.dev.logical_block_count(), block, region.stepping);
            if stepping == 0 {
                // Region ends past the device; nothing left to touch.
                break;
            }
            let len = (stepping * block_size) as usize;
            if len > buffers.len() {
                stop = StopReason::Fatal {
                    block,
                    error: DeviceError::Rejected(format!(
                        "group of {len} bytes exceeds {} byte buffer",
                        buffers.len()
                    )),
                };
                break;
            }

            let (data, scratch) = buffers.split_mut(len);
            let dev = &mut *self.dev;
            let outcome = match &op {
                GroupOp::Scan => scan_group(dev, block, stepping, data, self.retries),
                GroupOp::Fix => fix_group(dev, block, stepping, data, self.retries),
                GroupOp::Burn(patterns) => {
                    burn_group(dev, block, stepping, data, scratch, patterns, self.retries)
                }
            };
            groups += 1;
            block += stepping;

            let failure = match outcome {
                Ok(()) => continue,
                Err(GroupFailure::Transport(error)) if error.is_fatal() => {
                    stop = StopReason::Fatal { block: block - stepping, error };
                    break;
                }
                Err(failure) => failure,
            };

            match failure {
                GroupFailure::Transport(_) => failures.transport += 1,
                GroupFailure::VerifyMismatch { .. } => failures.mismatches += 1,
            }
            let bad = (block - stepping)..block;
            bad_blocks.extend(bad.clone());
            self.reporter.bad_blocks_found(bad, &failure);
            self.report(started, region, block, bad_blocks);

            if bad_blocks.len() as u64 > self.max_errors {
                stop = StopReason::BudgetExhausted;
                break;
            }
        }

        self.report(started, region, block, bad_blocks);

        PassOutcome {
            stop,
            cursor: block,
            groups,
            new_bad_blocks: (bad_blocks.len() - initial) as u64,
            failures,
            elapsed: started.elapsed(),
        }
    }
}
