//! In-memory doubles for the device, run control, reporter and store.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::io;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::badblocks::{BadBlockStore, StoreError};
use crate::blkdev::{AccessMode, BlockAddress, BlockDevice, DeviceError, DeviceIdentity};
use crate::engine::GroupFailure;
use crate::progress::{Progress, ProgressReporter};
use crate::signals::RunControl;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoCall {
    pub op: Op,
    pub block: BlockAddress,
    pub count: u64,
}

type FaultFn = Box<dyn FnMut(Op, BlockAddress, u64, &[u8]) -> Option<DeviceError>>;

/// RAM-backed device. Every attempted read and write is recorded in
/// `calls`, including ones the fault hook fails.
pub struct SimDevice {
    path: PathBuf,
    serial: Option<String>,
    data: Vec<u8>,
    block_size: u64,
    physical_block_size: u64,
    fault: Option<FaultFn>,
    corrupt: HashSet<BlockAddress>,
    alignment: Option<usize>,
    pub calls: Vec<IoCall>,
    pub closes: u32,
}

impl SimDevice {
    /// Each block starts out with distinct, non-uniform content.
    pub fn new(blocks: u64, block_size: u64) -> Self {
        let bs = block_size as usize;
        let data = (0..blocks as usize * bs)
            .map(|i| ((i / bs) * 31 + i % bs) as u8)
            .collect();
        SimDevice {
            path: PathBuf::from("/dev/sim0"),
            serial: Some("SIM-0001".to_string()),
            data,
            block_size,
            physical_block_size: block_size,
            fault: None,
            corrupt: HashSet::new(),
            alignment: None,
            calls: Vec::new(),
            closes: 0,
        }
    }

    pub fn with_physical_block_size(mut self, size: u64) -> Self {
        self.physical_block_size = size;
        self
    }

    pub fn with_fault(
        mut self,
        f: impl FnMut(Op, BlockAddress, u64, &[u8]) -> Option<DeviceError> + 'static,
    ) -> Self {
        self.fault = Some(Box::new(f));
        self
    }

    /// Writes to these blocks land with one bit flipped.
    pub fn corrupting(mut self, blocks: &[BlockAddress]) -> Self {
        self.corrupt.extend(blocks.iter().copied());
        self
    }

    /// Reject buffers not aligned to `align` bytes, as O_DIRECT does.
    pub fn requiring_alignment(mut self, align: usize) -> Self {
        self.alignment = Some(align);
        self
    }

    fn check_alignment(&self, buf: &[u8]) -> Result<(), DeviceError> {
        match self.alignment {
            Some(align) if buf.as_ptr() as usize % align != 0 => Err(DeviceError::Rejected(
                format!("buffer not aligned to {align} bytes"),
            )),
            _ => Ok(()),
        }
    }

    pub fn contents(&self) -> &[u8] {
        &self.data
    }

    pub fn block(&self, block: BlockAddress) -> &[u8] {
        let bs = self.block_size as usize;
        let start = block as usize * bs;
        &self.data[start..start + bs]
    }

    pub fn reads(&self) -> usize {
        self.calls.iter().filter(|c| c.op == Op::Read).count()
    }

    pub fn writes(&self) -> usize {
        self.calls.iter().filter(|c| c.op == Op::Write).count()
    }

    /// Every block touched by any call, ascending.
    pub fn visited_blocks(&self) -> Vec<BlockAddress> {
        self.calls
            .iter()
            .flat_map(|c| c.block..c.block + c.count)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn inject(&mut self, op: Op, block: BlockAddress, count: u64, data: &[u8]) -> Result<(), DeviceError> {
        self.calls.push(IoCall { op, block, count });
        match self.fault.as_mut().and_then(|f| f(op, block, count, data)) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl BlockDevice for SimDevice {
    fn path(&self) -> &Path {
        &self.path
    }

    fn logical_block_count(&self) -> u64 {
        self.data.len() as u64 / self.block_size
    }

    fn logical_block_size(&self) -> u64 {
        self.block_size
    }

    fn physical_block_size(&self) -> u64 {
        self.physical_block_size
    }

    fn set_access_mode(&mut self, mode: AccessMode) -> Result<(), DeviceError> {
        match mode {
            AccessMode::Os => Ok(()),
            AccessMode::Ata => Err(DeviceError::Unsupported("ATA passthrough")),
        }
    }

    fn read(&mut self, block: BlockAddress, count: u64, buf: &mut [u8]) -> Result<usize, DeviceError> {
        self.check_request(block, count, buf.len())?;
        self.check_alignment(buf)?;
        self.inject(Op::Read, block, count, &[])?;
        let start = (block * self.block_size) as usize;
        buf.copy_from_slice(&self.data[start..start + buf.len()]);
        Ok(buf.len())
    }

    fn write(&mut self, block: BlockAddress, count: u64, buf: &[u8]) -> Result<usize, DeviceError> {
        self.check_request(block, count, buf.len())?;
        self.check_alignment(buf)?;
        self.inject(Op::Write, block, count, buf)?;
        let bs = self.block_size as usize;
        let start = block as usize * bs;
        self.data[start..start + buf.len()].copy_from_slice(buf);
        for b in block..block + count {
            if self.corrupt.contains(&b) {
                self.data[b as usize * bs] ^= 0x01;
            }
        }
        Ok(buf.len())
    }

    fn identity(&self) -> DeviceIdentity {
        DeviceIdentity {
            path: self.path.clone(),
            serial: self.serial.clone(),
            logical_block_count: self.logical_block_count(),
            logical_block_size: self.block_size,
        }
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        self.closes += 1;
        Ok(())
    }
}

#[derive(Default)]
pub struct ManualControl {
    pub exit: bool,
    /// Report exit once this many polls have returned false.
    pub exit_after_polls: Option<usize>,
    pub pending_ticks: usize,
    pub armed: Vec<Duration>,
    polls: Cell<usize>,
}

impl ManualControl {
    /// Exit already requested before the first poll.
    pub fn cancelled() -> Self {
        ManualControl { exit: true, ..Default::default() }
    }

    pub fn exit_after(polls: usize) -> Self {
        ManualControl { exit_after_polls: Some(polls), ..Default::default() }
    }

    pub fn with_ticks(pending_ticks: usize) -> Self {
        ManualControl { pending_ticks, ..Default::default() }
    }
}

impl RunControl for ManualControl {
    fn signaled_to_exit(&self) -> bool {
        let n = self.polls.get() + 1;
        self.polls.set(n);
        self.exit || self.exit_after_polls.map_or(false, |limit| n > limit)
    }

    fn tick_pending(&mut self) -> bool {
        if self.pending_ticks > 0 {
            self.pending_ticks -= 1;
            true
        } else {
            false
        }
    }

    fn arm_repeating(&mut self, period: Duration) {
        self.armed.push(period);
    }
}

/// Keeps `(current block, bad block count)` per report.
#[derive(Default)]
pub struct RecordingReporter {
    pub reports: Vec<(BlockAddress, usize)>,
    pub found: Vec<Range<BlockAddress>>,
}

impl ProgressReporter for RecordingReporter {
    fn report(&mut self, progress: &Progress<'_>) {
        self.reports.push((progress.current, progress.bad_blocks.len()));
    }

    fn bad_blocks_found(&mut self, blocks: Range<BlockAddress>, _failure: &GroupFailure) {
        self.found.push(blocks);
    }
}

#[derive(Default)]
pub struct MemStore {
    pub files: RefCell<HashMap<PathBuf, Vec<BlockAddress>>>,
    pub fail_writes: bool,
    pub writes: Cell<usize>,
}

impl MemStore {
    pub fn with_file(path: &str, blocks: &[BlockAddress]) -> Self {
        let store = MemStore::default();
        store.files.borrow_mut().insert(PathBuf::from(path), blocks.to_vec());
        store
    }

    pub fn get(&self, path: &str) -> Option<Vec<BlockAddress>> {
        self.files.borrow().get(Path::new(path)).cloned()
    }
}

impl BadBlockStore for MemStore {
    fn read(&self, path: &Path) -> Result<Vec<BlockAddress>, StoreError> {
        self.files.borrow().get(path).cloned().ok_or_else(|| StoreError::Io {
            path: path.to_path_buf(),
            source: io::Error::from(io::ErrorKind::NotFound),
        })
    }

    fn write(&self, path: &Path, blocks: &[BlockAddress]) -> Result<(), StoreError> {
        self.writes.set(self.writes.get() + 1);
        if self.fail_writes {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source: io::Error::from(io::ErrorKind::PermissionDenied),
            });
        }
        self.files.borrow_mut().insert(path.to_path_buf(), blocks.to_vec());
        Ok(())
    }
}
