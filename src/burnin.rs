//! Runs one pass against one device: safety gate, bad block history,
//! region planning, the engine loop and persistence of the result.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::json;

use crate::badblocks::{default_filepath, BadBlockStore};
use crate::blkdev::{BlockAddress, BlockDevice, DeviceError, FileDevice, OpenFlags};
use crate::captcha;
use crate::engine::{BurnInEngine, FailureCounts, Pass, StopReason, WorkBuffers, TICK_PERIOD};
use crate::error::AppError;
use crate::logging::Logger;
use crate::options::Options;
use crate::progress::ConsoleReporter;
use crate::region::Region;
use crate::signals::RunControl;

/// What a finished pass reports back to the caller.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub pass: Pass,
    pub device: PathBuf,
    pub region: Region,
    pub stop: &'static str,
    pub cursor: BlockAddress,
    pub groups: u64,
    pub new_bad_blocks: u64,
    pub total_bad_blocks: usize,
    pub failures: FailureCounts,
    pub elapsed: Duration,
    pub output_file: PathBuf,
}

impl RunSummary {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "pass": self.pass.name(),
            "device": self.device.display().to_string(),
            "start_block": self.region.start,
            "end_block": self.region.end,
            "stepping": self.region.stepping,
            "stop": self.stop,
            "cursor": self.cursor,
            "groups": self.groups,
            "new_bad_blocks": self.new_bad_blocks,
            "total_bad_blocks": self.total_bad_blocks,
            "io_errors": self.failures.transport,
            "verify_mismatches": self.failures.mismatches,
            "elapsed_seconds": self.elapsed.as_secs_f64(),
            "output_file": self.output_file.display().to_string(),
        })
    }
}

/// Open `opts.device`, run `pass` on it and close it again, whatever
/// happened in between.
pub fn run(
    opts: &Options,
    pass: Pass,
    log: &Logger,
    control: &mut dyn RunControl,
    store: &dyn BadBlockStore,
) -> Result<RunSummary, AppError> {
    let flags = OpenFlags {
        write: pass.writes(),
        exclusive: !opts.force,
        direct_io: opts.direct_io,
    };
    let mut dev = FileDevice::open(&opts.device, flags).map_err(|source| AppError::OpeningDevice {
        path: opts.device.clone(),
        source,
    })?;

    let result = run_on_device(&mut dev, opts, pass, log, control, store);

    let closed = dev.close();
    match (result, closed) {
        (Ok(_), Err(source)) => Err(AppError::ClosingDevice {
            path: opts.device.clone(),
            source,
        }),
        (result, _) => result,
    }
}

fn load_history(store: &dyn BadBlockStore, path: &Path, log: &Logger) -> Vec<BlockAddress> {
    match store.read(path) {
        Ok(blocks) => {
            log.info(format!(
                "Imported {} bad blocks from {}",
                blocks.len(),
                path.display()
            ));
            blocks
        }
        Err(e) => {
            log.warn(format!("unable to open {}: {}", path.display(), e));
            Vec::new()
        }
    }
}

/// Everything [`run`] does once the device is open. Does not close `dev`.
pub fn run_on_device(
    dev: &mut dyn BlockDevice,
    opts: &Options,
    pass: Pass,
    log: &Logger,
    control: &mut dyn RunControl,
    store: &dyn BadBlockStore,
) -> Result<RunSummary, AppError> {
    let device = dev.path().to_path_buf();

    if pass.writes() {
        captcha::check(&*dev, &opts.captcha)?;
    }

    dev.set_access_mode(opts.rwtype).map_err(|e| match e {
        DeviceError::Unsupported(reason) => AppError::Unsupported {
            instruction: pass.name(),
            reason,
        },
        source => AppError::Runtime {
            pass: pass.name(),
            path: device.clone(),
            block: opts.start_block,
            source,
        },
    })?;

    let output_file = opts
        .output_file
        .clone()
        .unwrap_or_else(|| default_filepath(&dev.identity()));
    let input_file = opts.input_file.clone().unwrap_or_else(|| output_file.clone());

    let mut bad_blocks = load_history(store, &input_file, log);

    let block_size = dev.logical_block_size();
    let region = Region::plan(
        dev.logical_block_count(),
        dev.recommended_stepping(),
        opts.start_block,
        opts.end_block,
        opts.stepping,
    );
    let buflen = region
        .stepping
        .checked_mul(block_size)
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| AppError::ArgumentInvalid(format!("stepping {} too large", region.stepping)))?;

    log.info(format!("start block: {}", region.start));
    log.info(format!("end block: {}", region.end));
    log.info(format!("stepping: {}", region.stepping));
    log.info(format!("logical block size: {}", block_size));
    log.info(format!("physical block size: {}", dev.physical_block_size()));
    log.info(format!("r/w size: {} blocks / {} bytes", region.stepping, buflen));

    control.arm_repeating(TICK_PERIOD);
    let phase = match pass {
        Pass::Scan => "Scanning",
        Pass::Fix => "Fixing",
        Pass::Burn => "Burning",
    };
    log.info(format!("{phase}: {region}"));

    let outcome = {
        let mut buffers = WorkBuffers::new(buflen, opts.direct_io);
        let mut reporter = ConsoleReporter::new(region, log);
        let outcome = BurnInEngine::new(dev, control, &mut reporter, opts.retries, opts.max_errors)
            .run(pass, region, &mut buffers, &mut bad_blocks);
        reporter.finish();
        outcome
    };

    match outcome.stop {
        StopReason::Cancelled => log.warn(format!("{} cancelled at block {}", pass.name(), outcome.cursor)),
        StopReason::BudgetExhausted => log.warn(format!(
            "{} stopped at block {}: more than {} bad blocks",
            pass.name(),
            outcome.cursor,
            opts.max_errors
        )),
        _ => {}
    }

    let total_bad_blocks = bad_blocks.len();
    let stop_label = outcome.stop.label();
    let result = match outcome.stop {
        StopReason::Fatal { block, error } => Err(AppError::Runtime {
            pass: pass.name(),
            path: device.clone(),
            block,
            source: error,
        }),
        _ => Ok(RunSummary {
            pass,
            device,
            region,
            stop: stop_label,
            cursor: outcome.cursor,
            groups: outcome.groups,
            new_bad_blocks: outcome.new_bad_blocks,
            total_bad_blocks,
            failures: outcome.failures,
            elapsed: outcome.elapsed,
            output_file: output_file.clone(),
        }),
    };

    match store.write(&output_file, &bad_blocks) {
        Err(source) if result.is_ok() => Err(AppError::WritingBadBlocks {
            path: output_file,
            source,
        }),
        Err(e) => {
            log.warn(format!("{e}"));
            result
        }
        Ok(()) => {
            if !bad_blocks.is_empty() {
                log.info(format!("Bad blocks written to {}", output_file.display()));
            }
            result
        }
    }
}
