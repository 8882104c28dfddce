use crate::badblocks::BadBlockStore;
use crate::blkdev::{BlockDevice, FileDevice, OpenFlags};
use crate::burnin::{self, RunSummary};
use crate::captcha;
use crate::drive_descriptor::{drive_descriptor_from_path, DriveDescriptor};
use crate::engine::Pass;
use crate::error::AppError;
use crate::logging::Logger;
use crate::options::{Instruction, Options};
use crate::signals::RunControl;

const READ_ONLY: OpenFlags = OpenFlags {
    write: false,
    exclusive: false,
    direct_io: false,
};

/// Run the instruction named in `opts`. Only the passes produce a summary.
pub fn dispatch(
    opts: &Options,
    log: &Logger,
    control: &mut dyn RunControl,
    store: &dyn BadBlockStore,
) -> Result<Option<RunSummary>, AppError> {
    match opts.instruction {
        Instruction::Info => info(opts, log).map(|_| None),
        Instruction::Captcha => print_captcha(opts).map(|_| None),
        Instruction::Scan => burnin::run(opts, Pass::Scan, log, control, store).map(Some),
        Instruction::Fix => burnin::run(opts, Pass::Fix, log, control, store).map(Some),
        Instruction::Burnin => burnin::run(opts, Pass::Burn, log, control, store).map(Some),
        Instruction::FindFiles | Instruction::DumpFiles | Instruction::FileBlocks => {
            Err(AppError::Unsupported {
                instruction: opts.instruction.name(),
                reason: "filesystem block mapping is not available in this build",
            })
        }
        Instruction::WriteUncorrectable => Err(AppError::Unsupported {
            instruction: opts.instruction.name(),
            reason: "requires ATA passthrough",
        }),
        Instruction::Invalid => Err(AppError::ArgumentInvalid("instruction is invalid".into())),
    }
}

fn open_read_only(opts: &Options) -> Result<FileDevice, AppError> {
    FileDevice::open(&opts.device, READ_ONLY).map_err(|source| AppError::OpeningDevice {
        path: opts.device.clone(),
        source,
    })
}

fn close(mut dev: FileDevice) -> Result<(), AppError> {
    dev.close().map_err(|source| AppError::ClosingDevice {
        path: dev.path().to_path_buf(),
        source,
    })
}

pub fn info_lines(dev: &dyn BlockDevice, descriptor: Option<&DriveDescriptor>) -> Vec<String> {
    let id = dev.identity();
    let mut lines = vec![
        format!("path: {}", id.path.display()),
        format!("serial: {}", id.serial.as_deref().unwrap_or("unknown")),
        format!("logical block count: {}", id.logical_block_count),
        format!("logical block size: {}", id.logical_block_size),
        format!("physical block size: {}", dev.physical_block_size()),
        format!(
            "size: {} bytes",
            id.logical_block_count.saturating_mul(id.logical_block_size)
        ),
        format!("block stepping: {}", dev.recommended_stepping()),
    ];
    if let Some(d) = descriptor {
        lines.push(format!("bus: {}", d.bus));
        lines.push(format!("media: {}", d.media));
    }
    lines
}

fn info(opts: &Options, log: &Logger) -> Result<(), AppError> {
    let dev = open_read_only(opts)?;
    let descriptor = match drive_descriptor_from_path(&opts.device) {
        Ok(d) => Some(d),
        Err(e) => {
            log.warn(format!("no drive metadata for {}: {}", opts.device.display(), e));
            None
        }
    };
    if !opts.quiet {
        for line in info_lines(&dev, descriptor.as_ref()) {
            println!("{line}");
        }
    }
    close(dev)
}

fn print_captcha(opts: &Options) -> Result<(), AppError> {
    let dev = open_read_only(opts)?;
    println!("{}", captcha::calculate(&dev.identity()));
    close(dev)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive_descriptor::{BusType, MediaKind};
    use crate::sim::{ManualControl, MemStore, SimDevice};

    #[test]
    fn info_lists_geometry_and_identity() {
        let dev = SimDevice::new(2048, 512).with_physical_block_size(4096);
        let d = DriveDescriptor {
            bus: BusType::Sata,
            media: MediaKind::Hdd,
            rotational: Some(true),
            sector_size: Some(512),
        };
        let lines = info_lines(&dev, Some(&d));
        assert!(lines.contains(&"serial: SIM-0001".to_string()));
        assert!(lines.contains(&"size: 1048576 bytes".to_string()));
        assert!(lines.contains(&"block stepping: 8".to_string()));
        assert!(lines.contains(&"bus: SATA".to_string()));
        assert!(lines.contains(&"media: HDD".to_string()));
    }

    #[test]
    fn mapping_instructions_are_unsupported() {
        let store = MemStore::default();
        for args in [
            vec!["block_burnin", "-i", "bb.txt", "find-files", "/mnt"],
            vec!["block_burnin", "dump-files", "/mnt"],
            vec!["block_burnin", "file-blocks", "/mnt/x"],
            vec!["block_burnin", "-c", "abc", "write-uncorrectable", "/dev/sdb"],
        ] {
            let opts = Options::parse_from(args).unwrap();
            opts.validate().unwrap();
            let err = dispatch(&opts, &Logger::console(true), &mut ManualControl::default(), &store)
                .unwrap_err();
            assert_eq!(err.exit_code(), 8, "{err}");
        }
        assert_eq!(store.writes.get(), 0);
    }

    #[test]
    fn missing_device_fails_to_open() {
        let opts = Options::parse_from(["block_burnin", "info", "/nonexistent/block_burnin/dev"]).unwrap();
        let err = dispatch(&opts, &Logger::console(true), &mut ManualControl::default(), &MemStore::default())
            .unwrap_err();
        assert!(matches!(err, AppError::OpeningDevice { .. }));
    }
}
