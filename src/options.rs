//! Command line and validated run options.

use std::path::{Path, PathBuf};

use clap::Parser;

use crate::blkdev::AccessMode;
use crate::error::AppError;

pub const DEFAULT_RETRIES: u64 = 2;
pub const DEFAULT_MAX_ERRORS: u64 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Info,
    Captcha,
    Scan,
    Fix,
    Burnin,
    FindFiles,
    DumpFiles,
    FileBlocks,
    WriteUncorrectable,
    Invalid,
}

/// Something an instruction needs before it may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Captcha,
    OutputFile,
    InputFile,
}

impl Instruction {
    pub fn from_name(name: &str) -> Self {
        match name {
            "info" => Instruction::Info,
            "captcha" => Instruction::Captcha,
            "scan" => Instruction::Scan,
            "fix" => Instruction::Fix,
            "burnin" => Instruction::Burnin,
            "find-files" => Instruction::FindFiles,
            "dump-files" => Instruction::DumpFiles,
            "file-blocks" => Instruction::FileBlocks,
            "write-uncorrectable" => Instruction::WriteUncorrectable,
            _ => Instruction::Invalid,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Instruction::Info => "info",
            Instruction::Captcha => "captcha",
            Instruction::Scan => "scan",
            Instruction::Fix => "fix",
            Instruction::Burnin => "burnin",
            Instruction::FindFiles => "find-files",
            Instruction::DumpFiles => "dump-files",
            Instruction::FileBlocks => "file-blocks",
            Instruction::WriteUncorrectable => "write-uncorrectable",
            Instruction::Invalid => "invalid",
        }
    }

    pub fn requirements(self) -> &'static [Requirement] {
        match self {
            Instruction::Burnin | Instruction::Fix | Instruction::WriteUncorrectable => {
                &[Requirement::Captcha]
            }
            Instruction::Scan => &[Requirement::OutputFile],
            Instruction::FindFiles => &[Requirement::InputFile],
            Instruction::Info
            | Instruction::Captcha
            | Instruction::DumpFiles
            | Instruction::FileBlocks
            | Instruction::Invalid => &[],
        }
    }
}

#[derive(Parser, Debug)]
#[clap(
    author,
    version,
    about = "Find, verify and burn in bad blocks on block devices",
    long_about = None
)]
pub struct Cli {
    /// info | captcha | scan | fix | burnin | find-files | dump-files |
    /// file-blocks | write-uncorrectable
    pub instruction: String,
    /// Block device or image file to act on
    pub device: PathBuf,
    /// Use OS or ATA reads and writes
    #[clap(short = 't', long, value_enum, default_value = "os")]
    pub rwtype: AccessMode,
    /// Suppress console output
    #[clap(short, long)]
    pub quiet: bool,
    /// Block to start from
    #[clap(short, long, default_value_t = 0)]
    pub start_block: u64,
    /// Block to stop at (exclusive, clamped to the device)
    #[clap(short, long, default_value_t = u64::MAX)]
    pub end_block: u64,
    /// File to write the bad block list to
    #[clap(short, long)]
    pub output: Option<PathBuf>,
    /// File to read a previous bad block list from
    #[clap(short, long)]
    pub input: Option<PathBuf>,
    /// Retries on failed reads and writes
    #[clap(short, long, default_value_t = DEFAULT_RETRIES, value_parser = clap::value_parser!(u64).range(1..))]
    pub retries: u64,
    /// Needed when performing destructive operations
    #[clap(short, long)]
    pub captcha: Option<String>,
    /// Blocks per I/O request (0 = physical/logical block ratio)
    #[clap(long, default_value_t = 0)]
    pub stepping: u64,
    /// Stop once more than this many bad blocks are known
    #[clap(long, default_value_t = DEFAULT_MAX_ERRORS)]
    pub max_errors: u64,
    /// Open the device without O_EXCL
    #[clap(short, long)]
    pub force: bool,
    /// Bypass the page cache (O_DIRECT / F_NOCACHE)
    #[clap(long)]
    pub direct_io: bool,
    /// Append log lines to this file
    #[clap(long)]
    pub log_file: Option<PathBuf>,
    /// Print a JSON summary when a pass finishes
    #[clap(long)]
    pub json: bool,
}

/// Parsed options. Call [`Options::validate`] before acting on them.
#[derive(Debug, Clone)]
pub struct Options {
    pub instruction: Instruction,
    pub device: PathBuf,
    pub rwtype: AccessMode,
    pub quiet: bool,
    pub start_block: u64,
    pub end_block: u64,
    pub output_file: Option<PathBuf>,
    pub input_file: Option<PathBuf>,
    pub retries: u64,
    pub captcha: String,
    pub stepping: u64,
    pub max_errors: u64,
    pub force: bool,
    pub direct_io: bool,
    pub log_file: Option<PathBuf>,
    pub json: bool,
}

impl From<Cli> for Options {
    fn from(cli: Cli) -> Self {
        Options {
            instruction: Instruction::from_name(&cli.instruction),
            device: cli.device,
            rwtype: cli.rwtype,
            quiet: cli.quiet,
            start_block: cli.start_block,
            end_block: cli.end_block,
            output_file: cli.output,
            input_file: cli.input,
            retries: cli.retries,
            captcha: cli.captcha.unwrap_or_default(),
            stepping: cli.stepping,
            max_errors: cli.max_errors,
            force: cli.force,
            direct_io: cli.direct_io,
            log_file: cli.log_file,
            json: cli.json,
        }
    }
}

fn is_blank(path: &Option<PathBuf>) -> bool {
    path.as_deref().map_or(true, |p: &Path| p.as_os_str().is_empty())
}

impl Options {
    pub fn parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Cli::try_parse_from(args).map(Options::from)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.instruction == Instruction::Invalid {
            return Err(AppError::ArgumentInvalid("instruction is invalid".into()));
        }
        for req in self.instruction.requirements() {
            match req {
                Requirement::Captcha if self.captcha.is_empty() => {
                    return Err(AppError::ArgumentRequired("captcha"));
                }
                Requirement::OutputFile if is_blank(&self.output_file) => {
                    return Err(AppError::ArgumentRequired("bad block output file"));
                }
                Requirement::InputFile if is_blank(&self.input_file) => {
                    return Err(AppError::ArgumentRequired("bad block input file"));
                }
                _ => {}
            }
        }
        if self.retries < 1 {
            return Err(AppError::ArgumentInvalid("retries invalid".into()));
        }
        if self.start_block >= self.end_block {
            return Err(AppError::ArgumentInvalid("start block >= end block".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(args: &[&str]) -> Options {
        let mut argv = vec!["block_burnin"];
        argv.extend_from_slice(args);
        Options::parse_from(argv).unwrap()
    }

    #[test]
    fn defaults() {
        let o = opts(&["info", "/dev/sdb"]);
        assert_eq!(o.instruction, Instruction::Info);
        assert_eq!(o.device, PathBuf::from("/dev/sdb"));
        assert_eq!(o.rwtype, AccessMode::Os);
        assert_eq!(o.retries, DEFAULT_RETRIES);
        assert_eq!(o.start_block, 0);
        assert_eq!(o.end_block, u64::MAX);
        assert!(o.validate().is_ok());
    }

    #[test]
    fn short_flags() {
        let o = opts(&[
            "-t", "ata", "-q", "-s", "8", "-e", "64", "-o", "out.txt", "-i", "in.txt", "-r", "5",
            "-c", "abc", "-f", "burnin", "/dev/sdb",
        ]);
        assert_eq!(o.rwtype, AccessMode::Ata);
        assert!(o.quiet && o.force);
        assert_eq!((o.start_block, o.end_block, o.retries), (8, 64, 5));
        assert_eq!(o.output_file, Some(PathBuf::from("out.txt")));
        assert_eq!(o.input_file, Some(PathBuf::from("in.txt")));
        assert_eq!(o.captcha, "abc");
    }

    #[test]
    fn zero_retries_rejected_by_parser() {
        assert!(Options::parse_from(["block_burnin", "-r", "0", "scan", "/dev/sdb"]).is_err());
    }

    #[test]
    fn missing_target_rejected_by_parser() {
        assert!(Options::parse_from(["block_burnin", "scan"]).is_err());
    }

    #[test]
    fn destructive_instructions_need_captcha() {
        for name in ["burnin", "fix", "write-uncorrectable"] {
            let err = opts(&[name, "/dev/sdb"]).validate().unwrap_err();
            assert!(matches!(err, AppError::ArgumentRequired("captcha")), "{name}: {err}");
            assert!(opts(&["-c", "x", name, "/dev/sdb"]).validate().is_ok(), "{name}");
        }
    }

    #[test]
    fn burnin_does_not_inherit_output_requirement() {
        assert!(opts(&["-c", "x", "burnin", "/dev/sdb"]).validate().is_ok());
    }

    #[test]
    fn scan_needs_output_file() {
        let err = opts(&["scan", "/dev/sdb"]).validate().unwrap_err();
        assert!(matches!(err, AppError::ArgumentRequired("bad block output file")));
        assert!(opts(&["-o", "bb.txt", "scan", "/dev/sdb"]).validate().is_ok());
    }

    #[test]
    fn find_files_needs_input_file() {
        let err = opts(&["find-files", "/mnt"]).validate().unwrap_err();
        assert!(matches!(err, AppError::ArgumentRequired("bad block input file")));
    }

    #[test]
    fn no_extra_requirements() {
        for name in ["info", "captcha", "dump-files", "file-blocks"] {
            assert!(opts(&[name, "/dev/sdb"]).validate().is_ok(), "{name}");
        }
    }

    #[test]
    fn unknown_instruction_is_invalid() {
        let o = opts(&["defrag", "/dev/sdb"]);
        assert_eq!(o.instruction, Instruction::Invalid);
        assert!(matches!(o.validate(), Err(AppError::ArgumentInvalid(_))));
    }

    #[test]
    fn start_must_precede_end() {
        let err = opts(&["-s", "10", "-e", "10", "info", "/dev/sdb"]).validate().unwrap_err();
        assert!(matches!(err, AppError::ArgumentInvalid(_)));
    }

    #[test]
    fn names_round_trip() {
        for name in [
            "info", "captcha", "scan", "fix", "burnin", "find-files", "dump-files",
            "file-blocks", "write-uncorrectable",
        ] {
            assert_eq!(Instruction::from_name(name).name(), name);
        }
    }
}
