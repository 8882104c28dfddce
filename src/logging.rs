use std::cmp;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use chrono::Local;
use indicatif::ProgressBar;
use parking_lot::Mutex;

use crate::blkdev::BlockAddress;

const MAX_DUMP_LEN: usize = 64;

pub fn current_timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Operator log. Lines go above the progress bar when one is attached,
/// to stderr otherwise, and are mirrored into the log file if one is open.
#[derive(Clone, Default)]
pub struct Logger {
    file: Option<Arc<Mutex<File>>>,
    bar: Option<ProgressBar>,
    quiet: bool,
}

impl Logger {
    pub fn console(quiet: bool) -> Self {
        Logger { file: None, bar: None, quiet }
    }

    /// Console logger that also appends to `path`.
    pub fn open(path: Option<&Path>, quiet: bool) -> io::Result<Self> {
        let file = match path {
            Some(p) => Some(Arc::new(Mutex::new(
                OpenOptions::new().create(true).append(true).open(p)?,
            ))),
            None => None,
        };
        Ok(Logger { file, bar: None, quiet })
    }

    /// Same sinks, but console lines are printed through `bar`.
    pub fn with_progress(&self, bar: &ProgressBar) -> Self {
        Logger {
            file: self.file.clone(),
            bar: Some(bar.clone()),
            quiet: self.quiet,
        }
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    fn emit(&self, full_message: &str) {
        if !self.quiet {
            match &self.bar {
                Some(pb) => pb.println(full_message),
                None => eprintln!("{}", full_message),
            }
        }
        if let Some(lf_arc) = &self.file {
            let mut lf_guard = lf_arc.lock();
            let _ = writeln!(*lf_guard, "{}", full_message);
            let _ = lf_guard.flush();
        }
    }

    pub fn info<S: AsRef<str>>(&self, msg: S) {
        self.emit(&format!("[{}] {}", current_timestamp(), msg.as_ref()));
    }

    pub fn warn<S: AsRef<str>>(&self, msg: S) {
        self.emit(&format!("[{}] Warning: {}", current_timestamp(), msg.as_ref()));
    }

    /// Failure at a block, with an optional expected/actual byte preview.
    pub fn error_at(
        &self,
        block: BlockAddress,
        category: &str,
        err_desc: &str,
        expected: Option<&[u8]>,
        actual: Option<&[u8]>,
    ) {
        self.emit(&format_block_error(
            &current_timestamp(),
            block,
            category,
            err_desc,
            expected,
            actual,
        ));
    }
}

fn format_block_error(
    ts: &str,
    block: BlockAddress,
    category: &str,
    err_desc: &str,
    expected: Option<&[u8]>,
    actual: Option<&[u8]>,
) -> String {
    let mut message = format!("[{}] {} at block {}: {}", ts, category, block, err_desc);
    if let (Some(exp), Some(act)) = (expected, actual) {
        let exp_slice = &exp[..cmp::min(exp.len(), MAX_DUMP_LEN)];
        let act_slice = &act[..cmp::min(act.len(), MAX_DUMP_LEN)];
        message.push_str(&format!(
            "\nExpected (first {} bytes): {:02X?}\nActual   (first {} bytes): {:02X?}",
            exp_slice.len(),
            exp_slice,
            act_slice.len(),
            act_slice
        ));
    }
    message
}
