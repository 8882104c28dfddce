use std::panic;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use clap::Parser;

use block_burnin::commands;
use block_burnin::logging::{current_timestamp, Logger};
use block_burnin::signals::Signals;
use block_burnin::{AppError, Cli, Options, TextFileStore};

fn main() {
    let opts = Options::from(Cli::parse());

    let log = match Logger::open(opts.log_file.as_deref(), opts.quiet) {
        Ok(log) => log,
        Err(e) => {
            eprintln!(
                "[{}] Failed to open log file: {}. Further logs will only go to stderr.",
                current_timestamp(),
                e
            );
            Logger::console(opts.quiet)
        }
    };

    let main_result = panic::catch_unwind(panic::AssertUnwindSafe(|| main_logic(&opts, &log)));
    let exit_code = match main_result {
        Ok(Ok(())) => 0,
        Ok(Err(e)) => {
            log.info(format!("Error: {}", e));
            if log.is_quiet() {
                eprintln!("Error: {}", e);
            }
            e.exit_code()
        }
        Err(panic_payload) => {
            let mut panic_msg = String::from("A critical error occurred: panicked!");
            if let Some(s) = panic_payload.downcast_ref::<String>() {
                panic_msg.push_str(&format!("\nPanic message: {}", s));
            } else if let Some(s) = panic_payload.downcast_ref::<&str>() {
                panic_msg.push_str(&format!("\nPanic message: {}", s));
            }
            log.info(panic_msg);
            101
        }
    };
    std::process::exit(exit_code);
}

fn main_logic(opts: &Options, log: &Logger) -> Result<(), AppError> {
    opts.validate()?;

    let mut signals = match Signals::install() {
        Ok(s) => s,
        Err(e) => {
            log.warn(format!("unable to install Ctrl-C handler: {}", e));
            Signals::new(Arc::new(AtomicBool::new(false)))
        }
    };

    let summary = commands::dispatch(opts, log, &mut signals, &TextFileStore)?;

    if let Some(summary) = summary {
        log.info(format!(
            "{} {}: {} new bad blocks, {} total",
            summary.pass.name(),
            summary.stop,
            summary.new_bad_blocks,
            summary.total_bad_blocks
        ));
        if opts.json {
            println!("{}", summary.to_json());
        }
    }
    Ok(())
}
