//! Cooperative cancellation and the progress tick.
//!
//! Both are polled by the engine between block groups; nothing here can
//! interrupt an I/O call already in flight.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, TryRecvError};

pub trait RunControl {
    /// Sticky once set.
    fn signaled_to_exit(&self) -> bool;

    /// Consume one pending tick. Ticks that fire between polls coalesce.
    fn tick_pending(&mut self) -> bool;

    /// (Re)start the repeating tick.
    fn arm_repeating(&mut self, period: Duration);
}

/// Ctrl-C flag plus a `crossbeam_channel::tick` timer.
pub struct Signals {
    exit: Arc<AtomicBool>,
    ticker: Option<Receiver<Instant>>,
}

impl Signals {
    pub fn new(exit: Arc<AtomicBool>) -> Self {
        Signals { exit, ticker: None }
    }

    /// Route SIGINT, SIGTERM and SIGHUP into a fresh exit flag.
    pub fn install() -> Result<Self, ctrlc::Error> {
        let exit = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&exit);
        ctrlc::set_handler(move || {
            eprintln!("\nReceived stop signal; stopping after the current block group...");
            flag.store(true, Ordering::SeqCst);
        })?;
        Ok(Signals::new(exit))
    }

    pub fn exit_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.exit)
    }
}

impl RunControl for Signals {
    fn signaled_to_exit(&self) -> bool {
        self.exit.load(Ordering::SeqCst)
    }

    fn tick_pending(&mut self) -> bool {
        match &self.ticker {
            Some(rx) => match rx.try_recv() {
                Ok(_) => true,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => false,
            },
            None => false,
        }
    }

    fn arm_repeating(&mut self, period: Duration) {
        self.ticker = Some(crossbeam_channel::tick(period));
    }
}
