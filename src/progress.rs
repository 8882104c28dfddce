//! Status reporting for a running pass.

use std::ops::Range;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};

use crate::blkdev::BlockAddress;
use crate::engine::GroupFailure;
use crate::logging::Logger;
use crate::region::Region;

/// Snapshot handed to a [`ProgressReporter`].
#[derive(Debug, Clone, Copy)]
pub struct Progress<'a> {
    pub started: Instant,
    pub now: Instant,
    pub region: Region,
    pub current: BlockAddress,
    pub bad_blocks: &'a [BlockAddress],
}

impl Progress<'_> {
    pub fn elapsed(&self) -> Duration {
        self.now.saturating_duration_since(self.started)
    }

    pub fn done(&self) -> u64 {
        self.current.clamp(self.region.start, self.region.end) - self.region.start
    }
}

pub trait ProgressReporter {
    fn report(&mut self, progress: &Progress<'_>);

    /// A group failed and `blocks` were added to the bad block list.
    fn bad_blocks_found(&mut self, _blocks: Range<BlockAddress>, _failure: &GroupFailure) {}
}

fn format_elapsed(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// One human readable line describing `p`.
pub fn status_line(p: &Progress<'_>) -> String {
    let total = p.region.len();
    let done = p.done();
    let percent = if total == 0 { 100.0 } else { done as f64 * 100.0 / total as f64 };
    let secs = p.elapsed().as_secs_f64();
    let rate = if secs > 0.0 { done as f64 / secs } else { 0.0 };
    format!(
        "{} | block {} in {}-{} ({:.2}%) | {:.0} blocks/s | bad blocks: {}",
        format_elapsed(p.elapsed()),
        p.current,
        p.region.start,
        p.region.end,
        percent,
        rate,
        p.bad_blocks.len()
    )
}

/// indicatif bar over the region, plus log lines for each failure.
pub struct ConsoleReporter {
    bar: ProgressBar,
    log: Logger,
    last_line: Option<String>,
}

impl ConsoleReporter {
    pub fn new(region: Region, log: &Logger) -> Self {
        let bar = if log.is_quiet() {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(region.len())
        };
        if let Ok(style) = ProgressStyle::with_template(
            "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta_precise}) {wide_msg}",
        ) {
            bar.set_style(style.progress_chars("##-"));
        }
        ConsoleReporter {
            log: log.with_progress(&bar),
            bar,
            last_line: None,
        }
    }

    /// Stop the bar and log the last status line.
    pub fn finish(&mut self) {
        self.bar.finish_and_clear();
        if let Some(line) = self.last_line.take() {
            self.log.info(line);
        }
    }
}

impl ProgressReporter for ConsoleReporter {
    fn report(&mut self, progress: &Progress<'_>) {
        self.bar.set_position(progress.done());
        self.bar
            .set_message(format!("bad blocks: {}", progress.bad_blocks.len()));
        self.last_line = Some(status_line(progress));
    }

    fn bad_blocks_found(&mut self, blocks: Range<BlockAddress>, failure: &GroupFailure) {
        let desc = format!("marking {} - {} bad: {}", blocks.start, blocks.end, failure);
        match failure {
            GroupFailure::VerifyMismatch { expected, actual, .. } => self.log.error_at(
                blocks.start,
                failure.category(),
                &desc,
                Some(expected.as_slice()),
                Some(actual.as_slice()),
            ),
            GroupFailure::Transport(_) => {
                self.log.error_at(blocks.start, failure.category(), &desc, None, None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_line_reports_position_and_count() {
        let started = Instant::now();
        let p = Progress {
            started,
            now: started + Duration::from_secs(65),
            region: Region { start: 0, end: 1000, stepping: 8 },
            current: 250,
            bad_blocks: &[3, 7],
        };
        let line = status_line(&p);
        assert!(line.starts_with("00:01:05 | block 250 in 0-1000 (25.00%)"), "{line}");
        assert!(line.ends_with("bad blocks: 2"), "{line}");
    }

    #[test]
    fn empty_region_is_complete() {
        let started = Instant::now();
        let p = Progress {
            started,
            now: started,
            region: Region { start: 10, end: 10, stepping: 1 },
            current: 10,
            bad_blocks: &[],
        };
        assert_eq!(p.done(), 0);
        assert!(status_line(&p).contains("(100.00%)"));
    }
}
