//! Alignment helpers and the block range a pass walks over.

use std::fmt;

use crate::blkdev::BlockAddress;

pub fn round_down(value: u64, multiple: u64) -> u64 {
    if multiple == 0 {
        return value;
    }
    value - value % multiple
}

/// Rounds up, saturating at the largest representable multiple.
pub fn round_up(value: u64, multiple: u64) -> u64 {
    if multiple == 0 {
        return value;
    }
    match value % multiple {
        0 => value,
        rem => value
            .checked_add(multiple - rem)
            .unwrap_or_else(|| round_down(u64::MAX, multiple)),
    }
}

/// Clamp `stepping` so a group starting at `block` never runs past the end
/// of a device with `block_count` blocks. Returns 0 past the end.
pub fn trim_stepping(block_count: u64, block: BlockAddress, stepping: u64) -> u64 {
    if block > block_count {
        return 0;
    }
    (block_count - block).min(stepping)
}

/// Half-open block range `[start, end)` walked in groups of `stepping`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub start: BlockAddress,
    pub end: BlockAddress,
    pub stepping: u64,
}

impl Region {
    /// Normalise the operator's requested range against the device.
    ///
    /// A `stepping_override` of 0 selects `recommended_stepping`. The start
    /// is rounded down and the end rounded up to a stepping multiple; the
    /// end is clamped to `block_count` both before and after rounding so a
    /// trailing partial group is kept but never extends past the device.
    pub fn plan(
        block_count: u64,
        recommended_stepping: u64,
        start_block: u64,
        end_block: u64,
        stepping_override: u64,
    ) -> Region {
        let stepping = match stepping_override {
            0 => recommended_stepping.max(1),
            s => s,
        };
        let mut end = end_block.min(block_count);
        end = round_up(end, stepping);
        end = end.min(block_count);
        let start = round_down(start_block, stepping);
        if start >= end {
            // Empty region pinned to the last group boundary.
            let edge = round_down(end, stepping);
            return Region { start: edge, end: edge, stepping };
        }

        Region { start, end, stepping }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {} (stepping {})", self.start, self.end, self.stepping)
    }
}
