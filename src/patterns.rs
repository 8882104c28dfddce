use crate::engine::{create_buffer, IoBuffer};

/// Fill bytes written during a burn, in the order they are applied.
/// All zeros and all ones, plus both alternating-bit phases.
pub const FILL_BYTES: [u8; 4] = [0x00, 0x55, 0xAA, 0xFF];

/// The burn patterns, each pre-filled to the working buffer length and
/// allocated with the same alignment as the other I/O buffers.
pub struct PatternSet {
    patterns: Vec<IoBuffer>,
}

impl PatternSet {
    pub fn new(len: usize, direct_io: bool) -> Self {
        let patterns = FILL_BYTES
            .iter()
            .map(|&b| {
                let mut buf = create_buffer(len, direct_io);
                buf.fill(b);
                buf
            })
            .collect();
        PatternSet { patterns }
    }

    /// Patterns truncated to `len` bytes, for a trailing partial group.
    pub fn iter(&self, len: usize) -> impl Iterator<Item = &[u8]> + '_ {
        self.patterns.iter().map(move |p| &p[..len.min(p.len())])
    }

    pub fn buffer_len(&self) -> usize {
        self.patterns.first().map_or(0, |p| p.len())
    }
}
