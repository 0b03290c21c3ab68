use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;

/// One entry of a job's segment plan. Both offsets are inclusive; `start`
/// advances as bytes land in the output file so a stopped segment can resume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub index: u32,
    pub start: u64,
    pub end: u64,
    pub finished: bool,
}

impl Segment {
    pub fn new(index: u32, start: u64, end: u64) -> Self {
        Self {
            index,
            start,
            end,
            finished: false,
        }
    }

    /// Bytes still to be written for this segment.
    pub fn remaining(&self) -> u64 {
        if self.start > self.end {
            0
        } else {
            self.end - self.start + 1
        }
    }

    pub fn range_header(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// Splits `total_bytes` into block-aligned segments for `connections` workers.
///
/// Small files (at or below `min_split_size`) get a single segment. Otherwise
/// the part size is `total / connections` rounded to the nearest block, so the
/// number of segments can land slightly above or below `connections`.
pub fn plan_segments(total_bytes: u64, connections: u32, config: &EngineConfig) -> Vec<Segment> {
    if total_bytes == 0 {
        return Vec::new();
    }

    if connections <= 1 || total_bytes <= config.min_split_size {
        return vec![Segment::new(1, 0, total_bytes - 1)];
    }

    let part_size = part_size(total_bytes, connections, config.block_size);
    let mut segments = Vec::with_capacity((total_bytes / part_size + 1) as usize);
    let mut start = 0u64;
    let mut index = 1u32;
    while start < total_bytes {
        let end = start.saturating_add(part_size - 1).min(total_bytes - 1);
        segments.push(Segment::new(index, start, end));
        start = end + 1;
        index += 1;
    }
    segments
}

fn part_size(total_bytes: u64, connections: u32, block_size: u64) -> u64 {
    let block_size = block_size.max(1);
    let divisor = connections as u128 * block_size as u128;
    // round half up: (total + divisor / 2) / divisor
    let blocks = (total_bytes as u128 + divisor / 2) / divisor;
    let size = (blocks * block_size as u128) as u64;
    size.max(block_size)
}
