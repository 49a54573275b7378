pub mod ass;
pub mod srt;

use std::time::Duration;

/// One subtitle cue, ordered by start time. `index` is the 1-based display
/// order and stays contiguous after any re-batching.
#[derive(Debug, Clone, PartialEq)]
pub struct SrtSegment {
    pub index: usize,
    pub start: Duration,
    pub end: Duration,
    pub text: String,
}

impl SrtSegment {
    pub fn duration(&self) -> Duration {
        self.end.saturating_sub(self.start)
    }
}

/// Re-number segments into a contiguous ascending sequence starting at 1.
pub fn reindex(segments: &mut [SrtSegment]) {
    for (i, segment) in segments.iter_mut().enumerate() {
        segment.index = i + 1;
    }
}
