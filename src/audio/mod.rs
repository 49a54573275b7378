pub mod extract;
pub mod segment;
pub mod vad;

pub use extract::{check_ffmpeg, extract_audio, probe_duration};
pub use segment::{generate_subtitles_from_audio, GenerateSubtitlesFullResult, SegmenterOptions};
pub use vad::{detect_speech_intervals, VadConfig, SUPPORTED_SAMPLE_RATES};

use std::time::Duration;

/// Metadata about a normalized audio file.
#[derive(Debug, Clone)]
pub struct AudioMetadata {
    pub duration: Duration,
    pub sample_rate: u32,
    pub channels: u16,
}

/// A contiguous time range classified as voiced, after gap-merging.
/// Intervals are monotonically increasing and non-overlapping.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechInterval {
    pub start: Duration,
    pub end: Duration,
}

impl SpeechInterval {
    pub fn duration(&self) -> Duration {
        self.end.saturating_sub(self.start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_duration() {
        let interval = SpeechInterval {
            start: Duration::from_secs(1),
            end: Duration::from_millis(3200),
        };
        assert_eq!(interval.duration(), Duration::from_millis(2200));
    }
}
