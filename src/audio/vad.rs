//! Frame-based voice-activity detection over normalized PCM audio.

use std::path::Path;
use std::time::Duration;

use hound::WavReader;
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::error::{Result, SubgenError};

use super::SpeechInterval;

const VAD_STAGE: &str = "vad";

/// Sample rates the detector accepts.
pub const SUPPORTED_SAMPLE_RATES: [u32; 4] = [8000, 16000, 32000, 48000];

/// Frame length used for classification.
const FRAME_MILLIS: u64 = 30;

/// Configuration for voice-activity detection.
#[derive(Debug, Clone)]
pub struct VadConfig {
    /// Aggressiveness level 0-3. Stricter levels use a higher energy
    /// threshold and so produce fewer false positives.
    pub level: u8,

    /// Voiced runs separated by gaps shorter than this are merged into one
    /// interval.
    pub merge_gap: Duration,

    /// Voiced runs shorter than this are discarded.
    pub min_speech: Duration,

    /// Frames processed between cancellation checkpoints and progress
    /// callbacks.
    pub frame_batch: usize,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            level: 2,
            merge_gap: Duration::from_millis(300),
            min_speech: Duration::from_millis(250),
            frame_batch: 256,
        }
    }
}

impl VadConfig {
    /// RMS energy threshold for a given aggressiveness level.
    fn energy_threshold(&self) -> f32 {
        match self.level {
            0 => 0.004,
            1 => 0.008,
            2 => 0.015,
            _ => 0.030,
        }
    }
}

fn calculate_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&s| {
            let normalized = s as f64 / i16::MAX as f64;
            normalized * normalized
        })
        .sum();

    (sum_squares / samples.len() as f64).sqrt() as f32
}

/// Detect speech intervals in a WAV file.
///
/// Frames are classified in batches of `config.frame_batch`; between
/// batches the cancel token is checked and `on_batch(done, total)` is
/// invoked so long files give smooth progress feedback.
pub fn detect_speech_intervals(
    audio_path: &Path,
    config: &VadConfig,
    token: &CancelToken,
    mut on_batch: impl FnMut(usize, usize),
) -> Result<Vec<SpeechInterval>> {
    let reader = WavReader::open(audio_path)
        .map_err(|e| SubgenError::subprocess(VAD_STAGE, format!("Failed to open WAV file: {e}")))?;

    let spec = reader.spec();
    let sample_rate = spec.sample_rate;
    if !SUPPORTED_SAMPLE_RATES.contains(&sample_rate) {
        return Err(SubgenError::subprocess(
            VAD_STAGE,
            format!("Unsupported sample rate {sample_rate} Hz, expected one of {SUPPORTED_SAMPLE_RATES:?}"),
        ));
    }

    info!(
        "Analyzing audio: {} Hz, {} channels, {} bits",
        sample_rate, spec.channels, spec.bits_per_sample
    );

    let samples: Vec<i16> = match spec.sample_format {
        hound::SampleFormat::Int => reader
            .into_samples::<i16>()
            .map(|s| s.unwrap_or(0))
            .collect(),
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .map(|s| (s.unwrap_or(0.0) * i16::MAX as f32) as i16)
            .collect(),
    };

    if samples.is_empty() {
        return Ok(vec![]);
    }

    let frame_size = (sample_rate as u64 * FRAME_MILLIS / 1000) as usize;
    let total_frames = samples.len() / frame_size;
    debug!("Classifying {} frames of {} samples", total_frames, frame_size);

    let threshold = config.energy_threshold();
    let mut voiced_frames = Vec::with_capacity(total_frames);

    for batch_start in (0..total_frames).step_by(config.frame_batch.max(1)) {
        token.checkpoint()?;
        let batch_end = (batch_start + config.frame_batch.max(1)).min(total_frames);
        for frame_idx in batch_start..batch_end {
            let offset = frame_idx * frame_size;
            let frame = &samples[offset..offset + frame_size];
            voiced_frames.push(calculate_rms(frame) >= threshold);
        }
        on_batch(batch_end, total_frames);
    }

    let intervals = frames_to_intervals(&voiced_frames, sample_rate, frame_size, config);

    let total_duration = Duration::from_secs_f64(samples.len() as f64 / sample_rate as f64);
    info!(
        "Detected {} speech intervals in {:.2}s of audio",
        intervals.len(),
        total_duration.as_secs_f64()
    );

    Ok(intervals)
}

/// Coalesce per-frame voiced flags into merged, filtered intervals.
fn frames_to_intervals(
    voiced_frames: &[bool],
    sample_rate: u32,
    frame_size: usize,
    config: &VadConfig,
) -> Vec<SpeechInterval> {
    if voiced_frames.is_empty() {
        return vec![];
    }

    let frame_duration = frame_size as f64 / sample_rate as f64;
    let merge_gap_frames = (config.merge_gap.as_secs_f64() / frame_duration).ceil() as usize;
    let min_speech_frames = (config.min_speech.as_secs_f64() / frame_duration).ceil() as usize;

    let mut raw_runs: Vec<(usize, usize)> = Vec::new();
    let mut in_speech = false;
    let mut run_start = 0;

    for (i, &voiced) in voiced_frames.iter().enumerate() {
        if voiced && !in_speech {
            in_speech = true;
            run_start = i;
        } else if !voiced && in_speech {
            in_speech = false;
            raw_runs.push((run_start, i));
        }
    }
    if in_speech {
        raw_runs.push((run_start, voiced_frames.len()));
    }

    let mut merged: Vec<(usize, usize)> = Vec::new();
    for (start, end) in raw_runs {
        if let Some((_, last_end)) = merged.last_mut() {
            if start.saturating_sub(*last_end) < merge_gap_frames {
                *last_end = end;
                continue;
            }
        }
        merged.push((start, end));
    }

    merged
        .into_iter()
        .filter(|(start, end)| end - start >= min_speech_frames)
        .map(|(start, end)| SpeechInterval {
            start: Duration::from_secs_f64(start as f64 * frame_duration),
            end: Duration::from_secs_f64(end as f64 * frame_duration),
        })
        .collect()
}
