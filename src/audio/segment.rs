//! Speech segmentation: audio normalization, voice-activity detection, and
//! draft subtitle synthesis.

use std::path::Path;

use tracing::info;

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::progress::{ProgressEvent, ProgressSender, Stage};
use crate::registry::ProcessRegistry;
use crate::subtitle::{srt, SrtSegment};

use super::vad::{detect_speech_intervals, VadConfig};
use super::{extract, SpeechInterval};

/// Options for the speech segmenter.
#[derive(Debug, Clone)]
pub struct SegmenterOptions {
    /// Target sample rate for normalization; must be one the VAD accepts.
    pub sample_rate: u32,
    pub vad: VadConfig,
}

impl Default for SegmenterOptions {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            vad: VadConfig::default(),
        }
    }
}

/// Terminal artifact of subtitle generation.
#[derive(Debug, Clone, Default)]
pub struct GenerateSubtitlesFullResult {
    /// Rendered SRT text.
    pub subtitles: String,
    /// Ordered segments, indices contiguous from 1.
    pub segments: Vec<SrtSegment>,
    pub speech_intervals: Vec<SpeechInterval>,
    /// Stage-local problems that did not abort the operation.
    pub warnings: Vec<String>,
    pub error: Option<String>,
    pub cancelled: bool,
}

/// Draft cue text for a detected interval. The text is populated by a later
/// translation pass when one is requested.
fn draft_text(index: usize) -> String {
    format!("[speech {index}]")
}

/// Run the segmenter stages over one input file.
///
/// Stage A normalizes the input to mono PCM in `workdir` (registered,
/// cancellable subprocess). Stage B runs voice-activity detection in frame
/// batches. Stage C maps each interval to a draft segment. Progress events
/// carry the stage label and, once segments exist, an incrementally rendered
/// SRT string.
pub async fn generate_subtitles_from_audio(
    input: &Path,
    workdir: &Path,
    options: &SegmenterOptions,
    operation_id: &str,
    registry: &ProcessRegistry,
    token: &CancelToken,
    progress: &ProgressSender,
) -> Result<GenerateSubtitlesFullResult> {
    // Stage A: normalization.
    progress.send(ProgressEvent::stage(Stage::Extracting, 0.0));
    let audio_path = workdir.join("audio.wav");
    let extract_progress = progress.clone();
    extract::extract_audio(
        input,
        &audio_path,
        options.sample_rate,
        operation_id,
        registry,
        token,
        move |fraction| {
            extract_progress.send(ProgressEvent::stage(Stage::Extracting, fraction));
        },
    )
    .await?;

    // Stage B: voice-activity detection.
    progress.send(ProgressEvent::stage(Stage::Segmenting, 0.0));
    let vad_progress = progress.clone();
    let intervals = {
        let vad_config = options.vad.clone();
        let vad_token = token.clone();
        let vad_path = audio_path.clone();
        // The classifier is CPU-bound; keep it off the async executor.
        tokio::task::spawn_blocking(move || {
            detect_speech_intervals(&vad_path, &vad_config, &vad_token, |done, total| {
                let fraction = done as f64 / total.max(1) as f64;
                vad_progress.send(
                    ProgressEvent::stage(Stage::Segmenting, fraction).with_counts(done, total),
                );
            })
        })
        .await
        .map_err(|e| crate::error::SubgenError::subprocess("vad", format!("VAD task failed: {e}")))??
    };

    // Stage C: segment synthesis.
    token.checkpoint()?;
    let mut segments = Vec::with_capacity(intervals.len());
    for (i, interval) in intervals.iter().enumerate() {
        segments.push(SrtSegment {
            index: i + 1,
            start: interval.start,
            end: interval.end,
            text: draft_text(i + 1),
        });
    }

    let subtitles = srt::render(&segments);
    progress.send(
        ProgressEvent::stage(Stage::Segmenting, 1.0)
            .with_counts(segments.len(), segments.len())
            .with_partial(subtitles.clone()),
    );

    info!(
        "Segmenter produced {} draft segments from {} intervals",
        segments.len(),
        intervals.len()
    );

    Ok(GenerateSubtitlesFullResult {
        subtitles,
        segments,
        speech_intervals: intervals,
        warnings: Vec::new(),
        error: None,
        cancelled: false,
    })
}
