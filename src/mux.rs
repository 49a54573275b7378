//! Subtitle muxing: soft-mux or burn-in via a registered FFmpeg subprocess.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::audio::probe_duration;
use crate::cancel::CancelToken;
use crate::error::{Result, SubgenError};
use crate::progress::{ProgressEvent, ProgressSender, Stage};
use crate::registry::ProcessRegistry;
use crate::subtitle::ass::{render_ass, StylePreset};
use crate::subtitle::srt;

const MUX_STAGE: &str = "muxing";

/// How the subtitle track is combined with the video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubtitleMode {
    /// Separate subtitle stream; video and audio are stream-copied.
    Soft,
    /// Subtitles rendered into the picture with a style preset.
    BurnIn,
}

/// Inputs to one mux operation.
#[derive(Debug, Clone)]
pub struct MuxOptions {
    pub video: PathBuf,
    pub subtitles: PathBuf,
    pub output: PathBuf,
    pub mode: SubtitleMode,
    /// Style preset for burn-in; ignored for soft muxing.
    pub style: Option<StylePreset>,
    /// Operation workspace for intermediate files (rendered ASS).
    pub workdir: PathBuf,
}

/// Merge the subtitle track into the source video.
///
/// Runs a single registered FFmpeg subprocess; its time-position progress
/// stream is mapped to `{percent, stage}` events. On cancellation or
/// failure the partially written output file is deleted so no corrupt media
/// file is left at the caller-visible path.
pub async fn merge_subtitles_with_video(
    options: &MuxOptions,
    operation_id: &str,
    registry: &ProcessRegistry,
    token: &CancelToken,
    progress: &ProgressSender,
) -> Result<PathBuf> {
    if !options.video.exists() {
        return Err(SubgenError::FileNotFound(options.video.display().to_string()));
    }
    if !options.subtitles.exists() {
        return Err(SubgenError::FileNotFound(
            options.subtitles.display().to_string(),
        ));
    }

    token.checkpoint()?;
    let duration = probe_duration(&options.video).await?;
    let duration_secs = duration.as_secs_f64().max(f64::EPSILON);

    let mut command = Command::new("ffmpeg");
    command.args(["-y", "-progress", "pipe:1", "-i"]).arg(&options.video);

    match options.mode {
        SubtitleMode::Soft => {
            command
                .arg("-i")
                .arg(&options.subtitles)
                .args(["-c:v", "copy", "-c:a", "copy", "-c:s", "mov_text"]);
        }
        SubtitleMode::BurnIn => {
            // Render the styled ASS into the workspace, then filter on it.
            let style = options.style.clone().unwrap_or_else(StylePreset::default_style);
            let srt_text = std::fs::read_to_string(&options.subtitles)?;
            let segments = srt::parse(&srt_text)?;
            let ass_path = options.workdir.join("styled.ass");
            std::fs::write(&ass_path, render_ass(&segments, &style))?;

            command
                .arg("-vf")
                .arg(format!("ass={}", ass_path.display()))
                .args(["-c:a", "copy"]);
        }
    }
    command.arg(&options.output);

    token.checkpoint()?;
    info!(
        "Muxing subtitles into {} ({:?})",
        options.output.display(),
        options.mode
    );

    let mut child = command
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| SubgenError::subprocess(MUX_STAGE, format!("Failed to spawn FFmpeg: {e}")))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| SubgenError::subprocess(MUX_STAGE, "FFmpeg stdout not piped"))?;
    registry.register(operation_id, child);

    let mut lines = BufReader::new(stdout).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if token.is_cancelled() {
            registry.cancel(operation_id).await;
            remove_partial_output(&options.output);
            return Err(SubgenError::Cancelled);
        }
        if let Some(value) = line.strip_prefix("out_time_us=") {
            if let Ok(time_us) = value.trim().parse::<i64>() {
                if time_us > 0 {
                    let fraction = (time_us as f64 / 1_000_000.0 / duration_secs).min(1.0);
                    progress.send(ProgressEvent::stage(Stage::Merging, fraction));
                }
            }
        }
    }

    let Some(mut child) = registry.take(operation_id) else {
        remove_partial_output(&options.output);
        return Err(SubgenError::Cancelled);
    };
    let status = child
        .wait()
        .await
        .map_err(|e| SubgenError::subprocess(MUX_STAGE, format!("Failed to wait for FFmpeg: {e}")))?;

    if token.is_cancelled() {
        remove_partial_output(&options.output);
        return Err(SubgenError::Cancelled);
    }
    if !status.success() {
        remove_partial_output(&options.output);
        return Err(SubgenError::subprocess(
            MUX_STAGE,
            format!("FFmpeg muxing failed with {status}"),
        ));
    }

    progress.send(ProgressEvent::stage(Stage::Merging, 1.0));
    info!("Muxed output written to {}", options.output.display());
    Ok(options.output.clone())
}

/// Delete a partially written output file; best-effort.
fn remove_partial_output(path: &Path) {
    if path.exists() {
        match std::fs::remove_file(path) {
            Ok(()) => debug!("Removed partial output {}", path.display()),
            Err(e) => warn!("Failed to remove partial output {}: {}", path.display(), e),
        }
    }
}
