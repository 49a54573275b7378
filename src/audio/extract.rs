//! FFmpeg-based audio normalization.
//!
//! Extraction runs as a registered subprocess so a caller holding only the
//! operation id can interrupt it mid-flight.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::error::{Result, SubgenError};
use crate::registry::ProcessRegistry;

use super::AudioMetadata;

const EXTRACT_STAGE: &str = "extraction";

/// Check that FFmpeg is installed and accessible.
pub async fn check_ffmpeg() -> Result<()> {
    let output = Command::new("ffmpeg")
        .arg("-version")
        .output()
        .await
        .map_err(|e| {
            SubgenError::subprocess(
                EXTRACT_STAGE,
                format!("FFmpeg not found. Please install FFmpeg and ensure it's in your PATH. Error: {e}"),
            )
        })?;

    if !output.status.success() {
        return Err(SubgenError::subprocess(EXTRACT_STAGE, "FFmpeg check failed"));
    }

    debug!("FFmpeg is available");
    Ok(())
}

/// Get media duration using FFprobe.
pub async fn probe_duration(input: &Path) -> Result<Duration> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(input)
        .output()
        .await
        .map_err(|e| SubgenError::subprocess(EXTRACT_STAGE, format!("Failed to run FFprobe: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SubgenError::subprocess(
            EXTRACT_STAGE,
            format!("FFprobe failed: {stderr}"),
        ));
    }

    let duration_str = String::from_utf8_lossy(&output.stdout);
    let duration_secs: f64 = duration_str.trim().parse().map_err(|e| {
        SubgenError::subprocess(
            EXTRACT_STAGE,
            format!("Failed to parse duration '{}': {e}", duration_str.trim()),
        )
    })?;

    Ok(Duration::from_secs_f64(duration_secs))
}

/// Extract audio from a video/audio file into mono 16-bit PCM WAV at the
/// given sample rate (a rate the VAD accepts).
///
/// The FFmpeg process is registered under `operation_id`, its progress
/// stream drives `on_progress` with a fraction in `[0.0, 1.0]`, and the
/// cancel token is observed between progress lines. On cancellation the
/// subprocess is terminated through the registry and `Cancelled` is
/// returned rather than a partial success.
pub async fn extract_audio(
    input: &Path,
    output: &Path,
    sample_rate: u32,
    operation_id: &str,
    registry: &ProcessRegistry,
    token: &CancelToken,
    mut on_progress: impl FnMut(f64),
) -> Result<AudioMetadata> {
    if !input.exists() {
        return Err(SubgenError::FileNotFound(input.display().to_string()));
    }

    token.checkpoint()?;
    let duration = probe_duration(input).await?;
    let duration_secs = duration.as_secs_f64().max(f64::EPSILON);
    info!(
        "Extracting audio from {} ({:.1}s)",
        input.display(),
        duration.as_secs_f64()
    );

    token.checkpoint()?;
    let mut child = Command::new("ffmpeg")
        .args(["-y", "-progress", "pipe:1", "-i"])
        .arg(input)
        .args(["-vn", "-acodec", "pcm_s16le", "-ar"])
        .arg(sample_rate.to_string())
        .args(["-ac", "1"])
        .arg(output)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| SubgenError::subprocess(EXTRACT_STAGE, format!("Failed to spawn FFmpeg: {e}")))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| SubgenError::subprocess(EXTRACT_STAGE, "FFmpeg stdout not piped"))?;
    registry.register(operation_id, child);

    let mut lines = BufReader::new(stdout).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if token.is_cancelled() {
            registry.cancel(operation_id).await;
            return Err(SubgenError::Cancelled);
        }
        if let Some(value) = line.strip_prefix("out_time_us=") {
            if let Ok(time_us) = value.trim().parse::<i64>() {
                if time_us > 0 {
                    let progress = (time_us as f64 / 1_000_000.0 / duration_secs).min(1.0);
                    on_progress(progress);
                }
            }
        }
    }

    // Stdout is closed; reap the process. A missing registry entry means a
    // cancel raced us and already terminated it.
    let Some(mut child) = registry.take(operation_id) else {
        return Err(SubgenError::Cancelled);
    };
    let status = child
        .wait()
        .await
        .map_err(|e| SubgenError::subprocess(EXTRACT_STAGE, format!("Failed to wait for FFmpeg: {e}")))?;

    if token.is_cancelled() {
        // Non-zero exit after a kill request is expected, not an error.
        return Err(SubgenError::Cancelled);
    }
    if !status.success() {
        return Err(SubgenError::subprocess(
            EXTRACT_STAGE,
            format!("FFmpeg audio extraction failed with {status}"),
        ));
    }
    if !output.exists() {
        return Err(SubgenError::subprocess(
            EXTRACT_STAGE,
            "Output file was not created",
        ));
    }

    on_progress(1.0);
    info!("Audio extracted to {}", output.display());

    Ok(AudioMetadata {
        duration,
        sample_rate,
        channels: 1,
    })
}
