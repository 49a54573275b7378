use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use subgen::audio::SegmenterOptions;
use subgen::audio::vad::VadConfig;
use subgen::config::Config;
use subgen::mux::SubtitleMode;
use subgen::pipeline::{new_operation_id, GenerateOptions, MergeOptions, Orchestrator};
use subgen::progress::{ProgressReceiver, Stage};
use subgen::registry::ProcessRegistry;
use subgen::subtitle::ass::StylePreset;
use subgen::translate::GeminiTranslator;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "subgen")]
#[command(version, about = "Subtitle generation, translation, and muxing")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Detect speech in a video/audio file and generate draft subtitles
    Generate {
        /// Input video/audio file
        input: PathBuf,

        /// Output subtitle file (defaults to input name with .srt)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Translate generated segments to this language code
        #[arg(long)]
        translate: Option<String>,

        /// VAD aggressiveness, 0-3 (stricter = fewer false positives)
        #[arg(long)]
        vad_level: Option<u8>,
    },
    /// Translate an existing SRT file
    Translate {
        /// Input subtitle file
        input: PathBuf,

        /// Source language code
        #[arg(short, long, default_value = "en")]
        source: String,

        /// Target language code
        #[arg(short, long)]
        target: String,

        /// Output subtitle file (defaults to <input>.<target>.srt)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Merge a subtitle file into a video container
    Merge {
        /// Input video file
        video: PathBuf,

        /// Subtitle file to merge
        subtitles: PathBuf,

        /// Output video file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Burn subtitles into the picture instead of soft-muxing
        #[arg(long)]
        burn_in: bool,

        /// Style preset for burn-in: default, cinema, compact
        #[arg(long, default_value = "default")]
        style: String,
    },
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

/// Drive an indicatif bar from the pipeline's progress stream.
fn spawn_progress_printer(mut rx: ProgressReceiver) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}% {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );

        while let Some(event) = rx.recv().await {
            bar.set_position((event.percent * 100.0) as u64);
            bar.set_message(event.stage.to_string());
            if let Some(warning) = event.warning {
                bar.println(format!("warning: {warning}"));
            }
            match event.stage {
                Stage::Completed | Stage::Cancelled | Stage::Failed => {
                    bar.finish_with_message(event.stage.to_string());
                }
                _ => {}
            }
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::load().context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;

    let registry = Arc::new(ProcessRegistry::with_grace_timeout(config.grace_timeout()));
    let needs_provider = matches!(
        cli.command,
        Command::Translate { .. }
            | Command::Generate {
                translate: Some(_),
                ..
            }
    );
    let api_key = if needs_provider {
        config.require_api_key()?.to_string()
    } else {
        String::new()
    };
    let translator = Arc::new(GeminiTranslator::new(api_key));
    let orchestrator = Arc::new(Orchestrator::new(config.clone(), registry, translator));

    let operation_id = new_operation_id();

    // Ctrl-C cancels the running operation; the registry kills any live
    // subprocess within the grace timeout.
    {
        let orchestrator = orchestrator.clone();
        let operation_id = operation_id.clone();
        let handle = tokio::runtime::Handle::current();
        ctrlc::set_handler(move || {
            let orchestrator = orchestrator.clone();
            let operation_id = operation_id.clone();
            handle.spawn(async move {
                orchestrator.cancel(&operation_id).await;
            });
        })
        .context("Failed to install Ctrl-C handler")?;
    }

    let (progress, rx) = orchestrator.progress_channel();
    let printer = spawn_progress_printer(rx);

    match cli.command {
        Command::Generate {
            input,
            output,
            translate,
            vad_level,
        } => {
            let output = output.unwrap_or_else(|| input.with_extension("srt"));
            let options = GenerateOptions {
                target_lang: translate,
                segmenter: SegmenterOptions {
                    vad: VadConfig {
                        level: vad_level.unwrap_or(config.vad_level),
                        merge_gap: std::time::Duration::from_millis(config.vad_merge_gap_ms),
                        min_speech: std::time::Duration::from_millis(config.vad_min_speech_ms),
                        ..VadConfig::default()
                    },
                    ..SegmenterOptions::default()
                },
            };

            let result = orchestrator
                .generate(&input, &options, &operation_id, &progress)
                .await;
            drop(progress);
            let _ = printer.await;

            if let Some(error) = &result.error {
                anyhow::bail!("Generation failed: {error}");
            }
            if result.cancelled {
                info!("Generation cancelled; {} segments kept", result.segments.len());
            }
            for warning in &result.warnings {
                info!("Warning: {warning}");
            }
            std::fs::write(&output, &result.subtitles)?;
            info!(
                "Wrote {} segments ({} speech intervals) to {}",
                result.segments.len(),
                result.speech_intervals.len(),
                output.display()
            );
        }
        Command::Translate {
            input,
            source,
            target,
            output,
        } => {
            let subtitle_text = std::fs::read_to_string(&input)
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let output = output.unwrap_or_else(|| {
                let stem = input
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "subtitles".to_string());
                input.with_file_name(format!("{stem}.{target}.srt"))
            });

            let result = orchestrator
                .translate(&subtitle_text, &source, &target, &operation_id, &progress)
                .await?;
            drop(progress);
            let _ = printer.await;

            if result.cancelled {
                info!(
                    "Translation cancelled; {} segments completed",
                    result.segments.len()
                );
            }
            for warning in &result.warnings {
                info!("Warning: {warning}");
            }
            std::fs::write(&output, &result.subtitles)?;
            info!("Wrote {} segments to {}", result.segments.len(), output.display());
        }
        Command::Merge {
            video,
            subtitles,
            output,
            burn_in,
            style,
        } => {
            let style = StylePreset::by_name(&style)
                .ok_or_else(|| anyhow::anyhow!("Unknown style preset: {style}"))?;
            let options = MergeOptions {
                video,
                subtitles,
                output,
                mode: if burn_in {
                    SubtitleMode::BurnIn
                } else {
                    SubtitleMode::Soft
                },
                style: Some(style),
            };

            let path = orchestrator
                .merge(&options, &operation_id, &progress)
                .await?;
            drop(progress);
            let _ = printer.await;
            info!("Merged output written to {}", path.display());
        }
    }

    Ok(())
}
