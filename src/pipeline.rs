//! Pipeline orchestration: composes workspace, registry, segmenter,
//! translator, and muxer into cancellable end-to-end operations.
//!
//! State machine per operation:
//! `Created -> Extracting -> Segmenting -> Translating -> (Merging) ->
//! Completed | Cancelled | Failed`. Transitions are strictly forward and
//! every terminal state reaps subprocesses and removes the operation
//! workspace.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::audio::{
    check_ffmpeg, generate_subtitles_from_audio, GenerateSubtitlesFullResult, SegmenterOptions,
};
use crate::cancel::CancelToken;
use crate::config::Config;
use crate::error::{Result, SubgenError};
use crate::mux::{merge_subtitles_with_video, MuxOptions, SubtitleMode};
use crate::progress::{ProgressEvent, ProgressReceiver, ProgressSender, Stage};
use crate::registry::ProcessRegistry;
use crate::subtitle::ass::StylePreset;
use crate::subtitle::{reindex, srt, SrtSegment};
use crate::translate::{BatchPolicy, BatchTranslator, TranslationOutcome, Translator};
use crate::workspace;

static OPERATION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a unique operation id for one pipeline run.
pub fn new_operation_id() -> String {
    let seq = OPERATION_COUNTER.fetch_add(1, Ordering::Relaxed);
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("{nanos:x}-{seq}")
}

/// Options for a generate operation.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// When set, draft segments are batch-translated to this language.
    pub target_lang: Option<String>,
    pub segmenter: SegmenterOptions,
}

/// Options for a merge operation.
#[derive(Debug, Clone)]
pub struct MergeOptions {
    pub video: PathBuf,
    pub subtitles: PathBuf,
    /// Defaults to the video path with a `.subbed.mp4` suffix.
    pub output: Option<PathBuf>,
    pub mode: SubtitleMode,
    pub style: Option<StylePreset>,
}

/// Terminal artifact of a translate operation.
#[derive(Debug, Clone)]
pub struct TranslateResult {
    pub subtitles: String,
    pub segments: Vec<SrtSegment>,
    pub warnings: Vec<String>,
    pub cancelled: bool,
}

/// Drives operations end to end and exposes progress and cancellation to
/// the caller. One instance per process; the registry is injected, not
/// global.
pub struct Orchestrator {
    config: Config,
    registry: Arc<ProcessRegistry>,
    translator: Arc<dyn Translator>,
    tokens: Mutex<HashMap<String, CancelToken>>,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        registry: Arc<ProcessRegistry>,
        translator: Arc<dyn Translator>,
    ) -> Self {
        Self {
            config,
            registry,
            translator,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Bounded progress channel sized from configuration.
    pub fn progress_channel(&self) -> (ProgressSender, ProgressReceiver) {
        ProgressSender::channel(self.config.progress_buffer)
    }

    /// Cancel a running operation by id: trips its token and terminates any
    /// registered subprocess within the grace-then-kill timeout.
    pub async fn cancel(&self, operation_id: &str) {
        let token = self
            .tokens
            .lock()
            .expect("token table poisoned")
            .get(operation_id)
            .cloned();
        if let Some(token) = token {
            info!("Cancelling operation {}", operation_id);
            token.cancel();
        }
        self.registry.cancel(operation_id).await;
    }

    fn begin(&self, operation_id: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens
            .lock()
            .expect("token table poisoned")
            .insert(operation_id.to_string(), token.clone());
        token
    }

    /// Terminal teardown, identical for every outcome: reap subprocesses,
    /// remove the workspace, forget the token.
    async fn finish(&self, operation_id: &str, workdir: Option<&Path>) {
        self.registry.cancel(operation_id).await;
        if let Some(workdir) = workdir {
            workspace::cleanup_temp_dir(workdir, operation_id);
        }
        self.tokens
            .lock()
            .expect("token table poisoned")
            .remove(operation_id);
    }

    fn batch_translator(&self) -> BatchTranslator {
        BatchTranslator::new(
            self.translator.clone(),
            BatchPolicy {
                max_segments: self.config.max_batch_segments,
                max_chars: self.config.max_batch_chars,
                context_window: self.config.context_window,
            },
            self.config.concurrency,
        )
        .with_retries(self.config.max_retries, self.config.retry_base_delay())
    }

    /// Generate subtitles for a video/audio file.
    ///
    /// Always returns a terminal payload: on failure or cancellation it
    /// carries the segments computed so far plus the error or cancellation
    /// marker, never a silent empty success.
    pub async fn generate(
        &self,
        input: &Path,
        options: &GenerateOptions,
        operation_id: &str,
        progress: &ProgressSender,
    ) -> GenerateSubtitlesFullResult {
        let token = self.begin(operation_id);
        progress.send(ProgressEvent::stage(Stage::Created, 0.0));

        let workdir = match workspace::create_operation_temp_dir(operation_id) {
            Ok(dir) => dir,
            Err(e) => {
                let message = e.to_string();
                progress.send(ProgressEvent::stage(Stage::Failed, 0.0).with_error(message.clone()));
                self.finish(operation_id, None).await;
                return GenerateSubtitlesFullResult {
                    error: Some(message),
                    ..Default::default()
                };
            }
        };

        let outcome = self
            .run_generate(input, options, operation_id, &workdir, &token, progress)
            .await;

        let result = match outcome {
            Ok(result) if result.cancelled => {
                progress.send(ProgressEvent::stage(Stage::Cancelled, 1.0));
                result
            }
            Ok(result) => {
                progress.send(
                    ProgressEvent::stage(Stage::Completed, 1.0)
                        .with_partial(result.subtitles.clone()),
                );
                result
            }
            Err(SubgenError::Cancelled) => {
                progress.send(ProgressEvent::stage(Stage::Cancelled, 1.0));
                GenerateSubtitlesFullResult {
                    cancelled: true,
                    ..Default::default()
                }
            }
            Err(e) => {
                let message = e.to_string();
                warn!("Operation {} failed: {}", operation_id, message);
                progress.send(ProgressEvent::stage(Stage::Failed, 1.0).with_error(message.clone()));
                GenerateSubtitlesFullResult {
                    error: Some(message),
                    ..Default::default()
                }
            }
        };

        self.finish(operation_id, Some(&workdir)).await;
        result
    }

    async fn run_generate(
        &self,
        input: &Path,
        options: &GenerateOptions,
        operation_id: &str,
        workdir: &Path,
        token: &CancelToken,
        progress: &ProgressSender,
    ) -> Result<GenerateSubtitlesFullResult> {
        if !input.exists() {
            return Err(SubgenError::FileNotFound(input.display().to_string()));
        }
        check_ffmpeg().await?;
        token.checkpoint()?;

        let mut result = generate_subtitles_from_audio(
            input,
            workdir,
            &options.segmenter,
            operation_id,
            &self.registry,
            token,
            progress,
        )
        .await?;

        if let Some(target_lang) = &options.target_lang {
            progress.send(ProgressEvent::stage(Stage::Translating, 0.0));
            let translation = self
                .batch_translator()
                .translate_segments(&result.segments, target_lang, token, progress)
                .await;
            result = self.apply_translation(result, translation);
        }

        Ok(result)
    }

    /// Fold a translation outcome into the generation result, preserving
    /// partial data on cancellation.
    ///
    /// When cancellation lands before any batch completes, the draft
    /// segments from segmentation are the data computed so far and stay in
    /// the payload; translated segments replace them only once they exist.
    fn apply_translation(
        &self,
        mut result: GenerateSubtitlesFullResult,
        translation: TranslationOutcome,
    ) -> GenerateSubtitlesFullResult {
        result.warnings.extend(translation.warnings);
        result.cancelled = translation.cancelled;
        if !translation.segments.is_empty() {
            result.segments = translation.segments;
            reindex(&mut result.segments);
            result.subtitles = srt::render(&result.segments);
        }
        result
    }

    /// Translate existing subtitle text to `target_lang`.
    pub async fn translate(
        &self,
        subtitle_text: &str,
        source_lang: &str,
        target_lang: &str,
        operation_id: &str,
        progress: &ProgressSender,
    ) -> Result<TranslateResult> {
        let token = self.begin(operation_id);
        progress.send(ProgressEvent::stage(Stage::Created, 0.0));

        let inner = async {
            let mut segments = srt::parse(subtitle_text)?;
            reindex(&mut segments);
            info!(
                "Translating {} segments {} -> {} (operation {})",
                segments.len(),
                source_lang,
                target_lang,
                operation_id
            );

            progress.send(ProgressEvent::stage(Stage::Translating, 0.0));
            let outcome = self
                .batch_translator()
                .translate_segments(&segments, target_lang, &token, progress)
                .await;

            let mut translated = outcome.segments;
            reindex(&mut translated);
            Ok::<TranslateResult, SubgenError>(TranslateResult {
                subtitles: srt::render(&translated),
                segments: translated,
                warnings: outcome.warnings,
                cancelled: outcome.cancelled,
            })
        };

        let result = inner.await;
        match &result {
            Ok(r) if r.cancelled => progress.send(ProgressEvent::stage(Stage::Cancelled, 1.0)),
            Ok(r) => progress.send(
                ProgressEvent::stage(Stage::Completed, 1.0).with_partial(r.subtitles.clone()),
            ),
            Err(e) => progress
                .send(ProgressEvent::stage(Stage::Failed, 1.0).with_error(e.to_string())),
        }
        self.finish(operation_id, None).await;
        result
    }

    /// Merge subtitles into the source video, returning the output path.
    pub async fn merge(
        &self,
        options: &MergeOptions,
        operation_id: &str,
        progress: &ProgressSender,
    ) -> Result<PathBuf> {
        let token = self.begin(operation_id);
        progress.send(ProgressEvent::stage(Stage::Created, 0.0));

        let workdir = match workspace::create_operation_temp_dir(operation_id) {
            Ok(dir) => dir,
            Err(e) => {
                progress.send(ProgressEvent::stage(Stage::Failed, 0.0).with_error(e.to_string()));
                self.finish(operation_id, None).await;
                return Err(e);
            }
        };
        let output = options.output.clone().unwrap_or_else(|| {
            let stem = options
                .video
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "output".to_string());
            options.video.with_file_name(format!("{stem}.subbed.mp4"))
        });

        progress.send(ProgressEvent::stage(Stage::Merging, 0.0));
        let mux_options = MuxOptions {
            video: options.video.clone(),
            subtitles: options.subtitles.clone(),
            output,
            mode: options.mode.clone(),
            style: options.style.clone(),
            workdir: workdir.clone(),
        };
        let result = merge_subtitles_with_video(
            &mux_options,
            operation_id,
            &self.registry,
            &token,
            progress,
        )
        .await;

        match &result {
            Ok(path) => progress.send(
                ProgressEvent::stage(Stage::Completed, 1.0).with_partial(path.display().to_string()),
            ),
            Err(SubgenError::Cancelled) => {
                progress.send(ProgressEvent::stage(Stage::Cancelled, 1.0));
            }
            Err(e) => progress
                .send(ProgressEvent::stage(Stage::Failed, 1.0).with_error(e.to_string())),
        }
        self.finish(operation_id, Some(&workdir)).await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct EchoTranslator;

    #[async_trait]
    impl Translator for EchoTranslator {
        async fn translate_batch(
            &self,
            texts: &[&str],
            _before: &[&str],
            _after: &[&str],
            _lang: &str,
        ) -> Result<Vec<String>> {
            Ok(texts.iter().map(|t| format!("tx:{t}")).collect())
        }

        fn name(&self) -> &'static str {
            "echo"
        }
    }

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(
            Config::default(),
            Arc::new(ProcessRegistry::new()),
            Arc::new(EchoTranslator),
        )
    }

    #[test]
    fn test_operation_ids_are_unique() {
        let a = new_operation_id();
        let b = new_operation_id();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_generate_missing_input_fails_with_terminal_error() {
        let orchestrator = orchestrator();
        let (progress, mut rx) = orchestrator.progress_channel();
        let result = orchestrator
            .generate(
                Path::new("/nonexistent/input.mp4"),
                &GenerateOptions::default(),
                "op-gen-missing",
                &progress,
            )
            .await;

        assert!(result.error.is_some());
        assert!(result.segments.is_empty());

        let mut saw_failed = false;
        while let Some(event) = rx.try_recv() {
            if event.stage == Stage::Failed {
                assert!(event.error.is_some());
                saw_failed = true;
            }
        }
        assert!(saw_failed);
        // Workspace is reclaimed on failure too.
        assert!(!std::env::temp_dir().join("subgen-op-gen-missing").exists());
    }

    #[tokio::test]
    async fn test_cancel_before_first_batch_keeps_draft_segments() {
        use std::time::Duration;

        let orchestrator = orchestrator();
        let drafts: Vec<SrtSegment> = (1..=3)
            .map(|i| SrtSegment {
                index: i,
                start: Duration::from_secs(i as u64),
                end: Duration::from_secs(i as u64) + Duration::from_millis(800),
                text: format!("[speech {i}]"),
            })
            .collect();
        let result = GenerateSubtitlesFullResult {
            subtitles: srt::render(&drafts),
            segments: drafts.clone(),
            ..Default::default()
        };

        // Cancellation landed before any batch completed: no translated
        // segments came back, only the cancelled marker.
        let translation = TranslationOutcome {
            cancelled: true,
            ..Default::default()
        };
        let folded = orchestrator.apply_translation(result, translation);

        assert!(folded.cancelled);
        assert_eq!(folded.segments, drafts, "draft segments must survive");
        assert!(folded.subtitles.contains("[speech 1]"));
    }

    #[tokio::test]
    async fn test_merge_workdir_failure_is_terminal_and_forgets_token() {
        let orchestrator = orchestrator();
        let operation_id = "op-merge-blocked";

        // A file squatting on the workspace path makes directory creation
        // fail before the muxer ever runs.
        let blocked = std::env::temp_dir().join(format!("subgen-{operation_id}"));
        std::fs::write(&blocked, b"in the way").unwrap();

        let (progress, mut rx) = orchestrator.progress_channel();
        let options = MergeOptions {
            video: PathBuf::from("/nonexistent/video.mp4"),
            subtitles: PathBuf::from("/nonexistent/subs.srt"),
            output: None,
            mode: SubtitleMode::Soft,
            style: None,
        };
        let result = orchestrator.merge(&options, operation_id, &progress).await;
        std::fs::remove_file(&blocked).unwrap();

        assert!(result.is_err());

        let mut saw_failed = false;
        while let Some(event) = rx.try_recv() {
            if event.stage == Stage::Failed {
                assert!(event.error.is_some());
                saw_failed = true;
            }
        }
        assert!(saw_failed, "workdir failure must surface a Failed event");
        assert!(
            orchestrator.tokens.lock().unwrap().is_empty(),
            "token entry must not outlive the failed operation"
        );
    }

    #[tokio::test]
    async fn test_translate_round_trip_with_mock_provider() {
        let orchestrator = orchestrator();
        let srt_text = "1\n00:00:01,000 --> 00:00:02,000\nhello\n\n2\n00:00:03,000 --> 00:00:04,000\nworld\n";
        let (progress, _rx) = orchestrator.progress_channel();
        let result = orchestrator
            .translate(srt_text, "en", "es", "op-translate-ok", &progress)
            .await
            .unwrap();

        assert!(!result.cancelled);
        assert_eq!(result.segments.len(), 2);
        assert_eq!(result.segments[0].text, "tx:hello");
        assert_eq!(result.segments[1].text, "tx:world");
        assert_eq!(result.segments[0].index, 1);
        assert!(result.subtitles.contains("tx:hello"));
    }

    #[tokio::test]
    async fn test_translate_invalid_srt_is_config_error() {
        let orchestrator = orchestrator();
        let (progress, _rx) = orchestrator.progress_channel();
        let result = orchestrator
            .translate("1\nno timing here\n", "en", "es", "op-translate-bad", &progress)
            .await;
        assert!(matches!(result, Err(SubgenError::Config(_))));
    }

    #[tokio::test]
    async fn test_cancel_unknown_operation_is_noop() {
        let orchestrator = orchestrator();
        orchestrator.cancel("never-started").await;
    }
}
