//! Concurrent, retrying batch translation with ordered re-assembly.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::error::SubgenError;
use crate::progress::{ProgressEvent, ProgressSender, Stage};
use crate::subtitle::SrtSegment;

use super::{plan_batches, BatchPolicy, ReviewBatch, Translator};

/// Aggregate result of translating a segment sequence.
#[derive(Debug, Clone, Default)]
pub struct TranslationOutcome {
    /// Segments in original order. Batches that exhausted their retries keep
    /// their original-language text; batches interrupted by cancellation are
    /// absent.
    pub segments: Vec<SrtSegment>,
    /// One entry per batch that fell back to original text.
    pub warnings: Vec<String>,
    /// True when cancellation interrupted translation; `segments` then holds
    /// what completed before the signal.
    pub cancelled: bool,
}

enum BatchStatus {
    /// Core segments with translated text.
    Done(Vec<SrtSegment>),
    /// Retries exhausted; core segments kept in the original language.
    Fallback(Vec<SrtSegment>, String),
    Cancelled,
}

/// Translates batches with bounded concurrency, bounded backoff retries, and
/// strict output ordering regardless of completion order.
pub struct BatchTranslator {
    translator: Arc<dyn Translator>,
    policy: BatchPolicy,
    concurrency: usize,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl BatchTranslator {
    pub fn new(translator: Arc<dyn Translator>, policy: BatchPolicy, concurrency: usize) -> Self {
        Self {
            translator,
            policy,
            concurrency: concurrency.max(1),
            max_retries: 2,
            retry_base_delay: Duration::from_millis(500),
        }
    }

    /// Override the retry ceiling and backoff base delay.
    pub fn with_retries(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_base_delay = base_delay;
        self
    }

    /// Translate a segment sequence to `target_lang`.
    ///
    /// The cancel token is checked before each batch is dispatched and raced
    /// against every in-flight provider call. One progress event is emitted
    /// per completed batch.
    pub async fn translate_segments(
        &self,
        segments: &[SrtSegment],
        target_lang: &str,
        token: &CancelToken,
        progress: &ProgressSender,
    ) -> TranslationOutcome {
        let batches = plan_batches(segments, &self.policy, target_lang);
        if batches.is_empty() {
            return TranslationOutcome::default();
        }

        let total_batches = batches.len();
        let completed = Arc::new(AtomicUsize::new(0));
        info!(
            "Translating {} segments in {} batches ({} concurrent) via {}",
            segments.len(),
            total_batches,
            self.concurrency,
            self.translator.name()
        );

        let mut results: Vec<(usize, BatchStatus)> = stream::iter(batches)
            .map(|batch| {
                let token = token.clone();
                let progress = progress.clone();
                let completed = completed.clone();
                async move {
                    let start_index = batch.start_index;
                    // Dispatch checkpoint: a batch never starts after cancel.
                    if token.is_cancelled() {
                        return (start_index, BatchStatus::Cancelled);
                    }

                    let status = self.translate_one_batch(&batch, &token).await;

                    if !matches!(status, BatchStatus::Cancelled) {
                        let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                        progress.send(
                            ProgressEvent::stage(
                                Stage::Translating,
                                done as f64 / total_batches as f64,
                            )
                            .with_counts(done, total_batches)
                            .with_batch_start(start_index),
                        );
                    }
                    (start_index, status)
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        // Completion order never affects output order.
        results.sort_by_key(|(start_index, _)| *start_index);

        let mut outcome = TranslationOutcome::default();
        for (start_index, status) in results {
            match status {
                BatchStatus::Done(segments) => outcome.segments.extend(segments),
                BatchStatus::Fallback(segments, warning) => {
                    progress.send(
                        ProgressEvent::stage(Stage::Translating, 1.0)
                            .with_batch_start(start_index)
                            .with_warning(warning.clone()),
                    );
                    outcome.warnings.push(warning);
                    outcome.segments.extend(segments);
                }
                BatchStatus::Cancelled => outcome.cancelled = true,
            }
        }
        outcome.cancelled |= token.is_cancelled();

        info!(
            "Translation finished: {} segments, {} warnings, cancelled={}",
            outcome.segments.len(),
            outcome.warnings.len(),
            outcome.cancelled
        );
        outcome
    }

    /// Translate one batch with bounded exponential backoff.
    async fn translate_one_batch(&self, batch: &ReviewBatch, token: &CancelToken) -> BatchStatus {
        let texts: Vec<&str> = batch.segments.iter().map(|s| s.text.as_str()).collect();
        let before: Vec<&str> = batch.context_before.iter().map(|s| s.text.as_str()).collect();
        let after: Vec<&str> = batch.context_after.iter().map(|s| s.text.as_str()).collect();

        let mut last_error = String::new();
        for attempt in 0..=self.max_retries {
            if token.is_cancelled() {
                return BatchStatus::Cancelled;
            }
            if attempt > 0 {
                let delay = self.retry_base_delay * 2u32.pow(attempt - 1);
                debug!(
                    "Retrying batch [{}-{}] (attempt {}) after {:?}",
                    batch.start_index, batch.end_index, attempt, delay
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = token.cancelled() => return BatchStatus::Cancelled,
                }
            }

            let call = self
                .translator
                .translate_batch(&texts, &before, &after, &batch.target_lang);
            let result = tokio::select! {
                r = call => r,
                _ = token.cancelled() => Err(SubgenError::Cancelled),
            };

            match result {
                Ok(translated) => {
                    let segments = batch
                        .segments
                        .iter()
                        .zip(translated)
                        .map(|(segment, text)| {
                            let mut out = segment.clone();
                            // An empty provider line keeps the original text.
                            if !text.trim().is_empty() {
                                out.text = text;
                            }
                            out
                        })
                        .collect();
                    return BatchStatus::Done(segments);
                }
                Err(SubgenError::Cancelled) => return BatchStatus::Cancelled,
                Err(e) => {
                    warn!(
                        "Batch [{}-{}] attempt {} failed: {}",
                        batch.start_index,
                        batch.end_index,
                        attempt + 1,
                        e
                    );
                    last_error = e.to_string();
                }
            }
        }

        // Never drop segments: fall back to the original-language text.
        let warning = format!(
            "Batch [{}-{}] failed after {} attempts, keeping original text: {}",
            batch.start_index,
            batch.end_index,
            self.max_retries + 1,
            last_error
        );
        BatchStatus::Fallback(batch.segments.clone(), warning)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use async_trait::async_trait;
    use std::time::Duration as StdDuration;

    struct UppercaseTranslator;

    #[async_trait]
    impl Translator for UppercaseTranslator {
        async fn translate_batch(
            &self,
            texts: &[&str],
            _context_before: &[&str],
            _context_after: &[&str],
            _target_lang: &str,
        ) -> Result<Vec<String>> {
            Ok(texts.iter().map(|t| t.to_uppercase()).collect())
        }

        fn name(&self) -> &'static str {
            "uppercase"
        }
    }

    fn make_segments(count: usize) -> Vec<SrtSegment> {
        (1..=count)
            .map(|i| SrtSegment {
                index: i,
                start: StdDuration::from_secs(i as u64 * 2),
                end: StdDuration::from_secs(i as u64 * 2 + 1),
                text: format!("line {i}"),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_all_segments_translated_in_order() {
        let translator = BatchTranslator::new(
            Arc::new(UppercaseTranslator),
            BatchPolicy {
                max_segments: 3,
                max_chars: 10_000,
                context_window: 1,
            },
            4,
        );

        let segments = make_segments(8);
        let token = CancelToken::new();
        let outcome = translator
            .translate_segments(&segments, "es", &token, &ProgressSender::discard())
            .await;

        assert!(!outcome.cancelled);
        assert!(outcome.warnings.is_empty());
        assert_eq!(outcome.segments.len(), 8);
        for (i, segment) in outcome.segments.iter().enumerate() {
            assert_eq!(segment.index, i + 1);
            assert_eq!(segment.text, format!("LINE {}", i + 1));
        }
    }

    #[tokio::test]
    async fn test_empty_input() {
        let translator =
            BatchTranslator::new(Arc::new(UppercaseTranslator), BatchPolicy::default(), 2);
        let outcome = translator
            .translate_segments(&[], "es", &CancelToken::new(), &ProgressSender::discard())
            .await;
        assert!(outcome.segments.is_empty());
        assert!(!outcome.cancelled);
    }

    #[tokio::test]
    async fn test_empty_provider_line_keeps_original_text() {
        struct BlankTranslator;

        #[async_trait]
        impl Translator for BlankTranslator {
            async fn translate_batch(
                &self,
                texts: &[&str],
                _b: &[&str],
                _a: &[&str],
                _lang: &str,
            ) -> Result<Vec<String>> {
                Ok(vec![String::new(); texts.len()])
            }

            fn name(&self) -> &'static str {
                "blank"
            }
        }

        let translator =
            BatchTranslator::new(Arc::new(BlankTranslator), BatchPolicy::default(), 1);
        let segments = make_segments(2);
        let outcome = translator
            .translate_segments(&segments, "fr", &CancelToken::new(), &ProgressSender::discard())
            .await;
        assert_eq!(outcome.segments[0].text, "line 1");
        assert_eq!(outcome.segments[1].text, "line 2");
    }
}
