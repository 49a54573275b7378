pub mod batch;
pub mod gemini;

use async_trait::async_trait;

use crate::error::Result;
use crate::subtitle::SrtSegment;

pub use batch::{BatchTranslator, TranslationOutcome};
pub use gemini::GeminiTranslator;

/// Translation provider seam. Context slices are sent for disambiguation
/// only; implementations must return exactly one translation per core text
/// and discard any translated context.
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate_batch(
        &self,
        texts: &[&str],
        context_before: &[&str],
        context_after: &[&str],
        target_lang: &str,
    ) -> Result<Vec<String>>;

    fn name(&self) -> &'static str;
}

/// Batching bounds for provider requests.
#[derive(Debug, Clone)]
pub struct BatchPolicy {
    /// Maximum segments per batch.
    pub max_segments: usize,
    /// Maximum combined character length per batch.
    pub max_chars: usize,
    /// Neighboring segments included as context on each side.
    pub context_window: usize,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            max_segments: 8,
            max_chars: 1600,
            context_window: 2,
        }
    }
}

/// A contiguous slice of segments to translate together, with bounded
/// windows of the neighboring *original* segments as context.
///
/// Core ranges of distinct batches never overlap; context windows may
/// overlap neighboring cores but are never translated twice.
#[derive(Debug, Clone)]
pub struct ReviewBatch {
    /// 1-based index of the first core segment.
    pub start_index: usize,
    /// 1-based index of the last core segment, inclusive.
    pub end_index: usize,
    pub segments: Vec<SrtSegment>,
    pub context_before: Vec<SrtSegment>,
    pub context_after: Vec<SrtSegment>,
    pub target_lang: String,
}

/// Partition segments into context-aware batches.
///
/// Batches are bounded by both segment count and combined character length,
/// preserve chronological order, and their core ranges exactly cover the
/// input with no overlap. Context windows are sliced from the original
/// neighboring segments so context stays stable across retries.
pub fn plan_batches(
    segments: &[SrtSegment],
    policy: &BatchPolicy,
    target_lang: &str,
) -> Vec<ReviewBatch> {
    let mut batches = Vec::new();
    let mut core_start = 0;

    while core_start < segments.len() {
        let mut core_end = core_start;
        let mut chars = 0;

        while core_end < segments.len() && core_end - core_start < policy.max_segments.max(1) {
            let len = segments[core_end].text.chars().count();
            // Always admit at least one segment, even an oversized one.
            if core_end > core_start && chars + len > policy.max_chars {
                break;
            }
            chars += len;
            core_end += 1;
        }

        let before_start = core_start.saturating_sub(policy.context_window);
        let after_end = (core_end + policy.context_window).min(segments.len());

        batches.push(ReviewBatch {
            start_index: segments[core_start].index,
            end_index: segments[core_end - 1].index,
            segments: segments[core_start..core_end].to_vec(),
            context_before: segments[before_start..core_start].to_vec(),
            context_after: segments[core_end..after_end].to_vec(),
            target_lang: target_lang.to_string(),
        });

        core_start = core_end;
    }

    batches
}
