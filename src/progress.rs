//! Progress event stream between the pipeline and its caller.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::Mutex;
use tracing::trace;

/// Pipeline stage labels reported with every progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Created,
    Extracting,
    Segmenting,
    Translating,
    Merging,
    Completed,
    Cancelled,
    Failed,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Stage::Created => "created",
            Stage::Extracting => "extracting",
            Stage::Segmenting => "segmenting",
            Stage::Translating => "translating",
            Stage::Merging => "merging",
            Stage::Completed => "completed",
            Stage::Cancelled => "cancelled",
            Stage::Failed => "failed",
        };
        write!(f, "{label}")
    }
}

/// One progress update, consumed by the caller's UI/IPC layer.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    /// Completion of the current stage in `[0.0, 1.0]`.
    pub percent: f64,
    pub stage: Stage,
    pub current: Option<usize>,
    pub total: Option<usize>,
    /// Incrementally growing rendered subtitle text, when available.
    pub partial_result: Option<String>,
    pub warning: Option<String>,
    pub error: Option<String>,
    /// 1-based index of the first segment of a completed translation batch.
    pub batch_start_index: Option<usize>,
}

impl ProgressEvent {
    pub fn stage(stage: Stage, percent: f64) -> Self {
        Self {
            percent: percent.clamp(0.0, 1.0),
            stage,
            current: None,
            total: None,
            partial_result: None,
            warning: None,
            error: None,
            batch_start_index: None,
        }
    }

    pub fn with_counts(mut self, current: usize, total: usize) -> Self {
        self.current = Some(current);
        self.total = Some(total);
        self
    }

    pub fn with_partial(mut self, partial: impl Into<String>) -> Self {
        self.partial_result = Some(partial.into());
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warning = Some(warning.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_batch_start(mut self, start_index: usize) -> Self {
        self.batch_start_index = Some(start_index);
        self
    }
}

type SharedReceiver = Arc<Mutex<mpsc::Receiver<ProgressEvent>>>;

/// Producer side of the bounded progress channel.
///
/// Sending never blocks: when the consumer lags and the buffer is full, the
/// oldest buffered event is evicted to make room, so the newest snapshot
/// (in particular the terminal `Completed`/`Cancelled`/`Failed` event) is
/// never the one lost.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: mpsc::Sender<ProgressEvent>,
    rx: SharedReceiver,
}

/// Consumer side of the bounded progress channel.
#[derive(Debug)]
pub struct ProgressReceiver {
    rx: SharedReceiver,
}

impl ProgressSender {
    /// Create a bounded progress channel.
    pub fn channel(capacity: usize) -> (Self, ProgressReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        (
            Self {
                tx,
                rx: rx.clone(),
            },
            ProgressReceiver { rx },
        )
    }

    /// Progress sink with no consumer; every event is discarded.
    pub fn discard() -> Self {
        Self::channel(1).0
    }

    pub fn send(&self, event: ProgressEvent) {
        let mut event = event;
        for _ in 0..2 {
            match self.tx.try_send(event) {
                Ok(()) => return,
                Err(TrySendError::Full(returned)) => {
                    event = returned;
                    // Evict the oldest snapshot. A failed try_lock means the
                    // consumer is mid-recv and room is opening up anyway.
                    if let Ok(mut rx) = self.rx.try_lock() {
                        let _ = rx.try_recv();
                    }
                }
                Err(TrySendError::Closed(_)) => return,
            }
        }
        trace!("Dropped progress event under consumer contention");
    }
}

impl ProgressReceiver {
    /// Receive the next event; `None` once every sender is dropped and the
    /// buffer is drained.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.rx.lock().await.recv().await
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        self.rx.try_lock().ok()?.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_labels() {
        assert_eq!(Stage::Extracting.to_string(), "extracting");
        assert_eq!(Stage::Cancelled.to_string(), "cancelled");
    }

    #[test]
    fn test_percent_is_clamped() {
        assert_eq!(ProgressEvent::stage(Stage::Created, 1.7).percent, 1.0);
        assert_eq!(ProgressEvent::stage(Stage::Created, -0.2).percent, 0.0);
    }

    #[tokio::test]
    async fn test_events_flow_through_channel() {
        let (tx, mut rx) = ProgressSender::channel(4);
        tx.send(ProgressEvent::stage(Stage::Translating, 0.5).with_counts(1, 2));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.stage, Stage::Translating);
        assert_eq!(event.current, Some(1));
        assert_eq!(event.total, Some(2));
    }

    #[tokio::test]
    async fn test_full_buffer_keeps_newest_event() {
        let (tx, mut rx) = ProgressSender::channel(1);
        for i in 0..10 {
            tx.send(ProgressEvent::stage(Stage::Segmenting, i as f64 / 10.0));
        }
        // The oldest snapshots were evicted; the last one sent survives.
        let event = rx.recv().await.unwrap();
        assert_eq!(event.percent, 0.9);
        assert!(rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_terminal_event_survives_lagging_consumer() {
        let (tx, mut rx) = ProgressSender::channel(2);
        tx.send(ProgressEvent::stage(Stage::Translating, 0.3));
        tx.send(ProgressEvent::stage(Stage::Translating, 0.6));
        tx.send(ProgressEvent::stage(Stage::Completed, 1.0));
        drop(tx);

        let mut saw_terminal = false;
        while let Some(event) = rx.recv().await {
            if event.stage == Stage::Completed {
                saw_terminal = true;
            }
        }
        assert!(saw_terminal, "terminal event must outlive buffer pressure");
    }
}
