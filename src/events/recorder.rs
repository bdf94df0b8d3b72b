//! Records a full stream for diagnostics and tests.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::{Stream, StreamExt};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::RociError;
use crate::types::TextStreamPart;

/// Ordering rule broken by a recorded stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum OrderingViolation {
    #[error("missing start")]
    MissingStart,
    #[error("start emitted {0} times")]
    RepeatedStart(usize),
    #[error("missing start-step")]
    MissingStartStep,
    #[error("start-step precedes start")]
    StartStepBeforeStart,
    #[error("finish-step after terminal event")]
    FinishStepAfterTerminal,
    #[error("{0} terminal events")]
    RepeatedTerminal(usize),
}

/// Counts of common part kinds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventCounters {
    pub starts: usize,
    pub start_steps: usize,
    pub finish_steps: usize,
    pub finishes: usize,
    pub aborts: usize,
    pub errors: usize,
    pub text_starts: usize,
    pub text_deltas: usize,
    pub text_ends: usize,
    pub reasoning_deltas: usize,
    pub tool_inputs: usize,
    pub tool_calls: usize,
    pub tool_results: usize,
}

#[derive(Default)]
struct Recording {
    parts: Vec<TextStreamPart>,
    error: Option<RociError>,
}

/// Attaches to a full stream and keeps every part it yields.
///
/// Recording runs on its own task; dropping the recorder stops it without
/// affecting the source run.
pub struct EventRecorder {
    recording: Arc<Mutex<Recording>>,
    finished: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Default for EventRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRecorder {
    pub fn new() -> Self {
        let (finished, _) = watch::channel(false);
        Self {
            recording: Arc::new(Mutex::new(Recording::default())),
            finished,
            task: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Recording> {
        self.recording.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start recording `stream`, replacing any previous recording.
    ///
    /// Must be called from within a tokio runtime.
    pub fn attach<S>(&self, stream: S)
    where
        S: Stream<Item = Result<TextStreamPart, RociError>> + Send + 'static,
    {
        self.cancel();
        *self.lock() = Recording::default();
        self.finished.send_replace(false);

        let recording = Arc::clone(&self.recording);
        let finished = self.finished.clone();
        let task = tokio::spawn(async move {
            let mut stream = std::pin::pin!(stream);
            while let Some(item) = stream.next().await {
                let mut recording = recording.lock().unwrap_or_else(PoisonError::into_inner);
                match item {
                    Ok(part) => recording.parts.push(part),
                    Err(err) => {
                        recording.error = Some(err);
                        break;
                    }
                }
            }
            finished.send_replace(true);
        });
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
    }

    /// Stop recording. The source stream's run is not cancelled.
    pub fn cancel(&self) {
        if let Some(task) = self.task.lock().unwrap_or_else(PoisonError::into_inner).take() {
            task.abort();
        }
    }

    pub fn snapshot(&self) -> Vec<TextStreamPart> {
        self.lock().parts.clone()
    }

    /// Error the source ended with, if any.
    pub fn error(&self) -> Option<RociError> {
        self.lock().error.clone()
    }

    pub fn is_finished(&self) -> bool {
        *self.finished.borrow()
    }

    /// Wait until the source ended. Returns `false` on timeout.
    pub async fn wait_until_finished(&self, timeout: Duration) -> bool {
        let mut rx = self.finished.subscribe();
        // Bound to a local so the borrowed `Ref` is dropped before `rx`.
        let finished = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|finished| *finished)).await,
            Ok(Ok(_))
        );
        finished
    }

    pub fn count(&self, predicate: impl Fn(&TextStreamPart) -> bool) -> usize {
        self.lock().parts.iter().filter(|part| predicate(part)).count()
    }

    pub fn first_index(&self, predicate: impl Fn(&TextStreamPart) -> bool) -> Option<usize> {
        self.lock().parts.iter().position(predicate)
    }

    pub fn last_index(&self, predicate: impl Fn(&TextStreamPart) -> bool) -> Option<usize> {
        self.lock().parts.iter().rposition(predicate)
    }

    pub fn counters(&self) -> EventCounters {
        let recording = self.lock();
        let mut counters = EventCounters::default();
        for part in &recording.parts {
            match part {
                TextStreamPart::Start => counters.starts += 1,
                TextStreamPart::StartStep { .. } => counters.start_steps += 1,
                TextStreamPart::FinishStep { .. } => counters.finish_steps += 1,
                TextStreamPart::Finish { .. } => counters.finishes += 1,
                TextStreamPart::Abort => counters.aborts += 1,
                TextStreamPart::Error { .. } => counters.errors += 1,
                TextStreamPart::TextStart { .. } => counters.text_starts += 1,
                TextStreamPart::TextDelta { .. } => counters.text_deltas += 1,
                TextStreamPart::TextEnd { .. } => counters.text_ends += 1,
                TextStreamPart::ReasoningDelta { .. } => counters.reasoning_deltas += 1,
                TextStreamPart::ToolInputStart { .. }
                | TextStreamPart::ToolInputDelta { .. }
                | TextStreamPart::ToolInputEnd { .. } => counters.tool_inputs += 1,
                TextStreamPart::ToolCall(_) => counters.tool_calls += 1,
                TextStreamPart::ToolResult(_) => counters.tool_results += 1,
                _ => {}
            }
        }
        counters
    }

    /// Check `start < first start-step < last finish-step < terminal`.
    ///
    /// A run aborted before its first step legitimately has no start-step.
    pub fn check_basic_ordering(&self) -> Result<(), OrderingViolation> {
        let recording = self.lock();
        let parts = &recording.parts;

        let starts = parts
            .iter()
            .filter(|part| matches!(part, TextStreamPart::Start))
            .count();
        let Some(start) = parts.iter().position(|part| matches!(part, TextStreamPart::Start))
        else {
            return Err(OrderingViolation::MissingStart);
        };
        if starts > 1 {
            return Err(OrderingViolation::RepeatedStart(starts));
        }

        let terminals = parts.iter().filter(|part| part.is_terminal()).count();
        if terminals > 1 {
            return Err(OrderingViolation::RepeatedTerminal(terminals));
        }
        let terminal = parts.iter().rposition(TextStreamPart::is_terminal);

        match parts
            .iter()
            .position(|part| matches!(part, TextStreamPart::StartStep { .. }))
        {
            Some(start_step) if start_step < start => {
                return Err(OrderingViolation::StartStepBeforeStart)
            }
            Some(_) => {}
            None if matches!(parts.last(), Some(TextStreamPart::Abort)) => {}
            None => return Err(OrderingViolation::MissingStartStep),
        }

        let finish_step = parts
            .iter()
            .rposition(|part| matches!(part, TextStreamPart::FinishStep { .. }));
        if let (Some(finish_step), Some(terminal)) = (finish_step, terminal) {
            if finish_step > terminal {
                return Err(OrderingViolation::FinishStepAfterTerminal);
            }
        }
        Ok(())
    }
}

impl Drop for EventRecorder {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FinishReason, RequestMetadata, Usage};

    fn parts(parts: Vec<TextStreamPart>) -> impl Stream<Item = Result<TextStreamPart, RociError>> {
        futures::stream::iter(parts.into_iter().map(Ok))
    }

    #[tokio::test]
    async fn records_until_source_ends() {
        let recorder = EventRecorder::new();
        recorder.attach(parts(vec![
            TextStreamPart::Start,
            TextStreamPart::StartStep {
                request: RequestMetadata::default(),
                warnings: Vec::new(),
            },
            TextStreamPart::Finish {
                finish_reason: FinishReason::Stop,
                total_usage: Usage::default(),
            },
        ]));
        assert!(recorder.wait_until_finished(Duration::from_secs(1)).await);
        assert_eq!(recorder.snapshot().len(), 3);
        assert_eq!(recorder.counters().finishes, 1);
        assert_eq!(recorder.check_basic_ordering(), Ok(()));
    }

    #[tokio::test]
    async fn repeated_terminal_is_a_violation() {
        let recorder = EventRecorder::new();
        recorder.attach(parts(vec![
            TextStreamPart::Start,
            TextStreamPart::Abort,
            TextStreamPart::Abort,
        ]));
        assert!(recorder.wait_until_finished(Duration::from_secs(1)).await);
        assert_eq!(
            recorder.check_basic_ordering(),
            Err(OrderingViolation::RepeatedTerminal(2))
        );
    }

    #[tokio::test]
    async fn missing_start_is_reported() {
        let recorder = EventRecorder::new();
        recorder.attach(parts(Vec::new()));
        assert!(recorder.wait_until_finished(Duration::from_secs(1)).await);
        assert_eq!(
            recorder.check_basic_ordering(),
            Err(OrderingViolation::MissingStart)
        );
    }
}
