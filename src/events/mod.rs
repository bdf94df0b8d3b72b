//! High-level run events derived from a full stream.
//!
//! [`event_stream`] drops framing-only parts (`text-start`, tool input
//! deltas, `finish-step`, raw values) and numbers steps from zero, so loggers
//! and summaries only deal with what a reader cares about.

pub mod log;
pub mod recorder;

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::error::RociError;
use crate::types::{
    CallWarning, FinishReason, GeneratedFile, Source, TextStreamPart, ToolCall, ToolError,
    ToolResult, Usage,
};

pub use log::{log_events, log_stream, LogOptions};
pub use recorder::{EventCounters, EventRecorder, OrderingViolation};

/// Event stream produced by [`event_stream`].
pub type RunEventStream = BoxStream<'static, Result<RunEvent, RociError>>;

/// High-level event emitted while observing a full stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RunEvent {
    Start,
    StartStep {
        index: usize,
        warnings: Vec<CallWarning>,
    },
    TextDelta {
        id: String,
        text: String,
    },
    TextEnd {
        id: String,
    },
    ReasoningDelta {
        id: String,
        text: String,
    },
    ToolCall(ToolCall),
    ToolResult(ToolResult),
    ToolError(ToolError),
    Source(Source),
    File(GeneratedFile),
    Finish {
        finish_reason: FinishReason,
        usage: Usage,
    },
    Abort,
}

/// Stateful mapping from canonical parts to [`RunEvent`]s.
#[derive(Debug, Default)]
pub struct EventEncoder {
    step: Option<usize>,
    terminated: bool,
}

impl EventEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the step in progress, if any step started.
    pub fn current_step(&self) -> Option<usize> {
        self.step
    }

    pub fn encode(&mut self, part: TextStreamPart) -> Option<RunEvent> {
        match part {
            TextStreamPart::Start => {
                self.step = None;
                self.terminated = false;
                Some(RunEvent::Start)
            }
            TextStreamPart::StartStep { warnings, .. } => {
                let index = self.step.map_or(0, |step| step + 1);
                self.step = Some(index);
                Some(RunEvent::StartStep { index, warnings })
            }
            TextStreamPart::TextDelta { id, text, .. } => Some(RunEvent::TextDelta { id, text }),
            TextStreamPart::TextEnd { id, .. } => Some(RunEvent::TextEnd { id }),
            TextStreamPart::ReasoningDelta { id, text, .. } => {
                Some(RunEvent::ReasoningDelta { id, text })
            }
            TextStreamPart::ToolCall(call) => Some(RunEvent::ToolCall(call)),
            TextStreamPart::ToolResult(result) => Some(RunEvent::ToolResult(result)),
            TextStreamPart::ToolError(error) => Some(RunEvent::ToolError(error)),
            TextStreamPart::Source(source) => Some(RunEvent::Source(source)),
            TextStreamPart::File(file) => Some(RunEvent::File(file)),
            TextStreamPart::Finish {
                finish_reason,
                total_usage,
            } => {
                self.terminated = true;
                Some(RunEvent::Finish {
                    finish_reason,
                    usage: total_usage,
                })
            }
            TextStreamPart::Abort => {
                self.terminated = true;
                Some(RunEvent::Abort)
            }
            TextStreamPart::TextStart { .. }
            | TextStreamPart::ReasoningStart { .. }
            | TextStreamPart::ReasoningEnd { .. }
            | TextStreamPart::ToolInputStart { .. }
            | TextStreamPart::ToolInputDelta { .. }
            | TextStreamPart::ToolInputEnd { .. }
            | TextStreamPart::FinishStep { .. }
            | TextStreamPart::Error { .. }
            | TextStreamPart::Raw { .. } => None,
        }
    }

    /// Implicit terminal event for a source that ended without one.
    pub fn finalize(&mut self) -> Option<RunEvent> {
        if self.terminated {
            return None;
        }
        self.terminated = true;
        Some(RunEvent::Finish {
            finish_reason: FinishReason::Unknown,
            usage: Usage::default(),
        })
    }
}

/// Map a full stream into [`RunEvent`]s.
///
/// A source that ends cleanly without `finish` or `abort` yields an implicit
/// `Finish { Unknown, empty usage }`. A source error is forwarded and ends
/// the event stream.
pub fn event_stream<S>(stream: S) -> RunEventStream
where
    S: Stream<Item = Result<TextStreamPart, RociError>> + Send + 'static,
{
    let events = async_stream::stream! {
        let mut encoder = EventEncoder::new();
        let mut inner = std::pin::pin!(stream);
        while let Some(item) = inner.next().await {
            match item {
                Ok(part) => {
                    if let Some(event) = encoder.encode(part) {
                        yield Ok(event);
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
        if let Some(event) = encoder.finalize() {
            yield Ok(event);
        }
    };
    Box::pin(events)
}

/// Aggregate of an event stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventSummary {
    pub text: String,
    pub reasoning: Vec<String>,
    pub tool_calls: Vec<ToolCall>,
    pub tool_results: Vec<ToolResult>,
    pub tool_errors: Vec<ToolError>,
    pub files: Vec<GeneratedFile>,
    pub sources: Vec<Source>,
    pub steps: usize,
    pub finish_reason: Option<FinishReason>,
    pub usage: Option<Usage>,
    pub aborted: bool,
}

/// Consume an event stream and aggregate its content.
pub async fn summarize_events<S>(stream: S) -> Result<EventSummary, RociError>
where
    S: Stream<Item = Result<RunEvent, RociError>>,
{
    let mut summary = EventSummary::default();
    let mut stream = std::pin::pin!(stream);
    while let Some(event) = stream.next().await {
        match event? {
            RunEvent::Start | RunEvent::TextEnd { .. } => {}
            RunEvent::StartStep { .. } => summary.steps += 1,
            RunEvent::TextDelta { text, .. } => summary.text.push_str(&text),
            RunEvent::ReasoningDelta { text, .. } => summary.reasoning.push(text),
            RunEvent::ToolCall(call) => summary.tool_calls.push(call),
            RunEvent::ToolResult(result) => summary.tool_results.push(result),
            RunEvent::ToolError(error) => summary.tool_errors.push(error),
            RunEvent::Source(source) => summary.sources.push(source),
            RunEvent::File(file) => summary.files.push(file),
            RunEvent::Finish {
                finish_reason,
                usage,
            } => {
                summary.finish_reason = Some(finish_reason);
                summary.usage = Some(usage);
            }
            RunEvent::Abort => summary.aborted = true,
        }
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RequestMetadata;

    fn start_step() -> TextStreamPart {
        TextStreamPart::StartStep {
            request: RequestMetadata::default(),
            warnings: Vec::new(),
        }
    }

    #[test]
    fn steps_are_numbered_from_zero() {
        let mut encoder = EventEncoder::new();
        assert_eq!(encoder.encode(TextStreamPart::Start), Some(RunEvent::Start));
        assert!(matches!(
            encoder.encode(start_step()),
            Some(RunEvent::StartStep { index: 0, .. })
        ));
        assert!(matches!(
            encoder.encode(start_step()),
            Some(RunEvent::StartStep { index: 1, .. })
        ));
        assert_eq!(encoder.current_step(), Some(1));
    }

    #[test]
    fn framing_parts_are_dropped() {
        let mut encoder = EventEncoder::new();
        assert_eq!(
            encoder.encode(TextStreamPart::TextStart {
                id: "1".into(),
                provider_metadata: None,
            }),
            None
        );
        assert_eq!(
            encoder.encode(TextStreamPart::Raw {
                raw_value: serde_json::json!({}),
            }),
            None
        );
    }

    #[test]
    fn finalize_is_implicit_finish_only_without_terminal() {
        let mut encoder = EventEncoder::new();
        encoder.encode(TextStreamPart::Abort);
        assert_eq!(encoder.finalize(), None);

        let mut encoder = EventEncoder::new();
        assert_eq!(
            encoder.finalize(),
            Some(RunEvent::Finish {
                finish_reason: FinishReason::Unknown,
                usage: Usage::default(),
            })
        );
    }
}
