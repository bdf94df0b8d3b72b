//! One-line-per-event rendering of a full stream.

use std::sync::Arc;

use bon::Builder;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};

use crate::error::RociError;
use crate::types::{GeneratedFile, Source, TextStreamPart};

use super::{event_stream, RunEvent};

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Options that control how events are rendered.
#[derive(Clone, Builder)]
pub struct LogOptions {
    /// Prefix each line with `[<unix seconds>.<millis>]`.
    #[builder(default)]
    pub include_timestamps: bool,
    /// Written after the timestamp, before the message.
    pub prefix: Option<String>,
    /// Appended to every line.
    #[builder(default = "\n".to_string())]
    pub line_terminator: String,
    #[builder(default = default_clock())]
    pub clock: Clock,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

fn default_clock() -> Clock {
    Arc::new(Utc::now)
}

/// Renders [`RunEvent`]s as log lines.
pub struct LogEncoder {
    options: LogOptions,
    step: usize,
}

impl LogEncoder {
    pub fn new(options: LogOptions) -> Self {
        Self { options, step: 0 }
    }

    pub fn encode(&mut self, event: &RunEvent) -> Vec<String> {
        let step = self.step;
        let message = match event {
            RunEvent::Start => {
                self.step = 0;
                "stream:start".to_string()
            }
            RunEvent::StartStep { index, warnings } => {
                self.step = *index;
                let mut lines = vec![self.format(&format!("step {index}:start"))];
                for warning in warnings {
                    lines.push(self.format(&format!("step {index}:warning {warning}")));
                }
                return lines;
            }
            RunEvent::TextDelta { id, text } => format!("step {step}:text[{id}] += {text}"),
            RunEvent::TextEnd { id } => format!("step {step}:text[{id}] end"),
            RunEvent::ReasoningDelta { id, text } => {
                format!("step {step}:reasoning[{id}] += {text}")
            }
            RunEvent::ToolCall(call) => format!(
                "step {step}:tool-call {} [{}] input={}",
                call.tool_name, call.tool_call_id, call.input
            ),
            RunEvent::ToolResult(result) => format!(
                "step {step}:tool-result {} [{}] result={}",
                result.tool_name, result.tool_call_id, result.output
            ),
            RunEvent::ToolError(error) => format!(
                "step {step}:tool-error {} [{}] error={}",
                error.tool_name, error.tool_call_id, error.error
            ),
            RunEvent::Source(source) => format!("source {}", describe_source(source)),
            RunEvent::File(file) => format!("file {}", describe_file(file)),
            RunEvent::Finish {
                finish_reason,
                usage,
            } => format!("stream:finish reason={finish_reason} {}", usage.log_description())
                .trim_end()
                .to_string(),
            RunEvent::Abort => "stream:abort".to_string(),
        };
        vec![self.format(&message)]
    }

    fn format(&self, message: &str) -> String {
        let mut components = Vec::new();
        if self.options.include_timestamps {
            let now = (self.options.clock)();
            components.push(format!(
                "[{}.{:03}]",
                now.timestamp(),
                now.timestamp_subsec_millis()
            ));
        }
        if let Some(prefix) = self.options.prefix.as_deref().filter(|p| !p.is_empty()) {
            components.push(prefix.to_string());
        }
        components.push(message.to_string());
        components.join(" ") + &self.options.line_terminator
    }
}

fn describe_source(source: &Source) -> String {
    match source {
        Source::Url { id, url, title, .. } => {
            format!("[{id}] url={url} title={}", title.as_deref().unwrap_or(""))
        }
        Source::Document {
            id,
            media_type,
            title,
            ..
        } => format!("[{id}] document type={media_type} title={title}"),
    }
}

fn describe_file(file: &GeneratedFile) -> String {
    match file.bytes() {
        Ok(bytes) => format!("type={} size={}", file.media_type, bytes.len()),
        Err(_) => format!("type={} size=?", file.media_type),
    }
}

/// Render a full stream as log lines. Each line carries its terminator.
pub fn log_stream<S>(
    stream: S,
    options: LogOptions,
) -> BoxStream<'static, Result<String, RociError>>
where
    S: Stream<Item = Result<TextStreamPart, RociError>> + Send + 'static,
{
    let lines = async_stream::stream! {
        let mut encoder = LogEncoder::new(options);
        let mut events = event_stream(stream);
        while let Some(event) = events.next().await {
            match event {
                Ok(event) => {
                    for line in encoder.encode(&event) {
                        yield Ok(line);
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
    };
    Box::pin(lines)
}

/// Render a full stream and hand every line to `on_line`.
pub async fn log_events<S, F>(
    stream: S,
    options: LogOptions,
    mut on_line: F,
) -> Result<(), RociError>
where
    S: Stream<Item = Result<TextStreamPart, RociError>> + Send + 'static,
    F: FnMut(String),
{
    let mut lines = log_stream(stream, options);
    while let Some(line) = lines.next().await {
        on_line(line?);
    }
    Ok(())
}
