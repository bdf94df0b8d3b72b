//! Conversion of step content back into prompt messages.

use std::sync::Arc;

use crate::error::RociError;
use crate::types::{AgentToolCall, AgentToolResult, ContentPart, ModelMessage, Role, StepContent};

/// Maps a step's content into the messages appended to the next prompt.
pub type MessageConverter =
    Arc<dyn Fn(&[StepContent]) -> Result<Vec<ModelMessage>, RociError> + Send + Sync>;

/// Converter backed by [`to_response_messages`].
pub fn default_converter() -> MessageConverter {
    Arc::new(|content| Ok(to_response_messages(content)))
}

/// Build response messages from step content.
///
/// Produces one assistant message holding text, reasoning, files and tool
/// calls, followed by one tool message holding tool results and errors, each
/// only when non-empty. Sources are not replayed. Preliminary tool results are
/// skipped.
pub fn to_response_messages(content: &[StepContent]) -> Vec<ModelMessage> {
    let mut assistant = Vec::new();
    let mut tool = Vec::new();

    for part in content {
        match part {
            StepContent::Text { text, .. } if !text.is_empty() => {
                assistant.push(ContentPart::Text { text: text.clone() });
            }
            StepContent::Reasoning { text, .. } if !text.is_empty() => {
                assistant.push(ContentPart::Reasoning { text: text.clone() });
            }
            StepContent::File(file) => assistant.push(ContentPart::File {
                media_type: file.media_type.clone(),
                data: file.data.clone(),
            }),
            StepContent::ToolCall(call) => assistant.push(ContentPart::ToolCall(AgentToolCall {
                id: call.tool_call_id.clone(),
                name: call.tool_name.clone(),
                arguments: call.input.clone(),
            })),
            StepContent::ToolResult(result) if result.preliminary != Some(true) => {
                tool.push(ContentPart::ToolResult(AgentToolResult {
                    tool_call_id: result.tool_call_id.clone(),
                    result: result.output.clone(),
                    is_error: false,
                }));
            }
            StepContent::ToolError(error) => tool.push(ContentPart::ToolResult(AgentToolResult {
                tool_call_id: error.tool_call_id.clone(),
                result: error.error.clone(),
                is_error: true,
            })),
            _ => {}
        }
    }

    let mut messages = Vec::new();
    if !assistant.is_empty() {
        messages.push(ModelMessage::new(Role::Assistant, assistant));
    }
    if !tool.is_empty() {
        messages.push(ModelMessage::new(Role::Tool, tool));
    }
    messages
}
