//! Step results and request/response metadata.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::content::{
    GeneratedFile, ProviderMetadata, Source, StepContent, ToolCall, ToolError, ToolResult,
};
use super::generation::{CallWarning, FinishReason};
use super::message::ModelMessage;
use super::usage::Usage;

/// Request information reported by the provider for one call.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RequestMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

/// Response identity captured while a step streams.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseMetadata {
    pub id: String,
    pub model_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
}

/// Response information for a step, including the messages derived from it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepResponse {
    #[serde(flatten)]
    pub metadata: ResponseMetadata,
    /// Messages appended to the prompt of any following step.
    pub messages: Vec<ModelMessage>,
}

/// Immutable snapshot of one completed step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepResult {
    pub content: Vec<StepContent>,
    pub finish_reason: FinishReason,
    /// Usage for this step only.
    pub usage: Usage,
    pub warnings: Vec<CallWarning>,
    pub request: RequestMetadata,
    pub response: StepResponse,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_metadata: Option<ProviderMetadata>,
}

impl StepResult {
    /// Concatenated text parts.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                StepContent::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Reasoning parts in order.
    pub fn reasoning(&self) -> Vec<&str> {
        self.content
            .iter()
            .filter_map(|part| match part {
                StepContent::Reasoning { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// All reasoning joined, or `None` when the step produced none.
    pub fn reasoning_text(&self) -> Option<String> {
        let parts = self.reasoning();
        (!parts.is_empty()).then(|| parts.concat())
    }

    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.content
            .iter()
            .filter_map(|part| match part {
                StepContent::ToolCall(call) => Some(call.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn tool_results(&self) -> Vec<ToolResult> {
        self.content
            .iter()
            .filter_map(|part| match part {
                StepContent::ToolResult(result) => Some(result.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn tool_errors(&self) -> Vec<ToolError> {
        self.content
            .iter()
            .filter_map(|part| match part {
                StepContent::ToolError(error) => Some(error.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn sources(&self) -> Vec<Source> {
        self.content
            .iter()
            .filter_map(|part| match part {
                StepContent::Source(source) => Some(source.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn files(&self) -> Vec<GeneratedFile> {
        self.content
            .iter()
            .filter_map(|part| match part {
                StepContent::File(file) => Some(file.clone()),
                _ => None,
            })
            .collect()
    }
}
