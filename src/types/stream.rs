//! Streaming types: raw provider parts and the canonical run vocabulary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::content::{GeneratedFile, ProviderMetadata, Source, ToolCall, ToolError, ToolResult};
use super::generation::{CallWarning, FinishReason};
use super::step::{RequestMetadata, ResponseMetadata};
use super::usage::Usage;

/// Tool call as reported by a provider; `input` is the raw JSON text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderToolCall {
    pub tool_call_id: String,
    pub tool_name: String,
    pub input: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_executed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_metadata: Option<ProviderMetadata>,
}

/// Tool result as reported by a provider (provider-executed tools).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderToolResult {
    pub tool_call_id: String,
    pub tool_name: String,
    pub result: serde_json::Value,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_executed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preliminary: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_metadata: Option<ProviderMetadata>,
}

/// One part of a single step's provider event sequence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ProviderStreamPart {
    StreamStart {
        warnings: Vec<CallWarning>,
    },
    ResponseMetadata {
        id: Option<String>,
        model_id: Option<String>,
        timestamp: Option<DateTime<Utc>>,
    },
    TextStart {
        id: String,
        provider_metadata: Option<ProviderMetadata>,
    },
    TextDelta {
        id: String,
        delta: String,
        provider_metadata: Option<ProviderMetadata>,
    },
    TextEnd {
        id: String,
        provider_metadata: Option<ProviderMetadata>,
    },
    ReasoningStart {
        id: String,
        provider_metadata: Option<ProviderMetadata>,
    },
    ReasoningDelta {
        id: String,
        delta: String,
        provider_metadata: Option<ProviderMetadata>,
    },
    ReasoningEnd {
        id: String,
        provider_metadata: Option<ProviderMetadata>,
    },
    ToolInputStart {
        id: String,
        tool_name: String,
        provider_executed: Option<bool>,
        provider_metadata: Option<ProviderMetadata>,
    },
    ToolInputDelta {
        id: String,
        delta: String,
        provider_metadata: Option<ProviderMetadata>,
    },
    ToolInputEnd {
        id: String,
        provider_metadata: Option<ProviderMetadata>,
    },
    ToolCall(ProviderToolCall),
    ToolResult(ProviderToolResult),
    Source(Source),
    File(GeneratedFile),
    Finish {
        finish_reason: FinishReason,
        usage: Usage,
        provider_metadata: Option<ProviderMetadata>,
    },
    Raw {
        raw_value: serde_json::Value,
    },
    Error {
        error: serde_json::Value,
    },
}

impl ProviderStreamPart {
    pub fn text_start(id: impl Into<String>) -> Self {
        Self::TextStart {
            id: id.into(),
            provider_metadata: None,
        }
    }

    pub fn text_delta(id: impl Into<String>, delta: impl Into<String>) -> Self {
        Self::TextDelta {
            id: id.into(),
            delta: delta.into(),
            provider_metadata: None,
        }
    }

    pub fn text_end(id: impl Into<String>) -> Self {
        Self::TextEnd {
            id: id.into(),
            provider_metadata: None,
        }
    }

    pub fn finish(finish_reason: FinishReason, usage: Usage) -> Self {
        Self::Finish {
            finish_reason,
            usage,
            provider_metadata: None,
        }
    }
}

/// Canonical event published on a run's full stream.
///
/// A run publishes exactly one `Start`, then one `StartStep`/`FinishStep`
/// pair per step, then exactly one terminal `Finish` or `Abort`. A failed run
/// publishes `Error` instead of a terminal event and its subscriptions end
/// with that error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TextStreamPart {
    Start,
    StartStep {
        request: RequestMetadata,
        warnings: Vec<CallWarning>,
    },
    TextStart {
        id: String,
        provider_metadata: Option<ProviderMetadata>,
    },
    TextDelta {
        id: String,
        text: String,
        provider_metadata: Option<ProviderMetadata>,
    },
    TextEnd {
        id: String,
        provider_metadata: Option<ProviderMetadata>,
    },
    ReasoningStart {
        id: String,
        provider_metadata: Option<ProviderMetadata>,
    },
    ReasoningDelta {
        id: String,
        text: String,
        provider_metadata: Option<ProviderMetadata>,
    },
    ReasoningEnd {
        id: String,
        provider_metadata: Option<ProviderMetadata>,
    },
    ToolInputStart {
        id: String,
        tool_name: String,
        provider_executed: Option<bool>,
        provider_metadata: Option<ProviderMetadata>,
    },
    ToolInputDelta {
        id: String,
        delta: String,
        provider_metadata: Option<ProviderMetadata>,
    },
    ToolInputEnd {
        id: String,
        provider_metadata: Option<ProviderMetadata>,
    },
    ToolCall(ToolCall),
    ToolResult(ToolResult),
    ToolError(ToolError),
    Source(Source),
    File(GeneratedFile),
    FinishStep {
        response: ResponseMetadata,
        usage: Usage,
        finish_reason: FinishReason,
        provider_metadata: Option<ProviderMetadata>,
    },
    Finish {
        finish_reason: FinishReason,
        total_usage: Usage,
    },
    Abort,
    Error {
        message: String,
    },
    Raw {
        raw_value: serde_json::Value,
    },
}

impl TextStreamPart {
    /// Whether this part ends the run (`Finish` or `Abort`).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finish { .. } | Self::Abort)
    }

    /// Whether this part carries generated content (forwarded to `on_chunk`).
    pub fn is_chunk(&self) -> bool {
        matches!(
            self,
            Self::TextDelta { .. }
                | Self::ReasoningDelta { .. }
                | Self::Source(_)
                | Self::ToolCall(_)
                | Self::ToolInputStart { .. }
                | Self::ToolInputDelta { .. }
                | Self::ToolResult(_)
                | Self::Raw { .. }
        )
    }

    /// Text of a `TextDelta`, if this is one.
    pub fn text_delta(&self) -> Option<&str> {
        match self {
            Self::TextDelta { text, .. } => Some(text),
            _ => None,
        }
    }
}
