//! Convenience re-exports for common use.

pub use crate::config::RociStreamConfig;
pub use crate::error::{Result, RociError};
pub use crate::generation::{
    stream_text, FinishEvent, RunPhase, StreamTextRequest, StreamTextResult,
};
pub use crate::provider::{CallOptions, ModelProvider, StreamResponse};
pub use crate::stop::{has_tool_call, step_count_is, StopCondition};
pub use crate::types::{
    FinishReason, GenerationSettings, ModelMessage, ProviderStreamPart, Role, StepResult,
    TextStreamPart, Usage,
};
