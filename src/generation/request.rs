//! Request payload and callbacks for a streaming run.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::RociStreamConfig;
use crate::convert::{default_converter, MessageConverter};
use crate::error::RociError;
use crate::stop::{default_stop_conditions, StopCondition};
use crate::stream_transform::StreamTransform;
use crate::types::{
    FinishReason, GenerationSettings, ModelMessage, StepResult, TextStreamPart, Usage,
};

/// Unique run identifier.
pub type RunId = Uuid;

/// Summary delivered to `on_finish` and returned by `wait_for_finish`.
#[derive(Debug, Clone, PartialEq)]
pub struct FinishEvent {
    pub final_step: StepResult,
    pub steps: Vec<StepResult>,
    pub total_usage: Usage,
    pub finish_reason: FinishReason,
}

pub type OnChunkFn = Arc<dyn Fn(&TextStreamPart) + Send + Sync>;
pub type OnStepFinishFn = Arc<dyn Fn(&StepResult) + Send + Sync>;
pub type OnFinishFn = Arc<dyn Fn(&FinishEvent) + Send + Sync>;
pub type OnAbortFn = Arc<dyn Fn(&[StepResult]) + Send + Sync>;
pub type OnErrorFn = Arc<dyn Fn(&RociError) + Send + Sync>;

/// Optional observers invoked from the orchestrator as the run progresses.
#[derive(Clone, Default)]
pub struct StreamCallbacks {
    /// Content-bearing parts only (deltas, tool activity, sources, raw).
    pub on_chunk: Option<OnChunkFn>,
    pub on_step_finish: Option<OnStepFinishFn>,
    /// Called once when the run finishes normally with at least one step.
    pub on_finish: Option<OnFinishFn>,
    pub on_abort: Option<OnAbortFn>,
    pub on_error: Option<OnErrorFn>,
}

/// Request payload to start a streaming run.
#[derive(Clone)]
pub struct StreamTextRequest {
    pub run_id: RunId,
    pub system: Option<String>,
    pub messages: Vec<ModelMessage>,
    pub settings: GenerationSettings,
    pub stop_conditions: Vec<Arc<dyn StopCondition>>,
    pub converter: MessageConverter,
    /// External abort signal; cancelling it aborts the run.
    pub abort_signal: Option<CancellationToken>,
    pub transforms: Vec<Arc<dyn StreamTransform>>,
    pub callbacks: StreamCallbacks,
    pub config: RociStreamConfig,
}

impl StreamTextRequest {
    pub fn new(messages: Vec<ModelMessage>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            system: None,
            messages,
            settings: GenerationSettings::default(),
            stop_conditions: default_stop_conditions(),
            converter: default_converter(),
            abort_signal: None,
            transforms: Vec::new(),
            callbacks: StreamCallbacks::default(),
            config: RociStreamConfig::global().clone(),
        }
    }

    /// Single user message prompt.
    pub fn prompt(text: impl Into<String>) -> Self {
        Self::new(vec![ModelMessage::user(text)])
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_settings(mut self, settings: GenerationSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Replace the stop conditions. An empty list falls back to one step.
    pub fn stop_when(mut self, conditions: Vec<Arc<dyn StopCondition>>) -> Self {
        self.stop_conditions = if conditions.is_empty() {
            default_stop_conditions()
        } else {
            conditions
        };
        self
    }

    pub fn with_converter(mut self, converter: MessageConverter) -> Self {
        self.converter = converter;
        self
    }

    pub fn with_abort_signal(mut self, token: CancellationToken) -> Self {
        self.abort_signal = Some(token);
        self
    }

    pub fn with_transform(mut self, transform: Arc<dyn StreamTransform>) -> Self {
        self.transforms.push(transform);
        self
    }

    pub fn with_config(mut self, config: RociStreamConfig) -> Self {
        self.config = config;
        self
    }

    pub fn on_chunk(mut self, f: impl Fn(&TextStreamPart) + Send + Sync + 'static) -> Self {
        self.callbacks.on_chunk = Some(Arc::new(f));
        self
    }

    pub fn on_step_finish(mut self, f: impl Fn(&StepResult) + Send + Sync + 'static) -> Self {
        self.callbacks.on_step_finish = Some(Arc::new(f));
        self
    }

    pub fn on_finish(mut self, f: impl Fn(&FinishEvent) + Send + Sync + 'static) -> Self {
        self.callbacks.on_finish = Some(Arc::new(f));
        self
    }

    pub fn on_abort(mut self, f: impl Fn(&[StepResult]) + Send + Sync + 'static) -> Self {
        self.callbacks.on_abort = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&RociError) + Send + Sync + 'static) -> Self {
        self.callbacks.on_error = Some(Arc::new(f));
        self
    }

    /// The prompt of the first step: system message (if any) then `messages`.
    pub(crate) fn initial_prompt(&self) -> Vec<ModelMessage> {
        self.system
            .iter()
            .map(ModelMessage::system)
            .chain(self.messages.iter().cloned())
            .collect()
    }
}
